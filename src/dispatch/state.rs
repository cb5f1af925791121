use std::fmt;

use crate::models::ExecutionStatus;

/// Lifecycle of one plugin within a run.
///
/// ```text
/// Pending -> Resolving -> Skipped
///                      -> Running -> Succeeded | Failed
/// ```
///
/// A plugin can also fail while resolving or before it ever starts (run
/// cancelled). Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Pending,
    Resolving,
    Running,
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PluginState,
    pub to: PluginState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plugin state transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl PluginState {
    pub fn can_advance(self, to: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, to),
            (Pending, Resolving)
                | (Pending, Failed)
                | (Resolving, Skipped)
                | (Resolving, Running)
                | (Resolving, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn advance(&mut self, to: PluginState) -> Result<(), InvalidTransition> {
        if !self.can_advance(to) {
            return Err(InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PluginState::Skipped | PluginState::Succeeded | PluginState::Failed
        )
    }

    /// The reported status for a terminal state.
    pub fn status(self) -> Option<ExecutionStatus> {
        match self {
            PluginState::Skipped => Some(ExecutionStatus::Skipped),
            PluginState::Succeeded => Some(ExecutionStatus::Succeeded),
            PluginState::Failed => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}
