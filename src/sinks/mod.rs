//! Shared destinations for plugin output.
//!
//! Both sinks are append-only and safe to share between concurrently
//! running plugins. A plugin's output is appended in one call so it stays
//! contiguous.

pub mod report;
pub mod timeline;

pub use report::{PluginReport, ReportSink};
pub use timeline::{TimelineEntry, TimelineSink};
