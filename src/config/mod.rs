mod env_vars;
mod run_config;

// Re-export run config
pub use run_config::{
    load_or_create_config, DispatchSection, EvidenceSection, OutputSection, PluginsSection,
    RemoteSection, RunConfig, StagingSection,
};

// Re-export environment variable functions
pub use env_vars::{expand_env_vars, parse_unix_env_vars, parse_windows_env_vars};
