use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::env_vars::expand_env_vars;
use crate::constants::{
    default_worker_count, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SUMMARY_NAME,
    DEFAULT_TIMELINE_DB_NAME, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS, STAGING_DIR_PREFIX,
    TOKEN_ENV_VAR,
};
use crate::sources::remote::{RemoteOptions, RetryPolicy};
use crate::sources::SourceKind;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct EvidenceSection {
    /// Directory, archive path or `http(s)://` base URL.
    pub input: Option<String>,
    pub kind: SourceKind,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct StagingSection {
    /// Parent of the staging directory; a per-run temp dir when unset.
    pub root: Option<PathBuf>,
    pub keep: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RemoteSection {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_secs: u64,
    pub verify_connection: bool,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_secs: RETRY_MAX_DELAY_SECS,
            verify_connection: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct DispatchSection {
    pub workers: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PluginsSection {
    /// YAML plugin manifests; the built-in plugins are used when empty.
    pub manifests: Vec<PathBuf>,
    /// Only these plugin ids run, when set.
    pub profile: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
    /// File name of the SQLite timeline; `null` disables it.
    pub timeline_db: Option<String>,
    /// File name of the JSON run summary; `null` disables it.
    pub summary: Option<String>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("evidence_seeker_output"),
            timeline_db: Some(DEFAULT_TIMELINE_DB_NAME.to_string()),
            summary: Some(DEFAULT_SUMMARY_NAME.to_string()),
        }
    }
}

/// Settings for one run over one evidence bundle.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub version: String,
    pub description: String,
    pub evidence: EvidenceSection,
    pub staging: StagingSection,
    pub remote: RemoteSection,
    pub dispatch: DispatchSection,
    pub plugins: PluginsSection,
    pub output: OutputSection,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "Default evidence_seeker run configuration".to_string(),
            evidence: EvidenceSection::default(),
            staging: StagingSection::default(),
            remote: RemoteSection::default(),
            dispatch: DispatchSection::default(),
            plugins: PluginsSection::default(),
            output: OutputSection::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let mut config: RunConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
        config.process_environment_variables();

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Expands `$VAR`, `${VAR}` and `%VAR%` in every path-like field.
    pub fn process_environment_variables(&mut self) {
        let expand_opt = |v: &mut Option<String>| {
            if let Some(s) = v.as_mut() {
                *s = expand_env_vars(s);
            }
        };
        let expand_path = |p: &mut PathBuf| {
            *p = PathBuf::from(expand_env_vars(&p.to_string_lossy()));
        };

        expand_opt(&mut self.evidence.input);
        expand_opt(&mut self.remote.base_url);
        expand_opt(&mut self.remote.token);
        if let Some(root) = self.staging.root.as_mut() {
            expand_path(root);
        }
        self.plugins.manifests.iter_mut().for_each(expand_path);
        expand_path(&mut self.output.dir);
    }

    /// Applies `EVIDENCE_SEEKER_TOKEN` when it is set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_token_override(std::env::var(TOKEN_ENV_VAR).ok());
    }

    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            debug!("Using bearer token from {}", TOKEN_ENV_VAR);
            self.remote.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.workers == Some(0) {
            bail!("dispatch.workers must be at least 1");
        }
        if self.remote.timeout_secs == 0 {
            bail!("remote.timeout_secs must be greater than 0");
        }
        if self.remote.retry_max_delay_secs.saturating_mul(1000) < self.remote.retry_base_delay_ms {
            bail!("remote.retry_max_delay_secs must not be below remote.retry_base_delay_ms");
        }
        Ok(())
    }

    /// The evidence location and its declared kind.
    ///
    /// Falls back to `remote.base_url` when no input is configured.
    pub fn evidence_input(&self) -> Option<(String, SourceKind)> {
        if let Some(input) = self.evidence.input.as_ref().filter(|i| !i.trim().is_empty()) {
            return Some((input.clone(), self.evidence.kind));
        }
        self.remote
            .base_url
            .as_ref()
            .filter(|u| !u.trim().is_empty())
            .map(|url| (url.clone(), SourceKind::Remote))
    }

    pub fn remote_options(&self) -> RemoteOptions {
        RemoteOptions {
            base_url: self.remote.base_url.clone().unwrap_or_default(),
            token: self.remote.token.clone(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.remote.max_retries,
                base_delay: Duration::from_millis(self.remote.retry_base_delay_ms),
                max_delay: Duration::from_secs(self.remote.retry_max_delay_secs),
            },
            verify_connection: self.remote.verify_connection,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.dispatch.workers.unwrap_or_else(default_worker_count).max(1)
    }

    /// Per-run staging directory `evidence_seeker_<run_id>`, under
    /// `staging.root` when set and the system temp dir otherwise.
    pub fn staging_dir(&self, run_id: &str) -> PathBuf {
        let name = format!("{}{}", STAGING_DIR_PREFIX, run_id);
        match &self.staging.root {
            Some(root) => root.join(name),
            None => std::env::temp_dir().join(name),
        }
    }

    pub fn timeline_db_path(&self) -> Option<PathBuf> {
        self.output.timeline_db.as_ref().map(|name| self.output.dir.join(name))
    }

    pub fn summary_path(&self) -> Option<PathBuf> {
        self.output.summary.as_ref().map(|name| self.output.dir.join(name))
    }

    /// Create a default configuration YAML file
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        RunConfig::default().save_to_yaml_file(path)
    }
}

/// Loads the configuration at `config_path`, creating a default file there
/// when it does not exist. Without a path the defaults are used.
///
/// Environment overrides are applied in every case.
pub fn load_or_create_config(config_path: Option<&Path>) -> Result<RunConfig> {
    let mut config = match config_path {
        Some(path) if path.exists() => RunConfig::from_yaml_file(path)?,
        Some(path) => {
            info!("Creating default config at {}", path.display());
            let config = RunConfig::default();
            config.save_to_yaml_file(path)?;
            config
        }
        None => {
            info!("No config path provided, using default configuration");
            RunConfig::default()
        }
    };
    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.yaml");

        let mut config = RunConfig::default();
        config.evidence.input = Some("/cases/phone.zip".into());
        config.evidence.kind = SourceKind::Zip;
        config.plugins.profile = Some(vec!["file_hashes".into()]);
        config.save_to_yaml_file(&path).unwrap();

        let loaded = RunConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
evidence:
  input: https://evidence.local:5000
remote:
  max_retries: 5
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.remote.max_retries, 5);
        assert_eq!(config.remote.timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.evidence.kind, SourceKind::Auto);
        assert_eq!(
            config.timeline_db_path(),
            Some(PathBuf::from("evidence_seeker_output").join(DEFAULT_TIMELINE_DB_NAME))
        );
    }

    #[test]
    fn test_process_environment_variables() {
        std::env::set_var("EVIDENCE_SEEKER_CFG_CASE", "case-7");
        let mut config = RunConfig::default();
        config.evidence.input = Some("/cases/${EVIDENCE_SEEKER_CFG_CASE}/dump.tar".into());
        config.output.dir = PathBuf::from("/reports/$EVIDENCE_SEEKER_CFG_CASE");
        config.process_environment_variables();

        assert_eq!(config.evidence.input.as_deref(), Some("/cases/case-7/dump.tar"));
        assert_eq!(config.output.dir, PathBuf::from("/reports/case-7"));
    }

    #[test]
    fn test_token_override_and_remote_options() {
        let mut config = RunConfig::default();
        config.remote.token = Some("from-file".into());
        config.apply_token_override(Some("  ".into()));
        assert_eq!(config.remote.token.as_deref(), Some("from-file"));
        config.apply_token_override(Some("from-env".into()));

        let options = config.remote_options();
        assert_eq!(options.token.as_deref(), Some("from-env"));
        assert_eq!(options.retry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(options.timeout, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn test_evidence_input_falls_back_to_base_url() {
        let mut config = RunConfig::default();
        assert!(config.evidence_input().is_none());

        config.remote.base_url = Some("http://127.0.0.1:5000".into());
        assert_eq!(
            config.evidence_input(),
            Some(("http://127.0.0.1:5000".to_string(), SourceKind::Remote))
        );

        config.evidence.input = Some("/cases/dir".into());
        assert_eq!(
            config.evidence_input(),
            Some(("/cases/dir".to_string(), SourceKind::Auto))
        );
    }

    #[test]
    fn test_validate() {
        let mut config = RunConfig::default();
        assert!(config.validate().is_ok());
        config.dispatch.workers = Some(0);
        assert!(config.validate().is_err());
        config.dispatch.workers = Some(4);
        assert_eq!(config.worker_count(), 4);
        config.remote.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_extreme_retry_delays() {
        let mut config = RunConfig::default();
        config.remote.retry_max_delay_secs = u64::MAX;
        assert!(config.validate().is_ok());

        config.remote.retry_max_delay_secs = 1;
        config.remote.retry_base_delay_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_create_config_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/new.yaml");

        let loaded = load_or_create_config(Some(&config_path)).unwrap();
        assert!(config_path.exists());
        assert_eq!(loaded.version, "1.0");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "evidence: [unclosed").unwrap();
        assert!(RunConfig::from_yaml_file(&path).is_err());
    }

    #[test]
    fn test_staging_dir_layout() {
        let mut config = RunConfig::default();
        config.staging.root = Some(PathBuf::from("/scratch"));
        assert_eq!(
            config.staging_dir("abc"),
            PathBuf::from("/scratch").join("evidence_seeker_abc")
        );
        assert_ne!(config.staging_dir("abc"), config.staging_dir("def"));

        config.staging.root = None;
        assert_eq!(
            config.staging_dir("abc"),
            std::env::temp_dir().join("evidence_seeker_abc")
        );
    }
}
