//! YAML plugin manifests.
//!
//! A manifest maps plugin ids to their descriptor fields:
//!
//! ```yaml
//! chrome_history_inventory:
//!   name: Chrome History Files
//!   category: Browser
//!   requirements: none
//!   paths:
//!     - "*/com.android.chrome/History.db*"
//!   function: file_inventory
//! ```
//!
//! `function` names an entry in [`EntryPoints`](super::EntryPoints); it is
//! resolved when the registry validates the candidate.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::plugins::{EntryPointRef, PluginCandidate, PluginInfo};

/// A scalar or a list, as manifest authors write both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ManifestEntry {
    pub name: Option<String>,
    pub description: String,
    pub author: String,
    pub version: String,
    pub date: String,
    pub requirements: OneOrMany,
    pub category: String,
    pub notes: String,
    pub paths: OneOrMany,
    pub function: String,
}

/// Plugin entries keyed by id, in file order.
pub type PluginManifest = IndexMap<String, ManifestEntry>;

pub fn parse_manifest(yaml: &str) -> Result<PluginManifest> {
    serde_yaml::from_str(yaml).context("Failed to parse plugin manifest")
}

pub fn load_manifest(path: &Path) -> Result<PluginManifest> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read plugin manifest: {}", path.display()))?;
    let manifest = parse_manifest(&content)
        .context(format!("Invalid plugin manifest: {}", path.display()))?;
    debug!("Loaded {} plugin entries from {}", manifest.len(), path.display());
    Ok(manifest)
}

/// Converts manifest entries into candidates for the registry.
pub fn manifest_candidates(manifest: PluginManifest) -> Vec<PluginCandidate> {
    manifest
        .into_iter()
        .map(|(id, entry)| {
            let requirements = entry
                .requirements
                .into_vec()
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty() && !r.eq_ignore_ascii_case("none"))
                .collect();

            PluginCandidate {
                name: entry.name.unwrap_or_else(|| id.clone()),
                id: id.trim().to_string(),
                patterns: entry.paths.into_vec(),
                category: entry.category,
                entry_point: EntryPointRef::Named(entry.function),
                requirements,
                info: PluginInfo {
                    description: entry.description,
                    author: entry.author,
                    version: entry.version,
                    date: entry.date,
                    notes: entry.notes,
                },
            }
        })
        .collect()
}

/// Reads every manifest in order and concatenates their candidates.
pub fn load_manifests(paths: &[impl AsRef<Path>]) -> Result<Vec<PluginCandidate>> {
    let mut candidates = Vec::new();
    for path in paths {
        candidates.extend(manifest_candidates(load_manifest(path.as_ref())?));
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
sms_inventory:
  name: SMS Database
  author: examiner
  version: "0.2"
  requirements: none
  category: Messages
  paths: "*/SMS/sms.db"
  function: file_inventory
chrome_hashes:
  category: Browser
  requirements: [sqlite, wal]
  paths:
    - "*/com.android.chrome/History.db"
    - "*/com.android.chrome/History.db-wal"
  function: file_hashes
"#;

    #[test]
    fn test_manifest_preserves_order_and_accepts_scalars() {
        let manifest = parse_manifest(MANIFEST).unwrap();
        let ids: Vec<_> = manifest.keys().cloned().collect();
        assert_eq!(ids, vec!["sms_inventory", "chrome_hashes"]);

        let candidates = manifest_candidates(manifest);
        assert_eq!(candidates[0].name, "SMS Database");
        assert_eq!(candidates[0].patterns, vec!["*/SMS/sms.db"]);
        assert!(candidates[0].requirements.is_empty());
        assert_eq!(candidates[0].info.version, "0.2");

        assert_eq!(candidates[1].name, "chrome_hashes");
        assert_eq!(candidates[1].patterns.len(), 2);
        assert_eq!(candidates[1].requirements, vec!["sqlite", "wal"]);
        assert!(matches!(&candidates[1].entry_point, EntryPointRef::Named(f) if f == "file_hashes"));
    }

    #[test]
    fn test_load_manifests_from_files() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("a.yaml");
        let second = temp_dir.path().join("b.yaml");
        fs::write(&first, MANIFEST).unwrap();
        fs::write(&second, "extra:\n  paths: '*.txt'\n  function: file_inventory\n").unwrap();

        let candidates = load_manifests(&[first, second]).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[2].id, "extra");
    }

    #[test]
    fn test_malformed_manifest_is_an_error() {
        assert!(parse_manifest("- just\n- a list\n").is_err());
        let missing = Path::new("/definitely/not/here.yaml");
        assert!(load_manifest(missing).is_err());
    }
}
