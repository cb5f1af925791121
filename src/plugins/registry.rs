use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::PluginLoadError;
use crate::error::SourceError;
use crate::plugins::builtin;
use crate::plugins::{EntryPointRef, EntryPoints, PluginCandidate, PluginDescriptor};
use crate::sources::PatternSet;

/// Validated plugins in load order, with a pattern index over all of them.
#[derive(Debug)]
pub struct PluginRegistry {
    plugins: Vec<Arc<PluginDescriptor>>,
    positions: HashMap<String, usize>,
    pattern_index: PatternSet,
    /// Plugin position for each pattern in `pattern_index`.
    pattern_owner: Vec<usize>,
    warnings: Vec<PluginLoadError>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            positions: HashMap::new(),
            pattern_index: PatternSet::empty(),
            pattern_owner: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Checks one candidate. Only accepted candidates claim their id in `seen`.
fn validate(
    candidate: PluginCandidate,
    entry_points: &EntryPoints,
    seen: &mut HashSet<String>,
) -> Result<PluginDescriptor, PluginLoadError> {
    let id = candidate.id.trim().to_string();
    if id.is_empty() {
        return Err(PluginLoadError::EmptyId);
    }
    if seen.contains(&id) {
        return Err(PluginLoadError::DuplicateId(id));
    }

    let mut patterns: Vec<String> = Vec::with_capacity(candidate.patterns.len());
    for pattern in candidate.patterns {
        let pattern = pattern.trim().to_string();
        if !pattern.is_empty() && !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    if patterns.is_empty() {
        return Err(PluginLoadError::NoPatterns(id));
    }
    PatternSet::build(patterns.iter().map(String::as_str)).map_err(|e| match e {
        SourceError::InvalidPattern { pattern, reason } => PluginLoadError::InvalidPattern {
            id: id.clone(),
            pattern,
            reason,
        },
        other => PluginLoadError::InvalidPattern {
            id: id.clone(),
            pattern: patterns.join(", "),
            reason: other.to_string(),
        },
    })?;

    let entry_point = match candidate.entry_point {
        EntryPointRef::Resolved(plugin) => plugin,
        EntryPointRef::Named(name) => {
            entry_points
                .get(name.trim())
                .ok_or_else(|| PluginLoadError::UnresolvedEntryPoint {
                    id: id.clone(),
                    entry_point: name.clone(),
                })?
        }
    };

    seen.insert(id.clone());
    Ok(PluginDescriptor {
        name: if candidate.name.trim().is_empty() {
            id.clone()
        } else {
            candidate.name
        },
        id,
        patterns,
        category: candidate.category,
        entry_point,
        requirements: candidate.requirements,
        info: candidate.info,
    })
}

impl PluginRegistry {
    /// Validates `candidates` in order.
    ///
    /// Invalid candidates are excluded and reported through
    /// [`load_warnings`](Self::load_warnings). With a `profile`, only the
    /// listed ids are kept; the order stays the load order.
    pub fn load<I>(candidates: I, entry_points: &EntryPoints, profile: Option<&[String]>) -> Self
    where
        I: IntoIterator<Item = PluginCandidate>,
    {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        let mut valid = Vec::new();

        for candidate in candidates {
            match validate(candidate, entry_points, &mut seen) {
                Ok(descriptor) => valid.push(descriptor),
                Err(e) => {
                    warn!("Excluding plugin: {}", e);
                    warnings.push(e);
                }
            }
        }

        if let Some(profile) = profile {
            let wanted: HashSet<&str> = profile.iter().map(|p| p.trim()).collect();
            for id in profile {
                if !valid.iter().any(|d| d.id == id.trim()) {
                    let warning = PluginLoadError::UnknownProfileEntry(id.trim().to_string());
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
            valid.retain(|d| wanted.contains(d.id.as_str()));
        }

        let mut registry = PluginRegistry {
            warnings,
            ..PluginRegistry::default()
        };
        for descriptor in valid {
            registry.positions.insert(descriptor.id.clone(), registry.plugins.len());
            registry.plugins.push(Arc::new(descriptor));
        }
        registry.rebuild_pattern_index();

        info!(
            "Loaded {} plugins ({} excluded or unknown)",
            registry.plugins.len(),
            registry.warnings.len()
        );
        registry
    }

    /// The built-in plugins, optionally narrowed to a profile.
    pub fn builtin(profile: Option<&[String]>) -> Self {
        Self::load(builtin::candidates(), &builtin::entry_points(), profile)
    }

    fn rebuild_pattern_index(&mut self) {
        let mut owners = Vec::new();
        let mut all_patterns = Vec::new();
        for (position, plugin) in self.plugins.iter().enumerate() {
            for pattern in &plugin.patterns {
                owners.push(position);
                all_patterns.push(pattern.as_str());
            }
        }

        // every pattern was compiled during validation
        match PatternSet::build(all_patterns) {
            Ok(set) => {
                self.pattern_index = set;
                self.pattern_owner = owners;
            }
            Err(e) => {
                warn!("Could not build plugin pattern index: {}", e);
                self.pattern_index = PatternSet::empty();
                self.pattern_owner = Vec::new();
            }
        }
        debug!("Pattern index holds {} patterns", self.pattern_owner.len());
    }

    pub fn all(&self) -> &[Arc<PluginDescriptor>] {
        &self.plugins
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<PluginDescriptor>> {
        self.positions.get(id).map(|&i| self.plugins[i].clone())
    }

    pub fn filtered_by<F>(&self, predicate: F) -> Vec<Arc<PluginDescriptor>>
    where
        F: Fn(&PluginDescriptor) -> bool,
    {
        self.plugins
            .iter()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }

    /// Plugins with at least one pattern matching `path`, in registry order.
    pub fn plugins_for_path(&self, path: &str) -> Vec<Arc<PluginDescriptor>> {
        let mut positions: Vec<usize> = self
            .pattern_index
            .matching_indices(path)
            .into_iter()
            .filter_map(|i| self.pattern_owner.get(i).copied())
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions.into_iter().map(|i| self.plugins[i].clone()).collect()
    }

    pub fn load_warnings(&self) -> &[PluginLoadError] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginFailure;
    use crate::plugins::{ArtifactPlugin, PluginContext, PluginOutput};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl ArtifactPlugin for Noop {
        async fn run(&self, _ctx: &PluginContext, _out: &mut PluginOutput) -> Result<(), PluginFailure> {
            Ok(())
        }
    }

    fn candidate(id: &str, patterns: &[&str]) -> PluginCandidate {
        PluginCandidate::new(id, "Test", patterns, Arc::new(Noop))
    }

    #[test]
    fn test_invalid_candidates_are_excluded_individually() {
        let mut named = PluginCandidate::named("named", "Test", &["*.db"], "nonexistent");
        named.name = String::new();

        let registry = PluginRegistry::load(
            vec![
                candidate("ok", &["*.db", "*.db", " "]),
                candidate("", &["*.db"]),
                candidate("blank", &["", "  "]),
                candidate("broken", &["[unclosed"]),
                named,
                candidate("also_ok", &["*/SMS/*"]),
            ],
            &EntryPoints::new(),
            None,
        );

        let ids: Vec<_> = registry.all().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "also_ok"]);
        assert_eq!(registry.by_id("ok").unwrap().patterns, vec!["*.db"]);

        let warnings = registry.load_warnings();
        assert_eq!(warnings.len(), 4);
        assert_eq!(warnings[0], PluginLoadError::EmptyId);
        assert_eq!(warnings[1], PluginLoadError::NoPatterns("blank".into()));
        assert!(matches!(&warnings[2], PluginLoadError::InvalidPattern { id, .. } if id == "broken"));
        assert!(matches!(
            &warnings[3],
            PluginLoadError::UnresolvedEntryPoint { entry_point, .. } if entry_point == "nonexistent"
        ));
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let registry = PluginRegistry::load(
            vec![candidate("dup", &["*.db"]), candidate("dup", &["*.txt"])],
            &EntryPoints::new(),
            None,
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.by_id("dup").unwrap().patterns, vec!["*.db"]);
        assert_eq!(registry.load_warnings(), &[PluginLoadError::DuplicateId("dup".into())]);
    }

    #[test]
    fn test_profile_filters_and_warns() {
        let profile = vec!["b".to_string(), "ghost".to_string()];
        let registry = PluginRegistry::load(
            vec![candidate("a", &["*.db"]), candidate("b", &["*.txt"])],
            &EntryPoints::new(),
            Some(&profile),
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.by_id("a").is_none());
        assert_eq!(
            registry.load_warnings(),
            &[PluginLoadError::UnknownProfileEntry("ghost".into())]
        );
    }

    #[test]
    fn test_plugins_for_path_in_registry_order() {
        let registry = PluginRegistry::load(
            vec![
                candidate("sms", &["*/SMS/sms.db"]),
                candidate("txt", &["*.txt"]),
                candidate("any_db", &["*.db", "*sms*"]),
            ],
            &EntryPoints::new(),
            None,
        );

        let ids = |path: &str| -> Vec<String> {
            registry.plugins_for_path(path).iter().map(|p| p.id.clone()).collect()
        };
        assert_eq!(ids("private/var/mobile/Library/SMS/sms.db"), vec!["sms", "any_db"]);
        assert_eq!(ids("notes.txt"), vec!["txt"]);
        assert!(ids("image.jpg").is_empty());
    }

    #[test]
    fn test_filtered_by_and_builtins() {
        let registry = PluginRegistry::builtin(None);
        assert!(registry.by_id("file_inventory").is_some());
        assert!(registry.by_id("file_hashes").is_some());
        assert!(registry.load_warnings().is_empty());

        let filesystem = registry.filtered_by(|p| p.category == "File System");
        assert_eq!(filesystem.len(), registry.len());
        assert!(!registry.is_empty());
    }
}
