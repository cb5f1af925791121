//! Shell-glob matching against bundle-relative paths.
//!
//! Patterns follow fnmatch semantics: `*` and `?` also match `/`, and
//! `[...]` / `[!...]` are character classes. A path matches when the
//! pattern matches either the path itself or the path anchored under
//! [`VIRTUAL_ROOT_PREFIX`], which lets artifact patterns written as
//! `*/mobile/Library/...` also hit entries at the top of a bundle.

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};

use crate::constants::VIRTUAL_ROOT_PREFIX;
use crate::error::SourceError;

fn build_glob(pattern: &str) -> Result<Glob, SourceError> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map_err(|e| SourceError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}

fn anchored(path: &str) -> String {
    format!("{}{}", VIRTUAL_ROOT_PREFIX, path)
}

/// A compiled search pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    matcher: GlobMatcher,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, SourceError> {
        Ok(Self {
            raw: pattern.to_string(),
            matcher: build_glob(pattern)?.compile_matcher(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path) || self.matcher.is_match(anchored(path))
    }
}

/// Many patterns compiled into one automaton; reports which of them match.
#[derive(Debug, Clone)]
pub struct PatternSet {
    set: GlobSet,
}

impl PatternSet {
    pub fn build<'a, I>(patterns: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(build_glob(pattern)?);
        }
        let set = builder.build().map_err(|e| SourceError::InvalidPattern {
            pattern: "<pattern set>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { set })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    /// Indices (in insertion order) of every pattern matching `path`.
    pub fn matching_indices(&self, path: &str) -> Vec<usize> {
        let mut hits = self.set.matches(path);
        hits.extend(self.set.matches(anchored(path)));
        hits.sort_unstable();
        hits.dedup();
        hits
    }
}
