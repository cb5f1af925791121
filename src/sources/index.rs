//! In-memory entry index shared by the local backends.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::error::SourceError;
use crate::models::FileRecord;
use crate::sources::glob::PathPattern;

/// One enumerated member of a bundle.
///
/// `member` is the name the container uses for the entry (archive member
/// name, or the relative path for directories); `record.path` is the
/// normalized bundle-relative path. `ordinal` is the entry's position in
/// the container, which tells apart members that share a name.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub record: FileRecord,
    pub member: String,
    pub ordinal: usize,
}

/// Immutable path → entry map, sorted by path.
#[derive(Debug, Default)]
pub struct EntryIndex {
    entries: BTreeMap<String, IndexedEntry>,
}

impl EntryIndex {
    /// Builds an index; the first entry seen for a path wins.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = IndexedEntry>,
    {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.entry(entry.record.path.clone()).or_insert(entry);
        }
        Self { entries: map }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexedEntry> {
        self.entries.get(path)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.entries.values().map(|e| &e.record)
    }

    /// Every record matching `pattern`, sorted by path.
    pub fn search(&self, pattern: &PathPattern) -> Vec<FileRecord> {
        self.entries
            .values()
            .filter(|e| pattern.matches(&e.record.path))
            .map(|e| e.record.clone())
            .collect()
    }
}

/// Lazily built [`EntryIndex`].
///
/// The first caller builds the index while holding the lock, so concurrent
/// searches enumerate the container once. [`LazyIndex::reset`] drops it so
/// the next access enumerates again.
#[derive(Debug, Default)]
pub struct LazyIndex {
    slot: Mutex<Option<Arc<EntryIndex>>>,
}

impl LazyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build<F, Fut>(&self, build: F) -> Result<Arc<EntryIndex>, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EntryIndex, SourceError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(build().await?);
        debug!("Indexed {} entries", index.len());
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    pub async fn reset(&self) {
        *self.slot.lock().await = None;
    }
}

/// Runs a blocking enumeration on the blocking pool.
pub async fn build_blocking<F>(build: F) -> Result<EntryIndex, SourceError>
where
    F: FnOnce() -> Result<EntryIndex, SourceError> + Send + 'static,
{
    tokio::task::spawn_blocking(build)
        .await
        .map_err(|e| SourceError::SourceUnavailable(format!("enumeration task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(path: &str) -> IndexedEntry {
        IndexedEntry {
            record: FileRecord::new(path),
            member: format!("./{}", path),
            ordinal: 0,
        }
    }

    #[test]
    fn test_index_sorted_and_deduplicated() {
        let index = EntryIndex::from_entries(vec![entry("b/2.db"), entry("a/1.db"), entry("b/2.db")]);
        assert_eq!(index.len(), 2);

        let pattern = PathPattern::compile("*.db").unwrap();
        let paths: Vec<_> = index.search(&pattern).into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["a/1.db", "b/2.db"]);
        assert_eq!(index.get("a/1.db").unwrap().member, "./a/1.db");
    }

    #[tokio::test]
    async fn test_lazy_index_builds_once() {
        let lazy = Arc::new(LazyIndex::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lazy = Arc::clone(&lazy);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                lazy.get_or_build(|| async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(EntryIndex::from_entries(vec![entry("x.txt")]))
                })
                .await
                .map(|idx| idx.len())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        lazy.reset().await;
        let rebuilt = lazy
            .get_or_build(|| async { Ok(EntryIndex::default()) })
            .await
            .unwrap();
        assert!(rebuilt.is_empty());
    }

    #[tokio::test]
    async fn test_failed_build_is_not_cached() {
        let lazy = LazyIndex::new();
        let err = lazy
            .get_or_build(|| async { Err(SourceError::SourceUnavailable("corrupt".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable(_)));

        let index = lazy
            .get_or_build(|| async { Ok(EntryIndex::from_entries(vec![entry("a")])) })
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
    }
}
