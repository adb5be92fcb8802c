//! Immutable index snapshots and the store that publishes them.

use crate::parser::PartialIndex;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Build counters carried by a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Databases the build attempted
    pub databases: usize,
    /// Databases parsed successfully
    pub parsed: usize,
    /// Databases that failed to open or decompress
    pub failed: usize,
}

/// One complete build result: soname key to the packages that list it.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    sonames: HashMap<String, Vec<String>>,
    stats: BuildStats,
    built_at: DateTime<Utc>,
    generation: u64,
}

impl IndexSnapshot {
    /// The snapshot served before the first build completes.
    pub fn empty() -> Self {
        Self {
            sonames: HashMap::new(),
            stats: BuildStats::default(),
            built_at: Utc::now(),
            generation: 0,
        }
    }

    /// Merge partial indices, in the given order, into one snapshot.
    ///
    /// Each key's sequence is the concatenation of that key's sequences
    /// from every partial index, in order.
    pub fn merge<I>(partials: I, stats: BuildStats) -> Self
    where
        I: IntoIterator<Item = PartialIndex>,
    {
        let mut sonames: HashMap<String, Vec<String>> = HashMap::new();

        for partial in partials {
            for (key, mut packages) in partial {
                sonames.entry(key).or_default().append(&mut packages);
            }
        }

        Self {
            sonames,
            stats,
            built_at: Utc::now(),
            generation: 0,
        }
    }

    /// Packages listing `soname`, exact key match.
    pub fn lookup(&self, soname: &str) -> Option<&[String]> {
        self.sonames.get(soname).map(Vec::as_slice)
    }

    /// Full key to packages mapping.
    pub fn sonames(&self) -> &HashMap<String, Vec<String>> {
        &self.sonames
    }

    /// Number of distinct soname keys.
    pub fn len(&self) -> usize {
        self.sonames.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.sonames.is_empty()
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Publish sequence number, 0 until published.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds the current snapshot.
///
/// The lock is held only to clone or swap the `Arc`; lookups run
/// against the caller's own reference.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl SnapshotStore {
    /// Create a store holding the empty snapshot.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::empty())),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Replace the current snapshot, returning the generation assigned.
    pub fn publish(&self, mut snapshot: IndexSnapshot) -> u64 {
        let mut current = self.current.write();
        snapshot.generation = current.generation + 1;
        let generation = snapshot.generation;
        let built_at = snapshot.built_at;
        *current = Arc::new(snapshot);
        drop(current);

        debug!(generation, built_at = %built_at, "Published index snapshot");
        generation
    }

    /// Packages listing `soname` in the current snapshot.
    pub fn lookup(&self, soname: &str) -> Option<Vec<String>> {
        self.current().lookup(soname).map(<[String]>::to_vec)
    }

    /// Generation of the current snapshot.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(facts: &[(&str, &str)]) -> PartialIndex {
        let mut index = PartialIndex::new();
        for (key, pkg) in facts {
            index
                .entry(key.to_string())
                .or_default()
                .push(pkg.to_string());
        }
        index
    }

    #[test]
    fn test_merge_appends_in_order() {
        let first = partial(&[
            ("libz.so", "zlib"),
            ("libc.so", "zlib"),
            ("libc.so", "curl"),
        ]);
        let second = partial(&[("libc.so", "bash"), ("libssl.so", "curl")]);

        let snapshot = IndexSnapshot::merge([first, second], BuildStats::default());

        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.lookup("libc.so").unwrap(),
            ["zlib", "curl", "bash"]
        );
        assert_eq!(snapshot.lookup("libz.so").unwrap(), ["zlib"]);
        assert!(snapshot.lookup("libfoo.so").is_none());
    }

    #[test]
    fn test_merge_keeps_duplicates() {
        let x86 = partial(&[("libz.so", "zlib")]);
        let arm = partial(&[("libz.so", "zlib")]);

        let snapshot = IndexSnapshot::merge([x86, arm], BuildStats::default());
        assert_eq!(snapshot.lookup("libz.so").unwrap(), ["zlib", "zlib"]);
    }

    #[test]
    fn test_store_starts_empty() {
        let store = SnapshotStore::new();
        assert!(store.current().is_empty());
        assert_eq!(store.generation(), 0);
        assert!(store.lookup("libz.so").is_none());
    }

    #[test]
    fn test_publish_replaces_whole_snapshot() {
        let store = SnapshotStore::new();

        let old = IndexSnapshot::merge([partial(&[("libold.so", "old")])], BuildStats::default());
        assert_eq!(store.publish(old), 1);

        let reader = store.current();

        let new = IndexSnapshot::merge([partial(&[("libnew.so", "new")])], BuildStats::default());
        assert_eq!(store.publish(new), 2);

        // A reader holding the old snapshot keeps a consistent view
        assert!(reader.lookup("libold.so").is_some());
        assert!(reader.lookup("libnew.so").is_none());

        assert!(store.lookup("libold.so").is_none());
        assert_eq!(store.lookup("libnew.so").unwrap(), vec!["new"]);
        assert_eq!(store.current().generation(), 2);
    }

    #[test]
    fn test_publish_keeps_build_time() {
        let store = SnapshotStore::new();
        let before = Utc::now();

        let facts = partial(&[("libz.so", "zlib")]);
        let snapshot = IndexSnapshot::merge([facts], BuildStats::default());
        let built_at = snapshot.built_at();
        assert!(built_at >= before);

        store.publish(snapshot);
        assert_eq!(store.current().built_at(), built_at);
    }

    #[test]
    fn test_concurrent_readers_during_publish() {
        let store = Arc::new(SnapshotStore::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let snapshot = store.current();
                    // Both keys are always published together
                    assert_eq!(
                        snapshot.lookup("liba.so").is_some(),
                        snapshot.lookup("libb.so").is_some()
                    );
                }
            }));
        }

        for i in 0..200 {
            let pkg = format!("pkg{}", i);
            let facts = [("liba.so", pkg.as_str()), ("libb.so", pkg.as_str())];
            let snapshot = IndexSnapshot::merge([partial(&facts)], BuildStats::default());
            store.publish(snapshot);
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.generation(), 200);
    }
}
