//! Lookup handler backed by the published index.

use sogrep_http::SonameIndex;
use sogrep_indexer::SnapshotStore;
use std::sync::Arc;

/// Answers lookups from the current snapshot of a [`SnapshotStore`]
pub struct SnapshotIndex {
    store: Arc<SnapshotStore>,
}

impl SnapshotIndex {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

impl SonameIndex for SnapshotIndex {
    fn lookup(&self, soname: &str) -> Option<Vec<String>> {
        self.store.lookup(soname)
    }
}
