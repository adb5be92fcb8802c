//! Index builder.
//!
//! Fans out one parse task per links database, waits for all of them,
//! then merges their partial indices in discovery order on the calling
//! task. Workers never share the result map.

use crate::discovery::discover;
use crate::parser::parse_links_database;
use crate::snapshot::{BuildStats, IndexSnapshot, SnapshotStore};
use crate::IndexerError;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Builds index snapshots from a repository root.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    root: PathBuf,
}

impl IndexBuilder {
    /// Create a builder for the given repository root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the links databases under the root.
    pub fn discover(&self) -> Result<Vec<PathBuf>, IndexerError> {
        discover(&self.root)
    }

    /// Discover and parse every links database into a new snapshot.
    pub async fn build(&self) -> Result<IndexSnapshot, IndexerError> {
        let databases = self.discover()?;
        Ok(self.build_from(&databases).await)
    }

    /// Parse the given links databases into a new snapshot.
    ///
    /// Databases that fail to parse are logged and left out; the
    /// snapshot is built from the rest.
    pub async fn build_from(&self, databases: &[PathBuf]) -> IndexSnapshot {
        let start = Instant::now();

        let tasks: Vec<_> = databases
            .iter()
            .map(|path| {
                debug!(db = ?path, "Parsing links database");
                let task_path = path.clone();
                let handle = tokio::task::spawn_blocking(move || parse_links_database(&task_path));
                (path, handle)
            })
            .collect();

        let mut stats = BuildStats {
            databases: tasks.len(),
            ..Default::default()
        };
        let mut partials = Vec::with_capacity(tasks.len());

        for (path, handle) in tasks {
            match handle.await {
                Ok(Ok(parsed)) => {
                    stats.parsed += 1;
                    partials.push(parsed.index);
                }
                Ok(Err(e)) => {
                    stats.failed += 1;
                    warn!(db = ?path, error = %e, "Failed to parse links database");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(db = ?path, error = %e, "Parse task did not complete");
                }
            }
        }

        if stats.databases > 0 && stats.parsed == 0 {
            error!(
                root = ?self.root,
                databases = stats.databases,
                "Every links database failed to parse, index is empty"
            );
        }

        let snapshot = IndexSnapshot::merge(partials, stats);

        info!(
            databases = snapshot.stats().databases,
            parsed = snapshot.stats().parsed,
            failed = snapshot.stats().failed,
            sonames = snapshot.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Links databases parsed"
        );

        snapshot
    }

    /// Build a fresh snapshot and publish it, returning its generation.
    pub async fn refresh(&self, store: &SnapshotStore) -> Result<u64, IndexerError> {
        let snapshot = self.build().await?;
        Ok(store.publish(snapshot))
    }
}
