//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to open or decompress a links database
    #[error("Archive error in {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Links database discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Discovery succeeded but matched nothing
    #[error("No links databases found under {0}")]
    NoDatabases(PathBuf),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl From<glob::PatternError> for IndexerError {
    fn from(e: glob::PatternError) -> Self {
        IndexerError::Discovery(e.to_string())
    }
}

impl From<glob::GlobError> for IndexerError {
    fn from(e: glob::GlobError) -> Self {
        IndexerError::Discovery(format!("{}: {}", e.path().display(), e.error()))
    }
}

impl From<notify::Error> for IndexerError {
    fn from(e: notify::Error) -> Self {
        IndexerError::Watcher(e.to_string())
    }
}
