//! Service error types.

use sogrep_http::HttpError;
use sogrep_indexer::IndexerError;
use thiserror::Error;

/// Errors that stop the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Initial discovery or build failed
    #[error("Startup failed: {0}")]
    Startup(#[source] IndexerError),

    /// The HTTP listener could not bind or stopped accepting
    #[error("Listener failed: {0}")]
    Listener(#[from] HttpError),

    /// The repository watcher could not be set up or failed
    #[error("Watcher failed: {0}")]
    Watcher(#[source] IndexerError),

    /// A service task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}
