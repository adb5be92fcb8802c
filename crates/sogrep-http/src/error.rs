//! HTTP Error types

use thiserror::Error;

/// Errors that can occur while serving lookups
#[derive(Debug, Error)]
pub enum HttpError {
    /// Could not bind the listen address
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// The accept loop failed outside of a requested shutdown
    #[error("Accept failed: {0}")]
    Accept(#[from] std::io::Error),

    /// A server task panicked or was cancelled
    #[error("Server task failed: {0}")]
    Task(String),
}
