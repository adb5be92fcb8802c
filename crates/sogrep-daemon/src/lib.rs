//! sogrep Service
//!
//! Ties the indexer, the repository watcher and the HTTP lookup server
//! together and manages their lifecycle.

mod error;
mod handler;
mod service;
pub mod signals;

pub use error::ServiceError;
pub use handler::SnapshotIndex;
pub use service::{Service, ServiceState, ShutdownHandle};
