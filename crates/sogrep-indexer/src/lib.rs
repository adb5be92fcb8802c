//! sogrep Indexer
//!
//! This crate provides the indexing engine for sogrep, including:
//! - Discovery of `<repo>/os/<arch>/<repo>.links.tar.gz` databases
//! - Parallel parsing of links databases into partial indices
//! - Merging partial indices into immutable, swappable snapshots
//! - Watching databases and debouncing writes into rebuild requests

mod archive;
mod builder;
mod discovery;
mod error;
pub mod parser;
mod snapshot;
pub mod watcher;

pub use archive::{LinkArchive, Member, Members};
pub use builder::IndexBuilder;
pub use discovery::{discover, LINKS_SUFFIX};
pub use error::IndexerError;
pub use parser::{parse_links_database, ParseStats, ParsedDatabase, PartialIndex};
pub use snapshot::{BuildStats, IndexSnapshot, SnapshotStore};
pub use watcher::{
    Debouncer, RebuildRequest, RepositoryWatcher, WatchEvent, WatchHandle, WatcherOptions,
    DEFAULT_DEBOUNCE_INTERVAL,
};
