//! sogrep HTTP Lookup Service
//!
//! This crate provides the HTTP protocol definitions and the server that
//! answers `GET /{soname}` against an index supplied by the daemon.

mod error;
mod protocol;
mod server;

pub use error::HttpError;
pub use protocol::*;
pub use server::{LookupServer, ShutdownHandle, SonameIndex};
