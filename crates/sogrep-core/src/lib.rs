//! sogrep Core
//!
//! Configuration shared by the sogrep service binary and library crates.

pub mod config;
pub mod error;

pub use config::ServiceConfig;
pub use error::ConfigError;
