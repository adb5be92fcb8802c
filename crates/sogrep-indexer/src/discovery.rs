//! Links database discovery.
//!
//! Databases live at `<root>/<repo>/os/<arch>/<repo>.links.tar.gz`.

use crate::IndexerError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name suffix of a links database.
pub const LINKS_SUFFIX: &str = ".links.tar.gz";

/// Find every links database under a repository root.
///
/// Results are sorted by path. An empty result is an error: a root
/// without databases is almost certainly misconfigured.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>, IndexerError> {
    let pattern = format!(
        "{}/*/os/*/*{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        LINKS_SUFFIX
    );

    let mut databases = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if !path.is_file() || !is_repo_database(&path) {
            debug!(path = ?path, "Ignoring non-database match");
            continue;
        }
        databases.push(path);
    }

    if databases.is_empty() {
        return Err(IndexerError::NoDatabases(root.to_path_buf()));
    }

    databases.sort();
    debug!(root = ?root, count = databases.len(), "Discovered links databases");

    Ok(databases)
}

/// Check that the database is named after the repo directory it sits in.
fn is_repo_database(path: &Path) -> bool {
    let repo = path
        .parent()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|name| name.to_str());

    match (repo, path.file_name().and_then(|name| name.to_str())) {
        (Some(repo), Some(file)) => file.strip_suffix(LINKS_SUFFIX) == Some(repo),
        _ => false,
    }
}
