//! Links database parser.
//!
//! Turns one `*.links.tar.gz` file into a [`PartialIndex`] owned by the
//! caller. Nothing shared is touched here, so any number of parses can
//! run side by side.

use crate::archive::LinkArchive;
use crate::IndexerError;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Soname key to the packages that list it, local to one links database.
pub type PartialIndex = HashMap<String, Vec<String>>;

/// Counters for a single parsed database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Members seen in the archive
    pub entries: usize,
    /// Members that contributed at least one soname
    pub indexed: usize,
    /// Members skipped (non-regular, unreadable, unnamed)
    pub skipped: usize,
    /// Soname facts recorded
    pub facts: usize,
}

/// Result of parsing one links database.
#[derive(Debug, Clone, Default)]
pub struct ParsedDatabase {
    pub index: PartialIndex,
    pub stats: ParseStats,
}

/// Parse a links database into a partial index.
pub fn parse_links_database(path: &Path) -> Result<ParsedDatabase, IndexerError> {
    let mut archive = LinkArchive::open(path)?;
    let mut parsed = ParsedDatabase::default();

    for member in archive.members()? {
        let member = member?;
        parsed.stats.entries += 1;

        if !member.regular {
            parsed.stats.skipped += 1;
            continue;
        }

        let Some(pkgname) = member.name.parent().and_then(package_name) else {
            warn!(db = ?path, member = ?member.name, "Cannot derive package name");
            parsed.stats.skipped += 1;
            continue;
        };

        let payload = match member.payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!(db = ?path, member = ?member.name, error = %e, "Failed to read entry");
                parsed.stats.skipped += 1;
                continue;
            }
        };

        if payload.is_empty() {
            debug!(db = ?path, member = ?member.name, "Empty links entry");
            continue;
        }

        let facts = index_payload(&mut parsed.index, pkgname, &payload);
        if facts > 0 {
            parsed.stats.indexed += 1;
            parsed.stats.facts += facts;
        }
    }

    debug!(
        db = ?path,
        entries = parsed.stats.entries,
        indexed = parsed.stats.indexed,
        skipped = parsed.stats.skipped,
        facts = parsed.stats.facts,
        "Parsed links database"
    );

    Ok(parsed)
}

/// Append `pkgname` under every soname listed in `payload`.
///
/// Returns the number of facts recorded.
pub fn index_payload(index: &mut PartialIndex, pkgname: &str, payload: &[u8]) -> usize {
    let text = String::from_utf8_lossy(payload);
    let mut facts = 0;

    for line in text.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        index
            .entry(soname_key(line).to_string())
            .or_default()
            .push(pkgname.to_string());
        facts += 1;
    }

    facts
}

/// Strip a versioned soname down to its index key.
///
/// `libfoo.so.1.2.3` and `libfoo.so` both map to `libfoo.so`. A line
/// without `.so` is its own key.
pub fn soname_key(soname: &str) -> &str {
    match soname.find(".so") {
        Some(pos) => &soname[..pos + 3],
        None => soname,
    }
}

/// Recover the package name from a `<pkgname>-<pkgver>-<pkgrel>` directory.
///
/// Only the last two hyphen-separated segments are dropped, so hyphens
/// inside the package name survive.
pub fn package_name(dir: &Path) -> Option<&str> {
    let dir = dir.file_name()?.to_str()?;
    let mut parts = dir.rsplitn(3, '-');
    let _pkgrel = parts.next()?;
    let _pkgver = parts.next()?;
    parts.next().filter(|name| !name.is_empty())
}
