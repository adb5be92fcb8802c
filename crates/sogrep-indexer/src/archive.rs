//! Read access to gzip-compressed tar links databases.
//!
//! Exposes an archive as a lazy sequence of members, each carrying its
//! name, whether it is a regular file, and its fully read payload.

use crate::IndexerError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::EntryType;

type Decoder = GzDecoder<BufReader<File>>;

/// An opened `*.links.tar.gz` file.
pub struct LinkArchive {
    path: PathBuf,
    inner: tar::Archive<Decoder>,
}

/// A single archive member.
#[derive(Debug)]
pub struct Member {
    /// Member name as stored in the archive
    pub name: PathBuf,
    /// Whether the member is a regular file
    pub regular: bool,
    /// Member payload; empty for non-regular members
    pub payload: io::Result<Vec<u8>>,
}

impl LinkArchive {
    /// Open an archive for reading.
    ///
    /// Decompression is lazy, so a file that is not gzip data is only
    /// reported once members are iterated.
    pub fn open(path: &Path) -> Result<Self, IndexerError> {
        let file = File::open(path).map_err(|source| IndexerError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: tar::Archive::new(GzDecoder::new(BufReader::new(file))),
        })
    }

    /// Iterate over the archive members in stored order.
    pub fn members(&mut self) -> Result<Members<'_>, IndexerError> {
        let entries = self
            .inner
            .entries()
            .map_err(|source| IndexerError::Archive {
                path: self.path.clone(),
                source,
            })?;

        Ok(Members {
            path: &self.path,
            entries,
            exhausted: false,
        })
    }
}

/// Iterator over the members of a [`LinkArchive`].
///
/// A member whose payload ends early means the stream is exhausted, so
/// iteration stops after yielding it.
pub struct Members<'a> {
    path: &'a Path,
    entries: tar::Entries<'a, Decoder>,
    exhausted: bool,
}

impl Iterator for Members<'_> {
    type Item = Result<Member, IndexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let entry = match self.entries.next()? {
            Ok(entry) => entry,
            Err(source) => {
                return Some(Err(IndexerError::Archive {
                    path: self.path.to_path_buf(),
                    source,
                }))
            }
        };

        let member = read_member(entry).map_err(|source| IndexerError::Archive {
            path: self.path.to_path_buf(),
            source,
        });

        if let Ok(Member {
            payload: Err(e), ..
        }) = &member
        {
            self.exhausted = e.kind() == io::ErrorKind::UnexpectedEof;
        }

        Some(member)
    }
}

fn read_member(mut entry: tar::Entry<'_, Decoder>) -> io::Result<Member> {
    let name = entry.path()?.into_owned();
    let regular = entry.header().entry_type() == EntryType::Regular;

    if !regular {
        return Ok(Member {
            name,
            regular,
            payload: Ok(Vec::new()),
        });
    }

    let expected = entry.size();
    let mut payload = Vec::with_capacity(expected.min(1 << 20) as usize);
    let payload = match entry.read_to_end(&mut payload) {
        Ok(n) if n as u64 == expected => Ok(payload),
        Ok(n) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read {} of {} bytes", n, expected),
        )),
        Err(e) => Err(e),
    };

    Ok(Member {
        name,
        regular,
        payload,
    })
}
