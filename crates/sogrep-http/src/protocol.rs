//! Lookup protocol definitions.
//!
//! `GET /{soname}` answers 200 with `{"packages": [...]}` or 404 with `{}`.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Body of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonameResponse {
    pub packages: Vec<String>,
}

/// Body of a failed lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Outcome of a lookup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Soname known, with the packages listing it
    Found(SonameResponse),
    /// Unknown soname or unroutable path
    NotFound,
}

impl Response {
    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Response::Found(_) => 200,
            Response::NotFound => 404,
        }
    }

    /// JSON body.
    pub fn body(&self) -> Vec<u8> {
        let encoded = match self {
            Response::Found(found) => serde_json::to_vec(found),
            Response::NotFound => serde_json::to_vec(&Empty {}),
        };
        encoded.unwrap_or_else(|_| b"{}".to_vec())
    }
}

/// Extract the soname from a request URL.
///
/// The URL must have exactly one non-empty path segment; trailing
/// slashes and any query string are ignored and the segment is
/// percent-decoded.
pub fn parse_soname(url: &str) -> Option<String> {
    let path = url
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let segment = path.strip_prefix('/')?.trim_end_matches('/');

    if segment.is_empty() || segment.contains('/') {
        return None;
    }

    urlencoding::decode(segment).ok().map(Cow::into_owned)
}
