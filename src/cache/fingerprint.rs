//! Request fingerprints.
//!
//! A fingerprint is the lowercase hex SHA-256 of a canonical key string. It is
//! the map key in memory and the file name on disk.

use serde::Serialize;
use sha2::{Digest, Sha256};

const HEX_LEN: usize = 64;

/// Hex digest identifying a cached resource or block listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash a canonical key.
    pub fn of(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Accept an already computed digest, e.g. a cache file name or an admin
    /// request body. Returns `None` unless it is 64 lowercase hex characters.
    pub fn parse(digest: &str) -> Option<Self> {
        let valid = digest.len() == HEX_LEN
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(digest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical key of a plain HTTP request: `host + path + "?" + query`.
///
/// The separator is always present so `/a` and `/a?` share one entry.
pub fn canonical_key(host: &str, path: &str, query: Option<&str>) -> String {
    format!("{}{}?{}", host, path, query.unwrap_or(""))
}
