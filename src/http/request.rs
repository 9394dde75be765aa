//! Request classification.
//!
//! # Responsibilities
//! - Generate a unique request ID for tracing
//! - Extract the proxy target (host, path, query) from absolute-form URIs
//! - Derive the cache key and the block list URL from the target

use axum::http::Uri;
use uuid::Uuid;

use crate::cache::canonical_key;

/// Unique ID attached to every proxied request's log span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Origin addressed by a plain HTTP proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    /// `host[:port]` as written by the client.
    pub authority: String,
    pub path: String,
    pub query: Option<String>,
}

impl ProxyTarget {
    /// Read the target of an absolute-form URI. Origin-form URIs have no
    /// authority and yield `None`.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let authority = uri.authority()?;
        uri.scheme()?;
        Some(Self {
            authority: authority.as_str().to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
        })
    }

    /// Key fingerprinted by the cache and the block list.
    pub fn cache_key(&self) -> String {
        canonical_key(&self.authority, &self.path, self.query.as_deref())
    }

    /// Human-readable URL recorded in block listings.
    pub fn listing_url(&self) -> String {
        format!("{}{}", self.authority, self.path)
    }
}
