//! Error types for cache operations.

use std::path::PathBuf;

use thiserror::Error;

use super::fingerprint::Fingerprint;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by [`KeyedCache`](super::KeyedCache).
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the backing folder failed.
    #[error("cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The content stream handed to `commit` failed before it ended.
    #[error("content stream failed: {0}")]
    Body(#[source] BoxError),

    /// No entry exists for the fingerprint.
    #[error("fingerprint {0} is not known to the cache")]
    NotFound(Fingerprint),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
