//! Cache entries and the readable bodies handed out by `get`.

use std::io;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;

use super::fingerprint::Fingerprint;

/// Where the bytes of an entry currently live.
#[derive(Debug, Clone)]
pub enum Content {
    /// Mirrored in memory (and on disk).
    Loaded(Bytes),
    /// Only on disk, under the fingerprint's file name.
    OnDisk,
}

/// A committed (or discovered at startup) cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub content: Content,
    pub size_bytes: u64,
    /// Upstream round trip; `None` for entries found on disk at startup.
    pub fetch_duration: Option<Duration>,
}

impl CacheEntry {
    pub fn is_loaded(&self) -> bool {
        matches!(self.content, Content::Loaded(_))
    }
}

/// State of one fingerprint. A key is unknown (absent), busy, or ready, never
/// busy and ready at once.
#[derive(Debug)]
pub(crate) enum Slot {
    /// A fetch is in flight. Waiters clone the receiver and wait for the
    /// sender, owned by the fetching task's `FetchGuard`, to close.
    Busy(watch::Receiver<()>),
    Ready(CacheEntry),
}

/// Read-only view of an entry, for reporting and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub size_bytes: u64,
    pub in_memory: bool,
    pub fetch_duration: Option<Duration>,
}

impl From<&CacheEntry> for EntryInfo {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            size_bytes: entry.size_bytes,
            in_memory: entry.is_loaded(),
            fetch_duration: entry.fetch_duration,
        }
    }
}

/// Content returned by `KeyedCache::get`.
#[derive(Debug)]
pub enum CachedBody {
    Memory(Bytes),
    Disk { file: File, size: u64 },
}

impl CachedBody {
    pub fn len(&self) -> u64 {
        match self {
            CachedBody::Memory(bytes) => bytes.len() as u64,
            CachedBody::Disk { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, CachedBody::Memory(_))
    }

    /// Convert into a response body, streaming from disk when needed.
    pub fn into_body(self) -> Body {
        match self {
            CachedBody::Memory(bytes) => Body::from(bytes),
            CachedBody::Disk { file, .. } => Body::from_stream(ReaderStream::new(file)),
        }
    }

    /// Collect the whole content.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            CachedBody::Memory(bytes) => Ok(bytes),
            CachedBody::Disk { mut file, size } => {
                let mut buf = Vec::with_capacity(size as usize);
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}
