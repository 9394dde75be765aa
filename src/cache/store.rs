//! Fingerprint-keyed response store with single-flight fetch coordination.
//!
//! # Responsibilities
//! - Hand out exactly one fetch ticket per unknown fingerprint
//! - Park concurrent callers for the same fingerprint until it resolves
//! - Tier committed content between memory and disk by size
//! - Rebuild the index from the backing folder at startup
//!
//! # Locking
//! The slot map is a `DashMap`. Shard guards are only held for in-memory
//! mutations; waiting, disk and network I/O always happen with no guard held.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;

use super::entry::{CacheEntry, CachedBody, Content, EntryInfo, Slot};
use super::error::{CacheError, CacheResult};
use super::fingerprint::Fingerprint;
use crate::observability::metrics;

type Slots = Arc<DashMap<Fingerprint, Slot>>;

/// Outcome of [`KeyedCache::acquire`].
#[derive(Debug)]
pub enum Acquired {
    /// An entry exists; read it with `get`.
    Hit,
    /// The caller owns the fetch for this fingerprint and must resolve the
    /// guard with `commit` or `abort`.
    Miss(FetchGuard),
}

impl Acquired {
    pub fn needs_fetch(&self) -> bool {
        matches!(self, Acquired::Miss(_))
    }
}

/// Exclusive ticket for one fetch cycle of one fingerprint.
///
/// Holds the busy marker. Dropping an unresolved guard aborts the cycle, so
/// waiters are released on every path, including panics and cancellation.
#[derive(Debug)]
pub struct FetchGuard {
    fingerprint: Fingerprint,
    slots: Slots,
    resolved: bool,
    // Closing this sender wakes every waiter.
    _marker: watch::Sender<()>,
}

impl FetchGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Replace the busy marker with a ready entry.
    fn fulfil(mut self, entry: CacheEntry) {
        self.slots.insert(self.fingerprint.clone(), Slot::Ready(entry));
        self.resolved = true;
    }

    fn release(&mut self) {
        if !self.resolved {
            self.slots
                .remove_if(&self.fingerprint, |_, slot| matches!(slot, Slot::Busy(_)));
            self.resolved = true;
            tracing::debug!(fingerprint = %self.fingerprint, "Busy marker released without entry");
        }
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Counts for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_memory: usize,
    pub busy: usize,
}

/// Fingerprint → content store backed by one file per entry.
#[derive(Debug)]
pub struct KeyedCache {
    folder: PathBuf,
    memory_threshold: u64,
    slots: Slots,
}

impl KeyedCache {
    /// Open the cache over `folder`, creating it if missing.
    ///
    /// Every file named by a fingerprint is registered as an on-disk entry;
    /// its bytes are only read when first requested.
    pub async fn open(folder: impl Into<PathBuf>, memory_threshold: u64) -> CacheResult<Self> {
        let folder = folder.into();

        match fs::metadata(&folder).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CacheError::io(
                    &folder,
                    std::io::Error::new(ErrorKind::InvalidInput, "cache path is not a directory"),
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&folder)
                    .await
                    .map_err(|e| CacheError::io(&folder, e))?;
                tracing::info!(folder = %folder.display(), "Created cache folder");
            }
            Err(e) => return Err(CacheError::io(&folder, e)),
        }

        let slots: Slots = Arc::new(DashMap::new());
        let mut dir = fs::read_dir(&folder)
            .await
            .map_err(|e| CacheError::io(&folder, e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&folder, e))?
        {
            let name = item.file_name();
            let Some(fingerprint) = name.to_str().and_then(Fingerprint::parse) else {
                tracing::trace!(file = ?name, "Ignoring non-cache file");
                continue;
            };
            let meta = item
                .metadata()
                .await
                .map_err(|e| CacheError::io(item.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            slots.insert(
                fingerprint.clone(),
                Slot::Ready(CacheEntry {
                    fingerprint,
                    content: Content::OnDisk,
                    size_bytes: meta.len(),
                    fetch_duration: None,
                }),
            );
        }

        tracing::info!(
            folder = %folder.display(),
            entries = slots.len(),
            memory_threshold,
            "Cache index loaded"
        );

        Ok(Self {
            folder,
            memory_threshold,
            slots,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn memory_threshold(&self) -> u64 {
        self.memory_threshold
    }

    /// Decide whether the caller must fetch `key`.
    ///
    /// Waits while another caller holds the fetch for the same fingerprint,
    /// then re-checks. At most one caller receives `Miss` per fetch cycle.
    pub async fn acquire(&self, key: &str) -> Acquired {
        let fingerprint = Fingerprint::of(key);

        loop {
            let mut in_flight = match self.slots.entry(fingerprint.clone()) {
                Entry::Occupied(slot) => match slot.get() {
                    Slot::Ready(_) => {
                        metrics::record_cache_lookup(true);
                        return Acquired::Hit;
                    }
                    Slot::Busy(marker) => marker.clone(),
                },
                Entry::Vacant(vacant) => {
                    let (marker, waiters) = watch::channel(());
                    vacant.insert(Slot::Busy(waiters));
                    metrics::record_cache_lookup(false);
                    tracing::debug!(fingerprint = %fingerprint, "Busy marker installed");
                    return Acquired::Miss(FetchGuard {
                        fingerprint,
                        slots: Arc::clone(&self.slots),
                        resolved: false,
                        _marker: marker,
                    });
                }
            };

            tracing::debug!(fingerprint = %fingerprint, "Waiting for in-flight fetch");
            // Nothing is ever sent: this resolves once the guard is dropped.
            let _ = in_flight.changed().await;
        }
    }

    /// Store fetched content and install the entry, releasing waiters.
    ///
    /// Content below the memory threshold is written to disk and mirrored in
    /// memory; larger content is streamed to disk only. The file is written
    /// under a temporary name and renamed into place before the entry
    /// becomes visible. On failure the busy marker is released without an
    /// entry.
    pub async fn commit<S, E>(
        &self,
        guard: FetchGuard,
        content: S,
        fetch_duration: Duration,
    ) -> CacheResult<EntryInfo>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let fingerprint = guard.fingerprint().clone();
        // Removed on every exit short of the rename, including this future
        // being dropped mid-write.
        let part = PartFile::new(self.folder.join(format!(".{}.part", fingerprint)));
        let final_path = self.path_for(&fingerprint);

        let stored = match self.write_part(part.path(), content).await {
            Ok(stored) => stored,
            Err(e) => {
                self.abort(guard);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(part.path(), &final_path).await {
            self.abort(guard);
            return Err(CacheError::io(final_path, e));
        }
        part.keep();

        let (content, size_bytes, tier) = match stored {
            Stored::Memory(bytes) => {
                let size = bytes.len() as u64;
                (Content::Loaded(bytes), size, "memory")
            }
            Stored::Disk(size) => (Content::OnDisk, size, "disk"),
        };
        metrics::record_cache_commit(tier, size_bytes);

        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            content,
            size_bytes,
            fetch_duration: Some(fetch_duration),
        };
        let info = EntryInfo::from(&entry);
        guard.fulfil(entry);

        tracing::info!(
            fingerprint = %fingerprint,
            bytes = size_bytes,
            tier,
            elapsed_ms = fetch_duration.as_millis() as u64,
            "Cached content"
        );
        Ok(info)
    }

    /// Commit content that is already fully in memory.
    pub async fn commit_bytes(
        &self,
        guard: FetchGuard,
        content: Bytes,
        fetch_duration: Duration,
    ) -> CacheResult<EntryInfo> {
        let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(content) });
        self.commit(guard, stream, fetch_duration).await
    }

    /// Release the busy marker without installing an entry.
    pub fn abort(&self, mut guard: FetchGuard) {
        tracing::debug!(fingerprint = %guard.fingerprint, "Fetch aborted");
        guard.release();
    }

    /// Open the content cached for `key`.
    pub async fn get(&self, key: &str) -> CacheResult<CachedBody> {
        self.get_fingerprint(&Fingerprint::of(key)).await
    }

    /// Open the content cached under `fingerprint`.
    ///
    /// On-disk entries below the memory threshold are loaded into memory on
    /// first access and served from memory afterwards.
    pub async fn get_fingerprint(&self, fingerprint: &Fingerprint) -> CacheResult<CachedBody> {
        let found = match self.slots.get(fingerprint).as_deref() {
            Some(Slot::Ready(entry)) => Some((entry.content.clone(), entry.size_bytes)),
            _ => None,
        };
        let Some((content, size)) = found else {
            tracing::debug!(fingerprint = %fingerprint, "Cache does not know fingerprint");
            return Err(CacheError::NotFound(fingerprint.clone()));
        };

        let path = self.path_for(fingerprint);
        match content {
            Content::Loaded(bytes) => Ok(CachedBody::Memory(bytes)),
            Content::OnDisk if size < self.memory_threshold => {
                let bytes = Bytes::from(fs::read(&path).await.map_err(|e| CacheError::io(&path, e))?);
                if let Some(mut slot) = self.slots.get_mut(fingerprint) {
                    if let Slot::Ready(entry) = slot.value_mut() {
                        entry.size_bytes = bytes.len() as u64;
                        entry.content = Content::Loaded(bytes.clone());
                    }
                }
                tracing::debug!(fingerprint = %fingerprint, bytes = bytes.len(), "Loaded entry into memory");
                Ok(CachedBody::Memory(bytes))
            }
            Content::OnDisk => {
                let file = File::open(&path).await.map_err(|e| CacheError::io(&path, e))?;
                Ok(CachedBody::Disk { file, size })
            }
        }
    }

    /// Describe the entry for `key`, if one is installed.
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        match self.slots.get(&Fingerprint::of(key)).as_deref() {
            Some(Slot::Ready(entry)) => Some(EntryInfo::from(entry)),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry_info(key).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for slot in self.slots.iter() {
            match slot.value() {
                Slot::Busy(_) => stats.busy += 1,
                Slot::Ready(entry) => {
                    stats.entries += 1;
                    if entry.is_loaded() {
                        stats.in_memory += 1;
                    }
                }
            }
        }
        stats
    }

    fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.folder.join(fingerprint.as_str())
    }

    /// Write the content under `part_path`, keeping it in memory while it
    /// stays below the threshold.
    async fn write_part<S, E>(&self, part_path: &Path, content: S) -> CacheResult<Stored>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let io_err = |e| CacheError::io(part_path, e);
        let mut content = std::pin::pin!(content);
        let mut buffer = BytesMut::new();
        let mut spilled: Option<(BufWriter<File>, u64)> = None;

        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|e| CacheError::Body(e.into()))?;
            match spilled.as_mut() {
                Some((file, size)) => {
                    file.write_all(&chunk).await.map_err(io_err)?;
                    *size += chunk.len() as u64;
                }
                None => {
                    buffer.extend_from_slice(&chunk);
                    if buffer.len() as u64 >= self.memory_threshold {
                        let mut file = BufWriter::new(File::create(part_path).await.map_err(io_err)?);
                        file.write_all(&buffer).await.map_err(io_err)?;
                        spilled = Some((file, buffer.len() as u64));
                        buffer = BytesMut::new();
                    }
                }
            }
        }

        match spilled {
            Some((mut file, size)) => {
                file.flush().await.map_err(io_err)?;
                file.into_inner().sync_all().await.map_err(io_err)?;
                Ok(Stored::Disk(size))
            }
            None => {
                let bytes = buffer.freeze();
                fs::write(part_path, &bytes).await.map_err(io_err)?;
                Ok(Stored::Memory(bytes))
            }
        }
    }
}

enum Stored {
    Memory(Bytes),
    Disk(u64),
}

/// Temporary file that is deleted on drop unless [`PartFile::keep`] is called.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial cache file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial cache file"),
        }
    }
}
