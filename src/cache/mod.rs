//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! request key (host + path + "?" + query)
//!     → fingerprint.rs (SHA-256 hex)
//!     → store.rs acquire()
//!         ├─ Hit  ───────────────────────────────┐
//!         └─ Miss(FetchGuard) → upstream fetch   │
//!               ├─ commit() → disk (+ memory)    │
//!               └─ abort() / drop                │
//!     → store.rs get() ◀─────────────────────────┘
//!     → entry.rs CachedBody (memory bytes or file stream)
//! ```
//!
//! # Design Decisions
//! - One slot per fingerprint: unknown, busy or ready, never two at once
//! - Waiters subscribe to the busy marker instead of polling a lock
//! - Files are written under a temporary name and renamed when complete
//! - No eviction; entries live as long as their files

pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod store;

pub use entry::{CacheEntry, CachedBody, Content, EntryInfo};
pub use error::{CacheError, CacheResult};
pub use fingerprint::{canonical_key, Fingerprint};
pub use store::{Acquired, CacheStats, FetchGuard, KeyedCache};
