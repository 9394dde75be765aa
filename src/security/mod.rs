//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_policy.rs (register URL, answer 403 when blocked)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-For)
//!     → Pass to cache / upstream
//! ```
//!
//! # Design Decisions
//! - Every URL is registered on first sighting, unblocked
//! - The block check runs before any cache or upstream work

pub mod access_policy;
pub mod headers;

pub use access_policy::{AccessPolicy, BlockListing, PolicyCheck, PolicyError};
