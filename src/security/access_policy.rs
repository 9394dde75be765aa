//! URL block list.
//!
//! Every URL the proxy sees is registered on first sighting as unblocked.
//! The admin API flips the flag; the dispatcher answers 403 for blocked URLs
//! before any cache or upstream work happens.

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::cache::Fingerprint;

/// What the proxy knows about one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockListing {
    /// Client that first requested the URL.
    pub remote_addr: String,
    pub method: String,
    /// Host and path, without the query.
    pub url: String,
    pub blocked: bool,
}

impl BlockListing {
    pub fn new(remote_addr: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            method: method.into(),
            url: url.into(),
            blocked: false,
        }
    }
}

/// Result of [`AccessPolicy::check_and_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyCheck {
    pub blocked: bool,
    pub first_seen: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("fingerprint {0} has never been registered")]
    NotFound(String),
}

/// Fingerprint → listing table shared by the dispatcher and the admin API.
#[derive(Debug, Default)]
pub struct AccessPolicy {
    listings: DashMap<Fingerprint, BlockListing>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the block flag for `key`, registering `listing` if the key has
    /// never been seen.
    pub fn check_and_register(&self, key: &str, listing: BlockListing) -> PolicyCheck {
        let fingerprint = Fingerprint::of(key);
        match self.listings.entry(fingerprint) {
            Entry::Occupied(existing) => PolicyCheck {
                blocked: existing.get().blocked,
                first_seen: false,
            },
            Entry::Vacant(vacant) => {
                tracing::debug!(fingerprint = %vacant.key(), url = %listing.url, "Registered new URL");
                let blocked = listing.blocked;
                vacant.insert(listing);
                PolicyCheck {
                    blocked,
                    first_seen: true,
                }
            }
        }
    }

    /// Set the block flag of a registered fingerprint.
    pub fn set_blocked(&self, fingerprint: &str, blocked: bool) -> Result<BlockListing, PolicyError> {
        let not_found = || PolicyError::NotFound(fingerprint.to_string());
        let fp = Fingerprint::parse(fingerprint).ok_or_else(not_found)?;
        let mut listing = self.listings.get_mut(&fp).ok_or_else(not_found)?;
        listing.blocked = blocked;
        tracing::info!(fingerprint = %fp, url = %listing.url, blocked, "Block flag changed");
        Ok(listing.clone())
    }

    pub fn get(&self, fingerprint: &str) -> Result<BlockListing, PolicyError> {
        Fingerprint::parse(fingerprint)
            .and_then(|fp| self.listings.get(&fp).map(|l| l.clone()))
            .ok_or_else(|| PolicyError::NotFound(fingerprint.to_string()))
    }

    /// Snapshot of the whole table, ordered by fingerprint.
    pub fn listings(&self) -> BTreeMap<Fingerprint, BlockListing> {
        self.listings
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}
