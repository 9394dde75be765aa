use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;

use super::AdminState;
use crate::cache::{CacheStats, Fingerprint};
use crate::security::{BlockListing, PolicyError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub cache: CacheSummary,
    pub known_urls: usize,
}

#[derive(Serialize)]
pub struct CacheSummary {
    pub folder: String,
    pub memory_threshold_bytes: u64,
    pub entries: usize,
    pub in_memory: usize,
    pub fetching: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let CacheStats {
        entries,
        in_memory,
        busy,
    } = state.cache.stats();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        cache: CacheSummary {
            folder: state.cache.folder().display().to_string(),
            memory_threshold_bytes: state.cache.memory_threshold(),
            entries,
            in_memory,
            fetching: busy,
        },
        known_urls: state.policy.len(),
    })
}

/// Every URL seen so far, keyed by fingerprint.
pub async fn list_urls(State(state): State<AdminState>) -> Json<BTreeMap<Fingerprint, BlockListing>> {
    Json(state.policy.listings())
}

pub async fn block(
    State(state): State<AdminState>,
    body: String,
) -> Result<Json<BlockListing>, (StatusCode, Json<serde_json::Value>)> {
    set_blocked(&state, &body, true)
}

pub async fn unblock(
    State(state): State<AdminState>,
    body: String,
) -> Result<Json<BlockListing>, (StatusCode, Json<serde_json::Value>)> {
    set_blocked(&state, &body, false)
}

fn set_blocked(
    state: &AdminState,
    body: &str,
    blocked: bool,
) -> Result<Json<BlockListing>, (StatusCode, Json<serde_json::Value>)> {
    state
        .policy
        .set_blocked(body.trim(), blocked)
        .map(Json)
        .map_err(|e| match e {
            PolicyError::NotFound(fp) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown fingerprint", "fingerprint": fp })),
            ),
        })
}
