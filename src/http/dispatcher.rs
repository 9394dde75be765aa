//! Request pipeline.
//!
//! ```text
//! CONNECT      → [block list] → tunnel
//! absolute URI → [block list] → [cache acquire → fetch + commit] → cached body
//!                                  or, cache stage off, plain forward
//! anything else → 400
//! ```
//!
//! Both optional stages are toggled by `[pipeline]`. A blocked request is
//! answered before the cache or any upstream is touched.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use tracing::{debug, info_span, warn, Instrument};

use super::error::{ProxyError, ProxyResult, UpstreamError};
use super::request::{ProxyTarget, RequestId};
use super::response;
use super::server::ProxyState;
use super::tunnel::TunnelTarget;
use super::upstream::prepare_upstream_request;
use crate::cache::{Acquired, EntryInfo, FetchGuard};
use crate::observability::metrics;
use crate::security::headers::strip_hop_by_hop;
use crate::security::BlockListing;

/// Serve one proxied request. Never fails: errors become their status code.
pub async fn dispatch(state: &Arc<ProxyState>, req: Request<Body>, client: SocketAddr) -> Response<Body> {
    let request_id = RequestId::new();
    let span = info_span!(
        "proxy_request",
        request_id = %request_id,
        method = %req.method(),
        uri = %req.uri(),
        client = %client,
    );

    async move {
        let started = Instant::now();
        let (flow, result) = if req.method() == Method::CONNECT {
            ("connect", handle_connect(state, req, client).await)
        } else if state.pipeline.cache {
            ("cached", handle_cached(state, req, client).await)
        } else {
            ("forward", handle_forward(state, req, client).await)
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, status = e.status().as_u16(), "Request failed");
                e.into_response()
            }
        };

        metrics::record_request(flow, response.status().as_u16());
        debug!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );
        response
    }
    .instrument(span)
    .await
}

/// Register the request with the block list and report whether it may go on.
fn admitted(state: &ProxyState, key: &str, client: SocketAddr, method: &Method, url: String) -> bool {
    if !state.pipeline.access_policy {
        return true;
    }
    let listing = BlockListing::new(client.to_string(), method.as_str(), url);
    let check = state.policy.check_and_register(key, listing);
    if check.blocked {
        metrics::record_blocked();
        debug!(key, "Blocked by access policy");
    }
    !check.blocked
}

async fn handle_connect(state: &Arc<ProxyState>, req: Request<Body>, client: SocketAddr) -> ProxyResult<Response<Body>> {
    let authority = req
        .uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_default();
    let target = TunnelTarget::parse(&authority, state.default_port)?;

    let key = target.to_string();
    if !admitted(state, &key, client, req.method(), key.clone()) {
        metrics::record_tunnel("blocked");
        return Ok(response::blocked());
    }

    let guard = state.connections.track();
    Ok(state.tunnel.open(req, target, guard).await?)
}

fn proxy_target(req: &Request<Body>) -> ProxyResult<ProxyTarget> {
    ProxyTarget::from_uri(req.uri()).ok_or_else(|| ProxyError::BadRequest(req.uri().to_string()))
}

async fn handle_cached(state: &Arc<ProxyState>, req: Request<Body>, client: SocketAddr) -> ProxyResult<Response<Body>> {
    let target = proxy_target(&req)?;
    let key = target.cache_key();
    if !admitted(state, &key, client, req.method(), target.listing_url()) {
        return Ok(response::blocked());
    }

    match state.cache.acquire(&key).await {
        Acquired::Miss(guard) => {
            let fetch = fetch_into_cache(Arc::clone(state), guard, req, client);
            if state.complete_fetch_on_disconnect {
                // Detached so a client hanging up does not cancel the commit
                // other callers are waiting on.
                tokio::spawn(fetch).await??;
            } else {
                fetch.await?;
            }
        }
        Acquired::Hit => {
            if let Some(info) = state.cache.entry_info(&key) {
                report_hit(&key, &info);
            }
        }
    }

    let content = state.cache.get(&key).await?;
    Ok(response::cached(content))
}

/// Log and record what a hit avoided. Entries indexed at startup carry no
/// fetch time and only report their size.
fn report_hit(key: &str, info: &EntryInfo) {
    match info.fetch_duration {
        Some(saved) => {
            metrics::record_cache_saved(saved, info.size_bytes);
            debug!(
                key,
                saved_ms = saved.as_millis() as u64,
                bytes = info.size_bytes,
                "Served from cache"
            );
        }
        None => debug!(key, bytes = info.size_bytes, "Served from cache"),
    }
}

/// Fetch `req` from its origin and commit the body under `guard`.
///
/// Transport errors and the request timeout release the busy marker without
/// an entry.
async fn fetch_into_cache(
    state: Arc<ProxyState>,
    guard: FetchGuard,
    req: Request<Body>,
    client: SocketAddr,
) -> ProxyResult<EntryInfo> {
    let timeout = state.upstream.request_timeout();
    let fingerprint = guard.fingerprint().clone();

    let fetch = async {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let upstream_req = prepare_upstream_request(parts, body, client);

        let upstream_res = match state.upstream.send(upstream_req).await {
            Ok(res) => res,
            Err(e) => {
                state.cache.abort(guard);
                return Err(ProxyError::from(e));
            }
        };
        let elapsed = started.elapsed();
        metrics::record_upstream_fetch(elapsed);
        debug!(
            fingerprint = %fingerprint,
            status = upstream_res.status().as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Upstream responded"
        );

        let content = upstream_res.into_body().into_data_stream();
        Ok(state.cache.commit(guard, content, elapsed).await?)
    };

    match tokio::time::timeout(timeout, fetch).await {
        Ok(result) => result,
        // The guard went down with the fetch future and released the marker.
        Err(_) => Err(UpstreamError::Timeout(timeout).into()),
    }
}

async fn handle_forward(state: &Arc<ProxyState>, req: Request<Body>, client: SocketAddr) -> ProxyResult<Response<Body>> {
    let target = proxy_target(&req)?;
    let key = target.cache_key();
    if !admitted(state, &key, client, req.method(), target.listing_url()) {
        return Ok(response::blocked());
    }

    let timeout = state.upstream.request_timeout();
    let (parts, body) = req.into_parts();
    let upstream_req = prepare_upstream_request(parts, body, client);
    let upstream_res = tokio::time::timeout(timeout, state.upstream.send(upstream_req))
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))??;

    let (mut parts, body) = upstream_res.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}
