//! Proxy listener and per-connection serving.
//!
//! # Responsibilities
//! - Accept connections within the listener's connection limit
//! - Serve each connection with hyper's HTTP/1.1 server, upgrades enabled
//!   so CONNECT can take over the socket
//! - Hand every request to the dispatcher with the shared [`ProxyState`]
//! - Stop accepting on shutdown and drain open connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;

use super::dispatcher::dispatch;
use super::tunnel::TunnelRelay;
use super::upstream::UpstreamClient;
use crate::cache::KeyedCache;
use crate::config::{PipelineConfig, ProxyConfig};
use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::security::AccessPolicy;

/// How long open connections get to finish after shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Everything a request handler needs, built once at startup.
#[derive(Debug)]
pub struct ProxyState {
    pub cache: Arc<KeyedCache>,
    pub policy: Arc<AccessPolicy>,
    pub upstream: UpstreamClient,
    pub tunnel: TunnelRelay,
    pub pipeline: PipelineConfig,
    pub default_port: u16,
    pub complete_fetch_on_disconnect: bool,
    /// Open client connections and CONNECT tunnels; shutdown drains both.
    pub connections: ConnectionTracker,
}

impl ProxyState {
    pub fn new(config: &ProxyConfig, cache: Arc<KeyedCache>, policy: Arc<AccessPolicy>) -> Self {
        Self {
            cache,
            policy,
            upstream: UpstreamClient::new(&config.timeouts),
            tunnel: TunnelRelay::new(config.timeouts.connect()),
            pipeline: config.pipeline.clone(),
            default_port: config.tunnel.default_port,
            complete_fetch_on_disconnect: config.cache.complete_fetch_on_disconnect,
            connections: ConnectionTracker::new(),
        }
    }
}

/// Forward proxy server.
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    /// Accept and serve connections until `shutdown` fires, then wait for
    /// open connections to drain.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        let connections = self.state.connections.clone();
        tracing::info!(address = %addr, "Proxy server starting");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
            };

            let state = Arc::clone(&self.state);
            let guard = connections.track();
            let mut conn_shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = Arc::clone(&state);
                    async move {
                        Ok::<_, std::convert::Infallible>(
                            dispatch(&state, req.map(Body::new), peer).await,
                        )
                    }
                });

                let conn = http1::Builder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades();
                let mut conn = std::pin::pin!(conn);

                let mut closing = false;
                let result = loop {
                    tokio::select! {
                        result = conn.as_mut() => break result,
                        _ = conn_shutdown.recv(), if !closing => {
                            // Finish the in-flight request, then close.
                            closing = true;
                            conn.as_mut().graceful_shutdown();
                        }
                    }
                };

                if let Err(e) = result {
                    tracing::debug!(peer = %peer, connection = %guard.id(), error = %e, "Connection ended with error");
                }
                drop(guard);
            });
        }

        tracing::info!(
            active = connections.active_count(),
            "Proxy server stopped accepting, draining connections"
        );
        if !connections.wait_for_drain(DRAIN_DEADLINE).await {
            tracing::warn!(
                active = connections.active_count(),
                "Drain deadline passed with connections still open"
            );
        }
        Ok(())
    }
}
