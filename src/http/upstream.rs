//! Upstream (origin) HTTP client.
//!
//! Connects are bounded by `timeouts.connect_secs`. Callers bound the rest
//! of the exchange with [`UpstreamClient::request_timeout`].

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, Response, Version};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use super::error::UpstreamError;
use crate::config::TimeoutConfig;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};

/// Shared, pooled HTTP/1.1 client for origin requests.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeouts.connect()));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            request_timeout: timeouts.request(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send a prepared request and wait for the response head.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Incoming>, UpstreamError> {
        self.client.request(request).await.map_err(UpstreamError::Request)
    }
}

/// Turn an inbound proxy request into the upstream one: hop-by-hop headers
/// removed, client address appended to X-Forwarded-For. Method, URI, other
/// headers and body are preserved.
pub fn prepare_upstream_request(mut parts: Parts, body: Body, client: SocketAddr) -> Request<Body> {
    strip_hop_by_hop(&mut parts.headers);
    append_forwarded_for(&mut parts.headers, client.ip());
    parts.version = Version::HTTP_11;
    Request::from_parts(parts, body)
}
