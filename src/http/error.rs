//! Error types for the request path.
//!
//! Every variant is reported to the requesting client exactly once, as the
//! status code chosen in [`ProxyError::status`]. None of them stops the
//! server.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::cache::CacheError;

/// Transport-level failure talking to the origin. A non-2xx status is a
/// valid response, not an `UpstreamError`.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not complete within {0:?}")]
    Timeout(Duration),
}

/// Failure establishing or running a CONNECT tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid CONNECT target '{0}'")]
    InvalidTarget(String),

    #[error("failed to connect to upstream '{addr}': {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to upstream '{0}' timed out")]
    DialTimeout(String),

    #[error("HTTP upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),

    #[error("tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unified error for one proxied request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Neither CONNECT nor an absolute-form URI with a host.
    #[error("not a proxy request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// The detached fetch task panicked or was cancelled.
    #[error("fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for request handling.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Tunnel(TunnelError::InvalidTarget(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Tunnel(TunnelError::Dial { .. } | TunnelError::DialTimeout(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Upstream(_)
            | ProxyError::Cache(_)
            | ProxyError::Tunnel(_)
            | ProxyError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::BAD_GATEWAY => "Bad Gateway",
            _ => "Server Error",
        };
        (status, message).into_response()
    }
}
