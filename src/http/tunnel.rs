//! CONNECT tunneling.
//!
//! The flow is:
//! 1. Client sends `CONNECT host:port HTTP/1.1`
//! 2. The proxy dials `host:port`; failure is answered with 502 and no
//!    upgrade happens
//! 3. The proxy answers `200` and hyper hands over the raw connection
//! 4. Bytes are copied both ways until either side closes, then both
//!    sides are shut down
//!
//! The relay is opaque: TLS inside the tunnel is never inspected.

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::error::TunnelError;
use crate::net::ConnectionGuard;
use crate::observability::metrics;

/// Normalized `host:port` of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    /// Parse a CONNECT authority, appending `default_port` when none is
    /// given.
    ///
    /// - `api.example.com:8443` -> (`api.example.com`, 8443)
    /// - `api.example.com` -> (`api.example.com`, default_port)
    /// - `[::1]:443` -> (`::1`, 443)
    pub fn parse(authority: &str, default_port: u16) -> Result<Self, TunnelError> {
        let invalid = || TunnelError::InvalidTarget(authority.to_string());

        if authority.is_empty() {
            return Err(invalid());
        }

        if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            if host.is_empty() {
                return Err(invalid());
            }
            let port = match after {
                "" => default_port,
                _ => after
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(invalid)?,
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match authority.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() || host.contains(':') {
                    return Err(invalid());
                }
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: authority.to_string(),
                port: default_port,
            }),
        }
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Establishes CONNECT tunnels.
#[derive(Debug, Clone)]
pub struct TunnelRelay {
    connect_timeout: Duration,
}

impl TunnelRelay {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Dial the tunnel target within the connect timeout.
    pub async fn dial(&self, target: &TunnelTarget) -> Result<TcpStream, TunnelError> {
        let addr = target.to_string();
        match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(TunnelError::Dial { addr, source }),
            Err(_) => Err(TunnelError::DialTimeout(addr)),
        }
    }

    /// Dial `target` and, on success, answer `200` and splice the upgraded
    /// client connection to it in a background task.
    ///
    /// `guard` is held by that task so a shutdown drain waits for the tunnel.
    pub async fn open(
        &self,
        req: Request<Body>,
        target: TunnelTarget,
        guard: ConnectionGuard,
    ) -> Result<Response<Body>, TunnelError> {
        let upstream = match self.dial(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                metrics::record_tunnel("dial_failed");
                return Err(e);
            }
        };
        debug!(target = %target, "Connected to tunnel target");

        tokio::spawn(async move {
            let _guard = guard;
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => match relay(TokioIo::new(upgraded), upstream).await {
                    Ok(end) => {
                        metrics::record_tunnel("closed");
                        info!(target = %target, ended_by = end.side(), bytes = end.bytes(), "Tunnel closed");
                    }
                    Err(e) => {
                        // Resets are routine at the end of a tunnel.
                        metrics::record_tunnel("io_error");
                        debug!(target = %target, error = %e, "Tunnel ended with error");
                    }
                },
                Err(e) => {
                    metrics::record_tunnel("upgrade_failed");
                    warn!(target = %target, error = %e, "HTTP upgrade failed");
                }
            }
        });

        // 200 with no body starts the upgrade.
        Ok(Response::new(Body::empty()))
    }
}

/// Which direction of a relay finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client closed after `sent` bytes went upstream.
    Client { sent: u64 },
    /// The target closed after `received` bytes came back.
    Upstream { received: u64 },
}

impl RelayEnd {
    pub fn side(&self) -> &'static str {
        match self {
            RelayEnd::Client { .. } => "client",
            RelayEnd::Upstream { .. } => "upstream",
        }
    }

    pub fn bytes(&self) -> u64 {
        match *self {
            RelayEnd::Client { sent } => sent,
            RelayEnd::Upstream { received } => received,
        }
    }
}

/// Copy bytes both ways until either direction finishes, then shut down
/// both write halves.
///
/// Ending on the first EOF keeps a tunnel from lingering half-open when one
/// peer hangs up and the other stays idle.
pub async fn relay<C, U>(client: C, upstream: U) -> Result<RelayEnd, TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let ended = tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut upstream_write) => {
            result.map(|sent| RelayEnd::Client { sent })
        }
        result = tokio::io::copy(&mut upstream_read, &mut client_write) => {
            result.map(|received| RelayEnd::Upstream { received })
        }
    };

    // The peer may already be gone.
    if let Err(e) = client_write.shutdown().await {
        debug!(error = %e, "Client shutdown failed");
    }
    if let Err(e) = upstream_write.shutdown().await {
        debug!(error = %e, "Upstream shutdown failed");
    }

    Ok(ended?)
}
