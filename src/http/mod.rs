//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, upgrades enabled)
//!     → dispatcher.rs (request ID, block list, cache or tunnel)
//!     → upstream.rs (origin fetch, hop-by-hop stripped)
//!       or tunnel.rs (CONNECT splice)
//!     → response.rs (cached body, 403)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod error;
pub mod request;
pub mod response;
pub mod server;
pub mod tunnel;
pub mod upstream;

pub use dispatcher::dispatch;
pub use error::{ProxyError, ProxyResult, TunnelError, UpstreamError};
pub use request::{ProxyTarget, RequestId};
pub use server::{ProxyServer, ProxyState};
pub use tunnel::{TunnelRelay, TunnelTarget};
pub use upstream::UpstreamClient;
