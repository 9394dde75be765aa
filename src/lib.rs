//! Caching forward HTTP proxy library.

pub mod admin;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use cache::KeyedCache;
pub use config::schema::ProxyConfig;
pub use http::{ProxyServer, ProxyState};
pub use lifecycle::Shutdown;
pub use security::AccessPolicy;
