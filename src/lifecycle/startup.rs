//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the cache folder and rebuild its index
//! - Bind the proxy and admin listeners
//! - Spawn the serving tasks, all tied to one [`Shutdown`]
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use super::Shutdown;
use crate::admin::{setup_admin_router, AdminState};
use crate::cache::{CacheError, KeyedCache};
use crate::config::ProxyConfig;
use crate::http::{ProxyServer, ProxyState};
use crate::net::{Listener, ListenerError};
use crate::security::AccessPolicy;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open cache: {0}")]
    Cache(#[from] CacheError),

    #[error("proxy listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("failed to bind admin API on {addr}: {source}")]
    Admin {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Handles to a started proxy.
pub struct RunningProxy {
    pub proxy_addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    pub state: Arc<ProxyState>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningProxy {
    /// Wait for every serving task to finish. Call after triggering
    /// shutdown.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Server task failed");
            }
        }
    }
}

/// Bring up the cache, the proxy listener and, when enabled, the admin API.
pub async fn start(config: &ProxyConfig, shutdown: &Shutdown) -> Result<RunningProxy, StartupError> {
    let cache = KeyedCache::open(&config.cache.folder, config.cache.memory_threshold_bytes).await?;
    let stats = cache.stats();
    tracing::info!(
        folder = %config.cache.folder.display(),
        entries = stats.entries,
        memory_threshold_bytes = config.cache.memory_threshold_bytes,
        "Cache opened"
    );

    let cache = Arc::new(cache);
    let policy = Arc::new(AccessPolicy::new());
    let state = Arc::new(ProxyState::new(config, Arc::clone(&cache), Arc::clone(&policy)));
    let mut tasks = Vec::new();

    let admin_addr = if config.admin.enabled {
        let listener = tokio::net::TcpListener::bind(&config.admin.bind_address)
            .await
            .map_err(|source| StartupError::Admin {
                addr: config.admin.bind_address.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| StartupError::Admin {
            addr: config.admin.bind_address.clone(),
            source,
        })?;

        let router = setup_admin_router(AdminState {
            policy,
            cache,
            api_key: config.admin.api_key.as_deref().map(Arc::from),
        });
        let mut signal = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            tracing::info!(address = %addr, "Admin API listening");
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.recv().await })
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
        Some(addr)
    } else {
        None
    };

    let listener = Listener::bind(&config.listener).await?;
    let proxy_addr = listener.local_addr().map_err(ListenerError::Bind)?;
    let server = ProxyServer::new(Arc::clone(&state));
    let signal = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(listener, signal).await {
            tracing::error!(error = %e, "Proxy server failed");
        }
    }));

    Ok(RunningProxy {
        proxy_addr,
        admin_addr,
        state,
        tasks,
    })
}
