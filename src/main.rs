//! Caching forward proxy.
//!
//! ```text
//!     Client ──▶ net listener ──▶ http server ──▶ dispatcher
//!                                                  │
//!                         ┌────────────────────────┼──────────────────┐
//!                         ▼                        ▼                  ▼
//!                   access policy            keyed cache        CONNECT tunnel
//!                   (block list)        (single-flight fetch,   (byte splice)
//!                         ▲              memory/disk tiers)
//!                         │                        │
//!                      admin API              upstream client ──▶ Origin
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use caching_proxy::config::validation::validate_config;
use caching_proxy::config::{load_config, ConfigError, ProxyConfig};
use caching_proxy::lifecycle::{signals, start, Shutdown};
use caching_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "caching-proxy")]
#[command(about = "Caching forward HTTP proxy with CONNECT tunneling", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `cache.folder`.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(folder) = args.cache_dir {
        config.cache.folder = folder;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "caching-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_folder = %config.cache.folder.display(),
        access_policy = config.pipeline.access_policy,
        cache = config.pipeline.cache,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let shutdown = Shutdown::new();
    let running = start(&config, &shutdown).await?;
    tracing::info!(address = %running.proxy_addr, "Proxy listening");

    signals::wait_for_signal().await;
    shutdown.trigger();
    running.join().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
