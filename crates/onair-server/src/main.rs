//! # onair-server
//!
//! HTTP backend for stream overlays and their broadcaster dashboards.
//!
//! This binary provides:
//! - **Schedule API**: per-channel slot list, metadata and category styles
//! - **Countdown timer API**: start, stop, pause, resume and adjust a
//!   per-channel timer whose remaining time is derived on every read
//! - **Channel registry** with per-channel credentials and an admin token
//! - **Per-IP rate limiting** on mutating requests

mod api;
mod config;
mod error;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use onair_shared::{Clock, SystemClock};

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,onair_server=debug,onair_store=debug")
            }),
        )
        .init();

    info!("Starting On Air server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        persistent = config.redis_url.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Open the store and build services
    // -----------------------------------------------------------------------
    let kv = onair_store::open_store(config.redis_url.as_deref(), config.store_timeout).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http_addr = config.http_addr;
    let app_state = AppState::new(kv, config, clock);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Every 5 minutes, evict rate-limit buckets idle for more than 10 minutes.
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rl.purge_idle(Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "Purged idle rate-limit buckets");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
