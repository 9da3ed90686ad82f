//! # parley-server
//!
//! Real-time chat hub for Parley.
//!
//! This binary provides:
//! - **Hub endpoint** (`/hub`): a WebSocket carrying typed requests,
//!   responses and server-pushed events
//! - **Device sessions**: per-user devices with a single primary device that
//!   gates restricted accounts
//! - **Private chats** resolved exactly once per pair of users
//! - **Message fan-out** to every live connection of every chat member
//! - **Per-IP rate limiting** on the HTTP surface

mod api;
mod auth;
mod chats;
mod config;
mod devices;
mod error;
mod hub;
mod rate_limit;
mod registry;
mod router;
mod store;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::{Credentials, TokenIssuer};
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::store::{ChatStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug,parley_store=info")),
        )
        .init();

    info!("Starting Parley hub v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::open(&config.database_path)?);
    info!(path = %config.database_path.display(), "Database ready");

    let registry = Arc::new(ConnectionRegistry::new(config.broadcast_timeout));
    let tokens = TokenIssuer::new(config.token_secret.as_bytes(), config.token_ttl_hours)?;
    let hub = Arc::new(Hub::new(
        store,
        registry,
        Credentials::default(),
        tokens,
        config.max_message_len,
    ));

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        hub,
        rate_limiter: rate_limiter.clone(),
        outbound_buffer: config.outbound_buffer,
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict rate-limit buckets idle for 10 minutes, every 5 minutes.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rate_limiter.purge_stale(Duration::from_secs(600));
            if purged > 0 {
                tracing::debug!(purged, tracked = rate_limiter.tracked(), "purged idle rate-limit buckets");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the hub server until Ctrl+C
    // -----------------------------------------------------------------------
    let listener = TcpListener::bind(config.http_addr).await?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    if let Err(e) = api::serve(app_state, listener, shutdown).await {
        tracing::error!(error = %e, "Hub server failed");
        return Err(e);
    }

    Ok(())
}
