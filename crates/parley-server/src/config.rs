//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_TOKEN_TTL_HOURS};

/// Secret used when `TOKEN_SECRET` is unset. Development only.
const DEV_TOKEN_SECRET: &str = "parley-dev-secret-change-me";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// HMAC key for bearer tokens.
    /// Env: `TOKEN_SECRET`
    pub token_secret: String,

    /// Bearer token lifetime.
    /// Env: `TOKEN_TTL_HOURS`
    /// Default: 168 (7 days)
    pub token_ttl_hours: i64,

    /// Longest accepted message, in characters.
    /// Env: `MAX_MESSAGE_LENGTH`
    pub max_message_len: usize,

    /// Capacity of each connection's outbound frame queue.
    /// Env: `OUTBOUND_BUFFER`
    pub outbound_buffer: usize,

    /// How long a broadcast waits on one slow connection before skipping it.
    /// Env: `BROADCAST_TIMEOUT_MS`
    pub broadcast_timeout: Duration,

    /// Sustained HTTP requests per second allowed per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst size of the per-IP token bucket.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("token_secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("max_message_len", &self.max_message_len)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("broadcast_timeout", &self.broadcast_timeout)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            token_secret: DEV_TOKEN_SECRET.to_string(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            outbound_buffer: 64,
            broadcast_timeout: Duration::from_millis(2000),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        match lookup("TOKEN_SECRET") {
            Some(secret) if !secret.is_empty() => config.token_secret = secret,
            _ => tracing::warn!("TOKEN_SECRET not set, using the development secret"),
        }

        if let Some(value) = parse_positive::<i64>(&lookup, "TOKEN_TTL_HOURS") {
            config.token_ttl_hours = value;
        }
        if let Some(value) = parse_positive::<usize>(&lookup, "MAX_MESSAGE_LENGTH") {
            config.max_message_len = value;
        }
        if let Some(value) = parse_positive::<usize>(&lookup, "OUTBOUND_BUFFER") {
            config.outbound_buffer = value;
        }
        if let Some(ms) = parse_positive::<u64>(&lookup, "BROADCAST_TIMEOUT_MS") {
            config.broadcast_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = parse_positive::<f64>(&lookup, "RATE_LIMIT_PER_SEC") {
            config.rate_limit_per_sec = value;
        }
        if let Some(value) = parse_positive::<f64>(&lookup, "RATE_LIMIT_BURST") {
            config.rate_limit_burst = value;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a strictly positive number, warning and returning `None` on junk.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
