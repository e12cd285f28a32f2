//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development (in-memory store, admin disabled).

use std::net::SocketAddr;
use std::time::Duration;

use onair_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_STORE_TIMEOUT_MS};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Redis connection URL. When unset the in-memory store is used.
    /// Env: `REDIS_URL`
    pub redis_url: Option<String>,

    /// Upper bound for every store round-trip.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: `2000`
    pub store_timeout: Duration,

    /// Superuser bearer token for channel management.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Sustained mutating requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst capacity per client IP.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

// Hand-written so the admin token never reaches the logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("store_timeout", &self.store_timeout)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            redis_url: None,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            admin_token: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(url) = lookup("REDIS_URL") {
            if !url.trim().is_empty() {
                config.redis_url = Some(url.trim().to_string());
            }
        }

        if let Some(val) = lookup("STORE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.store_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid STORE_TIMEOUT_MS, using default"),
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(rate) = lookup("RATE_LIMIT_PER_SEC").and_then(|v| positive_f64(&v)) {
            config.rate_limit_per_sec = rate;
        }

        if let Some(burst) = lookup("RATE_LIMIT_BURST").and_then(|v| positive_f64(&v)) {
            config.rate_limit_burst = burst;
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn positive_f64(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}
