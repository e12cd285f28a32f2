//! Per-IP token buckets for mutating requests.
//!
//! Overlays poll the public `GET` endpoints continuously, so only writes are
//! metered.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ServerError;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    refreshed_at: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_sec,
            burst,
        }
    }

    /// Take one token for `ip`, refilling for the time since its last request.
    pub async fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now()).await
    }

    async fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.burst,
            refreshed_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.refreshed_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_sec).min(self.burst);
        bucket.refreshed_at = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }

    /// Drop buckets untouched for longer than `max_idle`.
    pub async fn purge_idle(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, b| now.saturating_duration_since(b.refreshed_at) < max_idle);
        before - buckets.len()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET && req.method() != Method::OPTIONS {
        if let Some(ip) = client_ip(&req) {
            if !limiter.allow(ip).await {
                warn!(ip = %ip, method = %req.method(), path = %req.uri().path(), "Rate limit exceeded");
                return ServerError::RateLimited.into_response();
            }
        }
    }
    next.run(req).await
}

/// Peer address first, then the first `X-Forwarded-For` hop, then `X-Real-IP`.
fn client_ip(req: &Request) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header("x-real-ip").and_then(|v| v.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(2.0, 3.0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at(ip, start).await);
        }
        assert!(!limiter.allow_at(ip, start).await);

        // Half a second at 2 tokens/s buys exactly one more request.
        let later = start + Duration::from_millis(500);
        assert!(limiter.allow_at(ip, later).await);
        assert!(!limiter.allow_at(ip, later).await);
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1.0, 1.0);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.allow(a).await);
        assert!(!limiter.allow(a).await);
        assert!(limiter.allow(b).await);
    }

    #[tokio::test]
    async fn test_purge_idle() {
        let limiter = RateLimiter::new(1.0, 5.0);
        limiter.allow("192.168.1.1".parse().unwrap()).await;

        assert_eq!(limiter.purge_idle(Duration::from_secs(600)).await, 0);
        assert_eq!(limiter.purge_idle(Duration::ZERO).await, 1);
    }

    #[test]
    fn test_client_ip_from_forwarded_headers() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), Some("203.0.113.7".parse().unwrap()));

        let req = Request::builder()
            .header("x-real-ip", " 198.51.100.2 ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), Some("198.51.100.2".parse().unwrap()));

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), None);
    }
}
