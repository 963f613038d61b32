//! Per-client fixed-window rate limiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::app::errors::ApiError;
use crate::config::RateLimitConfig;

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window closes (rounded up).
    pub reset_secs: u64,
}

/// In-memory limiter; counts live in a sharded map keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    requests: DashMap<String, (u32, Instant)>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            requests: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    pub(crate) fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut entry = self.requests.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) >= self.config.window {
            entry.0 = 0;
            entry.1 = now;
        }

        let elapsed = now.duration_since(entry.1);
        let reset_secs = ceil_secs(self.config.window.saturating_sub(elapsed));
        let limit = self.config.max_requests;

        if entry.0 >= limit {
            return Decision {
                allowed: false,
                limit,
                remaining: 0,
                reset_secs,
            };
        }

        entry.0 += 1;
        Decision {
            allowed: true,
            limit,
            remaining: limit - entry.0,
            reset_secs,
        }
    }

    /// Drop entries whose window has closed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.requests.len();
        let window = self.config.window;
        self.requests
            .retain(|_, (_, started)| now.duration_since(*started) < window);
        before - self.requests.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}

/// Client key: the socket peer address.
///
/// Behind a trusted proxy (`trust_proxy`), the first `X-Forwarded-For` hop
/// and then `X-Real-IP` take precedence. Untrusted clients could rotate
/// those headers freely, so they are ignored otherwise.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_client(headers) {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    real_ip.map(str::to_string)
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(req.headers(), peer, limiter.config().trust_proxy);

    let decision = limiter.check(&key);
    if !decision.allowed {
        tracing::warn!(client = %key, "rate limit exceeded");
        return ApiError::RateLimited {
            retry_after_secs: decision.reset_secs,
        }
        .into_response();
    }

    let mut res = next.run(req).await;

    let headers = res.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(decision.reset_secs));

    res
}
