//! # Sliding-Window Rate Limiter
//!
//! Per-client admission control. Each identity keeps the timestamps of its
//! requests inside the current window; a call prunes stale timestamps and
//! admits iff fewer than `limit` remain. Rejections answer 429 before the
//! forwarder is ever invoked, so backpressure is fail-fast with no queue.
//!
//! The per-call prune is O(stale timestamps); at this proxy's scale that is
//! a deliberate trade-off against the slightly different burst semantics of
//! a token bucket.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::core::config::RateLimitConfig;
use crate::core::error::ProxyError;

pub struct RateLimiter {
    requests: DashMap<String, Vec<Instant>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            requests: DashMap::new(),
            limit: config.limit,
            window: config.window,
        }
    }

    /// Admit or reject one request for `identity`.
    ///
    /// Prunes timestamps older than `now - window`, then admits (appending
    /// `now`) iff the remaining count is below the limit. A rejection does
    /// not mutate the window, so a saturated client cannot push its own
    /// reset further into the future.
    pub fn allow(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut timestamps = self.requests.entry(identity.to_string()).or_default();
        if let Some(cutoff) = now.checked_sub(self.window) {
            timestamps.retain(|t| *t > cutoff);
        }
        if timestamps.len() >= self.limit {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Number of identities currently tracked (reaper observability).
    pub fn tracked_identities(&self) -> usize {
        self.requests.len()
    }

    /// Periodically drop identities whose window holds no live timestamps,
    /// bounding memory for churning client populations.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let before = limiter.requests.len();
                let cutoff = Instant::now().checked_sub(limiter.window);
                limiter.requests.retain(|_, timestamps| match cutoff {
                    Some(cutoff) => timestamps.iter().any(|t| *t > cutoff),
                    None => !timestamps.is_empty(),
                });
                let removed = before.saturating_sub(limiter.requests.len());
                if removed > 0 {
                    debug!(removed, "reaped idle rate-limit identities");
                }
            }
        })
    }
}

/// Client identity for admission control: the forwarded-for header when a
/// fronting hop set one, otherwise the transport peer address.
fn client_identity(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware: rejected requests get the structured 429 body and never
/// reach the inner handler.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&request);
    if !limiter.allow(&identity) {
        warn!(identity = %identity, "rate limit exceeded");
        return ProxyError::RateLimitExceeded.into_response();
    }
    next.run(request).await
}
