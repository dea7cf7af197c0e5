//! # Token Manager
//!
//! Acquires and caches the espejo bearer token, refreshing before expiry.
//! The cached token and its refresh deadline live behind one async mutex
//! that is held across the credential exchange, which gives single-flight
//! for free: concurrent callers that arrive during a refresh block on the
//! lock and then reuse the freshly cached token instead of dispatching
//! their own exchange.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::config::ProxyConfig;
use crate::core::error::{ProxyError, ProxyResult};

/// Cached validity when the espejo omits `expires_at`. Matches the token
/// lifetime the espejo issues (60 min) minus headroom.
const FALLBACK_VALIDITY: Duration = Duration::from_secs(50 * 60);

/// Refresh this long before the declared expiry so a token handed to an
/// in-flight request cannot expire mid-call.
const REFRESH_MARGIN: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    /// Unix epoch seconds; optional because older espejo builds omit it.
    #[serde(default)]
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct TokenManager {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(config: &ProxyConfig) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.auth_timeout)
            .build()
            .map_err(|e| ProxyError::internal(format!("build auth client: {e}")))?;
        Ok(Self {
            client,
            token_url: format!("{}/auth/token", config.espejo_url),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            state: Mutex::new(None),
        })
    }

    /// Return a token valid for at least the refresh margin, performing at
    /// most one in-flight credential exchange across concurrent callers.
    pub async fn acquire(&self) -> ProxyResult<String> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        debug!("token missing or near expiry, exchanging credentials");
        let refreshed = self.exchange().await?;
        let token = refreshed.value.clone();
        *state = Some(refreshed);
        info!("espejo token refreshed");
        Ok(token)
    }

    async fn exchange(&self) -> ProxyResult<CachedToken> {
        let response = self
            .client
            .post(&self.token_url)
            .json(&TokenRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProxyError::auth(format!(
                "espejo rejected credentials with status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::auth(format!("malformed token body: {e}")))?;
        if body.token.is_empty() {
            return Err(ProxyError::auth("espejo returned an empty token"));
        }

        Ok(CachedToken {
            value: body.token,
            refresh_at: Instant::now() + validity_of(body.expires_at),
        })
    }
}

/// How long a freshly issued token may be served before refreshing.
fn validity_of(expires_at: Option<u64>) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match expires_at {
        Some(exp) if exp > now => {
            let lifetime = Duration::from_secs(exp - now);
            // Never below a short floor, so a tight expiry does not turn
            // every request into an exchange.
            lifetime
                .saturating_sub(REFRESH_MARGIN)
                .max(Duration::from_secs(30))
        }
        _ => FALLBACK_VALIDITY,
    }
}
