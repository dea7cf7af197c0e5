//! # Configuration Module
//!
//! `ProxyConfig` carries every deployment knob the proxy honors. Defaults
//! match the reference deployment (espejo on `http://localhost:8080`, proxy
//! on port 3000); the environment overrides individual fields, which keeps
//! the binary runnable with zero configuration on a developer machine.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use super::error::{ProxyError, ProxyResult};

/// Which backing implementation the response cache uses. The cache
/// contract is identical for both; this is a deployment detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local DashMap store; contents are lost on restart.
    Memory,
    /// Durable embedded sqlite store at `cache_db_path`.
    Sqlite,
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Path of the sqlite database (ignored for the memory backend).
    pub db_path: String,

    /// TTL applied when a `set` call passes a zero duration.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// TTL for cacheable forwarded GET responses.
    #[serde(with = "humantime_serde")]
    pub response_ttl: Duration,

    /// Responses at or above this size are never cached.
    pub max_cacheable_bytes: usize,

    /// How often the memory store sweeps expired entries.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Sqlite,
            db_path: "rauli-cache.db".to_string(),
            default_ttl: Duration::from_secs(24 * 60 * 60),
            response_ttl: Duration::from_secs(60 * 60),
            max_cacheable_bytes: 500 * 1024,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Sliding-window rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per identity per window.
    pub limit: usize,

    /// Window duration.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// How often the reaper drops identities with no live timestamps.
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Few users, quality first: a moderate per-identity limit keeps the
        // service stable without queueing.
        Self {
            limit: 180,
            window: Duration::from_secs(60),
            reap_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Full proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address of the local proxy.
    pub bind_addr: SocketAddr,

    /// Base URL of the espejo mirror server, no trailing slash.
    pub espejo_url: String,

    /// Credentials for the espejo token exchange.
    pub client_id: String,
    pub client_secret: String,

    /// Version string surfaced in `X-API-Version` and the health body.
    pub version: String,

    /// Directory served for non-API paths.
    pub static_dir: String,

    /// Client-side timeout for general forwarding.
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Shorter timeout for the auth sub-call.
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Duration,

    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".parse().expect("valid default bind addr"),
            espejo_url: "http://localhost:8080".to_string(),
            client_id: "rauli-local".to_string(),
            client_secret: "rauli-local-secret".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            static_dir: "static".to_string(),
            upstream_timeout: Duration::from_secs(60),
            auth_timeout: Duration::from_secs(10),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Build a configuration from the process environment, starting from
    /// the defaults. Unknown or empty variables leave the default in place.
    pub fn from_env() -> ProxyResult<Self> {
        let mut config = Self::default();

        if let Some(url) = non_empty_env("ESPEJO_URL") {
            config.espejo_url = url.trim_end_matches('/').to_string();
        }
        if let Some(id) = non_empty_env("CLIENT_ID") {
            config.client_id = id;
        }
        if let Some(secret) = non_empty_env("CLIENT_SECRET") {
            config.client_secret = secret;
        }
        if let Some(version) = non_empty_env("VERSION") {
            config.version = version;
        }
        if let Some(port) = non_empty_env("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| ProxyError::config(format!("invalid PORT: {port}")))?;
            config.bind_addr = SocketAddr::new(config.bind_addr.ip(), port);
        }
        if let Some(path) = non_empty_env("CACHE_DB") {
            config.cache.db_path = path;
        }
        if let Some(backend) = non_empty_env("CACHE_BACKEND") {
            config.cache.backend = match backend.to_lowercase().as_str() {
                "memory" => CacheBackend::Memory,
                "sqlite" => CacheBackend::Sqlite,
                other => {
                    return Err(ProxyError::config(format!(
                        "invalid CACHE_BACKEND: {other} (expected memory or sqlite)"
                    )))
                }
            };
        }
        if let Some(limit) = non_empty_env("RATE_LIMIT") {
            config.rate_limit.limit = limit
                .parse()
                .map_err(|_| ProxyError::config(format!("invalid RATE_LIMIT: {limit}")))?;
        }
        if let Some(dir) = non_empty_env("STATIC_DIR") {
            config.static_dir = dir;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never work.
    pub fn validate(&self) -> ProxyResult<()> {
        if self.espejo_url.is_empty() {
            return Err(ProxyError::config("espejo_url must not be empty"));
        }
        if !self.espejo_url.starts_with("http://") && !self.espejo_url.starts_with("https://") {
            return Err(ProxyError::config(format!(
                "espejo_url must be an http(s) URL, got {}",
                self.espejo_url
            )));
        }
        if self.rate_limit.limit == 0 {
            return Err(ProxyError::config("rate_limit.limit must be positive"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ProxyError::config("rate_limit.window must be positive"));
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = ProxyConfig::default();
        assert_eq!(config.espejo_url, "http://localhost:8080");
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.client_id, "rauli-local");
        assert_eq!(config.rate_limit.limit, 180);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.cache.max_cacheable_bytes, 500 * 1024);
        assert_eq!(config.cache.response_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.default_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = ProxyConfig {
            espejo_url: "localhost:8080".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut config = ProxyConfig::default();
        config.rate_limit.limit = 0;
        assert!(config.validate().is_err());
    }
}
