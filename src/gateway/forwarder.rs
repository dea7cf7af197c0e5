//! # Request Forwarder
//!
//! The core state machine of the proxy. For an API request it runs, in
//! order: cache lookup (GET only), token acquisition, the upstream call,
//! content-encoding normalization, the per-route fallback policy, health
//! merging, pass-through and cache population.
//!
//! Failure policy: the health route and the search routes are soft
//! features and never hard-fail — an unreachable or erroring espejo turns
//! into a 200 with a synthesized body. Every other route maps upstream
//! failures to a structured 502.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::caching::{cache_key, ResponseCache};
use crate::core::config::ProxyConfig;
use crate::core::error::{ProxyError, ProxyResult};
use crate::middleware::REQUEST_ID_HEADER;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const API_VERSION_HEADER: &str = "x-api-version";
const CACHE_STATUS_HEADER: &str = "x-cache";

/// Inbound bodies are buffered before forwarding; cap them well above any
/// legitimate dashboard payload.
const MAX_INBOUND_BODY: usize = 16 * 1024 * 1024;

/// Routes that degrade to a synthetic 200 result instead of surfacing
/// upstream failures.
fn is_search_route(path: &str) -> bool {
    path == "/api/search" || path == "/api/video/search"
}

pub struct RequestForwarder {
    client: reqwest::Client,
    espejo_url: String,
    version: String,
    cache: ResponseCache,
    tokens: Arc<TokenManager>,
    response_ttl: Duration,
    max_cacheable_bytes: usize,
}

impl RequestForwarder {
    pub fn new(
        config: &ProxyConfig,
        cache: ResponseCache,
        tokens: Arc<TokenManager>,
    ) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .map_err(|e| ProxyError::internal(format!("build upstream client: {e}")))?;
        Ok(Self {
            client,
            espejo_url: config.espejo_url.trim_end_matches('/').to_string(),
            version: config.version.clone(),
            cache,
            tokens,
            response_ttl: config.cache.response_ttl,
            max_cacheable_bytes: config.cache.max_cacheable_bytes,
        })
    }

    /// Dispatch one API (or `/auth/token`) request.
    pub async fn forward(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or("").to_string();
        let is_get = method == axum::http::Method::GET;

        // 1. Cache check, GET only. A hit bypasses everything else.
        let key = cache_key(method.as_str(), &path, &query);
        if is_get {
            if let Some(body) = self.cache.get(&key).await {
                debug!(path = %path, "cache hit");
                return self.cached_response(body);
            }
        }

        // 2. Auth decision. Health needs no token; neither does the
        // credential-exchange passthrough itself.
        let need_token = path != "/api/health" && path != "/auth/token";
        let token = if need_token {
            match self.tokens.acquire().await {
                Ok(token) => Some(token),
                Err(e) => {
                    // Search degrades on token failure; everything else
                    // short-circuits to the structured 502.
                    if is_get && is_search_route(&path) {
                        warn!(error = %e, "token acquisition failed, degrading search");
                        return self.unreachable_search_fallback(&path, &query);
                    }
                    warn!(error = %e, "token acquisition failed");
                    return e.into_response();
                }
            }
        } else {
            None
        };

        // 3. Upstream call, preserving method, path, query and body.
        let upstream = match self
            .send_upstream(request, &method, &path, &query, token.as_deref())
            .await
        {
            Ok(response) => response,
            Err(e) => return self.unreachable_fallback(e, is_get, &path, &query).await,
        };

        // 4-9. Decode, apply fallback policy, merge, relay, populate.
        match self
            .relay(upstream, is_get, &path, &query, &key)
            .await
        {
            Ok(response) => response,
            // Relay classifies search application errors; the policy of
            // degrading them to a friendly 200 lives here.
            Err(ProxyError::UpstreamApplicationError { status }) => {
                debug!(path = %path, status, "espejo returned error, degrading search");
                self.search_error_fallback(&path, &query)
            }
            Err(e) => e.into_response(),
        }
    }

    /// Build and send the upstream request. Transport-level failures come
    /// back as `UpstreamUnreachable` for the fallback policy to classify.
    async fn send_upstream(
        &self,
        request: Request,
        method: &axum::http::Method,
        path: &str,
        query: &str,
        token: Option<&str>,
    ) -> ProxyResult<reqwest::Response> {
        let mut url = format!("{}{}", self.espejo_url, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|_| ProxyError::bad_request(format!("unsupported method {method}")))?;

        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = to_bytes(request.into_body(), MAX_INBOUND_BODY)
            .await
            .map_err(|e| ProxyError::bad_request(format!("read request body: {e}")))?;

        let mut builder = self
            .client
            .request(upstream_method, url)
            // Brotli preferred, gzip fallback; decoded below before relaying.
            .header("Accept-Encoding", "br, gzip");
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        if let Some(request_id) = request_id {
            builder = builder.header("X-Request-ID", request_id);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if !body.is_empty() {
            builder = builder.body(body.to_vec());
        }

        builder
            .send()
            .await
            .map_err(|e| ProxyError::unreachable(e.to_string()))
    }

    /// Steps 5-9: decode the body, classify search application errors,
    /// merge health, relay, and populate the cache.
    async fn relay(
        &self,
        upstream: reqwest::Response,
        is_get: bool,
        path: &str,
        query: &str,
        key: &str,
    ) -> ProxyResult<Response> {
        let status = upstream.status().as_u16();
        // Header map is captured before the body consumes the response.
        let upstream_headers: Vec<(String, Vec<u8>)> = upstream
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let content_encoding = upstream
            .headers()
            .get("content-encoding")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let raw = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::unreachable(format!("read espejo body: {e}")))?;

        // 5. Normalize content-encoding: always re-serve identity.
        let body = decode_body(raw, content_encoding.as_deref())?;

        // 6. Search: an upstream application error is surfaced as its own
        // variant so the caller can degrade it instead of relaying it.
        if is_get && status >= 400 && is_search_route(path) {
            return Err(ProxyError::UpstreamApplicationError { status });
        }

        // 7. Health merge: espejo health plus local proxy fields.
        if path == "/api/health" && status == 200 {
            if let Ok(Value::Object(espejo_health)) = serde_json::from_slice::<Value>(&body) {
                let mut merged = espejo_health;
                merged.insert("proxy".to_string(), json!("ok"));
                merged.insert("espejo".to_string(), json!("ok"));
                return Ok(self.health_response(merged).await);
            }
        }

        // 9. Cache population before the body moves into the response.
        if is_get && status == 200 && !body.is_empty() && body.len() < self.max_cacheable_bytes {
            self.cache.set(key, &body, self.response_ttl).await;
        }

        // 8. Pass-through: headers verbatim minus content-encoding, plus
        // the cache-status and API-version headers.
        let mut response = Response::new(Body::from(body));
        *response.status_mut() =
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = response.headers_mut();
        for (name, value) in upstream_headers {
            if matches!(
                name.as_str(),
                "content-encoding" | "content-length" | "transfer-encoding" | "connection"
            ) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }
        if !headers.contains_key(API_VERSION_HEADER) {
            if let Ok(version) = HeaderValue::from_str(&self.version) {
                headers.insert(HeaderName::from_static(API_VERSION_HEADER), version);
            }
        }
        headers.insert(
            HeaderName::from_static(CACHE_STATUS_HEADER),
            HeaderValue::from_static("MISS"),
        );
        Ok(response)
    }

    /// Step 4: the espejo could not be reached at all.
    async fn unreachable_fallback(
        &self,
        error: ProxyError,
        is_get: bool,
        path: &str,
        query: &str,
    ) -> Response {
        warn!(error = %error, path = %path, "espejo unreachable");
        if path == "/api/health" {
            let mut health = Map::new();
            health.insert("status".to_string(), json!("ok"));
            health.insert("proxy".to_string(), json!("ok"));
            health.insert("espejo".to_string(), json!("unreachable"));
            return self.health_response(health).await;
        }
        if is_get && is_search_route(path) {
            return self.unreachable_search_fallback(path, query);
        }
        error.into_response()
    }

    /// Synthetic search result for an unreachable espejo: the caller sees a
    /// usable degraded answer instead of a hard failure.
    fn unreachable_search_fallback(&self, path: &str, query: &str) -> Response {
        let q = search_query(query);
        let body = if path == "/api/search" {
            json!({
                "query": q,
                "results": [{
                    "title": "Servidor espejo no disponible",
                    "url": "#",
                    "snippet": "Arranque el espejo (puerto 8080) y vuelva a intentar. Mientras tanto, el proxy está activo.",
                }],
                "cached": false,
            })
        } else {
            json!({
                "results": [{
                    "id": "offline",
                    "title": "Servidor espejo no disponible",
                    "channel": "Arranque el espejo (puerto 8080)",
                    "duration_sec": 0,
                }],
                "cached": false,
            })
        };
        self.fallback_json(body)
    }

    /// The espejo answered a search with 4xx/5xx: point the caller at an
    /// external engine rather than propagating the error code.
    fn search_error_fallback(&self, path: &str, query: &str) -> Response {
        let q = search_query(query);
        let body = if path == "/api/search" {
            let encoded: String = url::form_urlencoded::byte_serialize(q.as_bytes()).collect();
            json!({
                "query": q,
                "results": [{
                    "title": "El espejo devolvió un error. Puede buscar en DuckDuckGo.",
                    "url": format!("https://duckduckgo.com/?q={encoded}"),
                    "snippet": "Reintente más tarde o use el enlace para buscar directamente.",
                }],
                "cached": false,
            })
        } else {
            json!({
                "results": [{
                    "id": "fallback",
                    "title": "El espejo devolvió un error",
                    "channel": "Reintente más tarde",
                    "duration_sec": 0,
                }],
                "cached": false,
            })
        };
        self.fallback_json(body)
    }

    /// Health body enriched with proxy version and cache stats. Unknown
    /// espejo keys are preserved; local fields win on collision.
    async fn health_response(&self, mut health: Map<String, Value>) -> Response {
        let stats = self.cache.stats().await;
        health.insert("version".to_string(), json!(self.version));
        health.insert("cache_entries".to_string(), json!(stats.entries));
        health.insert("cache_size_bytes".to_string(), json!(stats.size_bytes));
        self.fallback_json(Value::Object(health))
    }

    fn cached_response(&self, body: Vec<u8>) -> Response {
        let mut response = Response::new(Body::from(body));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(
            HeaderName::from_static(CACHE_STATUS_HEADER),
            HeaderValue::from_static("HIT"),
        );
        if let Ok(version) = HeaderValue::from_str(&self.version) {
            headers.insert(HeaderName::from_static(API_VERSION_HEADER), version);
        }
        response
    }

    /// 200 JSON response carrying the proxy's API version header.
    fn fallback_json(&self, body: Value) -> Response {
        let mut response = Json(body).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        if let Ok(version) = HeaderValue::from_str(&self.version) {
            headers.insert(HeaderName::from_static(API_VERSION_HEADER), version);
        }
        response
    }
}

/// The `q` parameter of a search query string, defaulting to a generic
/// placeholder so fallback payloads stay readable.
fn search_query(query: &str) -> String {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "q")
        .map(|(_, value)| value.into_owned())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| "búsqueda".to_string())
}

/// Decode a br/gzip body fully into memory; identity passes through.
fn decode_body(raw: Bytes, content_encoding: Option<&str>) -> ProxyResult<Vec<u8>> {
    match content_encoding {
        Some("br") => {
            let mut decoded = Vec::new();
            brotli::Decompressor::new(raw.as_ref(), 4096)
                .read_to_end(&mut decoded)
                .map_err(|e| ProxyError::decode(format!("brotli: {e}")))?;
            Ok(decoded)
        }
        Some("gzip") => {
            let mut decoded = Vec::new();
            flate2::read::GzDecoder::new(raw.as_ref())
                .read_to_end(&mut decoded)
                .map_err(|e| ProxyError::decode(format!("gzip: {e}")))?;
            Ok(decoded)
        }
        _ => Ok(raw.to_vec()),
    }
}
