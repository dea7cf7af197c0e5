//! End-to-end tests: the assembled router against a mocked espejo server.
//!
//! Each test builds an isolated proxy instance (memory cache, its own rate
//! limiter) so state never leaks between scenarios.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::io::Write;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use espejo_proxy::core::config::{CacheBackend, ProxyConfig};
use espejo_proxy::ProxyServer;

fn test_config(espejo_url: String) -> ProxyConfig {
    let mut config = ProxyConfig {
        espejo_url,
        version: "test-1".to_string(),
        ..Default::default()
    };
    config.cache.backend = CacheBackend::Memory;
    config
}

fn proxy_for(espejo_url: String) -> axum::Router {
    ProxyServer::new(test_config(espejo_url)).unwrap().router()
}

/// An espejo URL nothing listens on, for the unreachable branches.
fn dead_espejo() -> String {
    "http://127.0.0.1:9".to_string()
}

async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": token })),
        )
        .mount(server)
        .await;
}

async fn send(app: &axum::Router, request: Request<Body>) -> (axum::http::response::Parts, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (parts, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn degraded_search_when_espejo_unreachable() {
    let app = proxy_for(dead_espejo());
    let (parts, body) = send(&app, get("/api/search?q=gatos")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["query"], "gatos");
    assert_eq!(body["cached"], false);
    let title = body["results"][0]["title"].as_str().unwrap();
    assert!(title.contains("no disponible"), "title was {title}");
}

#[tokio::test]
async fn degraded_video_search_when_espejo_unreachable() {
    let app = proxy_for(dead_espejo());
    let (parts, body) = send(&app, get("/api/video/search?q=gatos")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["results"][0]["id"], "offline");
    assert_eq!(body["results"][0]["duration_sec"], 0);
}

#[tokio::test]
async fn non_search_routes_get_502_when_unreachable() {
    let app = proxy_for(dead_espejo());
    let (parts, body) = send(&app, get("/api/chat?m=hola")).await;

    assert_eq!(parts.status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "espejo_no_disponible");
    assert!(body["message"].as_str().unwrap().contains("espejo"));
}

#[tokio::test]
async fn health_synthesized_when_unreachable() {
    let app = proxy_for(dead_espejo());
    let (parts, body) = send(&app, get("/api/health")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["proxy"], "ok");
    assert_eq!(body["espejo"], "unreachable");
    assert_eq!(body["version"], "test-1");
    assert!(body["cache_entries"].is_number());
    assert!(body["cache_size_bytes"].is_number());
}

#[tokio::test]
async fn health_merge_preserves_upstream_fields() {
    let espejo = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "uptime_sec": 42,
        })))
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, body) = send(&app, get("/api/health")).await;

    assert_eq!(parts.status, StatusCode::OK);
    // Superset: local fields added, nothing from the espejo dropped.
    assert_eq!(body["status"], "ok");
    assert_eq!(body["uptime_sec"], 42);
    assert_eq!(body["proxy"], "ok");
    assert_eq!(body["espejo"], "ok");
    assert_eq!(body["version"], "test-1");
    assert!(body["cache_entries"].is_number());
    assert!(body["cache_size_bytes"].is_number());
}

#[tokio::test]
async fn forwarded_get_attaches_bearer_and_caches() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/video/trending"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})),
        )
        .expect(1)
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());

    let (parts, body) = send(&app, get("/api/video/trending")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers["x-cache"], "MISS");
    assert_eq!(parts.headers["x-api-version"], "test-1");
    assert_eq!(body["results"], serde_json::json!([]));

    // Second identical request is served from cache; the mock's expect(1)
    // verifies the upstream saw exactly one call.
    let (parts, body) = send(&app, get("/api/video/trending")).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers["x-cache"], "HIT");
    assert_eq!(body["results"], serde_json::json!([]));
}

#[tokio::test]
async fn oversized_response_is_never_cached() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    let big = vec![b'x'; 600 * 1024];
    Mock::given(method("GET"))
        .and(path("/api/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(big))
        .expect(2)
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let first = app.clone().oneshot(get("/api/catalog")).await.unwrap();
    assert_eq!(first.headers()["x-cache"], "MISS");
    // Still a miss: a 600 KB body is over the cache ceiling.
    let second = app.clone().oneshot(get("/api/catalog")).await.unwrap();
    assert_eq!(second.headers()["x-cache"], "MISS");
}

#[tokio::test]
async fn non_200_responses_are_not_cached() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/chat/history"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "not_found"})),
        )
        .expect(2)
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let first = app.clone().oneshot(get("/api/chat/history")).await.unwrap();
    assert_eq!(first.status(), StatusCode::NOT_FOUND);
    let second = app.clone().oneshot(get("/api/chat/history")).await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_application_error_becomes_duckduckgo_fallback() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("q", "gatos"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, body) = send(&app, get("/api/search?q=gatos")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["query"], "gatos");
    let url = body["results"][0]["url"].as_str().unwrap();
    assert!(url.starts_with("https://duckduckgo.com/?q=gatos"), "url was {url}");
}

#[tokio::test]
async fn non_search_application_error_passes_through() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(serde_json::json!({"error": "mantenimiento"})),
        )
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, body) = send(&app, get("/api/chat")).await;

    // Only the search routes degrade; everything else relays the espejo's
    // own status and body.
    assert_eq!(parts.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "mantenimiento");
}

#[tokio::test]
async fn token_failure_on_search_degrades_instead_of_502() {
    let espejo = MockServer::start().await;
    // Espejo up, but the credential exchange rejects.
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, body) = send(&app, get("/api/search?q=gatos")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(body["results"][0]["title"]
        .as_str()
        .unwrap()
        .contains("no disponible"));
}

#[tokio::test]
async fn token_failure_on_other_routes_is_502() {
    let espejo = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, body) = send(&app, get("/api/video/trending")).await;

    assert_eq!(parts.status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "espejo_no_disponible");
}

#[tokio::test]
async fn gzip_body_is_decoded_and_encoding_stripped() {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(br#"{"mensaje":"hola"}"#).unwrap();
    let compressed = encoder.finish().unwrap();

    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/chat/welcome"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(compressed)
                .insert_header("content-encoding", "gzip"),
        )
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, body) = send(&app, get("/api/chat/welcome")).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(parts.headers.get("content-encoding").is_none());
    assert_eq!(body["mensaje"], "hola");
}

#[tokio::test]
async fn mutating_request_does_not_invalidate_cached_get() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"messages": 1})),
        )
        .expect(1)
        .mount(&espejo)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let (parts, _) = send(&app, get("/api/chat")).await;
    assert_eq!(parts.headers["x-cache"], "MISS");

    let post = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"hola"}"#))
        .unwrap();
    let response = app.clone().oneshot(post).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Known staleness window: the cache is a read accelerator, not a
    // coherence layer; the mutation leaves the cached GET in place until
    // its TTL elapses.
    let (parts, body) = send(&app, get("/api/chat")).await;
    assert_eq!(parts.headers["x-cache"], "HIT");
    assert_eq!(body["messages"], 1);
}

#[tokio::test]
async fn rate_limit_rejects_with_structured_429() {
    let mut config = test_config(dead_espejo());
    config.rate_limit.limit = 2;
    let app = ProxyServer::new(config).unwrap().router();

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let (parts, body) = send(&app, get("/api/health")).await;
    assert_eq!(parts.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limit");
    assert_eq!(body["message"], "Demasiadas peticiones.");
}

#[tokio::test]
async fn rate_limit_prefers_forwarded_for_identity() {
    let mut config = test_config(dead_espejo());
    config.rate_limit.limit = 1;
    let app = ProxyServer::new(config).unwrap().router();

    let from = |ip: &str| {
        Request::builder()
            .uri("/api/health")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(
        app.clone().oneshot(from("10.0.0.1")).await.unwrap().status(),
        StatusCode::OK
    );
    // A different forwarded identity has its own window.
    assert_eq!(
        app.clone().oneshot(from("10.0.0.2")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(from("10.0.0.1")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn request_id_flows_to_upstream_and_response() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/api/chat"))
        .and(header("X-Request-ID", "rid-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let request = Request::builder()
        .uri("/api/chat")
        .header("x-request-id", "rid-7")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "rid-7");
}

#[tokio::test]
async fn auth_token_exchange_is_forwarded_without_bearer() {
    let espejo = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"token": "t-9", "expires_at": 4102444800u64}),
        ))
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let request = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"client_id":"rauli-local","client_secret":"rauli-local-secret"}"#,
        ))
        .unwrap();
    let (parts, body) = send(&app, request).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body["token"], "t-9");
}

#[tokio::test]
async fn upstream_status_and_body_pass_through() {
    let espejo = MockServer::start().await;
    mount_token(&espejo, "tok-1").await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"id": "m1"}))
                .insert_header("x-espejo-extra", "si"),
        )
        .mount(&espejo)
        .await;

    let app = proxy_for(espejo.uri());
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"hola"}"#))
        .unwrap();
    let (parts, body) = send(&app, request).await;

    assert_eq!(parts.status, StatusCode::CREATED);
    assert_eq!(parts.headers["x-espejo-extra"], "si");
    assert_eq!(parts.headers["x-cache"], "MISS");
    assert_eq!(parts.headers["x-api-version"], "test-1");
    assert_eq!(body["id"], "m1");
}
