//! # Static Content Boundary
//!
//! Non-API paths serve the dashboard build out of the static directory.
//! When the directory holds no index, the root falls back to a minimal
//! inline page so the proxy is never a blank 404 on first run. The actual
//! dashboard is an external collaborator; nothing here is proxy logic.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

const FALLBACK_HTML: &str = r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>RAULI-VISION</title>
<style>
body{font-family:system-ui,sans-serif;background:#0d1117;color:#e6edf3;margin:2rem;text-align:center;}
h1{color:#58a6ff;}
a{color:#58a6ff;}
</style>
</head>
<body>
<h1>RAULI-VISION</h1>
<p>Cliente local activo. Para el dashboard completo, construya el frontend y copie <code>dashboard/dist</code> a <code>static/</code>.</p>
<p><a href="/api/health">Estado API</a></p>
</body>
</html>"#;

/// Served when `ServeDir` finds nothing: the inline page for the root,
/// plain 404 for everything else.
pub async fn not_found(request: Request) -> Response {
    match request.uri().path() {
        "/" | "/index.html" => Html(FALLBACK_HTML).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn test_root_gets_fallback_page() {
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = not_found(request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_paths_get_404() {
        let request = axum::http::Request::builder()
            .uri("/logo.png")
            .body(Body::empty())
            .unwrap();
        let response = not_found(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
