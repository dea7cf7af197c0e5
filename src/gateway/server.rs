//! # Proxy Server
//!
//! Assembles the axum router, wires the middleware chain around the
//! forwarder and drives the listener with graceful shutdown.
//!
//! Middleware order, outermost first: request-id, logging, rate limiting,
//! forwarder. The request-id layer runs first so both the log record and
//! the forwarded upstream call see the assigned identifier; the limiter
//! sits inside so its 429s are logged and carry the id.

use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::{any, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::forwarder::RequestForwarder;
use super::static_files;
use crate::auth::TokenManager;
use crate::caching::ResponseCache;
use crate::core::config::ProxyConfig;
use crate::core::error::ProxyResult;
use crate::middleware::{
    logging_middleware, rate_limit_middleware, request_id_middleware, RateLimiter,
};

/// Shared state handed to the forwarding handler.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<RequestForwarder>,
}

pub struct ProxyServer {
    config: ProxyConfig,
    app: Router,
    cache: ResponseCache,
}

impl ProxyServer {
    /// Construct every component once at process start and inject them;
    /// no global mutable state, so tests can run isolated instances.
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        config.validate()?;

        let cache = ResponseCache::from_config(&config.cache)?;
        let tokens = Arc::new(TokenManager::new(&config)?);
        let forwarder = Arc::new(RequestForwarder::new(&config, cache.clone(), tokens)?);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        limiter.spawn_reaper(config.rate_limit.reap_interval);

        let state = AppState { forwarder };
        let static_service = ServeDir::new(&config.static_dir)
            .append_index_html_on_directories(true)
            .not_found_service(any(static_files::not_found));

        let app = Router::new()
            .route("/api", any(forward_handler))
            .route("/api/*path", any(forward_handler))
            .route("/auth/token", post(forward_handler))
            .fallback_service(static_service)
            .with_state(state)
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ))
            .layer(axum::middleware::from_fn(logging_middleware))
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http());

        Ok(Self { config, app, cache })
    }

    /// The assembled router (integration tests drive this directly).
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Bind and serve until the shutdown signal resolves, then release the
    /// cache handle.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> ProxyResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            espejo = %self.config.espejo_url,
            version = %self.config.version,
            "proxy listening"
        );

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        self.cache.close().await;
        info!("proxy shut down");
        Ok(())
    }
}

async fn forward_handler(State(state): State<AppState>, request: Request) -> Response {
    state.forwarder.forward(request).await
}
