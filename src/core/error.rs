//! # Error Handling Module
//!
//! Defines the error taxonomy for the edge proxy and maps every failure
//! mode to a well-formed HTTP response. No branch is allowed to leak an
//! unhandled error to the transport layer: every variant below renders as
//! a structured `{error, message}` JSON body with the right status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the proxy.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// All failure modes the proxy distinguishes.
///
/// `UpstreamUnreachable` (connect/timeout) and `UpstreamApplicationError`
/// (espejo answered 4xx/5xx) are separate variants because they trigger
/// different fallback bodies on the health and search routes.
#[derive(Debug, Error, Clone)]
pub enum ProxyError {
    /// The espejo rejected the credential exchange, returned a malformed
    /// body, or returned an empty token string.
    #[error("Authentication failed: {reason}")]
    AuthFailure { reason: String },

    /// The espejo could not be reached at all (connection refused, DNS,
    /// client-side timeout).
    #[error("Espejo unreachable: {reason}")]
    UpstreamUnreachable { reason: String },

    /// The espejo answered, but with an application-level error status.
    #[error("Espejo returned error status {status}")]
    UpstreamApplicationError { status: u16 },

    /// The espejo body declared br/gzip encoding but could not be decoded.
    #[error("Failed to decode espejo body: {reason}")]
    DecodeFailure { reason: String },

    /// Sliding-window admission control rejected the client.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Malformed client input (bad method, unbuildable upstream request).
    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    /// Configuration problems detected at startup.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Cache store failures (sqlite I/O, poisoned handle).
    #[error("Cache store error: {message}")]
    CacheStore { message: String },

    /// Anything else: marshalling failures, internal invariant breaks.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    /// Create an authentication error with a custom reason.
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::AuthFailure {
            reason: reason.into(),
        }
    }

    /// Create an unreachable-upstream error with a custom reason.
    pub fn unreachable<S: Into<String>>(reason: S) -> Self {
        Self::UpstreamUnreachable {
            reason: reason.into(),
        }
    }

    /// Create a decode failure with a custom reason.
    pub fn decode<S: Into<String>>(reason: S) -> Self {
        Self::DecodeFailure {
            reason: reason.into(),
        }
    }

    /// Create a bad-request error with a custom reason.
    pub fn bad_request<S: Into<String>>(reason: S) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a cache store error with a custom message.
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::CacheStore {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code this error maps to when it reaches the caller
    /// directly. Health and search routes intercept some variants before
    /// this mapping applies (see the forwarder's fallback policy).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamApplicationError { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::DecodeFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CacheStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for the `{error, message}` wire body.
    /// The espejo-facing codes are kept verbatim from the deployed wire
    /// format so existing dashboard clients keep parsing them.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthFailure { .. } => "espejo_no_disponible",
            Self::UpstreamUnreachable { .. } => "espejo_no_disponible",
            Self::UpstreamApplicationError { .. } => "espejo_error",
            Self::DecodeFailure { .. } => "decode_error",
            Self::RateLimitExceeded => "rate_limit",
            Self::BadRequest { .. } => "bad_request",
            Self::Configuration { .. } => "internal",
            Self::CacheStore { .. } => "internal",
            Self::Internal { .. } => "internal",
        }
    }

    /// User-facing message for the wire body.
    pub fn public_message(&self) -> String {
        match self {
            Self::AuthFailure { .. } | Self::UpstreamUnreachable { .. } => {
                "No se pudo conectar con el servidor espejo.".to_string()
            }
            Self::RateLimitExceeded => "Demasiadas peticiones.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::UpstreamUnreachable {
                reason: err.to_string(),
            }
        } else {
            Self::Internal {
                message: err.to_string(),
            }
        }
    }
}

/// Render the error as the structured JSON wire body. Axum converts any
/// handler `Err(ProxyError)` through this automatically.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.error_type(),
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}
