//! # espejo-proxy
//!
//! Local edge proxy between a client application and the remote espejo
//! (mirror) API server. It forwards API requests transparently while
//! handling the bearer-token lifecycle, keeps a read-through TTL cache of
//! GET responses, normalizes brotli/gzip content encoding, and degrades
//! gracefully when the espejo is unreachable or erroring instead of
//! propagating raw failures.

/// Error taxonomy and configuration.
pub mod core;

/// Read-through TTL response cache with pluggable backing stores.
pub mod caching;

/// Bearer-token lifecycle against the espejo credential exchange.
pub mod auth;

/// Rate limiting, request-id propagation and request logging.
pub mod middleware;

/// Forwarder state machine, server assembly, static boundary.
pub mod gateway;

pub use crate::core::config::ProxyConfig;
pub use crate::core::error::{ProxyError, ProxyResult};
pub use crate::gateway::{ProxyServer, RequestForwarder};
