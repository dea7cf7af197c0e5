//! Request middleware: admission control, request-id propagation and
//! structured request logging. Order matters and is fixed by the server:
//! request-id wraps logging wraps rate limiting wraps the forwarder,
//! so generated ids are visible to the log record.

pub mod logging;
pub mod rate_limit;
pub mod request_id;

pub use logging::logging_middleware;
pub use rate_limit::{rate_limit_middleware, RateLimiter};
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
