//! Gateway: the forwarder state machine, the server assembly and the
//! static-content boundary.

pub mod forwarder;
pub mod server;
pub mod static_files;

pub use forwarder::RequestForwarder;
pub use server::{AppState, ProxyServer};
