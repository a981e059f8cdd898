//! HTTP transport feeding the exchange source
//!
//! Requests are forwarded as they stream in. When the source wants an
//! exchange, both bodies are tapped on the way through and the finished
//! capture is handed to a single delivery worker, so the client never waits
//! on the pipeline.

pub mod delivery;
pub mod error_response;
pub mod forward;
pub mod server;
pub mod tap;
pub mod types;
pub mod url_resolver;

pub use server::ProxyServer;
pub use types::{ProxyConfig, ProxyError, ProxyResult, TargetUrl};
