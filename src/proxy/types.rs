//! Type definitions for the proxy transport

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Upstream every proxied request is sent to
#[nutype(
    sanitize(trim),
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct TargetUrl(String);

/// Default path when none is specified
pub const DEFAULT_PATH: &str = "/";

/// Default upstream timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of completed captures waiting for delivery
pub const DEFAULT_DELIVERY_QUEUE: usize = 1024;

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Base URL requests are forwarded to; `None` means act as a forward
    /// proxy and use each request's absolute-form URI
    pub target: Option<TargetUrl>,
    /// Time allowed for the upstream to answer with a response head
    pub request_timeout: Duration,
    /// Completed captures allowed to wait for delivery; further captures are
    /// dropped until subscribers catch up
    pub delivery_queue: usize,
}

impl ProxyConfig {
    pub fn with_target(target: TargetUrl) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            delivery_queue: DEFAULT_DELIVERY_QUEUE,
        }
    }
}

/// Errors that can occur in the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Request timeout after {0:?}")]
    RequestTimeout(Duration),

    #[error("Invalid target URL: {0}")]
    InvalidTargetUrl(String),

    #[error("No target configured and request URI {0} is not absolute")]
    MissingTarget(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("Proxy server is already listening on {0}")]
    AlreadyListening(std::net::SocketAddr),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
