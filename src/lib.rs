//! Proxy Tap - observe HTTP traffic through a proxy as composable record streams
//!
//! Every exchange passing through the proxy can be filtered, converted and
//! retained in bounded stores. Bodies are only buffered when some pipeline
//! downstream is actually listening.

pub mod application;
pub mod config;
pub mod error;
pub mod exchange;
pub mod observable;
pub mod proxy;
pub mod source;
pub mod store;

pub use application::Application;
pub use error::{Error, Result};
pub use exchange::{Exchange, ExchangeId, RequestHead, ResponseHead, RouteTag};
pub use observable::{Observable, Record, RecordStream, Subscriber, SubscriberId, Subscription};
pub use proxy::{ProxyConfig, ProxyError, ProxyServer, TargetUrl};
pub use source::{CaptureError, CaptureFault, ExchangeSource, SourceStats};
pub use store::{MaxCount, RecordStore, StoreOptions};
