//! The record produced for every observed request/response pair

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{request, response, HeaderMap, Method, StatusCode, Uri, Version};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Correlation id for one exchange
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRef
))]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Create a new time-ordered (v7) id
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Opaque label attached by a tagged request filter
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128),
    derive(
        Clone,
        Debug,
        Display,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        TryFrom,
        AsRef
    )
)]
pub struct RouteTag(String);

/// Request metadata, available before any body byte is read
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn from_parts(parts: &request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Header value as text; `None` when absent or not valid visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

/// Response metadata
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn from_parts(parts: &response::Parts) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// One proxied request paired with its response, bodies decoded.
///
/// Heads and bodies are shared between copies; `attributes` is each copy's
/// own, so a consumer can annotate its copy without other consumers seeing it.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub id: ExchangeId,
    pub arrived_at: DateTime<Utc>,
    pub request: Arc<RequestHead>,
    pub response: Arc<ResponseHead>,
    pub request_body: Bytes,
    pub response_body: Bytes,
    pub route_tag: Option<RouteTag>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Exchange {
    pub fn new(
        request: RequestHead,
        response: ResponseHead,
        request_body: impl Into<Bytes>,
        response_body: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: ExchangeId::generate(),
            arrived_at: Utc::now(),
            request: Arc::new(request),
            response: Arc::new(response),
            request_body: request_body.into(),
            response_body: response_body.into(),
            route_tag: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Copy with its own top-level fields and shared heads and bodies
    pub fn shallow_clone(&self) -> Self {
        self.clone()
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Response body as text, replacing invalid UTF-8
    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response_body)
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
