//! Request forwarding with body taps

use crate::exchange::{RequestHead, ResponseHead};
use crate::proxy::tap::{share, Tap, TapBody};
use crate::proxy::types::*;
use crate::proxy::url_resolver::{host_of, resolve_target_uri};
use crate::source::{Capture, ExchangeSource};
use axum::body::Body;
use http::header::{
    HeaderName, CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use http::{HeaderMap, HeaderValue};
use hyper::{Request, Response};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

const PROXY_CONNECTION: &str = "proxy-connection";
const KEEP_ALIVE: &str = "keep-alive";

/// Remove hop-by-hop headers, including any named by `connection`
fn strip_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove(KEEP_ALIVE);
    headers.remove(PROXY_CONNECTION);
}

/// Forwards requests upstream and tees interesting exchanges into captures
#[derive(Clone)]
pub struct Forwarder {
    config: Arc<ProxyConfig>,
    source: Arc<ExchangeSource>,
    completed: mpsc::Sender<Capture>,
    client: hyper_util::client::legacy::Client<
        hyper_util::client::legacy::connect::HttpConnector,
        Body,
    >,
}

impl Forwarder {
    pub fn new(
        config: Arc<ProxyConfig>,
        source: Arc<ExchangeSource>,
        completed: mpsc::Sender<Capture>,
    ) -> Self {
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .http1_title_case_headers(true)
                .http1_preserve_header_case(true)
                .build_http();

        Self {
            config,
            source,
            completed,
            client,
        }
    }

    /// Forward `request` and stream the response back.
    ///
    /// The exchange is only buffered when the source asks for it; either way
    /// bytes flow through unchanged.
    #[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
    pub async fn forward(&self, request: Request<Body>) -> ProxyResult<Response<Body>> {
        let start_time = Instant::now();
        let (mut parts, body) = request.into_parts();

        let resolved = resolve_target_uri(self.config.target.as_ref(), &parts.uri)?;
        let capture = self.source.begin(RequestHead::from_parts(&parts)).map(share);

        let host = host_of(&resolved).and_then(|a| HeaderValue::from_str(a.as_str()).ok());
        if let Some(host) = host {
            parts.headers.insert(HOST, host);
        }
        strip_hop_headers(&mut parts.headers);
        parts.uri = resolved;

        let body = match &capture {
            Some(shared) => Body::new(TapBody::new(body, Tap::request(Arc::clone(shared)))),
            None => body,
        };

        let timeout = self.config.request_timeout;
        let upstream = self.client.request(Request::from_parts(parts, body));
        let response = tokio::time::timeout(timeout, upstream)
            .await
            .map_err(|_| ProxyError::RequestTimeout(timeout))??;

        let (mut response_parts, response_body) = response.into_parts();
        strip_hop_headers(&mut response_parts.headers);
        debug!(
            status = %response_parts.status,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            captured = capture.is_some(),
            "Upstream responded"
        );

        let Some(shared) = capture else {
            return Ok(Response::from_parts(response_parts, Body::new(response_body)));
        };

        if let Some(capture) = shared.lock().as_mut() {
            capture.set_response(ResponseHead::from_parts(&response_parts));
        }
        let tap = Tap::response(shared, self.completed.clone());
        Ok(Response::from_parts(
            response_parts,
            Body::new(TapBody::new(response_body, tap)),
        ))
    }
}
