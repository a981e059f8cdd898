//! In-flight state of one buffered exchange

use crate::exchange::{Exchange, ExchangeId, RequestHead, ResponseHead};
use crate::source::body::{BodyAccumulator, ContentEncoding};
use crate::source::{CaptureError, Continuation};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Created by [`ExchangeSource::begin`](crate::source::ExchangeSource::begin)
/// when somebody wants the exchange; fed by the transport until the response
/// body ends.
pub struct Capture {
    id: ExchangeId,
    arrived_at: DateTime<Utc>,
    request: Arc<RequestHead>,
    response: Option<Arc<ResponseHead>>,
    body: BodyAccumulator,
    continuations: Vec<Continuation>,
}

impl Capture {
    pub(crate) fn new(request: Arc<RequestHead>, continuations: Vec<Continuation>) -> Self {
        Self {
            id: ExchangeId::generate(),
            arrived_at: Utc::now(),
            request,
            response: None,
            body: BodyAccumulator::new(),
            continuations,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub(crate) fn shared_request(&self) -> Arc<RequestHead> {
        Arc::clone(&self.request)
    }

    /// Number of request filters waiting on this exchange
    pub fn continuation_count(&self) -> usize {
        self.continuations.len()
    }

    pub fn push_request(&mut self, chunk: &[u8]) {
        self.body.push_request(chunk);
    }

    pub fn push_response(&mut self, chunk: &[u8]) {
        self.body.push_response(chunk);
    }

    pub fn set_response(&mut self, head: ResponseHead) {
        self.response = Some(Arc::new(head));
    }

    /// Decode the response body and assemble the record
    pub fn complete(self) -> Result<CompletedExchange, CaptureError> {
        let response = self.response.ok_or(CaptureError::MissingResponse {
            exchange_id: self.id,
        })?;
        let (request_body, response_body) = self
            .body
            .finish(ContentEncoding::from_headers(&response.headers))?;

        Ok(CompletedExchange {
            exchange: Exchange {
                id: self.id,
                arrived_at: self.arrived_at,
                request: self.request,
                response,
                request_body,
                response_body,
                route_tag: None,
                attributes: BTreeMap::new(),
            },
            continuations: self.continuations,
        })
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("id", &self.id)
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("has_response", &self.response.is_some())
            .field("request_bytes", &self.body.request_len())
            .field("response_bytes", &self.body.response_len())
            .field("continuations", &self.continuations.len())
            .finish()
    }
}

/// A fully assembled exchange still waiting to be delivered
pub struct CompletedExchange {
    pub(crate) exchange: Exchange,
    pub(crate) continuations: Vec<Continuation>,
}

impl CompletedExchange {
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }
}

impl fmt::Debug for CompletedExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletedExchange")
            .field("exchange", &self.exchange)
            .field("continuations", &self.continuations.len())
            .finish()
    }
}
