//! The exchange source: the root of every pipeline
//!
//! The proxy transport calls [`ExchangeSource::begin`] as soon as a request
//! head arrives. Request filters are consulted first, on metadata alone; only
//! when a request filter or a direct subscriber wants the exchange does the
//! source hand back a [`Capture`] that buffers the bodies. Everything else
//! streams through the proxy untouched.

pub mod body;
pub mod capture;
pub mod request_filter;

pub use body::{BodyAccumulator, ContentEncoding};
pub use capture::{Capture, CompletedExchange};
pub use request_filter::RequestFilter;

use crate::exchange::{Exchange, ExchangeId, RequestHead, RouteTag};
use crate::observable::{
    panic_message, Observable, RecordStream, Registry, Subject, Subscriber, SubscriberId,
    Subscription,
};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that end the capture of a single exchange
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to decode {encoding} response body: {source}")]
    Decode {
        encoding: ContentEncoding,
        #[source]
        source: std::io::Error,
    },

    #[error("Exchange {exchange_id} completed without a response")]
    MissingResponse { exchange_id: ExchangeId },
}

/// Published on [`ExchangeSource::faults`] when an exchange could not be delivered
#[derive(Clone, Debug)]
pub struct CaptureFault {
    pub exchange_id: ExchangeId,
    pub request: Arc<RequestHead>,
    pub error: String,
}

/// One-shot callback that receives the completed exchange
pub type Continuation = Box<dyn FnOnce(Exchange) + Send>;

/// Metadata-only predicate registered by a request filter.
///
/// Returns `None` when not interested, otherwise the continuation to run
/// once the exchange is complete.
#[derive(Clone)]
pub struct RequestGate(Arc<dyn Fn(&RequestHead) -> Option<Continuation> + Send + Sync>);

impl RequestGate {
    pub fn new<F>(gate: F) -> Self
    where
        F: Fn(&RequestHead) -> Option<Continuation> + Send + Sync + 'static,
    {
        Self(Arc::new(gate))
    }

    /// A panicking gate counts as not interested
    fn evaluate(&self, head: &RequestHead) -> Option<Continuation> {
        catch_unwind(AssertUnwindSafe(|| (self.0)(head))).unwrap_or_else(|payload| {
            warn!(
                uri = %head.uri,
                reason = %panic_message(payload.as_ref()),
                "Request gate panicked, treating as not interested"
            );
            None
        })
    }
}

impl fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestGate")
    }
}

/// Counters describing what the source has done so far
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub exchanges_seen: u64,
    pub captures_started: u64,
    pub captures_skipped: u64,
    pub exchanges_delivered: u64,
    pub capture_failures: u64,
}

#[derive(Debug, Default)]
struct SourceCounters {
    seen: AtomicU64,
    started: AtomicU64,
    skipped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Root of every pipeline; owns the direct subscribers and request gates
#[derive(Debug)]
pub struct ExchangeSource {
    exchanges: Arc<Subject<Exchange>>,
    faults: Arc<Subject<CaptureFault>>,
    gates: Registry<RequestGate>,
    counters: SourceCounters,
}

impl ExchangeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exchanges: Arc::new(Subject::new()),
            faults: Arc::new(Subject::new()),
            gates: Registry::new(),
            counters: SourceCounters::default(),
        })
    }

    /// Every exchange delivered to direct subscribers
    pub fn stream(&self) -> RecordStream<Exchange> {
        self.exchanges.stream()
    }

    /// Exchanges whose capture failed
    pub fn faults(&self) -> RecordStream<CaptureFault> {
        self.faults.stream()
    }

    pub fn filter<P>(&self, predicate: P) -> RecordStream<Exchange>
    where
        P: Fn(&Exchange) -> bool + Send + Sync + 'static,
    {
        self.stream().filter(predicate)
    }

    pub fn converter<U, F>(&self, convert: F) -> RecordStream<U>
    where
        U: crate::observable::Record,
        F: Fn(Exchange) -> U + Send + Sync + 'static,
    {
        self.stream().converter(convert)
    }

    pub fn try_converter<U, F, E>(&self, convert: F) -> RecordStream<U>
    where
        U: crate::observable::Record,
        F: Fn(Exchange) -> Result<U, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        self.stream().try_converter(convert)
    }

    /// Stage that decides on request metadata, before any body is buffered
    pub fn request_filter<P>(self: &Arc<Self>, predicate: P) -> RecordStream<Exchange>
    where
        P: Fn(&RequestHead) -> bool + Send + Sync + 'static,
    {
        RequestFilter::new(Arc::clone(self), None, predicate).stream()
    }

    /// Like [`ExchangeSource::request_filter`], stamping accepted exchanges with `tag`
    pub fn request_filter_tagged<P>(
        self: &Arc<Self>,
        tag: RouteTag,
        predicate: P,
    ) -> RecordStream<Exchange>
    where
        P: Fn(&RequestHead) -> bool + Send + Sync + 'static,
    {
        RequestFilter::new(Arc::clone(self), Some(tag), predicate).stream()
    }

    pub fn subscribe(&self, subscriber: &Subscriber<Exchange>) -> bool {
        self.exchanges.subscribe(subscriber)
    }

    pub fn subscribe_with<F>(&self, callback: F) -> Subscription<Exchange>
    where
        F: Fn(Exchange) + Send + Sync + 'static,
    {
        self.stream().subscribe_with(callback)
    }

    pub fn unsubscribe(&self, id: Option<SubscriberId>) -> bool {
        self.exchanges.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.exchanges.subscriber_count()
    }

    pub fn add_gate(&self, id: SubscriberId, gate: RequestGate) -> bool {
        self.gates.add(id, gate)
    }

    pub fn remove_gate(&self, id: Option<SubscriberId>) -> bool {
        self.gates.remove(id)
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Decide whether the exchange behind `head` is worth buffering.
    ///
    /// Returns `None` when no request gate accepted it and there are no direct
    /// subscribers.
    pub fn begin(&self, head: RequestHead) -> Option<Capture> {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);
        let head = Arc::new(head);

        let continuations: Vec<Continuation> = self
            .gates
            .snapshot()
            .iter()
            .filter_map(|gate| gate.evaluate(&head))
            .collect();

        if continuations.is_empty() && self.exchanges.subscriber_count() == 0 {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(method = %head.method, uri = %head.uri, "No interest, exchange not captured");
            return None;
        }

        self.counters.started.fetch_add(1, Ordering::Relaxed);
        let capture = Capture::new(head, continuations);
        debug!(
            exchange_id = %capture.id(),
            method = %capture.request().method,
            uri = %capture.request().uri,
            continuations = capture.continuation_count(),
            "Capturing exchange"
        );
        Some(capture)
    }

    /// Hand the record to direct subscribers first, then to each continuation
    pub fn deliver(&self, completed: CompletedExchange) {
        let CompletedExchange {
            exchange,
            continuations,
        } = completed;

        let direct = self.exchanges.emit(exchange.shallow_clone());

        let mut continued = 0usize;
        for continuation in continuations {
            let copy = exchange.shallow_clone();
            match catch_unwind(AssertUnwindSafe(move || continuation(copy))) {
                Ok(()) => continued += 1,
                Err(payload) => warn!(
                    exchange_id = %exchange.id,
                    reason = %panic_message(payload.as_ref()),
                    "Request filter continuation panicked"
                ),
            }
        }

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(exchange_id = %exchange.id, direct, continued, "Exchange delivered");
    }

    /// Complete and deliver; a failure only affects this exchange
    pub fn settle(&self, capture: Capture) {
        let exchange_id = capture.id();
        let request = capture.shared_request();

        match capture.complete() {
            Ok(completed) => self.deliver(completed),
            Err(error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %exchange_id,
                    uri = %request.uri,
                    %error,
                    "Exchange capture failed, not delivered"
                );
                self.faults.emit(CaptureFault {
                    exchange_id,
                    request,
                    error: error.to_string(),
                });
            }
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            exchanges_seen: self.counters.seen.load(Ordering::Relaxed),
            captures_started: self.counters.started.load(Ordering::Relaxed),
            captures_skipped: self.counters.skipped.load(Ordering::Relaxed),
            exchanges_delivered: self.counters.delivered.load(Ordering::Relaxed),
            capture_failures: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
