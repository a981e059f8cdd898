//! Stage that decides on request metadata before anything is buffered

use crate::exchange::{Exchange, RequestHead, RouteTag};
use crate::observable::{
    fan_out, panic_message, Observable, RecordStream, Registry, Subscriber, SubscriberId,
};
use crate::source::{Continuation, ExchangeSource, RequestGate};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type HeadPredicate = Box<dyn Fn(&RequestHead) -> bool + Send + Sync>;

/// Registers a [`RequestGate`] with the source while it has subscribers.
///
/// Accepted exchanges reach this stage's subscribers through the gate's
/// continuation, never through the source's direct subscriber list.
pub struct RequestFilter {
    this: Weak<Self>,
    source: Arc<ExchangeSource>,
    gate_id: SubscriberId,
    predicate: HeadPredicate,
    tag: Option<RouteTag>,
    subscribers: Registry<Subscriber<Exchange>>,
}

impl RequestFilter {
    pub(crate) fn new<P>(
        source: Arc<ExchangeSource>,
        tag: Option<RouteTag>,
        predicate: P,
    ) -> Arc<Self>
    where
        P: Fn(&RequestHead) -> bool + Send + Sync + 'static,
    {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            source,
            gate_id: SubscriberId::next(),
            predicate: Box::new(predicate),
            tag,
            subscribers: Registry::new(),
        })
    }

    pub fn stream(self: &Arc<Self>) -> RecordStream<Exchange> {
        let node: Arc<dyn Observable<Exchange>> = Arc::clone(self) as Arc<dyn Observable<Exchange>>;
        RecordStream::from_node(node)
    }

    pub fn tag(&self) -> Option<&RouteTag> {
        self.tag.as_ref()
    }

    /// Whether the gate is currently registered with the source
    pub fn is_linked(&self) -> bool {
        !self.subscribers.is_empty()
    }

    fn accepts(&self, head: &RequestHead) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.predicate)(head))).unwrap_or_else(|payload| {
            warn!(
                uri = %head.uri,
                reason = %panic_message(payload.as_ref()),
                "Request predicate panicked, exchange not captured for this filter"
            );
            false
        })
    }

    fn deliver(&self, mut exchange: Exchange) {
        if let Some(tag) = &self.tag {
            exchange.route_tag = Some(tag.clone());
        }
        fan_out(&self.subscribers, exchange);
    }

    fn link(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let gate = RequestGate::new(move |head: &RequestHead| {
            if !this.accepts(head) {
                return None;
            }
            let target = Arc::clone(&this);
            let continuation: Continuation = Box::new(move |exchange| target.deliver(exchange));
            Some(continuation)
        });
        self.source.add_gate(self.gate_id, gate);
        debug!(tag = ?self.tag, "Request filter registered with source");
    }

    fn unlink(&self) {
        self.source.remove_gate(Some(self.gate_id));
        debug!(tag = ?self.tag, "Request filter removed from source");
    }
}

impl Observable<Exchange> for RequestFilter {
    fn subscribe(&self, subscriber: &Subscriber<Exchange>) -> bool {
        self.subscribers
            .add_then(subscriber.id(), subscriber.clone(), || self.link())
    }

    fn unsubscribe(&self, id: Option<SubscriberId>) -> bool {
        self.subscribers.remove_then(id, || self.unlink())
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn depth(&self) -> usize {
        1
    }
}

impl fmt::Debug for RequestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFilter")
            .field("gate_id", &self.gate_id)
            .field("tag", &self.tag)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
