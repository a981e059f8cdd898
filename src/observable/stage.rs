//! Filter and converter stages
//!
//! Both are the same node type; what differs is the dispatch function built
//! by [`RecordStream::filter`](crate::observable::RecordStream::filter) or
//! [`RecordStream::converter`](crate::observable::RecordStream::converter).

use crate::observable::{
    fan_out, panic_message, Observable, Record, Registry, Subscriber, SubscriberId,
};
use derive_more::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// What a stage does with one record
pub(crate) enum Outcome<T> {
    Forward(T),
    Skip,
    Fault(String),
}

pub(crate) type Dispatch<In, Out> = Box<dyn Fn(In) -> Outcome<Out> + Send + Sync>;

/// Label used in logs
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StageKind {
    #[display("filter")]
    Filter,
    #[display("converter")]
    Converter,
}

/// One step of a pipeline.
///
/// The stage holds its upstream but registers with it only while it has
/// subscribers of its own. While registered, the upstream keeps the stage
/// alive; once the last subscriber leaves, the stage is free to drop.
pub struct Stage<In, Out> {
    this: Weak<Self>,
    kind: StageKind,
    upstream: Arc<dyn Observable<In>>,
    link_id: SubscriberId,
    dispatch: Dispatch<In, Out>,
    subscribers: Registry<Subscriber<Out>>,
}

impl<In: Record, Out: Record> Stage<In, Out> {
    pub(crate) fn new(
        kind: StageKind,
        upstream: Arc<dyn Observable<In>>,
        dispatch: Dispatch<In, Out>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            kind,
            upstream,
            link_id: SubscriberId::next(),
            dispatch,
            subscribers: Registry::new(),
        })
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Whether this stage currently holds a registration with its upstream
    pub fn is_linked(&self) -> bool {
        !self.subscribers.is_empty()
    }

    fn receive(&self, record: In) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.dispatch)(record)))
            .unwrap_or_else(|payload| Outcome::Fault(panic_message(payload.as_ref())));

        match outcome {
            Outcome::Forward(record) => {
                fan_out(&self.subscribers, record);
            }
            Outcome::Skip => {}
            Outcome::Fault(reason) => {
                warn!(stage = %self.kind, %reason, "Stage function failed, record dropped");
            }
        }
    }

    fn link(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let link = Subscriber::with_id(self.link_id, move |record: In| this.receive(record));
        self.upstream.subscribe(&link);
        debug!(stage = %self.kind, depth = self.depth(), "Stage linked upstream");
    }

    fn unlink(&self) {
        self.upstream.unsubscribe(Some(self.link_id));
        debug!(stage = %self.kind, depth = self.depth(), "Stage unlinked from upstream");
    }
}

impl<In: Record, Out: Record> Observable<Out> for Stage<In, Out> {
    fn subscribe(&self, subscriber: &Subscriber<Out>) -> bool {
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
        self.upstream.depth() + 1
    }
}
