//! Root node that records are pushed into

use crate::observable::{
    fan_out, Observable, Record, RecordStream, Registry, Subscriber, SubscriberId,
};
use std::sync::Arc;

/// A hot source: whatever is emitted goes to the subscribers present at that moment
#[derive(Debug)]
pub struct Subject<T> {
    subscribers: Registry<Subscriber<T>>,
}

impl<T: Record> Subject<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Registry::new(),
        }
    }

    pub fn stream(self: &Arc<Self>) -> RecordStream<T> {
        let node: Arc<dyn Observable<T>> = Arc::clone(self) as Arc<dyn Observable<T>>;
        RecordStream::from_node(node)
    }

    /// Deliver `record` to every current subscriber, returning how many were reached
    pub fn emit(&self, record: T) -> usize {
        fan_out(&self.subscribers, record)
    }
}

impl<T: Record> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Observable<T> for Subject<T> {
    fn subscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.subscribers.add(subscriber.id(), subscriber.clone())
    }

    fn unsubscribe(&self, id: Option<SubscriberId>) -> bool {
        self.subscribers.remove(id)
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
