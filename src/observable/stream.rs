//! Handle type for building and consuming pipelines

use crate::observable::stage::{Outcome, Stage, StageKind};
use crate::observable::{Observable, Record, Subscriber, SubscriberId};
use crate::store::{RecordStore, StoreOptions};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Cheap, cloneable handle to one node of a pipeline.
///
/// Building a stage never mutates the node it starts from.
pub struct RecordStream<T> {
    node: Arc<dyn Observable<T>>,
}

impl<T> Clone for RecordStream<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> fmt::Debug for RecordStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("depth", &self.node.depth())
            .field("subscribers", &self.node.subscriber_count())
            .finish()
    }
}

impl<T: Record> RecordStream<T> {
    pub fn from_node(node: Arc<dyn Observable<T>>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<dyn Observable<T>> {
        &self.node
    }

    /// Returns `false` if the subscriber was already present
    pub fn subscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.node.subscribe(subscriber)
    }

    /// Subscribe a closure and get back a handle that can unsubscribe it
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let subscriber = Subscriber::new(callback);
        self.node.subscribe(&subscriber);
        Subscription {
            id: subscriber.id(),
            node: Arc::downgrade(&self.node),
            closed: AtomicBool::new(false),
        }
    }

    /// Remove one subscriber, or all of them with `None`
    pub fn unsubscribe(&self, id: Option<SubscriberId>) -> bool {
        self.node.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.node.subscriber_count()
    }

    pub fn depth(&self) -> usize {
        self.node.depth()
    }

    /// Forward a copy of each record for which `predicate` holds
    pub fn filter<P>(&self, predicate: P) -> RecordStream<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.chain(
            StageKind::Filter,
            Box::new(move |record| {
                if predicate(&record) {
                    Outcome::Forward(record)
                } else {
                    Outcome::Skip
                }
            }),
        )
    }

    /// Like [`RecordStream::filter`]; an `Err` drops the record and is logged
    pub fn try_filter<P, E>(&self, predicate: P) -> RecordStream<T>
    where
        P: Fn(&T) -> Result<bool, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        self.chain(
            StageKind::Filter,
            Box::new(move |record| match predicate(&record) {
                Ok(true) => Outcome::Forward(record),
                Ok(false) => Outcome::Skip,
                Err(e) => Outcome::Fault(e.to_string()),
            }),
        )
    }

    /// Forward `convert(record)` for every record
    pub fn converter<U, F>(&self, convert: F) -> RecordStream<U>
    where
        U: Record,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.chain(
            StageKind::Converter,
            Box::new(move |record| Outcome::Forward(convert(record))),
        )
    }

    /// Like [`RecordStream::converter`]; an `Err` drops the record and is logged
    pub fn try_converter<U, F, E>(&self, convert: F) -> RecordStream<U>
    where
        U: Record,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        self.chain(
            StageKind::Converter,
            Box::new(move |record| match convert(record) {
                Ok(converted) => Outcome::Forward(converted),
                Err(e) => Outcome::Fault(e.to_string()),
            }),
        )
    }

    /// Retain the most recent records in a bounded store
    pub fn to_store(&self, options: StoreOptions) -> Arc<RecordStore<T>> {
        RecordStore::attach(self, options)
    }

    fn chain<U: Record>(
        &self,
        kind: StageKind,
        dispatch: Box<dyn Fn(T) -> Outcome<U> + Send + Sync>,
    ) -> RecordStream<U> {
        let stage: Arc<dyn Observable<U>> = Stage::new(kind, Arc::clone(&self.node), dispatch);
        RecordStream::from_node(stage)
    }
}

/// Handle returned by [`RecordStream::subscribe_with`].
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription<T> {
    id: SubscriberId,
    node: Weak<dyn Observable<T>>,
    closed: AtomicBool,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Stop receiving records. Only the first call returns `true`.
    pub fn unsubscribe(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.node
            .upgrade()
            .map(|node| node.unsubscribe(Some(self.id)))
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
