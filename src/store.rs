//! Bounded record store
//!
//! A [`RecordStore`] keeps the last `max_count` records delivered by its
//! upstream, oldest first, and re-broadcasts every record it accepts to its
//! own subscribers.

use crate::observable::{
    fan_out, Observable, Record, RecordStream, Registry, Subscriber, SubscriberId, Subscription,
};
use nutype::nutype;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on the ring's up-front allocation; larger stores grow on demand
const INITIAL_CAPACITY: usize = 64;

/// Number of records a store retains
#[nutype(
    validate(greater = 0),
    default = 10,
    derive(
        Clone,
        Copy,
        Debug,
        Display,
        PartialEq,
        Eq,
        Default,
        Serialize,
        Deserialize,
        TryFrom,
        AsRef
    )
)]
pub struct MaxCount(usize);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    #[serde(default)]
    pub max_count: MaxCount,
}

impl StoreOptions {
    pub fn with_max_count(max_count: usize) -> Result<Self, MaxCountError> {
        Ok(Self {
            max_count: MaxCount::try_new(max_count)?,
        })
    }
}

#[derive(Debug)]
struct Retained<T> {
    records: VecDeque<T>,
    destroyed: bool,
}

/// Fixed-capacity ring of the most recent records
pub struct RecordStore<T> {
    upstream: Arc<dyn Observable<T>>,
    link_id: SubscriberId,
    max_count: usize,
    retained: Mutex<Retained<T>>,
    evicted: AtomicU64,
    subscribers: Registry<Subscriber<T>>,
}

impl<T: Record> RecordStore<T> {
    /// Create a store and subscribe it to `upstream` right away
    pub fn attach(upstream: &RecordStream<T>, options: StoreOptions) -> Arc<Self> {
        let max_count = *options.max_count.as_ref();
        let store = Arc::new(Self {
            upstream: Arc::clone(upstream.node()),
            link_id: SubscriberId::next(),
            max_count,
            retained: Mutex::new(Retained {
                records: VecDeque::with_capacity(max_count.min(INITIAL_CAPACITY)),
                destroyed: false,
            }),
            evicted: AtomicU64::new(0),
            subscribers: Registry::new(),
        });

        let target = Arc::clone(&store);
        let link = Subscriber::with_id(store.link_id, move |record: T| target.push(record));
        store.upstream.subscribe(&link);
        debug!(max_count, depth = store.depth(), "Record store attached");
        store
    }

    /// Retain `record`, evicting the oldest one when full, then re-broadcast it.
    ///
    /// Ignored once the store is destroyed.
    pub fn push(&self, record: T) {
        {
            let mut retained = self.retained.lock();
            if retained.destroyed {
                return;
            }
            if retained.records.len() >= self.max_count {
                retained.records.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            retained.records.push_back(record.clone());
        }
        fan_out(&self.subscribers, record);
    }

    /// Most recently retained record
    pub fn current(&self) -> Option<T> {
        self.retained.lock().records.back().cloned()
    }

    pub fn size(&self) -> usize {
        self.retained.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.lock().records.is_empty()
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Records dropped to make room since the store was created
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Retained records matching `predicate`, oldest first
    pub fn select<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        self.select_indexed(|record, _| predicate(record))
    }

    pub fn select_all(&self) -> Vec<T> {
        self.retained.lock().records.iter().cloned().collect()
    }

    /// Like [`RecordStore::select`], also passing each record's position
    pub fn select_indexed<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T, usize) -> bool,
    {
        let snapshot = self.select_all();
        snapshot
            .into_iter()
            .enumerate()
            .filter(|(index, record)| predicate(record, *index))
            .map(|(_, record)| record)
            .collect()
    }

    /// Drop every retained record; the store stays subscribed
    pub fn clear(&self) {
        self.retained.lock().records.clear();
    }

    /// Unsubscribe from upstream, drop all records and refuse further pushes.
    ///
    /// Only the first call does anything and returns `true`.
    pub fn destroy(&self) -> bool {
        {
            let mut retained = self.retained.lock();
            if retained.destroyed {
                return false;
            }
            retained.destroyed = true;
            retained.records.clear();
        }
        self.upstream.unsubscribe(Some(self.link_id));
        debug!(max_count = self.max_count, "Record store destroyed");
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.retained.lock().destroyed
    }

    pub fn stream(self: &Arc<Self>) -> RecordStream<T> {
        let node: Arc<dyn Observable<T>> = Arc::clone(self) as Arc<dyn Observable<T>>;
        RecordStream::from_node(node)
    }

    pub fn subscribe_with<F>(self: &Arc<Self>, callback: F) -> Subscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.stream().subscribe_with(callback)
    }

    pub fn filter<P>(self: &Arc<Self>, predicate: P) -> RecordStream<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.stream().filter(predicate)
    }

    pub fn converter<U, F>(self: &Arc<Self>, convert: F) -> RecordStream<U>
    where
        U: Record,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.stream().converter(convert)
    }

    pub fn try_converter<U, F, E>(self: &Arc<Self>, convert: F) -> RecordStream<U>
    where
        U: Record,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        self.stream().try_converter(convert)
    }
}

impl<T: Record> Observable<T> for RecordStore<T> {
    fn subscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.subscribers.add(subscriber.id(), subscriber.clone())
    }

    fn unsubscribe(&self, id: Option<SubscriberId>) -> bool {
        self.subscribers.remove(id)
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn depth(&self) -> usize {
        self.upstream.depth() + 1
    }
}

impl<T> fmt::Debug for RecordStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retained = self.retained.lock();
        f.debug_struct("RecordStore")
            .field("max_count", &self.max_count)
            .field("size", &retained.records.len())
            .field("destroyed", &retained.destroyed)
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish()
    }
}


#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
