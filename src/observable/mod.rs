//! Composable record streams
//!
//! Every node in a pipeline (the exchange source, filter and converter stages,
//! request filters, record stores) implements [`Observable`]. Interest travels
//! upstream: a node registers itself with its upstream only while it has at
//! least one subscriber of its own, so a chain nobody listens to costs the
//! source nothing.
//!
//! ```rust,ignore
//! let parsed = source
//!     .stream()
//!     .filter(|exchange| exchange.path() == "/api/items")
//!     .try_converter(|exchange| serde_json::from_slice::<Item>(&exchange.response_body));
//! let recent = parsed.to_store(StoreOptions::default());
//! ```

pub mod registry;
pub mod stage;
pub mod stream;
pub mod subject;
pub mod subscriber;

pub use registry::Registry;
pub use stage::{Stage, StageKind};
pub use stream::{RecordStream, Subscription};
pub use subject::Subject;
pub use subscriber::{Subscriber, SubscriberId};

/// Values that can travel through a pipeline.
///
/// `Clone` must be shallow: every stage hands each subscriber its own copy,
/// so nested payloads belong behind `Arc` or `Bytes`.
pub trait Record: Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Send + Sync + 'static {}

/// A node that records can be subscribed to
pub trait Observable<T>: Send + Sync {
    /// Add a subscriber. Returns `false` when it was already subscribed.
    fn subscribe(&self, subscriber: &Subscriber<T>) -> bool;

    /// Remove one subscriber, or all of them when `id` is `None`.
    ///
    /// Returns `true` when something was removed.
    fn unsubscribe(&self, id: Option<SubscriberId>) -> bool;

    /// Number of direct subscribers
    fn subscriber_count(&self) -> usize;

    /// Distance from the root of the pipeline
    fn depth(&self) -> usize {
        0
    }
}

/// Hand every current subscriber its own copy of `record`.
///
/// The subscriber set is snapshotted first, so callbacks may subscribe or
/// unsubscribe without deadlocking. Returns the number of subscribers reached.
pub(crate) fn fan_out<T: Record>(subscribers: &Registry<Subscriber<T>>, record: T) -> usize {
    let targets = subscribers.snapshot();
    if let Some((last, rest)) = targets.split_last() {
        for subscriber in rest {
            subscriber.notify(record.clone());
        }
        last.notify(record);
    }
    targets.len()
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
