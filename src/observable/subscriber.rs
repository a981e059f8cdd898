//! Subscriber identities and the callbacks they carry

use crate::observable::panic_message;
use nutype::nutype;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a subscriber, used for idempotent add and for removal
#[nutype(derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self::new(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A callback with an identity.
///
/// Clones share the identity, so subscribing a clone of an already
/// subscribed value is a no-op.
pub struct Subscriber<T> {
    id: SubscriberId,
    callback: Callback<T>,
}

impl<T> Subscriber<T> {
    /// Wrap a callback under a fresh identity
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::with_id(SubscriberId::next(), callback)
    }

    pub(crate) fn with_id<F>(id: SubscriberId, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            id,
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Deliver one record.
    ///
    /// A panicking callback only loses this record; returns `false` in that case.
    pub fn notify(&self, record: T) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(record))) {
            Ok(()) => true,
            Err(payload) => {
                warn!(
                    subscriber = %self.id,
                    reason = %panic_message(payload.as_ref()),
                    "Subscriber panicked, record dropped for this subscriber"
                );
                false
            }
        }
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}
