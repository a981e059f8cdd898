//! Interest tracking shared by every stage and the exchange source

use crate::observable::SubscriberId;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Set of members keyed by [`SubscriberId`].
///
/// Adding an id that is already present and removing one that is absent are
/// both reported through the `bool` return, never as errors.
#[derive(Debug)]
pub struct Registry<V> {
    members: Mutex<BTreeMap<SubscriberId, V>>,
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns `true` if `id` was newly added
    pub fn add(&self, id: SubscriberId, value: V) -> bool {
        self.add_then(id, value, || {})
    }

    /// Add `id`, running `on_first` when the set goes from empty to non-empty.
    ///
    /// `on_first` runs under the registry lock so concurrent edge transitions
    /// cannot interleave.
    pub fn add_then(&self, id: SubscriberId, value: V, on_first: impl FnOnce()) -> bool {
        let mut members = self.members.lock();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, value);
        if members.len() == 1 {
            on_first();
        }
        true
    }

    /// Remove `id`, or every member when `id` is `None`.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove(&self, id: Option<SubscriberId>) -> bool {
        self.remove_then(id, || {})
    }

    /// Remove like [`Registry::remove`], running `on_last` when the set
    /// becomes empty as a result.
    pub fn remove_then(&self, id: Option<SubscriberId>, on_last: impl FnOnce()) -> bool {
        let mut members = self.members.lock();
        let removed = match id {
            Some(id) => members.remove(&id).is_some(),
            None => {
                let had_members = !members.is_empty();
                members.clear();
                had_members
            }
        };
        if removed && members.is_empty() {
            on_last();
        }
        removed
    }

    /// Remove everything; `true` if anything was present
    pub fn clear(&self) -> bool {
        self.remove(None)
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Copy of the current members, taken before dispatching to them
    pub fn snapshot(&self) -> Vec<V> {
        self.members.lock().values().cloned().collect()
    }
}

impl<V: Clone> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}
