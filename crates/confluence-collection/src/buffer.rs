//! Event buffering.
//!
//! While a collection is buffered its notifications are held back and
//! coalesced per key. Releasing the last [`EventBuffer`] delivers the net
//! effect of the window as at most one batch per [`ChangeKind`], in the order
//! add, update, remove.

use std::collections::BTreeMap;

use crate::memory::Collection;
use crate::types::{ChangeKind, Items};

/// Net pending change per key for one buffering window.
#[derive(Debug)]
pub struct PendingChanges<K, V> {
    changes: BTreeMap<K, (ChangeKind, V)>,
}

impl<K: Ord, V> PendingChanges<K, V> {
    /// Create an empty set of pending changes.
    pub fn new() -> Self {
        Self {
            changes: BTreeMap::new(),
        }
    }

    /// Fold one change into the pending set.
    ///
    /// A key added and then removed inside the window leaves no trace, and a
    /// key removed and then added again is reported as updated.
    pub fn record(&mut self, kind: ChangeKind, key: K, value: V) {
        let previous = self.changes.remove(&key).map(|(kind, _)| kind);
        let merged = match (previous, kind) {
            (None, kind) => Some(kind),
            (Some(ChangeKind::Add), ChangeKind::Update) => Some(ChangeKind::Add),
            (Some(ChangeKind::Add), ChangeKind::Remove) => None,
            (Some(ChangeKind::Update), ChangeKind::Remove) => Some(ChangeKind::Remove),
            (Some(ChangeKind::Remove), ChangeKind::Add) => Some(ChangeKind::Update),
            (Some(_), kind) => Some(kind),
        };
        if let Some(kind) = merged {
            self.changes.insert(key, (kind, value));
        }
    }

    /// Number of keys with a pending change.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns `true` if the window has no net effect so far.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Take every pending change, grouped into non-empty batches in delivery
    /// order.
    pub fn drain(&mut self) -> Vec<(ChangeKind, Items<K, V>)> {
        let mut grouped: BTreeMap<ChangeKind, Items<K, V>> = BTreeMap::new();
        for (key, (kind, value)) in std::mem::take(&mut self.changes) {
            grouped.entry(kind).or_default().insert(key, value);
        }
        ChangeKind::ALL
            .iter()
            .filter_map(|kind| grouped.remove(kind).map(|items| (*kind, items)))
            .collect()
    }
}

impl<K: Ord, V> Default for PendingChanges<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`Collection::buffer_events`].
///
/// Guards nest; pending changes are delivered when the outermost one drops.
#[must_use = "notifications are delivered as soon as the buffer is dropped"]
pub struct EventBuffer<'a, K: Ord + Clone, V: Clone> {
    collection: &'a Collection<K, V>,
}

impl<'a, K: Ord + Clone, V: Clone> EventBuffer<'a, K, V> {
    pub(crate) fn new(collection: &'a Collection<K, V>) -> Self {
        Self { collection }
    }
}

impl<K: Ord + Clone, V: Clone> Drop for EventBuffer<'_, K, V> {
    fn drop(&mut self) {
        self.collection.release_buffer();
    }
}
