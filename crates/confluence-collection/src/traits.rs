//! The keyed-container contract consumed by aggregate views.
//!
//! Any container (in-memory collection, another view) implements these traits
//! to be usable as a source.

use crate::types::{ChangeKind, CollectionId, Handler, Items, SubscriptionId};

/// Read access to a keyed container.
pub trait KeyedContainer<K, V> {
    /// Identity of this container instance.
    fn id(&self) -> CollectionId;

    /// Returns `true` if `key` is present.
    fn has(&self, key: &K) -> bool;

    /// A copy of the value stored under `key`, if any.
    fn get(&self, key: &K) -> Option<V>;

    /// Full snapshot of the current contents.
    fn all(&self) -> Items<K, V>;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Returns `true` if the container holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, in key order.
    fn keys(&self) -> Vec<K> {
        self.all().into_keys().collect()
    }

    /// All values, in key order.
    fn values(&self) -> Vec<V> {
        self.all().into_values().collect()
    }
}

/// A keyed container that announces its mutations.
///
/// Implementations must deliver every change synchronously to the handlers
/// subscribed for its [`ChangeKind`], as a batch of affected pairs. For
/// [`ChangeKind::Remove`] only the keys of the batch are meaningful.
pub trait ObservableCollection<K, V>: KeyedContainer<K, V> {
    /// Register `handler` for changes of `kind`.
    fn subscribe(&self, kind: ChangeKind, handler: Handler<K, V>) -> SubscriptionId;

    /// Release a registration made by [`subscribe`](Self::subscribe).
    ///
    /// Returns `false` if no such registration exists.
    fn unsubscribe(&self, kind: ChangeKind, subscription: SubscriptionId) -> bool;

    /// Number of live registrations across all kinds.
    fn subscriber_count(&self) -> usize;
}
