//! In-memory observable collection.
//!
//! [`Collection`] stores its entries in a `BTreeMap` behind a `RefCell` and
//! implements the full [`ObservableCollection`] contract. It is meant to be
//! shared through `Rc` on a single thread; all operations take `&self`.

use std::cell::{Cell, RefCell};

use tracing::trace;

use crate::buffer::{EventBuffer, PendingChanges};
use crate::error::{CollectionError, CollectionResult};
use crate::registry::HandlerRegistry;
use crate::traits::{KeyedContainer, ObservableCollection};
use crate::types::{ChangeKind, CollectionId, Handler, Items, SubscriptionId};

/// A mutable keyed collection that notifies subscribers of every change.
///
/// Strict operations ([`add`](Self::add), [`update`](Self::update),
/// [`remove`](Self::remove)) fail when the key is in the wrong state;
/// [`set`](Self::set) inserts or replaces unconditionally.
pub struct Collection<K, V> {
    id: CollectionId,
    entries: RefCell<Items<K, V>>,
    handlers: HandlerRegistry<K, V>,
    buffer_depth: Cell<usize>,
    pending: RefCell<PendingChanges<K, V>>,
}

impl<K: Ord + Clone, V: Clone> Collection<K, V> {
    /// Create an empty collection with a fresh id.
    pub fn new() -> Self {
        Self {
            id: CollectionId::generate(),
            entries: RefCell::new(Items::new()),
            handlers: HandlerRegistry::new(),
            buffer_depth: Cell::new(0),
            pending: RefCell::new(PendingChanges::new()),
        }
    }

    /// Create a collection pre-populated with `entries`.
    ///
    /// No notification is emitted: there can be no subscriber yet.
    pub fn with_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let collection = Self::new();
        collection.entries.borrow_mut().extend(entries);
        collection
    }

    // ---------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------

    /// Insert a new entry. Fails if `key` is already present.
    pub fn add(&self, key: K, value: V) -> CollectionResult<()> {
        {
            let mut entries = self.entries.borrow_mut();
            if entries.contains_key(&key) {
                return Err(CollectionError::AlreadyExists { collection: self.id });
            }
            entries.insert(key.clone(), value.clone());
        }
        self.notify(ChangeKind::Add, Items::from([(key, value)]));
        Ok(())
    }

    /// Replace the value of an existing entry. Fails if `key` is absent.
    pub fn update(&self, key: K, value: V) -> CollectionResult<V> {
        let previous = {
            let mut entries = self.entries.borrow_mut();
            match entries.get_mut(&key) {
                Some(slot) => std::mem::replace(slot, value.clone()),
                None => return Err(CollectionError::NotFound { collection: self.id }),
            }
        };
        self.notify(ChangeKind::Update, Items::from([(key, value)]));
        Ok(previous)
    }

    /// Insert or replace an entry, returning the previous value.
    ///
    /// Emits `add` when the key was absent and `update` otherwise.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        let previous = self
            .entries
            .borrow_mut()
            .insert(key.clone(), value.clone());
        let kind = if previous.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Add
        };
        self.notify(kind, Items::from([(key, value)]));
        previous
    }

    /// Remove an entry and return its value. Fails if `key` is absent.
    pub fn remove(&self, key: &K) -> CollectionResult<V> {
        let value = self
            .entries
            .borrow_mut()
            .remove(key)
            .ok_or(CollectionError::NotFound { collection: self.id })?;
        self.notify(ChangeKind::Remove, Items::from([(key.clone(), value.clone())]));
        Ok(value)
    }

    /// Remove every entry, announced as a single `remove` batch.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.entries.borrow_mut());
        self.notify(ChangeKind::Remove, removed);
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// The value under `key`, or `default` when absent.
    pub fn get_or(&self, key: &K, default: V) -> V {
        self.entries.borrow().get(key).cloned().unwrap_or(default)
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    /// Hold back notifications until the returned guard (and every guard
    /// taken after it) is dropped.
    pub fn buffer_events(&self) -> EventBuffer<'_, K, V> {
        self.buffer_depth.set(self.buffer_depth.get() + 1);
        EventBuffer::new(self)
    }

    /// Returns `true` while at least one [`EventBuffer`] is alive.
    pub fn is_buffering(&self) -> bool {
        self.buffer_depth.get() > 0
    }

    pub(crate) fn release_buffer(&self) {
        let depth = self.buffer_depth.get().saturating_sub(1);
        self.buffer_depth.set(depth);
        if depth > 0 {
            return;
        }
        let batches = self.pending.borrow_mut().drain();
        for (kind, items) in batches {
            self.deliver(kind, &items);
        }
    }

    fn notify(&self, kind: ChangeKind, items: Items<K, V>) {
        if items.is_empty() {
            return;
        }
        if self.is_buffering() {
            let mut pending = self.pending.borrow_mut();
            for (key, value) in items {
                pending.record(kind, key, value);
            }
            return;
        }
        self.deliver(kind, &items);
    }

    fn deliver(&self, kind: ChangeKind, items: &Items<K, V>) {
        let handlers = self.handlers.dispatch(kind, items);
        trace!(collection = %self.id, %kind, count = items.len(), handlers, "change delivered");
    }
}

impl<K: Ord + Clone, V: Clone> Default for Collection<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone> KeyedContainer<K, V> for Collection<K, V> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn has(&self, key: &K) -> bool {
        self.entries.borrow().contains_key(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.entries.borrow().get(key).cloned()
    }

    fn all(&self) -> Items<K, V> {
        self.entries.borrow().clone()
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn keys(&self) -> Vec<K> {
        self.entries.borrow().keys().cloned().collect()
    }

    fn values(&self) -> Vec<V> {
        self.entries.borrow().values().cloned().collect()
    }
}

impl<K: Ord + Clone, V: Clone> ObservableCollection<K, V> for Collection<K, V> {
    fn subscribe(&self, kind: ChangeKind, handler: Handler<K, V>) -> SubscriptionId {
        self.handlers.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: ChangeKind, subscription: SubscriptionId) -> bool {
        self.handlers.unsubscribe(kind, subscription)
    }

    fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<K, V> std::fmt::Debug for Collection<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("entry_count", &self.entries.borrow().len())
            .field("subscribers", &self.handlers.len())
            .field("buffer_depth", &self.buffer_depth.get())
            .finish()
    }
}
