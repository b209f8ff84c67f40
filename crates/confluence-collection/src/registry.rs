use std::cell::{Cell, RefCell};

use crate::types::{ChangeKind, Handler, Items, SubscriptionId};

/// Internal registration: a handler bound to one change kind.
struct Registration<K, V> {
    id: SubscriptionId,
    kind: ChangeKind,
    handler: Handler<K, V>,
}

/// Fan-out registry that delivers change batches to subscribed handlers.
///
/// Delivery works on a snapshot of the registrations taken when dispatch
/// starts: a handler unsubscribed during a dispatch still receives that
/// batch, and a handler subscribed during a dispatch first sees the next one.
pub struct HandlerRegistry<K, V> {
    registrations: RefCell<Vec<Registration<K, V>>>,
    next_id: Cell<u64>,
}

impl<K, V> HandlerRegistry<K, V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registrations: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// Register a handler for `kind` and return its handle.
    pub fn subscribe(&self, kind: ChangeKind, handler: Handler<K, V>) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.registrations
            .borrow_mut()
            .push(Registration { id, kind, handler });
        id
    }

    /// Remove the registration `id` for `kind`. Returns `true` if it existed.
    pub fn unsubscribe(&self, kind: ChangeKind, id: SubscriptionId) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        let before = registrations.len();
        registrations.retain(|r| !(r.id == id && r.kind == kind));
        registrations.len() != before
    }

    /// Deliver `items` to every handler registered for `kind`.
    ///
    /// Empty batches are not delivered. Returns the number of handlers called.
    pub fn dispatch(&self, kind: ChangeKind, items: &Items<K, V>) -> usize {
        if items.is_empty() {
            return 0;
        }
        let handlers: Vec<Handler<K, V>> = self
            .registrations
            .borrow()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.handler.clone())
            .collect();
        for handler in &handlers {
            handler(items);
        }
        handlers.len()
    }

    /// Number of registrations across all kinds.
    pub fn len(&self) -> usize {
        self.registrations.borrow().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.borrow().is_empty()
    }

    /// Number of registrations for one kind.
    pub fn count_for(&self, kind: ChangeKind) -> usize {
        self.registrations
            .borrow()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

impl<K, V> Default for HandlerRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for HandlerRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registrations", &self.len())
            .finish()
    }
}
