//! The aggregate view.
//!
//! An [`AggregateView`] mirrors the union of its source collections into a
//! private [`Collection`]. Sources feed it exclusively through their
//! notifications (plus a snapshot replay at attach time and a snapshot
//! removal at detach time); the view's own write operations always fail.
//!
//! Keys shared between sources follow last-write-wins in notification order.
//! Detaching a source removes every key that source currently holds, even if
//! another source also contributed it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use confluence_collection::{
    ChangeKind, Collection, CollectionId, Handler, Items, KeyedContainer, ObservableCollection,
    SubscriptionId,
};
use tracing::{debug, info, warn};

use crate::attachment::Attachment;
use crate::error::{ViewError, ViewResult};

/// State shared between the view handle and the handlers it registers on
/// its sources. Handlers only hold a `Weak` to it.
struct ViewState<K, V> {
    storage: Collection<K, V>,
    sources: RefCell<Vec<Attachment<K, V>>>,
    next_token: Cell<u64>,
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> ViewState<K, V> {
    fn handler(state: &Rc<Self>, kind: ChangeKind) -> Handler<K, V> {
        let state = Rc::downgrade(state);
        Rc::new(move |items: &Items<K, V>| {
            if let Some(state) = state.upgrade() {
                state.apply(kind, items);
            }
        })
    }

    fn apply(&self, kind: ChangeKind, items: &Items<K, V>) {
        debug!(view = %self.storage.id(), %kind, count = items.len(), "applying source change");
        match kind {
            ChangeKind::Add => self.on_add(items),
            ChangeKind::Update => self.on_update(items),
            ChangeKind::Remove => self.on_remove(items),
        }
    }

    fn on_add(&self, items: &Items<K, V>) {
        let _buffer = self.storage.buffer_events();
        for (key, value) in items {
            // Overwrite rather than insert: the entry may already be here from
            // another source or from the attach-time seed.
            self.storage.set(key.clone(), value.clone());
        }
    }

    fn on_update(&self, items: &Items<K, V>) {
        let _buffer = self.storage.buffer_events();
        for (key, value) in items {
            self.storage.set(key.clone(), value.clone());
        }
    }

    fn on_remove(&self, items: &Items<K, V>) {
        let _buffer = self.storage.buffer_events();
        for key in items.keys() {
            if !self.storage.has(key) {
                continue;
            }
            if let Err(err) = self.storage.remove(key) {
                warn!(view = %self.storage.id(), %err, "entry vanished during removal");
            }
        }
    }
}

/// A read-only keyed container mirroring several live source collections.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use confluence_collection::{Collection, KeyedContainer};
/// use confluence_view::AggregateView;
///
/// let a = Rc::new(Collection::with_entries([("x", 1)]));
/// let b = Rc::new(Collection::with_entries([("y", 2)]));
/// let view = AggregateView::with_collections(&[a.clone(), b.clone()]).unwrap();
/// assert_eq!(view.len(), 2);
///
/// a.update("x", 3).unwrap();
/// assert_eq!(view.get(&"x"), Some(3));
///
/// view.detach_collection(&*a).unwrap();
/// assert_eq!(view.keys(), vec!["y"]);
/// ```
pub struct AggregateView<K, V> {
    state: Rc<ViewState<K, V>>,
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> AggregateView<K, V> {
    /// Create a view with no sources.
    pub fn new() -> Self {
        Self {
            state: Rc::new(ViewState {
                storage: Collection::new(),
                sources: RefCell::new(Vec::new()),
                next_token: Cell::new(0),
            }),
        }
    }

    /// Create a view and attach each of `collections`, in order.
    ///
    /// If any attachment fails, every collection attached so far is detached
    /// again and the error is returned.
    pub fn with_collections<S>(collections: &[Rc<S>]) -> ViewResult<Self>
    where
        S: ObservableCollection<K, V> + 'static,
    {
        let view = Self::new();
        for collection in collections {
            if let Err(err) = view.attach_collection(collection) {
                view.detach_all_collections();
                return Err(err);
            }
        }
        Ok(view)
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Register `collection` as a source.
    ///
    /// Its current entries are copied into the view immediately, then the
    /// view follows its add/update/remove notifications.
    pub fn attach_collection<S>(&self, collection: &Rc<S>) -> ViewResult<()>
    where
        S: ObservableCollection<K, V> + 'static,
    {
        let id = collection.id();
        if id == self.id() {
            return Err(ViewError::SelfAttachment { id });
        }
        if self.has_source(id) {
            return Err(ViewError::DuplicateAttachment { id });
        }

        let token = self.state.next_token.get();
        self.state.next_token.set(token + 1);
        let source: Weak<S> = Rc::downgrade(collection);
        let source: Weak<dyn ObservableCollection<K, V>> = source;
        self.state
            .sources
            .borrow_mut()
            .push(Attachment::new(id, token, source));

        // The source may not have delivered its own `add` for these entries
        // yet. They will then be applied a second time, which on_add absorbs.
        let snapshot = collection.all();
        self.state.on_add(&snapshot);

        let subscriptions: Vec<(ChangeKind, SubscriptionId)> = ChangeKind::ALL
            .iter()
            .map(|&kind| {
                let handler = ViewState::handler(&self.state, kind);
                (kind, collection.subscribe(kind, handler))
            })
            .collect();

        let mut sources = self.state.sources.borrow_mut();
        if let Some(attachment) = sources.iter_mut().find(|a| a.token == token) {
            attachment.set_subscriptions(subscriptions);
            info!(view = %self.id(), source = %id, seeded = snapshot.len(), "collection attached");
            return Ok(());
        }
        drop(sources);

        // A subscriber of this view detached the source while it was being
        // seeded, and possibly attached it again under a new token. Either
        // way these subscriptions belong to nothing.
        for (kind, subscription) in subscriptions {
            collection.unsubscribe(kind, subscription);
        }
        debug!(view = %self.id(), source = %id, "collection detached during attach");
        Ok(())
    }

    /// Stop following `collection` and remove the entries it currently holds.
    pub fn detach_collection<S>(&self, collection: &S) -> ViewResult<()>
    where
        S: ObservableCollection<K, V> + ?Sized,
    {
        let id = collection.id();
        let token = self
            .state
            .sources
            .borrow()
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.token)
            .ok_or(ViewError::NotAttached { id })?;

        let (released, removed) = self.detach_token(token, collection);
        info!(view = %self.id(), source = %id, released, snapshot = removed, "collection detached");
        Ok(())
    }

    /// Detach every source.
    ///
    /// A source that has been dropped since it was attached can no longer be
    /// read; it is forgotten and its entries stay in the view.
    ///
    /// Sources are detached one at a time, oldest first, and each stays
    /// registered until its own entries are gone. A source attached by a
    /// subscriber while this runs is detached as well.
    pub fn detach_all_collections(&self) {
        let mut count = 0;
        loop {
            let next = self
                .state
                .sources
                .borrow()
                .first()
                .map(|a| (a.id, a.token, a.source()));
            let Some((id, token, source)) = next else {
                break;
            };
            count += 1;
            match source {
                Some(source) => {
                    self.detach_token(token, &*source);
                }
                None => {
                    warn!(view = %self.id(), source = %id, "source dropped before detach, entries kept");
                    self.state.sources.borrow_mut().retain(|a| a.token != token);
                }
            }
        }
        info!(view = %self.id(), count, "all collections detached");
    }

    /// Release the subscriptions of the attachment `token`, remove the
    /// entries `source` currently holds, then unregister it.
    ///
    /// Returns the number of released subscriptions and of removed keys.
    fn detach_token(
        &self,
        token: u64,
        source: &(impl ObservableCollection<K, V> + ?Sized),
    ) -> (usize, usize) {
        let released = self
            .state
            .sources
            .borrow_mut()
            .iter_mut()
            .find(|a| a.token == token)
            .map_or(0, |a| a.release(source));

        let snapshot = source.all();
        self.state.on_remove(&snapshot);
        self.state.sources.borrow_mut().retain(|a| a.token != token);
        (released, snapshot.len())
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    /// Returns `true` if `collection` is a registered source.
    pub fn is_attached<S>(&self, collection: &S) -> bool
    where
        S: KeyedContainer<K, V> + ?Sized,
    {
        self.has_source(collection.id())
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.state.sources.borrow().len()
    }

    /// Ids of the registered sources, in attach order.
    pub fn source_ids(&self) -> Vec<CollectionId> {
        self.state.sources.borrow().iter().map(|a| a.id).collect()
    }

    fn has_source(&self, id: CollectionId) -> bool {
        self.state.sources.borrow().iter().any(|a| a.id == id)
    }

    // ---------------------------------------------------------------
    // Rejected writes
    // ---------------------------------------------------------------

    /// Always fails with [`ViewError::ReadOnly`].
    pub fn add(&self, _key: K, _value: V) -> ViewResult<()> {
        self.reject("add")
    }

    /// Always fails with [`ViewError::ReadOnly`].
    pub fn set(&self, _key: K, _value: V) -> ViewResult<Option<V>> {
        self.reject("set")
    }

    /// Always fails with [`ViewError::ReadOnly`].
    pub fn update(&self, _key: K, _value: V) -> ViewResult<V> {
        self.reject("update")
    }

    /// Always fails with [`ViewError::ReadOnly`].
    pub fn remove(&self, _key: &K) -> ViewResult<V> {
        self.reject("remove")
    }

    /// Always fails with [`ViewError::ReadOnly`].
    pub fn clear(&self) -> ViewResult<()> {
        self.reject("clear")
    }

    fn reject<T>(&self, operation: &'static str) -> ViewResult<T> {
        debug!(view = %self.id(), operation, "write rejected");
        Err(ViewError::ReadOnly)
    }
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> Default for AggregateView<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone> KeyedContainer<K, V> for AggregateView<K, V> {
    fn id(&self) -> CollectionId {
        self.state.storage.id()
    }

    fn has(&self, key: &K) -> bool {
        self.state.storage.has(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.state.storage.get(key)
    }

    fn all(&self) -> Items<K, V> {
        self.state.storage.all()
    }

    fn len(&self) -> usize {
        self.state.storage.len()
    }

    fn keys(&self) -> Vec<K> {
        self.state.storage.keys()
    }

    fn values(&self) -> Vec<V> {
        self.state.storage.values()
    }
}

impl<K: Ord + Clone, V: Clone> ObservableCollection<K, V> for AggregateView<K, V> {
    fn subscribe(&self, kind: ChangeKind, handler: Handler<K, V>) -> SubscriptionId {
        self.state.storage.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: ChangeKind, subscription: SubscriptionId) -> bool {
        self.state.storage.unsubscribe(kind, subscription)
    }

    fn subscriber_count(&self) -> usize {
        self.state.storage.subscriber_count()
    }
}

impl<K, V> Drop for AggregateView<K, V> {
    fn drop(&mut self) {
        // Release the feeds so sources outliving the view do not keep inert
        // handlers around. The mirrored entries go away with the view.
        for attachment in self.state.sources.borrow_mut().iter_mut() {
            if let Some(source) = attachment.source() {
                attachment.release(&*source);
            }
        }
    }
}

impl<K, V> std::fmt::Debug for AggregateView<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateView")
            .field("storage", &self.state.storage)
            .field("sources", &*self.state.sources.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Source = Rc<Collection<&'static str, i32>>;

    fn source(entries: &[(&'static str, i32)]) -> Source {
        Rc::new(Collection::with_entries(entries.iter().copied()))
    }

    fn items(entries: &[(&'static str, i32)]) -> Items<&'static str, i32> {
        entries.iter().copied().collect()
    }

    // -----------------------------------------------------------------------
    // Walkthrough
    // -----------------------------------------------------------------------

    #[test]
    fn two_sources_walkthrough() {
        let a = source(&[("x", 1)]);
        let b = source(&[("y", 2)]);
        let view = AggregateView::new();

        view.attach_collection(&a).unwrap();
        view.attach_collection(&b).unwrap();
        assert_eq!(view.all(), items(&[("x", 1), ("y", 2)]));

        a.update("x", 3).unwrap();
        assert_eq!(view.get(&"x"), Some(3));

        view.detach_collection(&*a).unwrap();
        assert_eq!(view.all(), items(&[("y", 2)]));

        b.remove(&"y").unwrap();
        assert!(view.all().is_empty());
    }

    // -----------------------------------------------------------------------
    // Attach / detach
    // -----------------------------------------------------------------------

    #[test]
    fn attach_seeds_existing_entries_and_follows_changes() {
        let a = source(&[("x", 1), ("y", 2)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();

        assert_eq!(view.len(), 2);
        assert_eq!(a.subscriber_count(), 3);

        a.add("z", 3).unwrap();
        a.remove(&"x").unwrap();
        assert_eq!(view.all(), items(&[("y", 2), ("z", 3)]));
    }

    #[test]
    fn duplicate_attach_is_rejected_without_side_effects() {
        let a = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();

        let err = view.attach_collection(&a).unwrap_err();
        assert_eq!(err, ViewError::DuplicateAttachment { id: a.id() });
        assert_eq!(view.source_ids(), vec![a.id()]);
        assert_eq!(view.all(), items(&[("x", 1)]));
        assert_eq!(a.subscriber_count(), 3);
    }

    #[test]
    fn detach_of_unknown_source_is_rejected_without_side_effects() {
        let a = source(&[("x", 1)]);
        let stranger = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();

        let err = view.detach_collection(&*stranger).unwrap_err();
        assert_eq!(err, ViewError::NotAttached { id: stranger.id() });
        assert_eq!(view.all(), items(&[("x", 1)]));
        assert_eq!(view.source_count(), 1);
    }

    #[test]
    fn detach_checks_the_argument_not_the_tracking_list() {
        let a = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();
        assert!(view.is_attached(&*a));

        view.detach_collection(&*a).unwrap();
        assert!(!view.is_attached(&*a));
        assert_eq!(a.subscriber_count(), 0);

        let err = view.detach_collection(&*a).unwrap_err();
        assert_eq!(err, ViewError::NotAttached { id: a.id() });
    }

    #[test]
    fn detached_source_no_longer_feeds_the_view() {
        let a = source(&[]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();
        view.detach_collection(&*a).unwrap();

        a.set("x", 1);
        assert!(view.is_empty());
    }

    #[test]
    fn detach_all_clears_sources_and_their_entries() {
        let a = source(&[("x", 1)]);
        let b = source(&[("y", 2)]);
        let view = AggregateView::with_collections(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(view.source_count(), 2);

        view.detach_all_collections();
        assert_eq!(view.source_count(), 0);
        assert!(view.is_empty());
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 0);

        // Idempotent on an empty view.
        view.detach_all_collections();
        assert!(view.is_empty());
    }

    #[test]
    fn reattach_after_detach() {
        let a = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();
        view.detach_collection(&*a).unwrap();
        a.set("x", 2);

        view.attach_collection(&a).unwrap();
        assert_eq!(view.get(&"x"), Some(2));
    }

    #[test]
    fn with_collections_rolls_back_on_duplicate() {
        let a = source(&[("x", 1)]);
        let result = AggregateView::with_collections(&[a.clone(), a.clone()]);
        assert_eq!(
            result.unwrap_err(),
            ViewError::DuplicateAttachment { id: a.id() }
        );
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn view_cannot_attach_to_itself() {
        let view: Rc<AggregateView<&'static str, i32>> = Rc::new(AggregateView::new());
        let err = view.attach_collection(&view).unwrap_err();
        assert_eq!(err, ViewError::SelfAttachment { id: view.id() });
        assert_eq!(view.source_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Shared keys
    // -----------------------------------------------------------------------

    #[test]
    fn shared_keys_follow_last_write() {
        let a = source(&[("k", 1)]);
        let b = source(&[("k", 2)]);
        let view = AggregateView::with_collections(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(view.get(&"k"), Some(2));

        a.update("k", 5).unwrap();
        assert_eq!(view.get(&"k"), Some(5));

        // Detaching removes everything the source holds, shared or not.
        view.detach_collection(&*b).unwrap();
        assert_eq!(view.get(&"k"), None);
    }

    // -----------------------------------------------------------------------
    // Read-only surface
    // -----------------------------------------------------------------------

    #[test]
    fn writes_are_always_rejected() {
        let a = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();
        let before = view.all();

        assert_eq!(view.add("y", 2), Err(ViewError::ReadOnly));
        assert_eq!(view.add("x", 1), Err(ViewError::ReadOnly));
        assert_eq!(view.set("x", 9), Err(ViewError::ReadOnly));
        assert_eq!(view.update("x", 9), Err(ViewError::ReadOnly));
        assert_eq!(view.remove(&"x"), Err(ViewError::ReadOnly));
        assert_eq!(view.clear(), Err(ViewError::ReadOnly));
        assert_eq!(view.all(), before);
    }

    #[test]
    fn writes_are_rejected_on_empty_view() {
        let view: AggregateView<&'static str, i32> = AggregateView::new();
        assert_eq!(view.clear(), Err(ViewError::ReadOnly));
        assert_eq!(view.remove(&"missing"), Err(ViewError::ReadOnly));
        assert!(view.is_empty());
    }

    // -----------------------------------------------------------------------
    // Idempotence and the attach-time race
    // -----------------------------------------------------------------------

    #[test]
    fn replayed_add_batch_is_idempotent() {
        let view: AggregateView<&'static str, i32> = AggregateView::new();
        let batch = items(&[("x", 1), ("y", 2)]);

        view.state.on_add(&batch);
        let once = view.all();
        view.state.on_add(&batch);
        assert_eq!(view.all(), once);
        assert_eq!(once, batch);
    }

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        let view: AggregateView<&'static str, i32> = AggregateView::new();
        view.state.on_add(&items(&[("x", 1)]));
        view.state.on_remove(&items(&[("missing", 0), ("x", 1)]));
        view.state.on_remove(&items(&[("x", 1)]));
        assert!(view.is_empty());
    }

    #[test]
    fn pending_source_notification_after_seed_is_harmless() {
        let a: Source = Rc::new(Collection::new());
        let view = AggregateView::new();
        {
            // The source's own `add` is still pending when the view attaches.
            let _pending = a.buffer_events();
            a.add("x", 1).unwrap();
            view.attach_collection(&a).unwrap();
            assert_eq!(view.all(), items(&[("x", 1)]));
        }
        assert_eq!(view.all(), items(&[("x", 1)]));

        a.update("x", 2).unwrap();
        assert_eq!(view.get(&"x"), Some(2));
    }

    // -----------------------------------------------------------------------
    // Notifications emitted by the view
    // -----------------------------------------------------------------------

    #[test]
    fn view_re_emits_one_batch_per_source_notification() {
        let a = source(&[("x", 1), ("y", 2), ("z", 3)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();

        let batches: Rc<RefCell<Vec<(ChangeKind, usize)>>> = Rc::default();
        for kind in ChangeKind::ALL {
            let batches = Rc::clone(&batches);
            view.subscribe(
                kind,
                Rc::new(move |items: &Items<&'static str, i32>| {
                    batches.borrow_mut().push((kind, items.len()));
                }),
            );
        }

        a.clear();
        assert_eq!(*batches.borrow(), vec![(ChangeKind::Remove, 3)]);
    }

    #[test]
    fn views_can_be_chained() {
        let a = source(&[("x", 1)]);
        let b = source(&[("y", 2)]);
        let inner = Rc::new(AggregateView::with_collections(&[a.clone()]).unwrap());
        let outer = AggregateView::new();
        outer.attach_collection(&inner).unwrap();
        assert_eq!(outer.all(), items(&[("x", 1)]));

        inner.attach_collection(&b).unwrap();
        a.set("x", 10);
        assert_eq!(outer.all(), items(&[("x", 10), ("y", 2)]));

        inner.detach_collection(&*a).unwrap();
        assert_eq!(outer.all(), items(&[("y", 2)]));

        outer.detach_collection(&*inner).unwrap();
        assert!(outer.is_empty());
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn subscriber_may_detach_the_source_during_delivery() {
        let a = source(&[("x", 1)]);
        let view = Rc::new(AggregateView::new());
        view.attach_collection(&a).unwrap();

        let (weak_view, weak_source) = (Rc::downgrade(&view), Rc::downgrade(&a));
        view.subscribe(
            ChangeKind::Add,
            Rc::new(move |items: &Items<&'static str, i32>| {
                if !items.contains_key("stop") {
                    return;
                }
                if let (Some(view), Some(source)) = (weak_view.upgrade(), weak_source.upgrade()) {
                    view.detach_collection(&*source).unwrap();
                }
            }),
        );

        a.add("stop", 0).unwrap();
        assert!(view.is_empty());
        assert!(!view.is_attached(&*a));
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_may_detach_the_source_during_seeding() {
        let a = source(&[("stop", 0)]);
        let view = Rc::new(AggregateView::new());

        let (weak_view, weak_source) = (Rc::downgrade(&view), Rc::downgrade(&a));
        view.subscribe(
            ChangeKind::Add,
            Rc::new(move |_: &Items<&'static str, i32>| {
                if let (Some(view), Some(source)) = (weak_view.upgrade(), weak_source.upgrade()) {
                    view.detach_collection(&*source).unwrap();
                }
            }),
        );

        view.attach_collection(&a).unwrap();
        assert!(!view.is_attached(&*a));
        assert!(view.is_empty());
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_may_reattach_the_source_during_seeding() {
        let a = source(&[("x", 1)]);
        let view = Rc::new(AggregateView::new());
        let fired = Rc::new(Cell::new(false));

        let (weak_view, weak_source) = (Rc::downgrade(&view), Rc::downgrade(&a));
        view.subscribe(
            ChangeKind::Add,
            Rc::new(move |_: &Items<&'static str, i32>| {
                if fired.replace(true) {
                    return;
                }
                if let (Some(view), Some(source)) = (weak_view.upgrade(), weak_source.upgrade()) {
                    view.detach_collection(&*source).unwrap();
                    view.attach_collection(&source).unwrap();
                }
            }),
        );

        view.attach_collection(&a).unwrap();
        assert!(view.is_attached(&*a));
        assert_eq!(view.source_count(), 1);
        assert_eq!(a.subscriber_count(), 3);
        assert_eq!(view.all(), items(&[("x", 1)]));

        view.detach_collection(&*a).unwrap();
        assert_eq!(a.subscriber_count(), 0);
        a.set("late", 9);
        assert!(view.is_empty());
    }

    #[test]
    fn detach_all_keeps_pending_sources_registered() {
        let a = source(&[("x", 1)]);
        let b = source(&[("y", 2)]);
        let view = Rc::new(AggregateView::with_collections(&[a.clone(), b.clone()]).unwrap());
        let seen: Rc<RefCell<Vec<(Vec<&'static str>, bool)>>> = Rc::default();

        let (weak_view, weak_b, log) = (Rc::downgrade(&view), Rc::downgrade(&b), Rc::clone(&seen));
        view.subscribe(
            ChangeKind::Remove,
            Rc::new(move |items: &Items<&'static str, i32>| {
                if let (Some(view), Some(b)) = (weak_view.upgrade(), weak_b.upgrade()) {
                    let keys = items.keys().copied().collect();
                    log.borrow_mut().push((keys, view.is_attached(&*b)));
                }
            }),
        );

        view.detach_all_collections();
        assert_eq!(*seen.borrow(), vec![(vec!["x"], true), (vec!["y"], true)]);
        assert_eq!(view.source_count(), 0);
    }

    #[test]
    fn source_attached_during_detach_all_is_detached_too() {
        let a = source(&[("x", 1)]);
        let c = source(&[("z", 3)]);
        let view = Rc::new(AggregateView::with_collections(&[a.clone()]).unwrap());
        let fired = Rc::new(Cell::new(false));

        let (weak_view, weak_c) = (Rc::downgrade(&view), Rc::downgrade(&c));
        view.subscribe(
            ChangeKind::Remove,
            Rc::new(move |_: &Items<&'static str, i32>| {
                if fired.replace(true) {
                    return;
                }
                if let (Some(view), Some(c)) = (weak_view.upgrade(), weak_c.upgrade()) {
                    view.attach_collection(&c).unwrap();
                }
            }),
        );

        view.detach_all_collections();
        assert_eq!(view.source_count(), 0);
        assert!(view.is_empty());
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(c.subscriber_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    #[test]
    fn dropping_the_view_releases_its_handlers() {
        let a = source(&[("x", 1)]);
        {
            let view = AggregateView::new();
            view.attach_collection(&a).unwrap();
            assert_eq!(a.subscriber_count(), 3);
        }
        assert_eq!(a.subscriber_count(), 0);
        a.set("x", 2);
        assert_eq!(a.get(&"x"), Some(2));
    }

    #[test]
    fn view_does_not_keep_sources_alive() {
        let a = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();
        assert_eq!(Rc::strong_count(&a), 1);

        drop(a);
        view.detach_all_collections();
        assert_eq!(view.source_count(), 0);
        // Nothing left to read the dropped source's keys from.
        assert_eq!(view.get(&"x"), Some(1));
    }

    #[test]
    fn handler_outliving_its_view_is_inert() {
        let view: AggregateView<&'static str, i32> = AggregateView::new();
        let handler = ViewState::handler(&view.state, ChangeKind::Add);
        let state = Rc::downgrade(&view.state);
        drop(view);

        assert!(state.upgrade().is_none());
        handler(&items(&[("x", 1)]));
    }

    #[test]
    fn debug_format() {
        let a = source(&[("x", 1)]);
        let view = AggregateView::new();
        view.attach_collection(&a).unwrap();
        let debug = format!("{view:?}");
        assert!(debug.contains("AggregateView"));
        assert!(debug.contains("Attachment"));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const SOURCES: usize = 3;

        #[derive(Clone, Debug)]
        enum Op {
            Set(usize, u8, u32),
            Remove(usize, u8),
            Attach(usize),
            Detach(usize),
            DetachAll,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (0..SOURCES, 0..4u8, any::<u32>()).prop_map(|(s, k, v)| Op::Set(s, k, v)),
                2 => (0..SOURCES, 0..4u8).prop_map(|(s, k)| Op::Remove(s, k)),
                2 => (0..SOURCES).prop_map(Op::Attach),
                1 => (0..SOURCES).prop_map(Op::Detach),
                1 => Just(Op::DetachAll),
            ]
        }

        proptest! {
            #[test]
            fn view_matches_reference_model(ops in proptest::collection::vec(op(), 0..64)) {
                let sources: Vec<Rc<Collection<u8, u32>>> =
                    (0..SOURCES).map(|_| Rc::new(Collection::new())).collect();
                let view = AggregateView::new();
                let mut attached = [false; SOURCES];
                let mut model: Items<u8, u32> = Items::new();

                for op in ops {
                    match op {
                        Op::Set(s, key, value) => {
                            sources[s].set(key, value);
                            if attached[s] {
                                model.insert(key, value);
                            }
                        }
                        Op::Remove(s, key) => {
                            if sources[s].remove(&key).is_ok() && attached[s] {
                                model.remove(&key);
                            }
                        }
                        Op::Attach(s) => {
                            let result = view.attach_collection(&sources[s]);
                            if attached[s] {
                                prop_assert_eq!(result, Err(ViewError::DuplicateAttachment { id: sources[s].id() }));
                            } else {
                                prop_assert!(result.is_ok());
                                attached[s] = true;
                                model.extend(sources[s].all());
                            }
                        }
                        Op::Detach(s) => {
                            let result = view.detach_collection(&*sources[s]);
                            if attached[s] {
                                prop_assert!(result.is_ok());
                                attached[s] = false;
                                for key in sources[s].keys() {
                                    model.remove(&key);
                                }
                            } else {
                                prop_assert_eq!(result, Err(ViewError::NotAttached { id: sources[s].id() }));
                            }
                        }
                        Op::DetachAll => {
                            view.detach_all_collections();
                            for s in 0..SOURCES {
                                if attached[s] {
                                    for key in sources[s].keys() {
                                        model.remove(&key);
                                    }
                                    attached[s] = false;
                                }
                            }
                        }
                    }
                    prop_assert_eq!(view.all(), model.clone());
                    prop_assert_eq!(view.source_count(), attached.iter().filter(|a| **a).count());
                }
            }

            #[test]
            fn add_batches_apply_idempotently(
                batch in proptest::collection::btree_map(any::<u8>(), any::<u32>(), 0..16),
                repeats in 1..4usize,
            ) {
                let view: AggregateView<u8, u32> = AggregateView::new();
                for _ in 0..repeats {
                    view.state.on_add(&batch);
                }
                prop_assert_eq!(view.all(), batch);
            }
        }
    }
}
