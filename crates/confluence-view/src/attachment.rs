use std::rc::{Rc, Weak};

use confluence_collection::{ChangeKind, CollectionId, ObservableCollection, SubscriptionId};

/// Bookkeeping for one source of a view.
///
/// The source is held weakly: a view never keeps a collection alive. The
/// token tells apart successive attachments of the same source.
pub(crate) struct Attachment<K, V> {
    pub(crate) id: CollectionId,
    pub(crate) token: u64,
    source: Weak<dyn ObservableCollection<K, V>>,
    subscriptions: Vec<(ChangeKind, SubscriptionId)>,
}

impl<K, V> Attachment<K, V> {
    pub(crate) fn new(
        id: CollectionId,
        token: u64,
        source: Weak<dyn ObservableCollection<K, V>>,
    ) -> Self {
        Self {
            id,
            token,
            source,
            subscriptions: Vec::new(),
        }
    }

    /// The source, if it is still alive.
    pub(crate) fn source(&self) -> Option<Rc<dyn ObservableCollection<K, V>>> {
        self.source.upgrade()
    }

    pub(crate) fn set_subscriptions(&mut self, subscriptions: Vec<(ChangeKind, SubscriptionId)>) {
        self.subscriptions = subscriptions;
    }

    /// Unsubscribe every handler this attachment registered on `source`.
    ///
    /// Returns the number of registrations actually released.
    pub(crate) fn release(&mut self, source: &(impl ObservableCollection<K, V> + ?Sized)) -> usize {
        std::mem::take(&mut self.subscriptions)
            .into_iter()
            .filter(|(kind, subscription)| source.unsubscribe(*kind, *subscription))
            .count()
    }
}

impl<K, V> std::fmt::Debug for Attachment<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("alive", &(self.source.strong_count() > 0))
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
