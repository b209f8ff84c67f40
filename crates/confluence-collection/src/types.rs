use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A batch of key/value pairs: the payload of every notification and the
/// shape of a full snapshot.
pub type Items<K, V> = BTreeMap<K, V>;

/// Callback invoked with the batch of pairs affected by one change.
pub type Handler<K, V> = Rc<dyn Fn(&Items<K, V>)>;

/// Unique identity of a collection instance.
///
/// Two handles refer to the same source exactly when their ids are equal.
/// Ids are UUID v7, so they also sort by creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(Uuid);

impl CollectionId {
    /// Generate a fresh, never-before-seen id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three notification channels of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Keys that were absent and are now present.
    Add,
    /// Keys that were present and now hold a new value.
    Update,
    /// Keys that were present and are now absent.
    Remove,
}

impl ChangeKind {
    /// Every kind, in delivery order.
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Add, ChangeKind::Update, ChangeKind::Remove];

    /// The event name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by `subscribe`, required to unsubscribe later.
///
/// Handles are only meaningful for the collection that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw sequence number of this handle.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
