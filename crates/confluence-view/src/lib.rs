//! Read-only aggregate views over live keyed collections.
//!
//! An [`AggregateView`] presents any number of independently mutable
//! collections as one logical collection. It copies each source's entries when
//! the source is attached, then follows the source's add/update/remove
//! notifications until it is detached.
//!
//! # Architecture
//!
//! - The view owns a private [`Collection`](confluence_collection::Collection)
//!   and exposes only its read side. Its own write operations always fail
//!   with [`ViewError::ReadOnly`].
//! - Sources are held through `Weak` references and identified by their
//!   [`CollectionId`]; each attachment keeps the subscription handles it
//!   needs to unsubscribe on detach.
//! - Handlers registered on sources hold a `Weak` reference to the view, so
//!   neither side keeps the other alive.
//! - A view is itself an [`ObservableCollection`] and can be attached as the
//!   source of another view.
//!
//! Everything is single-threaded and synchronous: the view is consistent
//! with every notification delivered so far as soon as each call returns.

mod attachment;
pub mod error;
pub mod view;

pub use error::{ViewError, ViewResult};
pub use view::AggregateView;

// Re-export the collection contract for ergonomic imports.
pub use confluence_collection::{
    ChangeKind, Collection, CollectionId, Items, KeyedContainer, ObservableCollection,
};
