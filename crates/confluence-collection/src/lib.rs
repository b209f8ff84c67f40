//! Observable keyed collections.
//!
//! This crate provides the keyed-container contract that Confluence views
//! consume, together with a single-threaded in-memory implementation. Every
//! mutation of a collection is announced to subscribers as a batch of
//! affected key/value pairs tagged with a [`ChangeKind`].
//!
//! # Modules
//!
//! - [`error`] -- Error types for strict collection operations
//! - [`types`] -- Identity, change kinds, payload and handler types
//! - [`traits`] -- The [`KeyedContainer`] and [`ObservableCollection`] contract
//! - [`registry`] -- Per-collection handler registry with explicit handles
//! - [`buffer`] -- Event buffering and per-key coalescing
//! - [`memory`] -- The in-memory [`Collection`]
//!
//! # Design Rules
//!
//! 1. Keys are unique within one collection.
//! 2. Notifications are delivered synchronously, in registration order,
//!    on the thread that performed the mutation.
//! 3. No internal borrow is held while handlers run, so handlers may read
//!    or mutate any collection, including the one notifying them.
//! 4. Unsubscribing requires the handle returned by `subscribe`; handler
//!    identity is never compared.

pub mod buffer;
pub mod error;
pub mod memory;
pub mod registry;
pub mod traits;
pub mod types;

pub use buffer::{EventBuffer, PendingChanges};
pub use error::{CollectionError, CollectionResult};
pub use memory::Collection;
pub use registry::HandlerRegistry;
pub use traits::{KeyedContainer, ObservableCollection};
pub use types::{ChangeKind, CollectionId, Handler, Items, SubscriptionId};
