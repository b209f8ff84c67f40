//! Error types for aggregate view operations.

use confluence_collection::CollectionId;
use thiserror::Error;

/// Errors that can occur when operating on an aggregate view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// The collection is already registered as a source of this view.
    #[error("collection {id} is already attached")]
    DuplicateAttachment { id: CollectionId },

    /// The collection is not a registered source of this view.
    #[error("collection {id} is not attached")]
    NotAttached { id: CollectionId },

    /// A view cannot be attached as a source of itself.
    #[error("view {id} cannot be attached to itself")]
    SelfAttachment { id: CollectionId },

    /// Views are only mutated by their sources.
    #[error("a view is read only")]
    ReadOnly,
}

/// Convenience type alias for view operations.
pub type ViewResult<T> = std::result::Result<T, ViewError>;
