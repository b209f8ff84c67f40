//! Error types for collection operations.

use thiserror::Error;

use crate::types::CollectionId;

/// Errors raised by the strict mutation operations of a collection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// `add` was called for a key that is already present.
    #[error("key already exists in collection {collection}")]
    AlreadyExists { collection: CollectionId },

    /// `update` or `remove` was called for a key that is absent.
    #[error("key not found in collection {collection}")]
    NotFound { collection: CollectionId },
}

/// Convenience type alias for collection operations.
pub type CollectionResult<T> = std::result::Result<T, CollectionError>;
