//! Error types for observable operations.

use thiserror::Error;

/// Errors returned by mutating operations.
///
/// Writes rejected by a root's [`SafeMode`](crate::SafeMode) are not errors;
/// the gated accessors report them as `Ok(false)`.
#[derive(Debug, Error)]
pub enum Error {
    /// The root is locked, typically while a computed value is rewritten by
    /// its own computation. Retry after it is unlocked.
    #[error("cannot modify `{path}`: the observable is locked")]
    Locked {
        /// Path of the node the write was aimed at.
        path: String,
    },

    /// The root node itself cannot be deleted, only reassigned.
    #[error("cannot delete the root of an observable")]
    RootDeletion,

    /// A key was written below a value that cannot hold children.
    #[error("cannot write `{key}` below `{path}`: not an object or array")]
    NotAContainer {
        /// Path of the value that could not hold the key.
        path: String,
        /// The key that was being written.
        key: String,
    },

    /// An array position too large to be materialized.
    #[error("cannot write index {index} below `{path}`: out of range")]
    IndexOutOfRange {
        /// Path of the array.
        path: String,
        /// The requested position.
        index: usize,
    },

    /// An array mutator was called on a node whose value is not an array.
    #[error("`{path}` is not an array")]
    NotAnArray {
        /// Path of the node.
        path: String,
    },

    /// Converting between a typed value and the JSON tree failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
