//! Error type shared by every store.

use crate::types::NodeState;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store operations.
///
/// Not-found is never an error; lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The node's tier does not match the store's tier.
    #[error("node {id} is {actual}, but this store only accepts {expected} nodes")]
    TierMismatch {
        /// Offending node id.
        id: String,
        /// Tier the store accepts.
        expected: NodeState,
        /// Tier the node declared.
        actual: NodeState,
    },

    /// Any other caller error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Content or metadata could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database driver error.
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested backend is not available in this build.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error signals a caller mistake rather than a backend fault.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::TierMismatch { .. } | Self::Validation(_))
    }
}
