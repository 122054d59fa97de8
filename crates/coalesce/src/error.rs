use std::sync::Arc;
use thiserror::Error;

/// A collaborator error shared by every waiter that observes it.
///
/// `anyhow::Error` is not `Clone`, so the loader wraps it once and hands the
/// same allocation to each waiter.
pub type SharedError = Arc<anyhow::Error>;

/// # LoadError
///
/// Every way a single `load` can fail.
///
/// A key that simply does not exist is **not** an error; it resolves to
/// [`Loaded::NotFound`](crate::Loaded::NotFound).
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The batch function reported a failure for this key only.
    #[error("failed to load key: {0:#}")]
    Key(SharedError),

    /// The batch function failed as a whole; every waiter in the batch sees this.
    #[error("batch dispatch failed: {0:#}")]
    Dispatch(SharedError),

    /// The loader was used after its request scope ended.
    #[error("loader is closed")]
    Closed,

    /// The request scope was cancelled while the batch was in flight.
    #[error("load cancelled before its batch completed")]
    Cancelled,

    /// The batch resolving this load went away without sending an outcome.
    #[error("batch dropped before resolving the load")]
    Dropped,

    /// A raw identifier could not be parsed into a key.
    #[error("invalid key {raw:?}: {reason}")]
    InvalidKey {
        raw: String,
        reason: String,
    },
}

impl LoadError {
    pub(crate) fn key(err: anyhow::Error) -> Self {
        LoadError::Key(Arc::new(err))
    }

    pub(crate) fn dispatch(err: anyhow::Error) -> Self {
        LoadError::Dispatch(Arc::new(err))
    }

    /// Returns `true` when retrying the same key in a later request could succeed.
    ///
    /// Closed loaders and malformed keys will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LoadError::Key(_) | LoadError::Dispatch(_) | LoadError::Cancelled | LoadError::Dropped
        )
    }
}

/// Rejected loader construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("batch capacity must be at least 1")]
    ZeroCapacity,

    #[error("batch window must be longer than zero")]
    ZeroWindow,
}
