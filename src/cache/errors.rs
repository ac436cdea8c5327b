//! Cache error types.
//!
//! These never escape [`ResultCache`](super::ResultCache): every public cache
//! operation absorbs them and degrades to a miss or a no-op.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// SQLite error from the backing store.
    #[error("cache store error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Payload (de)serialization error.
    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be opened or has been poisoned.
    #[error("cache unavailable: {reason}")]
    Unavailable {
        reason: String,
    },
}
