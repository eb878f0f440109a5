//! Error types for sync engine operations.

use linkmark_core::StoreError;
use thiserror::Error;

/// Failure surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A field was rejected before any remote call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// The engine has no established principal.
    #[error("no session established")]
    NotEstablished,

    /// An add is already in flight; callers should disable duplicate
    /// submission while `is_adding` is set.
    #[error("another add is in flight")]
    AddInFlight,

    /// The remote store rejected or failed the operation.
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
}

/// Convenience Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
