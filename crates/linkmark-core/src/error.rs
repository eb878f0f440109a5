//! Error type for remote store operations.

use thiserror::Error;

/// Failure surfaced by a `LinkStore` backend.
///
/// Every variant is transient from the engine's point of view: the
/// engine reports it and leaves local state unchanged, and nothing is
/// retried automatically.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or transport-level failure (connection refused, timeout,
    /// TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The store returned a non-success status.
    ///
    /// Common causes: expired token, row-level security rejection,
    /// schema mismatch.
    #[error("store error: {status} - {message}")]
    Api {
        /// HTTP status code returned by the store.
        status: u16,
        /// Response body, typically containing error details.
        message: String,
    },

    /// A response body did not match the expected record schema.
    #[error("decode error: {0}")]
    Json(String),

    /// A delete targeted a row that does not exist.
    #[error("record not found")]
    NotFound,

    /// The change-feed channel could not be opened or has failed.
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Convenience Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
