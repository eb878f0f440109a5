//! Error types for principal resolution.

use thiserror::Error;

/// Failure while talking to the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No valid session: the provider rejected the credentials.
    ///
    /// Fatal to establishing the engine; the consumer must redirect to
    /// login rather than proceeding.
    #[error("not authenticated")]
    Unauthenticated,

    /// The provider returned an unexpected non-success status.
    #[error("auth error: {status} - {message}")]
    Api {
        /// The HTTP status code returned by the provider.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },
}

/// Convenience Result alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
