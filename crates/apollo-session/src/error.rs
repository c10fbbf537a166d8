//! Error types for the session layer.

use apollo_protocol::SessionToken;

/// Errors raised by a [`Store`](crate::Store) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A table held records of an unexpected type.
    #[error("store table for {0} is corrupt")]
    Corrupt(&'static str),
}

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session record exists for the token. Either it never existed or
    /// it was logged out or reaped.
    #[error("session {0} does not exist")]
    NotFound(SessionToken),

    /// A transport is already registered under this token.
    #[error("a transport is already registered for session {0}")]
    AlreadyRegistered(SessionToken),

    /// The login named a user the store does not know.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// The challenge response did not match.
    #[error("bad credentials")]
    BadCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),
}
