//! Error types for Pairchat

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Pairchat operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Sign-in flow failure; the session stays unauthenticated and the
    /// caller may retry
    #[error("Auth error: {0}")]
    Auth(String),

    /// Remote store write/append failure; the operation is not retried
    /// and local state is unchanged
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A subscription failed; fatal to that subscription, no auto-reconnect
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Error during serialization/deserialization of store records
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation requires an authenticated session
    #[error("Not signed in")]
    NotSignedIn,

    /// Operation requires a selected peer
    #[error("No peer selected")]
    NoPeerSelected,

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
