//! Session event types
//!
//! Synchronizer tasks notify consumers (the presentation layer, tests)
//! through a `tokio::sync::broadcast` channel carrying [`SessionEvent`].
//! Events announce that derived state changed; consumers re-read the
//! views through the session accessors.

use crate::types::UserId;

/// Events emitted by the session and its synchronizers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An identity signed in and synchronization started
    SignedIn {
        /// The identity's uid
        uid: UserId,
    },
    /// The session returned to the unauthenticated state
    SignedOut,
    /// A new user was inserted into the directory
    DirectoryChanged {
        /// Directory size after the insert
        user_count: usize,
    },
    /// A snapshot was applied to the active conversation view
    ConversationChanged {
        /// Generation of the subscription that applied the snapshot
        generation: u64,
        /// Messages in the rebuilt view
        message_count: usize,
    },
    /// A subscription failed; it will not reconnect on its own
    SyncError {
        /// Which synchronizer failed ("directory" or "conversation")
        context: &'static str,
        /// Error message
        message: String,
    },
}

impl SessionEvent {
    /// Whether this event reports a failure
    pub fn is_error(&self) -> bool {
        matches!(self, SessionEvent::SyncError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_error() {
        let err = SessionEvent::SyncError {
            context: "directory",
            message: "boom".to_string(),
        };
        assert!(err.is_error());
        assert!(!SessionEvent::SignedOut.is_error());
    }
}
