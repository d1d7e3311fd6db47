//! Session controller
//!
//! Owns identity state and conversation selection, and orchestrates the
//! two synchronizers across the lifecycle
//! `Unauthenticated -> Authenticated(no peer) -> Authenticated(peer)`.
//! The machine cycles between unauthenticated and authenticated for the
//! process lifetime; there is no terminal state.
//!
//! A [`Session`] is an explicit object holding everything that was
//! ambient state in the original client, so multiple independent
//! sessions can share one store in a single process (the integration
//! tests run two side by side).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::conversation::{self, ConversationSync};
use crate::directory::{self, DirectorySync};
use crate::error::{ChatError, ChatResult};
use crate::events::SessionEvent;
use crate::store::{RemoteStore, StoreKey};
use crate::types::{Message, User, UserId, MESSAGES_PATH, USERS_PATH};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observable session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No identity; both synchronizers stopped
    Unauthenticated,
    /// Signed in; the directory synchronizer is running
    Authenticated {
        /// The local identity's uid
        uid: UserId,
        /// The selected peer, if a conversation is open
        selected_peer: Option<UserId>,
    },
}

/// One user's session against the shared remote store
pub struct Session<S: RemoteStore> {
    store: Arc<S>,
    identity: Option<User>,
    selected_peer: Option<UserId>,
    directory: DirectorySync,
    conversation: ConversationSync,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl<S: RemoteStore> Session<S> {
    /// Create an unauthenticated session over the given store
    pub fn new(store: Arc<S>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            identity: None,
            selected_peer: None,
            directory: DirectorySync::new(),
            conversation: ConversationSync::new(),
            event_tx,
        }
    }

    /// Subscribe to session events. Multiple subscribers can exist;
    /// events are broadcast to all.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Enter the authenticated state with the identity triple supplied
    /// by the external identity provider.
    ///
    /// Publishes the identity into the directory, then starts directory
    /// synchronization. The conversation starts empty with no peer
    /// selected. Signing in while already authenticated performs an
    /// implicit sign-out first, so no state from the previous identity
    /// survives.
    ///
    /// # Errors
    ///
    /// `ChatError::Auth` if the identity is unusable (empty uid);
    /// `ChatError::Store` if publishing the identity fails. In both
    /// cases the session stays unauthenticated and may retry.
    pub fn sign_in(&mut self, identity: User) -> ChatResult<()> {
        if identity.uid.is_empty() {
            return Err(ChatError::Auth("identity has an empty uid".to_string()));
        }

        if self.identity.is_some() {
            debug!(uid = %identity.uid, "Sign-in while authenticated, signing out first");
            self.sign_out();
        }

        info!(uid = %identity.uid, name = %identity.display_name, "Signing in");

        directory::publish_self(self.store.as_ref(), &identity)?;
        self.directory.start(
            self.store.subscribe_append(USERS_PATH),
            identity.uid.clone(),
            self.event_tx.clone(),
        );

        let uid = identity.uid.clone();
        self.identity = Some(identity);
        self.selected_peer = None;

        let _ = self.event_tx.send(SessionEvent::SignedIn { uid });
        Ok(())
    }

    /// Return to the unauthenticated state.
    ///
    /// Stops both synchronizers; directory and conversation views become
    /// empty, identity and peer selection reset. Idempotent.
    pub fn sign_out(&mut self) {
        let Some(identity) = self.identity.take() else {
            return;
        };

        info!(uid = %identity.uid, "Signing out");

        self.directory.stop();
        self.conversation.stop();
        self.selected_peer = None;

        let _ = self.event_tx.send(SessionEvent::SignedOut);
    }

    /// Open the conversation with `peer_uid`.
    ///
    /// The previous conversation (if any) is discarded synchronously:
    /// by the time this returns, the view is empty and only snapshots
    /// for the new pair can ever be applied to it.
    pub fn select_peer(&mut self, peer_uid: UserId) -> ChatResult<()> {
        let identity = self.identity.as_ref().ok_or(ChatError::NotSignedIn)?;

        if peer_uid.is_empty() {
            return Err(ChatError::InvalidOperation(
                "peer uid is empty".to_string(),
            ));
        }
        if peer_uid == identity.uid {
            return Err(ChatError::InvalidOperation(
                "cannot open a conversation with yourself".to_string(),
            ));
        }

        debug!(identity = %identity.uid, peer = %peer_uid, "Selecting peer");

        self.conversation.select(
            self.store.subscribe_snapshot(MESSAGES_PATH),
            identity.uid.clone(),
            peer_uid.clone(),
            self.event_tx.clone(),
        );
        self.selected_peer = Some(peer_uid);
        Ok(())
    }

    /// Send a message to the selected peer.
    ///
    /// Appends to the global log and returns the store-assigned key.
    /// Local state is untouched; the message appears in the view after
    /// the store round trip. On failure nothing is retried and the user
    /// may resend.
    pub fn send_message(&self, body: impl Into<String>) -> ChatResult<StoreKey> {
        let identity = self.identity.as_ref().ok_or(ChatError::NotSignedIn)?;
        let peer_uid = self.selected_peer.as_ref().ok_or(ChatError::NoPeerSelected)?;

        conversation::send_message(self.store.as_ref(), &identity.uid, peer_uid, body)
    }

    /// Current observable state
    pub fn state(&self) -> SessionState {
        match &self.identity {
            Some(identity) => SessionState::Authenticated {
                uid: identity.uid.clone(),
                selected_peer: self.selected_peer.clone(),
            },
            None => SessionState::Unauthenticated,
        }
    }

    /// Whether an identity is signed in
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// The signed-in identity, if any
    pub fn identity(&self) -> Option<&User> {
        self.identity.as_ref()
    }

    /// The selected peer, if any
    pub fn selected_peer(&self) -> Option<&UserId> {
        self.selected_peer.as_ref()
    }

    /// The known users for this session, in discovery order. Empty when
    /// unauthenticated.
    pub fn directory(&self) -> Vec<User> {
        self.directory.users()
    }

    /// The active conversation in presentation order, newest first.
    /// Empty when no peer is selected.
    pub fn conversation_newest_first(&self) -> Vec<Message> {
        self.conversation.messages_newest_first()
    }

    /// The active conversation in canonical internal order, oldest first
    pub fn conversation_messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn session() -> Session<MemoryStore> {
        Session::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_new_session_is_unauthenticated() {
        let session = session();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(!session.is_authenticated());
        assert!(session.directory().is_empty());
        assert!(session.conversation_newest_first().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_rejects_empty_uid() {
        let mut session = session();
        let err = session.sign_in(User::new("", "Nobody", "n@x")).unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_publishes_and_authenticates() {
        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new(store.clone());

        session.sign_in(User::new("u1", "Alice", "a@x")).unwrap();

        assert_eq!(
            session.state(),
            SessionState::Authenticated {
                uid: "u1".into(),
                selected_peer: None,
            }
        );

        // The identity is discoverable by other sessions
        let mut other = Session::new(store);
        let mut events = other.subscribe_events();
        other.sign_in(User::new("u2", "Bob", "b@x")).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if let SessionEvent::DirectoryChanged { .. } = events.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await
        .expect("directory event not delivered");
        assert_eq!(other.directory()[0].uid.as_str(), "u1");
    }

    #[tokio::test]
    async fn test_sign_in_failure_leaves_session_unauthenticated() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let mut session = Session::new(store);

        let err = session.sign_in(User::new("u1", "Alice", "a@x")).unwrap_err();
        assert!(matches!(err, ChatError::Store(_)));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_select_peer_requires_auth() {
        let mut session = session();
        let err = session.select_peer("u2".into()).unwrap_err();
        assert!(matches!(err, ChatError::NotSignedIn));
    }

    #[tokio::test]
    async fn test_select_self_rejected() {
        let mut session = session();
        session.sign_in(User::new("u1", "Alice", "a@x")).unwrap();

        let err = session.select_peer("u1".into()).unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));
        assert_eq!(session.selected_peer(), None);
    }

    #[tokio::test]
    async fn test_send_requires_peer() {
        let mut session = session();
        session.sign_in(User::new("u1", "Alice", "a@x")).unwrap();

        let err = session.send_message("hi").unwrap_err();
        assert!(matches!(err, ChatError::NoPeerSelected));
    }

    #[tokio::test]
    async fn test_sign_out_is_idempotent_and_clears_state() {
        let mut session = session();
        session.sign_in(User::new("u1", "Alice", "a@x")).unwrap();
        session.select_peer("u2".into()).unwrap();

        session.sign_out();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.directory().is_empty());
        assert!(session.conversation_newest_first().is_empty());
        assert!(session.selected_peer().is_none());

        // Second sign-out is a no-op
        session.sign_out();
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }
}
