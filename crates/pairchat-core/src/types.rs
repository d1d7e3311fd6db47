//! Core types for Pairchat

use serde::{Deserialize, Serialize};

/// Store path for the shared user directory tree
pub const USERS_PATH: &str = "/users/";

/// Store path for the global append-only message log
pub const MESSAGES_PATH: &str = "/messages/";

/// Stable, globally unique user identifier assigned by the identity provider
///
/// Opaque to the core; the only operations are equality and display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a UserId from anything string-like
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never valid for a signed-in identity)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A known user: the identity triple supplied by the identity provider,
/// or a directory entry discovered from the remote store.
///
/// Wire format matches the directory records in the remote store:
/// the display name travels under the field `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable unique identifier
    pub uid: UserId,
    /// Human-readable display name
    #[serde(rename = "name")]
    pub display_name: String,
    /// Contact email address
    pub email: String,
}

impl User {
    /// Create a new user record
    pub fn new(
        uid: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            uid: UserId::new(uid),
            display_name: display_name.into(),
            email: email.into(),
        }
    }
}

/// A direct message between two users.
///
/// Immutable once written to the store. Ordering comes from the
/// store-assigned append key, never from the message itself, so the
/// record carries no timestamp or sequence of its own.
///
/// Wire format matches the message log records: `fromUid`, `toUid`,
/// and the body under the field `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender's uid
    #[serde(rename = "fromUid")]
    pub from_uid: UserId,
    /// Recipient's uid
    #[serde(rename = "toUid")]
    pub to_uid: UserId,
    /// Message text
    #[serde(rename = "message")]
    pub body: String,
}

impl Message {
    /// Create a new message
    pub fn new(from_uid: UserId, to_uid: UserId, body: impl Into<String>) -> Self {
        Self {
            from_uid,
            to_uid,
            body: body.into(),
        }
    }
}

/// The unordered pair of identities defining one conversation.
///
/// A message belongs to conversation `(A, B)` iff `{from, to} == {A, B}`
/// as an unordered pair. The pair is canonicalized on construction so
/// `new(a, b) == new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationPair {
    first: UserId,
    second: UserId,
}

impl ConversationPair {
    /// Create a canonicalized pair
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// Whether a message belongs to this conversation
    pub fn contains(&self, message: &Message) -> bool {
        (message.from_uid == self.first && message.to_uid == self.second)
            || (message.from_uid == self.second && message.to_uid == self.first)
    }
}

impl std::fmt::Display for ConversationPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}
