//! Pairchat Core Library
//!
//! Synchronization core for a two-party direct-messaging client. Local
//! state is kept consistent with a shared remote key-value tree that
//! pushes unordered, incremental updates: individual child appends for
//! the user directory, full snapshots for the append-only message log.
//! The core turns that stream into a correctly filtered, ordered,
//! deduplicated view per conversation.
//!
//! ## Components
//!
//! - [`store`] — adapter over the remote tree: owned subscriptions,
//!   upserts, appends with store-assigned ordering keys
//! - [`directory`] — deduplicated set of known users for the identity
//! - [`conversation`] — ordered message view for one `(identity, peer)`
//!   pair, rebuilt by full replace on every snapshot
//! - [`session`] — identity and selection state machine orchestrating
//!   the synchronizers
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pairchat_core::{MemoryStore, Session, User};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let mut session = Session::new(store);
//!
//!     session.sign_in(User::new("u1", "Alice", "alice@example.com"))?;
//!     session.select_peer("u2".into())?;
//!     session.send_message("hello")?;
//!
//!     // The message appears in the view after the store round trip
//!     for msg in session.conversation_newest_first() {
//!         println!("{}: {}", msg.from_uid, msg.body);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod conversation;
pub mod directory;
pub mod error;
pub mod events;
pub mod session;
pub mod store;
pub mod types;

// Re-exports
pub use conversation::{send_message, Conversation, ConversationSync};
pub use directory::{publish_self, DirectorySync};
pub use error::{ChatError, ChatResult};
pub use events::SessionEvent;
pub use session::{Session, SessionState};
pub use store::{
    AppendEvent, AppendSubscription, MemoryStore, RemoteStore, SnapshotEvent,
    SnapshotSubscription, StoreError, StoreKey, StoreRecord,
};
pub use types::{ConversationPair, Message, User, UserId, MESSAGES_PATH, USERS_PATH};
