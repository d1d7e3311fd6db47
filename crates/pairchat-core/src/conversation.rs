//! Conversation synchronizer
//!
//! Maintains the ordered message view for exactly one `(identity, peer)`
//! pair by consuming full snapshots of the `/messages/` tree. Every
//! snapshot is reconciled by full replace: filter the complete record
//! set to the pair, keep the store's append order (oldest first) as the
//! canonical internal order, expose the reverse (newest first) for
//! presentation. There is no merge or patch logic, so a late snapshot is
//! always self-consistent.
//!
//! At most one subscription is live per synchronizer. Selecting a new
//! peer retires the previous subscription synchronously and bumps a
//! generation counter; a superseded task re-checks the generation before
//! applying a snapshot, so a straggling delivery from the previous pair
//! can never reach the new view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ChatResult;
use crate::events::SessionEvent;
use crate::store::{RemoteStore, SnapshotEvent, SnapshotSubscription, StoreKey, StoreRecord};
use crate::types::{ConversationPair, Message, UserId, MESSAGES_PATH};

/// The derived message view for one pair.
///
/// Holds messages in append order (oldest first). Derived, never stored:
/// each rebuild starts from a full snapshot and fully supersedes the
/// previous contents.
#[derive(Debug, Clone)]
pub struct Conversation {
    pair: ConversationPair,
    /// Messages in store append order, oldest first
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty view for a pair
    pub fn empty(pair: ConversationPair) -> Self {
        Self {
            pair,
            messages: Vec::new(),
        }
    }

    /// Rebuild the view from a full snapshot of the message log.
    ///
    /// Records that do not parse as messages are skipped; records whose
    /// endpoints do not match the pair are filtered out. Snapshot order
    /// (store append order) is preserved.
    pub fn rebuild(pair: ConversationPair, snapshot: &[StoreRecord]) -> Self {
        let messages = snapshot
            .iter()
            .filter_map(|record| {
                match serde_json::from_value::<Message>(record.value.clone()) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        debug!(key = %record.key, error = %e, "Skipping malformed message record");
                        None
                    }
                }
            })
            .filter(|message| pair.contains(message))
            .collect();

        Self { pair, messages }
    }

    /// The pair this view belongs to
    pub fn pair(&self) -> &ConversationPair {
        &self.pair
    }

    /// Messages in canonical internal order, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages in presentation order, newest first
    pub fn newest_first(&self) -> Vec<Message> {
        self.messages.iter().rev().cloned().collect()
    }

    /// Number of messages in the view
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Construct a message for the pair and append it to the global log.
///
/// Local state is not touched: the sender sees the message once the
/// store pushes the updated snapshot back through the active
/// subscription. Append failures are logged and surfaced; there is no
/// optimistic state to roll back and no retry.
pub fn send_message<S: RemoteStore>(
    store: &S,
    from_uid: &UserId,
    to_uid: &UserId,
    body: impl Into<String>,
) -> ChatResult<StoreKey> {
    let message = Message::new(from_uid.clone(), to_uid.clone(), body);
    let value = serde_json::to_value(&message)?;

    match store.append(MESSAGES_PATH, value) {
        Ok(key) => {
            debug!(from = %from_uid, to = %to_uid, %key, "Appended message to log");
            Ok(key)
        }
        Err(e) => {
            warn!(from = %from_uid, to = %to_uid, error = %e, "Failed to append message");
            Err(e.into())
        }
    }
}

/// State for the live conversation subscription
struct ActiveConversation {
    pair: ConversationPair,
    view: Arc<RwLock<Conversation>>,
    task: JoinHandle<()>,
}

/// Synchronizer owning the single live message subscription
pub struct ConversationSync {
    /// Current generation; bumped on every select/stop so superseded
    /// tasks can detect they are stale
    generation: Arc<AtomicU64>,
    active: Option<ActiveConversation>,
}

impl ConversationSync {
    /// Create a stopped synchronizer
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Switch the view to the `(identity, peer)` pair.
    ///
    /// The previous subscription is retired and the view replaced with
    /// an empty one before the new subscription can deliver, so no
    /// transitional or stale view is ever observable.
    pub fn select(
        &mut self,
        subscription: SnapshotSubscription,
        identity_uid: UserId,
        peer_uid: UserId,
        event_tx: broadcast::Sender<SessionEvent>,
    ) {
        self.stop();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pair = ConversationPair::new(identity_uid, peer_uid);
        let view = Arc::new(RwLock::new(Conversation::empty(pair.clone())));

        debug!(%pair, generation, "Selecting conversation");

        let task = tokio::spawn(conversation_task(
            subscription,
            pair.clone(),
            generation,
            self.generation.clone(),
            view.clone(),
            event_tx,
        ));

        self.active = Some(ActiveConversation { pair, view, task });
    }

    /// Cancel the subscription and discard the view
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            active.task.abort();
        }
    }

    /// Whether a subscription is currently live
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The pair currently selected, if any
    pub fn pair(&self) -> Option<&ConversationPair> {
        self.active.as_ref().map(|a| &a.pair)
    }

    /// Messages in canonical internal order, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.active
            .as_ref()
            .map(|a| a.view.read().messages().to_vec())
            .unwrap_or_default()
    }

    /// Messages in presentation order, newest first
    pub fn messages_newest_first(&self) -> Vec<Message> {
        self.active
            .as_ref()
            .map(|a| a.view.read().newest_first())
            .unwrap_or_default()
    }
}

impl Default for ConversationSync {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConversationSync {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn conversation_task(
    mut subscription: SnapshotSubscription,
    pair: ConversationPair,
    my_generation: u64,
    current_generation: Arc<AtomicU64>,
    view: Arc<RwLock<Conversation>>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    debug!(%pair, generation = my_generation, "Conversation sync task started");

    loop {
        match subscription.recv().await {
            Some(SnapshotEvent::Snapshot(records)) => {
                if current_generation.load(Ordering::SeqCst) != my_generation {
                    debug!(%pair, generation = my_generation, "Dropping snapshot for superseded generation");
                    break;
                }

                let rebuilt = Conversation::rebuild(pair.clone(), &records);
                let message_count = rebuilt.len();
                *view.write() = rebuilt;

                debug!(%pair, message_count, "Applied message snapshot");
                let _ = event_tx.send(SessionEvent::ConversationChanged {
                    generation: my_generation,
                    message_count,
                });
            }
            Some(SnapshotEvent::Error(e)) => {
                warn!(%pair, error = %e, "Conversation subscription failed");
                let _ = event_tx.send(SessionEvent::SyncError {
                    context: "conversation",
                    message: e.to_string(),
                });
                break;
            }
            None => {
                warn!(%pair, "Conversation subscription closed by store");
                let _ = event_tx.send(SessionEvent::SyncError {
                    context: "conversation",
                    message: "subscription closed".to_string(),
                });
                break;
            }
        }
    }

    debug!(%pair, generation = my_generation, "Conversation sync task ended");
}
