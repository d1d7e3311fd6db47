//! Remote store adapter
//!
//! Wraps the external realtime key-value tree behind the [`RemoteStore`]
//! trait. The store is a set of paths (tree nodes), each holding an
//! ordered set of children keyed by [`StoreKey`]; values are JSON. Two
//! subscription shapes exist, matching the two trees the core consumes:
//!
//! - **Append subscriptions** deliver one [`AppendEvent::Added`] per
//!   existing child (in store-key order) at subscription time, then one
//!   per subsequently appended child. Used for the user directory.
//! - **Snapshot subscriptions** deliver the *entire* current child set
//!   on subscribe and again after every change to the node. Used for the
//!   message log, where each delivery fully supersedes the previous view.
//!
//! No operation blocks the caller past initiation; all delivery is via
//! channel. Errors arrive on the same channel as data and are fatal to
//! that subscription: the adapter never retries, reconnection policy
//! belongs to the caller.
//!
//! Subscriptions are owned values: dropping one unsubscribes, so a
//! superseded subscription can never deliver into fresh state.

mod memory;

pub use memory::MemoryStore;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected a write or subscription for this path
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transport-level failure talking to the store
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store ended this subscription
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),
}

/// Key of a child within a store path.
///
/// Append keys are store-assigned, strictly increasing, and sort
/// lexicographically in append order; upsert keys are caller-chosen
/// (the directory uses the uid). Opaque above the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(pub String);

impl StoreKey {
    /// Create a key from anything string-like
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single child of a store path: its key and JSON value
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    /// Child key within the path
    pub key: StoreKey,
    /// JSON value stored at the key
    pub value: Value,
}

/// Delivery on an append subscription
#[derive(Debug, Clone)]
pub enum AppendEvent {
    /// A child exists or was appended at this path
    Added(StoreRecord),
    /// The subscription failed; no further deliveries follow
    Error(StoreError),
}

/// Delivery on a snapshot subscription
#[derive(Debug, Clone)]
pub enum SnapshotEvent {
    /// The entire current child set of the path, in store-key order.
    /// Fully supersedes any previously delivered snapshot.
    Snapshot(Vec<StoreRecord>),
    /// The subscription failed; no further deliveries follow
    Error(StoreError),
}

/// Runs a store-side cleanup when the subscription is dropped
struct SubscriptionGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    fn new(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

/// An owned append subscription. Dropping it unsubscribes.
pub struct AppendSubscription {
    rx: mpsc::UnboundedReceiver<AppendEvent>,
    _guard: SubscriptionGuard,
}

impl AppendSubscription {
    /// Assemble a subscription from its receiving half and a cleanup
    /// hook invoked on drop. Store implementations call this.
    pub fn new(
        rx: mpsc::UnboundedReceiver<AppendEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            _guard: SubscriptionGuard::new(on_drop),
        }
    }

    /// Receive the next event. `None` means the store closed the channel.
    pub async fn recv(&mut self) -> Option<AppendEvent> {
        self.rx.recv().await
    }
}

/// An owned snapshot subscription. Dropping it unsubscribes.
pub struct SnapshotSubscription {
    rx: mpsc::UnboundedReceiver<SnapshotEvent>,
    _guard: SubscriptionGuard,
}

impl SnapshotSubscription {
    /// Assemble a subscription from its receiving half and a cleanup
    /// hook invoked on drop. Store implementations call this.
    pub fn new(
        rx: mpsc::UnboundedReceiver<SnapshotEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            _guard: SubscriptionGuard::new(on_drop),
        }
    }

    /// Receive the next event. `None` means the store closed the channel.
    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }
}

/// The remote store contract consumed by the synchronizers.
///
/// Implementations must not block in any method: writes return once the
/// operation is initiated and accepted, subscriptions deliver entirely
/// through their channel.
pub trait RemoteStore: Send + Sync + 'static {
    /// Subscribe to child additions at `path`. Existing children are
    /// delivered first, in store-key order.
    fn subscribe_append(&self, path: &str) -> AppendSubscription;

    /// Subscribe to full snapshots of `path`. The current snapshot is
    /// delivered immediately, then again after every change.
    fn subscribe_snapshot(&self, path: &str) -> SnapshotSubscription;

    /// Idempotent upsert at an exact key. Creating a new key feeds
    /// append subscriptions; overwriting an existing one does not.
    fn write(&self, path: &str, key: &StoreKey, value: Value) -> Result<(), StoreError>;

    /// Append a value under a fresh store-assigned key, returned to the
    /// caller. Keys are strictly increasing per store.
    fn append(&self, path: &str, value: Value) -> Result<StoreKey, StoreError>;
}
