//! Directory synchronizer
//!
//! Maintains the deduplicated set of known users for the active identity
//! by consuming the append subscription on the `/users/` tree. Raw
//! records missing a display name get a positional default
//! (`"Nome {N}"` where N is the directory size at discovery time); a
//! record is inserted only when no entry with its uid exists yet and the
//! uid is not the identity's own. The directory only grows for the
//! lifetime of the authenticated session; the session controller clears
//! it on sign-out by stopping the synchronizer.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ChatResult;
use crate::events::SessionEvent;
use crate::store::{AppendEvent, AppendSubscription, RemoteStore, StoreKey};
use crate::types::{User, UserId, USERS_PATH};

/// Raw directory record as it arrives from the store. The display name
/// and email may be absent on records written by other clients.
#[derive(Debug, Deserialize)]
struct RawDirectoryRecord {
    uid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: String,
}

/// Publish the local identity into the directory store at `/users/{uid}`
/// so peers discover it. Idempotent upsert; called once per sign-in,
/// before synchronization starts.
pub fn publish_self<S: RemoteStore>(store: &S, user: &User) -> ChatResult<()> {
    let value = serde_json::to_value(user)?;
    let key = StoreKey::new(user.uid.as_str());

    if let Err(e) = store.write(USERS_PATH, &key, value) {
        warn!(uid = %user.uid, error = %e, "Failed to publish identity to directory");
        return Err(e.into());
    }

    debug!(uid = %user.uid, "Published identity to directory");
    Ok(())
}

/// State for a running directory subscription
struct ActiveDirectory {
    /// Known users, insertion order (determines default-name numbering)
    users: Arc<RwLock<Vec<User>>>,
    /// Background task consuming the append subscription
    task: JoinHandle<()>,
}

/// Synchronizer producing the deduplicated directory for one identity
pub struct DirectorySync {
    active: Option<ActiveDirectory>,
}

impl DirectorySync {
    /// Create a stopped synchronizer
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Start consuming directory-append events for `identity_uid`.
    /// Any previous run is stopped first.
    pub fn start(
        &mut self,
        subscription: AppendSubscription,
        identity_uid: UserId,
        event_tx: broadcast::Sender<SessionEvent>,
    ) {
        self.stop();

        let users = Arc::new(RwLock::new(Vec::new()));
        let task = tokio::spawn(directory_task(
            subscription,
            identity_uid,
            users.clone(),
            event_tx,
        ));

        self.active = Some(ActiveDirectory { users, task });
    }

    /// Cancel the subscription. The directory view becomes empty.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }

    /// Whether a subscription is currently running
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Snapshot of the current directory, in insertion order
    pub fn users(&self) -> Vec<User> {
        self.active
            .as_ref()
            .map(|a| a.users.read().clone())
            .unwrap_or_default()
    }
}

impl Default for DirectorySync {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DirectorySync {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn directory_task(
    mut subscription: AppendSubscription,
    identity_uid: UserId,
    users: Arc<RwLock<Vec<User>>>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    debug!(identity = %identity_uid, "Directory sync task started");

    loop {
        match subscription.recv().await {
            Some(AppendEvent::Added(record)) => {
                let raw: RawDirectoryRecord = match serde_json::from_value(record.value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "Skipping malformed directory record");
                        continue;
                    }
                };

                let mut users = users.write();

                // Default-name numbering uses the directory size at the
                // moment of discovery, before the dedup and self checks
                let display_name = match raw.name.filter(|n| !n.is_empty()) {
                    Some(name) => name,
                    None => format!("Nome {}", users.len()),
                };

                let uid = UserId::new(raw.uid);
                if uid == identity_uid {
                    continue;
                }
                if users.iter().any(|u| u.uid == uid) {
                    debug!(%uid, "Ignoring duplicate directory record");
                    continue;
                }

                debug!(%uid, name = %display_name, "Discovered user");
                users.push(User {
                    uid,
                    display_name,
                    email: raw.email,
                });
                let user_count = users.len();
                drop(users);

                let _ = event_tx.send(SessionEvent::DirectoryChanged { user_count });
            }
            Some(AppendEvent::Error(e)) => {
                warn!(error = %e, "Directory subscription failed");
                let _ = event_tx.send(SessionEvent::SyncError {
                    context: "directory",
                    message: e.to_string(),
                });
                break;
            }
            None => {
                warn!("Directory subscription closed by store");
                let _ = event_tx.send(SessionEvent::SyncError {
                    context: "directory",
                    message: "subscription closed".to_string(),
                });
                break;
            }
        }
    }

    debug!(identity = %identity_uid, "Directory sync task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

    async fn wait_for_directory_size(
        rx: &mut broadcast::Receiver<SessionEvent>,
        size: usize,
    ) {
        timeout(EVENT_TIMEOUT, async {
            loop {
                match rx.recv().await.expect("event channel closed") {
                    SessionEvent::DirectoryChanged { user_count } if user_count >= size => break,
                    _ => {}
                }
            }
        })
        .await
        .expect("timed out waiting for directory size");
    }

    fn start_sync(store: &MemoryStore, identity: &str) -> (DirectorySync, broadcast::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let mut sync = DirectorySync::new();
        sync.start(
            store.subscribe_append(USERS_PATH),
            UserId::new(identity),
            event_tx,
        );
        (sync, event_rx)
    }

    #[tokio::test]
    async fn test_discovers_existing_and_new_users() {
        let store = MemoryStore::new();
        publish_self(&store, &User::new("u2", "Bob", "bob@example.com")).unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");

        publish_self(&store, &User::new("u3", "Carol", "carol@example.com")).unwrap();
        wait_for_directory_size(&mut rx, 2).await;

        let users = sync.users();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].uid.as_str(), "u2");
        assert_eq!(users[1].uid.as_str(), "u3");
    }

    #[tokio::test]
    async fn test_self_is_excluded() {
        let store = MemoryStore::new();
        publish_self(&store, &User::new("u1", "Me", "me@example.com")).unwrap();
        publish_self(&store, &User::new("u2", "Bob", "bob@example.com")).unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 1).await;

        let users = sync.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].uid.as_str(), "u2");
    }

    #[tokio::test]
    async fn test_duplicate_uid_ignored() {
        let store = MemoryStore::new();

        // Two appended records sharing a uid (the directory tree normally
        // keys by uid, but dedup must hold regardless of how records arrive)
        store
            .append(USERS_PATH, json!({"uid": "u2", "name": "Bob", "email": "b@x"}))
            .unwrap();
        store
            .append(USERS_PATH, json!({"uid": "u2", "name": "Bobby", "email": "b@x"}))
            .unwrap();
        store
            .append(USERS_PATH, json!({"uid": "u3", "name": "Carol", "email": "c@x"}))
            .unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 2).await;

        let users = sync.users();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].display_name, "Bob");
        assert_eq!(users[1].display_name, "Carol");
    }

    #[tokio::test]
    async fn test_missing_name_gets_positional_default() {
        let store = MemoryStore::new();
        store.append(USERS_PATH, json!({"uid": "u2"})).unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 1).await;

        let users = sync.users();
        assert_eq!(users[0].display_name, "Nome 0");
        assert_eq!(users[0].email, "");
    }

    #[tokio::test]
    async fn test_default_names_number_by_arrival() {
        let store = MemoryStore::new();
        store.append(USERS_PATH, json!({"uid": "u2"})).unwrap();
        store
            .append(USERS_PATH, json!({"uid": "u3", "name": "Carol"}))
            .unwrap();
        store.append(USERS_PATH, json!({"uid": "u4"})).unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 3).await;

        let users = sync.users();
        assert_eq!(users[0].display_name, "Nome 0");
        assert_eq!(users[1].display_name, "Carol");
        assert_eq!(users[2].display_name, "Nome 2");
    }

    #[tokio::test]
    async fn test_empty_name_treated_as_absent() {
        let store = MemoryStore::new();
        store
            .append(USERS_PATH, json!({"uid": "u2", "name": ""}))
            .unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 1).await;

        assert_eq!(sync.users()[0].display_name, "Nome 0");
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let store = MemoryStore::new();
        store.append(USERS_PATH, json!("not an object")).unwrap();
        store
            .append(USERS_PATH, json!({"uid": "u2", "name": "Bob"}))
            .unwrap();

        let (sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 1).await;

        let users = sync.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].uid.as_str(), "u2");
    }

    #[tokio::test]
    async fn test_stop_clears_view_and_unsubscribes() {
        let store = MemoryStore::new();
        publish_self(&store, &User::new("u2", "Bob", "b@x")).unwrap();

        let (mut sync, mut rx) = start_sync(&store, "u1");
        wait_for_directory_size(&mut rx, 1).await;
        assert!(sync.is_running());

        sync.stop();
        assert!(!sync.is_running());
        assert!(sync.users().is_empty());

        // The aborted task drops the subscription
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.subscriber_count(USERS_PATH), 0);
    }

    #[tokio::test]
    async fn test_publish_self_failure_surfaces() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let err = publish_self(&store, &User::new("u1", "Me", "m@x")).unwrap_err();
        assert!(matches!(err, crate::error::ChatError::Store(_)));
    }
}
