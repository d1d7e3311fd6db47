//! In-process remote store
//!
//! [`MemoryStore`] implements the [`RemoteStore`] contract over plain
//! in-memory trees. It stands in for the external replicated store,
//! which is excluded infrastructure: the synchronizers only ever see the
//! adapter contract, and every delivery rule (existing-children replay,
//! full-snapshot-on-change, ordering) is honored exactly.
//!
//! Cloning a `MemoryStore` shares the underlying trees, so multiple
//! sessions in one process observe each other's writes the way two chat
//! clients observe the shared remote store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use ulid::Generator;

use super::{
    AppendEvent, AppendSubscription, RemoteStore, SnapshotEvent, SnapshotSubscription, StoreError,
    StoreKey, StoreRecord,
};

/// One tree node: ordered children plus the live subscriber sets
#[derive(Default)]
struct Tree {
    children: BTreeMap<StoreKey, Value>,
    append_subs: HashMap<u64, mpsc::UnboundedSender<AppendEvent>>,
    snapshot_subs: HashMap<u64, mpsc::UnboundedSender<SnapshotEvent>>,
}

impl Tree {
    fn snapshot(&self) -> Vec<StoreRecord> {
        self.children
            .iter()
            .map(|(key, value)| StoreRecord {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

struct Inner {
    trees: Mutex<HashMap<String, Tree>>,
    /// Monotonic ULID generator; keys from one store are strictly increasing
    key_gen: Mutex<Generator>,
    next_sub_id: AtomicU64,
    fail_writes: AtomicBool,
}

/// In-memory implementation of [`RemoteStore`]
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                trees: Mutex::new(HashMap::new()),
                key_gen: Mutex::new(Generator::new()),
                next_sub_id: AtomicU64::new(0),
                fail_writes: AtomicBool::new(false),
            }),
        }
    }

    /// Make subsequent writes and appends fail with `PermissionDenied`.
    /// Used to exercise the write-failure path.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live subscriptions (both kinds) on a path
    pub fn subscriber_count(&self, path: &str) -> usize {
        let trees = self.inner.trees.lock();
        trees
            .get(path)
            .map(|t| t.append_subs.len() + t.snapshot_subs.len())
            .unwrap_or(0)
    }

    fn next_sub_id(&self) -> u64 {
        self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert `value` at `key` and notify subscribers. A key not seen
    /// before on the path feeds append subscriptions; any insert feeds
    /// snapshot subscriptions with the full child set.
    fn insert(&self, path: &str, key: StoreKey, value: Value) {
        let mut trees = self.inner.trees.lock();
        let tree = trees.entry(path.to_string()).or_default();

        let is_new = !tree.children.contains_key(&key);
        tree.children.insert(key.clone(), value.clone());

        if is_new {
            let record = StoreRecord { key, value };
            tree.append_subs
                .retain(|_, tx| tx.send(AppendEvent::Added(record.clone())).is_ok());
        }

        let snapshot = tree.snapshot();
        tree.snapshot_subs
            .retain(|_, tx| tx.send(SnapshotEvent::Snapshot(snapshot.clone())).is_ok());
    }

    fn check_writable(&self, path: &str) -> Result<(), StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::PermissionDenied(path.to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn subscribe_append(&self, path: &str) -> AppendSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = self.next_sub_id();

        {
            let mut trees = self.inner.trees.lock();
            let tree = trees.entry(path.to_string()).or_default();

            // Replay existing children, in store-key order, before the
            // subscription can observe anything newer
            for record in tree.snapshot() {
                let _ = tx.send(AppendEvent::Added(record));
            }
            tree.append_subs.insert(sub_id, tx);
        }

        let inner = self.inner.clone();
        let path = path.to_string();
        AppendSubscription::new(rx, move || {
            let mut trees = inner.trees.lock();
            if let Some(tree) = trees.get_mut(&path) {
                tree.append_subs.remove(&sub_id);
            }
        })
    }

    fn subscribe_snapshot(&self, path: &str) -> SnapshotSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = self.next_sub_id();

        {
            let mut trees = self.inner.trees.lock();
            let tree = trees.entry(path.to_string()).or_default();

            let _ = tx.send(SnapshotEvent::Snapshot(tree.snapshot()));
            tree.snapshot_subs.insert(sub_id, tx);
        }

        let inner = self.inner.clone();
        let path = path.to_string();
        SnapshotSubscription::new(rx, move || {
            let mut trees = inner.trees.lock();
            if let Some(tree) = trees.get_mut(&path) {
                tree.snapshot_subs.remove(&sub_id);
            }
        })
    }

    fn write(&self, path: &str, key: &StoreKey, value: Value) -> Result<(), StoreError> {
        self.check_writable(path)?;
        self.insert(path, key.clone(), value);
        Ok(())
    }

    fn append(&self, path: &str, value: Value) -> Result<StoreKey, StoreError> {
        self.check_writable(path)?;

        let ulid = self
            .inner
            .key_gen
            .lock()
            .generate()
            .map_err(|e| StoreError::Transport(format!("key generation failed: {}", e)))?;
        let key = StoreKey::new(ulid.to_string());

        self.insert(path, key.clone(), value);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_keys_strictly_increase() {
        let store = MemoryStore::new();
        let k1 = store.append("/messages/", json!({"n": 1})).unwrap();
        let k2 = store.append("/messages/", json!({"n": 2})).unwrap();
        let k3 = store.append("/messages/", json!({"n": 3})).unwrap();
        assert!(k1 < k2);
        assert!(k2 < k3);
    }

    #[tokio::test]
    async fn test_append_subscription_replays_existing_then_live() {
        let store = MemoryStore::new();
        store.append("/users/", json!({"uid": "u1"})).unwrap();
        store.append("/users/", json!({"uid": "u2"})).unwrap();

        let mut sub = store.subscribe_append("/users/");
        store.append("/users/", json!({"uid": "u3"})).unwrap();

        for expected in ["u1", "u2", "u3"] {
            match sub.recv().await {
                Some(AppendEvent::Added(record)) => {
                    assert_eq!(record.value["uid"], expected);
                }
                other => panic!("expected Added, got {:?}", other.is_some()),
            }
        }
    }

    #[tokio::test]
    async fn test_snapshot_delivered_on_subscribe_and_on_change() {
        let store = MemoryStore::new();
        store.append("/messages/", json!({"n": 1})).unwrap();

        let mut sub = store.subscribe_snapshot("/messages/");

        match sub.recv().await {
            Some(SnapshotEvent::Snapshot(records)) => assert_eq!(records.len(), 1),
            _ => panic!("expected initial snapshot"),
        }

        store.append("/messages/", json!({"n": 2})).unwrap();

        match sub.recv().await {
            Some(SnapshotEvent::Snapshot(records)) => {
                assert_eq!(records.len(), 2);
                // Full replace, in append order
                assert_eq!(records[0].value["n"], 1);
                assert_eq!(records[1].value["n"], 2);
            }
            _ => panic!("expected snapshot after append"),
        }
    }

    #[tokio::test]
    async fn test_overwrite_does_not_refire_append() {
        let store = MemoryStore::new();
        let key = StoreKey::new("u1");

        let mut sub = store.subscribe_append("/users/");
        store.write("/users/", &key, json!({"uid": "u1", "name": "A"})).unwrap();
        store.write("/users/", &key, json!({"uid": "u1", "name": "B"})).unwrap();

        match sub.recv().await {
            Some(AppendEvent::Added(record)) => assert_eq!(record.value["name"], "A"),
            _ => panic!("expected first write as Added"),
        }

        // The overwrite produced no second append event; channel is empty
        store.append("/users/", json!({"uid": "u2"})).unwrap();
        match sub.recv().await {
            Some(AppendEvent::Added(record)) => assert_eq!(record.value["uid"], "u2"),
            _ => panic!("expected append after overwrite"),
        }
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let store = MemoryStore::new();
        let sub = store.subscribe_append("/users/");
        let snap = store.subscribe_snapshot("/messages/");
        assert_eq!(store.subscriber_count("/users/"), 1);
        assert_eq!(store.subscriber_count("/messages/"), 1);

        drop(sub);
        drop(snap);
        assert_eq!(store.subscriber_count("/users/"), 0);
        assert_eq!(store.subscriber_count("/messages/"), 0);
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let err = store.append("/messages/", json!({})).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        let err = store
            .write("/users/", &StoreKey::new("u1"), json!({}))
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        store.set_fail_writes(false);
        assert!(store.append("/messages/", json!({})).is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_trees() {
        let store = MemoryStore::new();
        let other = store.clone();

        let mut sub = store.subscribe_append("/users/");
        other.append("/users/", json!({"uid": "u1"})).unwrap();

        match sub.recv().await {
            Some(AppendEvent::Added(record)) => assert_eq!(record.value["uid"], "u1"),
            _ => panic!("clone's append not visible"),
        }
    }
}
