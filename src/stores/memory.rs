//! In-process document store.
//!
//! [`MemoryStore`] keeps the whole document tree behind a mutex and fans
//! each change out to subscribers over unbounded channels. Clones share the
//! same tree, so two game clients handed clones of one store see each
//! other's writes exactly as they would through a hosted realtime database.
//!
//! Semantics follow the usual realtime-database conventions:
//!
//! - writing `null` removes a key, and empty objects/arrays are never stored
//! - merges create missing parents and touch only the named children
//! - a new subscriber is sent the current value (or `null`) immediately
//!
//! Failures can be injected with [`MemoryStore::set_offline`] and
//! [`MemoryStore::fail_next`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{BloomcraftError, Result};
use crate::error_codes::StoreErrorKind;
use crate::store::{DocumentStore, StorePath, Subscription};

struct Watcher {
    id: u64,
    path: StorePath,
    tx: mpsc::UnboundedSender<Value>,
}

struct Inner {
    root: Value,
    watchers: Vec<Watcher>,
    next_watcher_id: u64,
    offline: Option<StoreErrorKind>,
    scripted_failures: VecDeque<StoreErrorKind>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
            watchers: Vec::new(),
            next_watcher_id: 0,
            offline: None,
            scripted_failures: VecDeque::new(),
        }
    }
}

impl Inner {
    fn check_available(&mut self, op: &str, path: &StorePath) -> Result<()> {
        if let Some(kind) = self.scripted_failures.pop_front() {
            debug!(%path, "memory store: scripted {op} failure");
            return Err(BloomcraftError::store(kind, format!("{op} {path} failed")));
        }
        if let Some(kind) = self.offline {
            return Err(BloomcraftError::store(kind, format!("{op} {path}: store offline")));
        }
        Ok(())
    }

    fn value_at(&self, path: &StorePath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    fn write_at(&mut self, path: &StorePath, value: Value) {
        let Some((last, parents)) = path.segments().split_last() else {
            self.root = if value.is_object() {
                value
            } else {
                Value::Object(Map::new())
            };
            return;
        };
        let mut node = &mut self.root;
        for segment in parents {
            if value.is_null() && node.get(segment).is_none() {
                return;
            }
            let Some(map) = node.as_object_mut() else {
                return;
            };
            let child = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = child;
        }
        let Some(map) = node.as_object_mut() else {
            return;
        };
        if value.is_null() {
            map.remove(last);
        } else {
            map.insert(last.clone(), value);
        }
    }

    fn notify(&mut self, changed: &StorePath) {
        let mut deliveries = Vec::new();
        for watcher in &self.watchers {
            if watcher.path.is_prefix_of(changed) || changed.is_prefix_of(&watcher.path) {
                let value = self.value_at(&watcher.path).cloned().unwrap_or(Value::Null);
                deliveries.push((watcher.id, value));
            }
        }
        let mut closed = Vec::new();
        for (id, value) in deliveries {
            if let Some(watcher) = self.watchers.iter().find(|w| w.id == id) {
                if watcher.tx.send(value).is_err() {
                    closed.push(id);
                }
            }
        }
        self.watchers.retain(|w| !closed.contains(&w.id));
    }
}

/// Drop nulls and empty containers. Returns `true` if `value` itself is now
/// empty and should be removed by its parent.
fn prune(value: &mut Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => {
            map.retain(|_, child| !prune(child));
            map.is_empty()
        }
        Value::Array(items) => {
            items.retain_mut(|item| !prune(item));
            items.is_empty()
        }
        _ => false,
    }
}

/// A shared, in-process document store. See the [module docs](self).
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every operation fail with `kind` until cleared with `None`.
    pub fn set_offline(&self, kind: Option<StoreErrorKind>) {
        self.lock().offline = kind;
    }

    /// Make the next operation (of any kind) fail with `kind`.
    pub fn fail_next(&self, kind: StoreErrorKind) {
        self.lock().scripted_failures.push_back(kind);
    }

    /// Read a value synchronously, bypassing failure injection.
    pub fn peek(&self, path: &StorePath) -> Option<Value> {
        self.lock().value_at(path).cloned()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|w| !w.tx.is_closed());
        inner.watchers.len()
    }

    fn apply_write(&self, op: &str, path: &StorePath, write: impl FnOnce(&mut Inner)) -> Result<()> {
        let mut inner = self.lock();
        inner.check_available(op, path)?;
        write(&mut *inner);
        prune(&mut inner.root);
        trace!(%path, "memory store: {op}");
        inner.notify(path);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStore")
            .field("watchers", &inner.watchers.len())
            .field("offline", &inner.offline)
            .finish()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        self.apply_write("set", path, |inner| {
            let mut value = value;
            if prune(&mut value) {
                value = Value::Null;
            }
            inner.write_at(path, value);
        })
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        let mut inner = self.lock();
        inner.check_available("get", path)?;
        Ok(inner.value_at(path).cloned())
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        self.apply_write("merge", path, |inner| {
            for (key, mut value) in fields {
                if prune(&mut value) {
                    value = Value::Null;
                }
                inner.write_at(&path.child(key), value);
            }
        })
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
        let mut inner = self.lock();
        inner.check_available("subscribe", path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let current = inner.value_at(path).cloned().unwrap_or(Value::Null);
        // The receiver is alive, so the initial delivery cannot fail.
        let _ = tx.send(current);

        let id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        inner.watchers.push(Watcher {
            id,
            path: path.clone(),
            tx,
        });
        debug!(%path, id, "memory store: subscribed");

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .watchers
                    .retain(|w| w.id != id);
            }
        }))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room_path() -> StorePath {
        StorePath::new(["rooms", "room_test01"])
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryStore::new();
        store.set(&room_path(), json!({ "createdAt": 5 })).await.unwrap();
        let value = store.get(&room_path()).await.unwrap().unwrap();
        assert_eq!(value, json!({ "createdAt": 5 }));
        assert!(store.get(&room_path().child("p_x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nulls_and_empty_containers_are_not_stored() {
        let store = MemoryStore::new();
        store
            .set(
                &room_path(),
                json!({ "createdAt": 5, "startedAt": null, "p_a": { "collectedElements": [], "playerName": "A" } }),
            )
            .await
            .unwrap();
        assert_eq!(
            store.peek(&room_path()).unwrap(),
            json!({ "createdAt": 5, "p_a": { "playerName": "A" } })
        );
    }

    #[tokio::test]
    async fn merge_is_non_destructive_and_null_removes() {
        let store = MemoryStore::new();
        let player = room_path().child("p_a");
        store
            .set(&player, json!({ "playerName": "A", "currentStage": 1, "completedAt": 9 }))
            .await
            .unwrap();
        store
            .merge(&player, fields(json!({ "currentStage": 2, "completedAt": null })))
            .await
            .unwrap();
        assert_eq!(
            store.peek(&player).unwrap(),
            json!({ "playerName": "A", "currentStage": 2 })
        );
    }

    #[tokio::test]
    async fn merge_creates_missing_parents() {
        let store = MemoryStore::new();
        let player = room_path().child("p_b");
        store
            .merge(&player, fields(json!({ "playerName": "B" })))
            .await
            .unwrap();
        assert_eq!(store.peek(&room_path()).unwrap(), json!({ "p_b": { "playerName": "B" } }));
    }

    #[tokio::test]
    async fn set_replaces_existing_value() {
        let store = MemoryStore::new();
        store.set(&room_path(), json!({ "createdAt": 1, "p_a": { "playerName": "A" } })).await.unwrap();
        store.set(&room_path(), json!({ "createdAt": 2 })).await.unwrap();
        assert_eq!(store.peek(&room_path()).unwrap(), json!({ "createdAt": 2 }));
    }

    #[tokio::test]
    async fn subscriber_sees_current_value_then_changes_below_and_above() {
        let store = MemoryStore::new();
        let mut watch = store.subscribe(&room_path()).await.unwrap();
        assert_eq!(watch.recv().await.unwrap(), Value::Null);

        store.set(&room_path(), json!({ "createdAt": 1 })).await.unwrap();
        assert_eq!(watch.recv().await.unwrap(), json!({ "createdAt": 1 }));

        store
            .merge(&room_path().child("p_a"), fields(json!({ "playerName": "A" })))
            .await
            .unwrap();
        assert_eq!(
            watch.recv().await.unwrap(),
            json!({ "createdAt": 1, "p_a": { "playerName": "A" } })
        );

        store.set(&StorePath::new(["rooms"]), Value::Null).await.unwrap();
        assert_eq!(watch.recv().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn unrelated_writes_are_not_delivered() {
        let store = MemoryStore::new();
        let mut watch = store.subscribe(&room_path()).await.unwrap();
        let _ = watch.recv().await;
        store
            .set(&StorePath::new(["rooms", "room_other"]), json!({ "createdAt": 1 }))
            .await
            .unwrap();
        store.set(&room_path(), json!({ "createdAt": 2 })).await.unwrap();
        assert_eq!(watch.recv().await.unwrap(), json!({ "createdAt": 2 }));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let store = MemoryStore::new();
        let watch = store.subscribe(&room_path()).await.unwrap();
        let other = store.subscribe(&room_path()).await.unwrap();
        assert_eq!(store.subscriber_count(), 2);
        watch.cancel();
        assert_eq!(store.subscriber_count(), 1);
        drop(other);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryStore::new();
        store.fail_next(StoreErrorKind::PermissionDenied);
        let err = store.set(&room_path(), json!({ "createdAt": 1 })).await.unwrap_err();
        assert!(matches!(
            err,
            BloomcraftError::Store { kind: StoreErrorKind::PermissionDenied, .. }
        ));
        // Scripted failures are one-shot.
        store.set(&room_path(), json!({ "createdAt": 1 })).await.unwrap();

        store.set_offline(Some(StoreErrorKind::Network));
        assert!(store.get(&room_path()).await.is_err());
        assert!(store.subscribe(&room_path()).await.is_err());
        store.set_offline(None);
        assert!(store.get(&room_path()).await.unwrap().is_some());
    }
}
