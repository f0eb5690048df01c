//! # Custom Store Example
//!
//! Shows how to implement the [`DocumentStore`] trait for your own backend.
//! The store here keeps one JSON tree in memory and fans out snapshots to
//! watchers; a real adapter would forward the same four calls to a hosted
//! realtime database.
//!
//! The demo then plays one side of a match against a scripted opponent that
//! writes its record straight into the store, the way a second device would.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_store
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bloomcraft_client::store::{DocumentStore, StorePath, Subscription};
use bloomcraft_client::{
    BloomcraftError, Element, GameClient, GameConfig, GameEvent, PlayerId, Result, StoreErrorKind,
};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A tree of JSON values with watchers
// ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tree {
    root: Map<String, Value>,
    watchers: Vec<(StorePath, mpsc::UnboundedSender<Value>)>,
}

impl Tree {
    fn get(&self, path: &StorePath) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// The object at `path`, created on the way down.
    fn object_at(&mut self, path: &StorePath) -> Result<&mut Map<String, Value>> {
        let mut node = &mut self.root;
        for segment in path.segments() {
            let child = node
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            node = child.as_object_mut().ok_or_else(|| {
                BloomcraftError::store(StoreErrorKind::Internal, format!("{path} is not an object"))
            })?;
        }
        Ok(node)
    }

    /// Send every watcher the current value at its path.
    fn notify(&mut self) {
        let root = &self.root;
        self.watchers.retain(|(path, tx)| {
            let value = lookup(root, path).cloned().unwrap_or(Value::Null);
            tx.send(value).is_ok()
        });
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, path: &StorePath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    rest.iter()
        .try_fold(root.get(first)?, |node, segment| node.get(segment))
}

/// A cloneable handle to one shared [`Tree`].
#[derive(Clone, Default)]
struct JsonTreeStore {
    tree: Arc<Mutex<Tree>>,
}

impl JsonTreeStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the DocumentStore trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl DocumentStore for JsonTreeStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        let mut tree = self.lock();
        let Some((last, parent)) = path.segments().split_last() else {
            return Err(BloomcraftError::store(StoreErrorKind::Internal, "empty path"));
        };
        let parent = StorePath::new(parent.iter().cloned());
        tree.object_at(&parent)?.insert(last.clone(), value);
        tree.notify();
        Ok(())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        Ok(self.lock().get(path).cloned())
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        let mut tree = self.lock();
        let target = tree.object_at(path)?;
        for (key, value) in fields {
            if value.is_null() {
                target.remove(&key);
            } else {
                target.insert(key, value);
            }
        }
        tree.notify();
        Ok(())
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tree = self.lock();
        let _ = tx.send(tree.get(path).cloned().unwrap_or(Value::Null));
        tree.watchers.push((path.clone(), tx));
        // Closed receivers are pruned on the next notification.
        Ok(Subscription::new(rx, || {}))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Play against a scripted opponent
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = JsonTreeStore::default();
    let config = GameConfig::new("Hana")
        .with_sync_buffer(Duration::from_millis(200))
        .with_countdown_tick(Duration::from_millis(100))
        .with_winner_reveal_delay(Duration::from_millis(200));
    let (mut client, mut events) =
        GameClient::start(store.clone(), PlayerId::new("p_hana0001_demo"), config);
    let bot = PlayerId::new("p_bot00001_demo");

    client.create_room()?;

    while let Some(event) = events.recv().await {
        match &event {
            GameEvent::RoomCreated { room_id } => {
                tracing::info!("room {room_id} created; the bot joins");
                let record = json!({
                    "playerName": "Bot",
                    "selectedPlant": "rose",
                    "currentStage": 1,
                });
                if let Value::Object(fields) = record {
                    store.merge(&StorePath::player(room_id, &bot), fields).await?;
                }
            }
            GameEvent::StartEnabled { opponent_name, .. } => {
                tracing::info!("{opponent_name} is here, starting");
                client.start_game()?;
            }
            GameEvent::CountdownDismissed => {
                // The bot is slow; grow the whole plant at once.
                for _ in 0..5 {
                    for element in Element::REQUIRED {
                        client.collect(element)?;
                    }
                }
            }
            GameEvent::StageChanged { side, stage, .. } => {
                tracing::info!("{side:?} at stage {stage}");
            }
            GameEvent::WinnerRevealed { winner } => {
                tracing::info!("winner: {winner:?}");
                break;
            }
            GameEvent::SessionClosed { reason } => {
                tracing::info!("session closed: {reason:?}");
                break;
            }
            other => tracing::debug!("event: {other:?}"),
        }
    }

    client.shutdown().await;
    tracing::info!("Done. Custom store works!");
    Ok(())
}
