#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for BloomCraft client integration tests.
//!
//! Room-document JSON builders in the flat wire shape, plus helpers for
//! waiting on session events.

use std::time::Duration;

use bloomcraft_client::{Element, GameClient, GameEvent};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

pub const HOST_ID: &str = "p_host0001_kx1";
pub const GUEST_ID: &str = "p_guest001_kx2";

/// Longest a test waits for any single event. Generous because paused-clock
/// tests auto-advance through the game's own timers first.
const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── JSON builders ───────────────────────────────────────────────────

/// A player record at `stage`, optionally completed.
pub fn player_json(name: &str, stage: u8, completed_at: Option<u64>) -> Value {
    let mut record = json!({
        "playerName": name,
        "selectedPlant": "lotus",
        "currentStage": stage,
    });
    if let Some(at) = completed_at {
        record["completedAt"] = json!(at);
    }
    record
}

/// The same record, flagged ready for a rematch.
pub fn ready(mut record: Value) -> Value {
    record["readyForRestart"] = json!(true);
    record
}

/// A room document holding `players`, started at `started_at` if given.
pub fn room_json(players: &[(&str, Value)], started_at: Option<u64>) -> Value {
    let mut room = Map::new();
    room.insert("createdAt".into(), json!(1_700_000_000_000_u64));
    room.insert("gameStarted".into(), json!(started_at.is_some()));
    if let Some(at) = started_at {
        room.insert("startedAt".into(), json!(at));
    }
    for (id, record) in players {
        room.insert((*id).to_string(), record.clone());
    }
    Value::Object(room)
}

// ── Event helpers ───────────────────────────────────────────────────

/// The next event, failing the test on timeout or a closed channel.
pub async fn next_event(events: &mut mpsc::Receiver<GameEvent>) -> GameEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`. Returns it along with every event
/// skipped on the way. Fails if the session closes first.
pub async fn wait_for(
    events: &mut mpsc::Receiver<GameEvent>,
    mut pred: impl FnMut(&GameEvent) -> bool,
) -> (GameEvent, Vec<GameEvent>) {
    let mut skipped = Vec::new();
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return (event, skipped);
        }
        if let GameEvent::SessionClosed { reason } = &event {
            panic!("session closed while waiting ({reason:?}); saw {skipped:?}");
        }
        skipped.push(event);
    }
}

/// Everything already queued on the channel, without waiting.
pub fn drain(events: &mut mpsc::Receiver<GameEvent>) -> Vec<GameEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Queue one full set of required elements.
pub fn collect_full_set(client: &GameClient) {
    for element in Element::REQUIRED {
        client.collect(element).unwrap();
    }
}
