#![cfg(feature = "memory-store")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Room adapter tests against the in-memory store with a manual clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bloomcraft_client::protocol::{PlantKind, PlayerId, PlayerRecord, PlayerUpdate, RoomId, Stage};
use bloomcraft_client::rooms::RoomStoreAdapter;
use bloomcraft_client::store::{DocumentStore, StorePath};
use bloomcraft_client::{BloomcraftError, ManualClock, MemoryStore, StoreErrorKind};
use common::{init_tracing, player_json, room_json, GUEST_ID, HOST_ID};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const NOW: u64 = 1_700_000_000_000;

fn adapter() -> (RoomStoreAdapter, MemoryStore, ManualClock) {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let adapter = RoomStoreAdapter::new(Arc::new(store.clone()), Arc::new(clock.clone()));
    (adapter, store, clock)
}

fn room_id() -> RoomId {
    RoomId::new("room_abc123")
}

#[tokio::test]
async fn create_writes_host_only_room() {
    let (adapter, store, _clock) = adapter();
    let host = PlayerRecord::new("Hana", PlantKind::Rose).with_joined_at(NOW);
    let room = assert_ok!(adapter.create_room(&room_id(), &PlayerId::new(HOST_ID), host).await);

    assert_eq!(room.created_at, NOW);
    assert!(!room.game_started);
    let stored = store.peek(&StorePath::room(&room_id())).unwrap();
    assert_eq!(stored["createdAt"], NOW);
    assert_eq!(stored[HOST_ID]["playerName"], "Hana");
    assert_eq!(stored[HOST_ID]["joinedAt"], NOW);
    assert!(stored.get("startedAt").is_none());
}

#[tokio::test]
async fn create_overwrites_an_existing_room() {
    let (adapter, store, _clock) = adapter();
    let path = StorePath::room(&room_id());
    store
        .set(
            &path,
            room_json(&[(GUEST_ID, player_json("Gil", 4, None))], Some(5)),
        )
        .await
        .unwrap();

    let host = PlayerRecord::new("Hana", PlantKind::Lotus);
    assert_ok!(adapter.create_room(&room_id(), &PlayerId::new(HOST_ID), host).await);

    let stored = store.peek(&path).unwrap();
    assert!(stored.get(GUEST_ID).is_none());
    assert_eq!(stored["gameStarted"], false);
}

#[tokio::test]
async fn room_exists_reflects_the_store() {
    let (adapter, _store, _clock) = adapter();
    assert!(!adapter.room_exists(&room_id()).await.unwrap());
    adapter
        .create_room(
            &room_id(),
            &PlayerId::new(HOST_ID),
            PlayerRecord::new("Hana", PlantKind::Lotus),
        )
        .await
        .unwrap();
    assert!(adapter.room_exists(&room_id()).await.unwrap());
}

#[tokio::test]
async fn update_merges_into_one_record_only() {
    let (adapter, store, _clock) = adapter();
    adapter
        .create_room(
            &room_id(),
            &PlayerId::new(HOST_ID),
            PlayerRecord::new("Hana", PlantKind::Lotus),
        )
        .await
        .unwrap();

    let update = PlayerUpdate::new()
        .with_stage(Stage::new(3).unwrap())
        .with_completed_at(None);
    assert_ok!(
        adapter
            .update_player(&room_id(), &PlayerId::new(HOST_ID), &update)
            .await
    );

    let stored = store.peek(&StorePath::room(&room_id())).unwrap();
    assert_eq!(stored[HOST_ID]["currentStage"], 3);
    assert_eq!(stored[HOST_ID]["playerName"], "Hana");
    assert_eq!(stored[HOST_ID]["selectedPlant"], "lotus");
    assert!(stored[HOST_ID].get("completedAt").is_none());
}

#[tokio::test]
async fn mark_started_stamps_now_plus_sync_buffer() {
    let (adapter, store, clock) = adapter();
    adapter
        .create_room(
            &room_id(),
            &PlayerId::new(HOST_ID),
            PlayerRecord::new("Hana", PlantKind::Lotus),
        )
        .await
        .unwrap();
    clock.advance(Duration::from_millis(750));

    let started_at = assert_ok!(adapter.mark_started(&room_id()).await);
    assert_eq!(started_at, NOW + 750 + 2_000);

    let stored = store.peek(&StorePath::room(&room_id())).unwrap();
    assert_eq!(stored["gameStarted"], true);
    assert_eq!(stored["startedAt"], started_at);
    assert_eq!(stored[HOST_ID]["playerName"], "Hana");
}

#[tokio::test]
async fn custom_sync_buffer_is_used() {
    let (adapter, _store, _clock) = adapter();
    let adapter = adapter.with_sync_buffer(Duration::from_millis(300));
    let started_at = adapter.mark_started(&room_id()).await.unwrap();
    assert_eq!(started_at, NOW + 300);
}

#[tokio::test]
async fn subscription_skips_absent_and_malformed_snapshots() {
    let (adapter, store, _clock) = adapter();
    let path = StorePath::room(&room_id());
    let mut watch = adapter.subscribe(&room_id()).await.unwrap();
    assert_eq!(watch.room_id(), &room_id());

    // Absent first, then garbage, then a real room.
    store.set(&path, json!({ "createdAt": "soon" })).await.unwrap();
    store.set(&path, json!(42)).await.unwrap();
    store
        .set(
            &path,
            room_json(&[(HOST_ID, player_json("Hana", 2, None))], None),
        )
        .await
        .unwrap();

    let room = watch.next_snapshot().await.unwrap();
    assert_eq!(room.player(&PlayerId::new(HOST_ID)).unwrap().current_stage.get(), 2);

    watch.cancel();
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn store_errors_propagate() {
    let (adapter, store, _clock) = adapter();
    store.fail_next(StoreErrorKind::PermissionDenied);
    let err = assert_err!(adapter.room_exists(&room_id()).await);
    assert!(matches!(
        err,
        BloomcraftError::Store {
            kind: StoreErrorKind::PermissionDenied,
            ..
        }
    ));

    store.set_offline(Some(StoreErrorKind::Unavailable));
    assert_err!(adapter.mark_started(&room_id()).await);
    assert_err!(adapter.subscribe(&room_id()).await);
    assert_err!(
        adapter
            .update_player(
                &room_id(),
                &PlayerId::new(HOST_ID),
                &PlayerUpdate::new().with_ready_for_restart(true)
            )
            .await
    );

    // Empty updates never reach the store.
    assert_ok!(
        adapter
            .update_player(&room_id(), &PlayerId::new(HOST_ID), &PlayerUpdate::new())
            .await
    );
}
