#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for room documents and partial player updates.
//!
//! Fixtures use the flat document shape a shared store delivers: room
//! metadata and player-id keys side by side, with nulls and empty arrays
//! already stripped.

mod common;

use std::collections::BTreeSet;

use bloomcraft_client::error_codes::StoreErrorKind;
use bloomcraft_client::protocol::{
    Element, PlantKind, PlayerId, PlayerRecord, PlayerUpdate, RoomDocument, RoomId, Stage,
};
use bloomcraft_client::BloomcraftError;
use common::{player_json, ready, room_json, GUEST_ID, HOST_ID};
use serde_json::json;

// ════════════════════════════════════════════════════════════════════
// RoomDocument
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_with_two_players_parses() {
    let value = room_json(
        &[
            (HOST_ID, player_json("Hana", 3, None)),
            (GUEST_ID, player_json("Gil", 6, Some(1_700_000_000_500))),
        ],
        Some(1_700_000_002_000),
    );
    let room = RoomDocument::from_value(value).unwrap();

    assert!(room.game_started);
    assert_eq!(room.started_at, Some(1_700_000_002_000));
    assert_eq!(room.player_count(), 2);

    let host = room.player(&PlayerId::new(HOST_ID)).unwrap();
    assert_eq!(host.player_name, "Hana");
    assert_eq!(host.current_stage.get(), 3);
    assert!(host.collected_elements.is_empty());
    assert!(!host.is_done());

    let (opponent, record) = room.opponent_of(&PlayerId::new(HOST_ID)).unwrap();
    assert_eq!(opponent, &PlayerId::new(GUEST_ID));
    assert!(record.is_done());
}

#[test]
fn missing_optional_fields_take_defaults() {
    let value = json!({
        "createdAt": 5,
        "gameStarted": false,
        HOST_ID: { "playerName": "Hana", "currentStage": 1 },
    });
    let room = RoomDocument::from_value(value).unwrap();
    let host = room.player(&PlayerId::new(HOST_ID)).unwrap();

    assert_eq!(room.started_at, None);
    assert_eq!(host.selected_plant, PlantKind::Lotus);
    assert_eq!(host.completed_at, None);
    assert!(!host.ready_for_restart);
    assert_eq!(host.joined_at, None);
}

#[test]
fn stale_restart_flag_is_preserved() {
    let value = room_json(&[(HOST_ID, ready(player_json("Hana", 1, None)))], Some(10));
    let room = RoomDocument::from_value(value).unwrap();
    assert!(room.player(&PlayerId::new(HOST_ID)).unwrap().ready_for_restart);
}

#[test]
fn collected_elements_parse_as_a_set() {
    let value = json!({
        "createdAt": 5,
        "gameStarted": true,
        "startedAt": 9,
        HOST_ID: {
            "playerName": "Hana",
            "currentStage": 2,
            "collectedElements": ["water", "sun", "water"],
        },
    });
    let room = RoomDocument::from_value(value).unwrap();
    let collected = &room.player(&PlayerId::new(HOST_ID)).unwrap().collected_elements;
    assert_eq!(
        collected.iter().copied().collect::<Vec<_>>(),
        vec![Element::Sun, Element::Water]
    );
}

#[test]
fn malformed_rooms_are_rejected() {
    let cases = [
        json!(null),
        json!(true),
        json!(17),
        json!("room_abc123"),
        json!([]),
        json!({}),
        // Missing metadata.
        json!({ HOST_ID: { "playerName": "Hana", "currentStage": 1 } }),
        // Player record missing its stage.
        json!({ "createdAt": 1, "gameStarted": false, HOST_ID: { "playerName": "Hana" } }),
        // Stage out of range.
        json!({ "createdAt": 1, "gameStarted": false, HOST_ID: { "playerName": "Hana", "currentStage": 0 } }),
        json!({ "createdAt": 1, "gameStarted": false, HOST_ID: { "playerName": "Hana", "currentStage": 7 } }),
        // Unknown plant and element kinds.
        json!({ "createdAt": 1, "gameStarted": false, HOST_ID: { "playerName": "Hana", "currentStage": 1, "selectedPlant": "cactus" } }),
        json!({ "createdAt": 1, "gameStarted": false, HOST_ID: { "playerName": "Hana", "currentStage": 1, "collectedElements": ["fire"] } }),
        // A stray key that is not a player record.
        json!({ "createdAt": 1, "gameStarted": false, "note": "hello" }),
    ];
    for value in cases {
        let err = RoomDocument::from_value(value.clone()).unwrap_err();
        assert!(
            matches!(err, BloomcraftError::MalformedSnapshot(_)),
            "{value} gave {err:?}"
        );
    }
}

#[test]
fn room_serializes_flat() {
    let host = PlayerRecord::new("Hana", PlantKind::Sunflower).with_joined_at(7);
    let room = RoomDocument::new(3, PlayerId::new(HOST_ID), host);
    let value = room.to_value().unwrap();

    assert_eq!(value["createdAt"], 3);
    assert_eq!(value["gameStarted"], false);
    assert!(value.get("players").is_none());
    assert_eq!(value[HOST_ID]["selectedPlant"], "sunflower");
    assert_eq!(value[HOST_ID]["joinedAt"], 7);
    assert!(value[HOST_ID].get("readyForRestart").is_none());

    assert_eq!(RoomDocument::from_value(value).unwrap(), room);
}

// ════════════════════════════════════════════════════════════════════
// PlayerUpdate
// ════════════════════════════════════════════════════════════════════

#[test]
fn empty_update_writes_nothing() {
    let update = PlayerUpdate::new();
    assert!(update.is_empty());
    assert!(update.to_fields().unwrap().is_empty());
}

#[test]
fn only_set_fields_are_written() {
    let fields = PlayerUpdate::new()
        .with_stage(Stage::new(4).unwrap())
        .with_plant(PlantKind::Rose)
        .to_fields()
        .unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["currentStage"], 4);
    assert_eq!(fields["selectedPlant"], "rose");
}

#[test]
fn clearing_completion_writes_null() {
    let fields = PlayerUpdate::new().with_completed_at(None).to_fields().unwrap();
    assert_eq!(fields.get("completedAt"), Some(&serde_json::Value::Null));

    let fields = PlayerUpdate::new()
        .with_completed_at(Some(99))
        .to_fields()
        .unwrap();
    assert_eq!(fields["completedAt"], 99);
}

#[test]
fn round_reset_clears_progress_and_restart_flag() {
    let fields = PlayerUpdate::round_reset().to_fields().unwrap();
    assert_eq!(fields["currentStage"], 1);
    assert_eq!(fields["collectedElements"], json!([]));
    assert_eq!(fields["completedAt"], serde_json::Value::Null);
    assert_eq!(fields["readyForRestart"], false);
    assert!(fields.get("playerName").is_none());
    assert!(fields.get("selectedPlant").is_none());
}

#[test]
fn update_from_record_carries_every_field() {
    let mut record = PlayerRecord::new("Gil", PlantKind::Rose).with_joined_at(11);
    record.collected_elements = BTreeSet::from([Element::Soil]);
    let fields = PlayerUpdate::from(&record).to_fields().unwrap();

    assert_eq!(fields["playerName"], "Gil");
    assert_eq!(fields["selectedPlant"], "rose");
    assert_eq!(fields["currentStage"], 1);
    assert_eq!(fields["collectedElements"], json!(["soil"]));
    assert_eq!(fields["joinedAt"], 11);
}

// ════════════════════════════════════════════════════════════════════
// Identifiers and enums
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_codes_are_normalised() {
    assert_eq!(RoomId::from_code("abc123"), Some(RoomId::new("room_abc123")));
    assert_eq!(RoomId::from_code("  room_abc123 "), Some(RoomId::new("room_abc123")));
    assert_eq!(RoomId::from_code(""), None);
    assert_eq!(RoomId::from_code("   "), None);
}

#[test]
fn generated_room_ids_have_six_base36_chars() {
    let id = RoomId::generate();
    let suffix = id.as_str().strip_prefix("room_").unwrap();
    assert_eq!(suffix.len(), 6);
    assert!(suffix
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
}

#[test]
fn stage_bounds() {
    assert_eq!(Stage::new(0), None);
    assert_eq!(Stage::new(7), None);
    assert_eq!(Stage::FIRST.get(), 1);
    assert!(Stage::FINAL.is_final());
    assert_eq!(Stage::FINAL.next(), Stage::FINAL);
    assert_eq!(Stage::new(5).unwrap().next(), Stage::FINAL);
    assert!(serde_json::from_value::<Stage>(json!(9)).is_err());
}

#[test]
fn enums_use_lowercase_names() {
    assert_eq!(serde_json::to_value(PlantKind::Sunflower).unwrap(), "sunflower");
    assert_eq!(serde_json::to_value(Element::Food).unwrap(), "food");
    assert_eq!(
        serde_json::to_value(StoreErrorKind::PermissionDenied).unwrap(),
        "PERMISSION_DENIED"
    );
}
