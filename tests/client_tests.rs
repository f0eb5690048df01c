#![cfg(feature = "memory-store")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end session tests: two [`GameClient`]s sharing one in-memory
//! store, driven on a paused tokio clock so every delay is deterministic.

mod common;

use std::time::Duration;

use bloomcraft_client::store::StorePath;
use bloomcraft_client::{
    CountdownTick, GameClient, GameConfig, GameEvent, ManualClock, MemoryStore, Phase, PlantKind,
    PlayerId, RoomId, Side, Stage, StoreErrorKind, UserAction,
};
use common::{collect_full_set, drain, init_tracing, wait_for, GUEST_ID, HOST_ID};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

const T0: u64 = 1_700_000_000_000;

struct Match {
    store: MemoryStore,
    room_id: RoomId,
    host: GameClient,
    host_events: mpsc::Receiver<GameEvent>,
    guest: GameClient,
    guest_events: mpsc::Receiver<GameEvent>,
}

fn config(name: &str, clock: &ManualClock) -> GameConfig {
    GameConfig::new(name).with_clock(clock.clone())
}

/// Host creates a room, guest joins it by bare code.
async fn lobby(clock: &ManualClock) -> Match {
    init_tracing();
    let store = MemoryStore::new();
    let (host, mut host_events) =
        GameClient::start(store.clone(), PlayerId::new(HOST_ID), config("Hana", clock));
    let (guest, mut guest_events) = GameClient::start(
        store.clone(),
        PlayerId::new(GUEST_ID),
        config("Gil", clock).with_plant(PlantKind::Rose),
    );

    assert_ok!(host.create_room());
    let (created, _) = wait_for(&mut host_events, |e| {
        matches!(e, GameEvent::RoomCreated { .. })
    })
    .await;
    let GameEvent::RoomCreated { room_id } = created else {
        unreachable!()
    };

    let code = room_id.as_str().trim_start_matches(RoomId::PREFIX).to_string();
    assert_ok!(guest.join_room(&code));
    let (joined, _) = wait_for(&mut guest_events, |e| {
        matches!(e, GameEvent::RoomJoined { .. })
    })
    .await;
    assert_eq!(
        joined,
        GameEvent::RoomJoined {
            room_id: room_id.clone()
        }
    );

    Match {
        store,
        room_id,
        host,
        host_events,
        guest,
        guest_events,
    }
}

/// From the lobby to both sides playing.
async fn play(m: &mut Match) {
    wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StartEnabled { .. })
    })
    .await;
    assert_ok!(m.host.start_game());
    for events in [&mut m.host_events, &mut m.guest_events] {
        wait_for(events, |e| matches!(e, GameEvent::GameEntered)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn host_lobby_reports_waiting_then_start_enabled() {
    let clock = ManualClock::new(T0);
    let mut m = lobby(&clock).await;

    let (enabled, skipped) = wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StartEnabled { .. })
    })
    .await;
    assert!(skipped.contains(&GameEvent::WaitingForOpponent { player_count: 1 }));
    assert_eq!(
        enabled,
        GameEvent::StartEnabled {
            opponent: PlayerId::new(GUEST_ID),
            opponent_name: "Gil".into(),
        }
    );
    assert_eq!(m.host.current_phase().await, Some(Phase::LobbyReady));

    // The joiner only learns its opponent's name.
    let (seen, _) = wait_for(&mut m.guest_events, |e| {
        matches!(e, GameEvent::OpponentUpdated { .. })
    })
    .await;
    assert_eq!(
        seen,
        GameEvent::OpponentUpdated {
            opponent: PlayerId::new(HOST_ID),
            name: "Hana".into(),
        }
    );
    assert_eq!(m.guest.current_phase().await, Some(Phase::LobbyWaiting));

    m.host.shutdown().await;
    m.guest.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_stamps_buffered_time_and_both_sides_count_down() {
    let clock = ManualClock::new(T0);
    let mut m = lobby(&clock).await;
    wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StartEnabled { .. })
    })
    .await;
    assert_ok!(m.host.start_game());

    for events in [&mut m.host_events, &mut m.guest_events] {
        let (scheduled, _) = wait_for(events, |e| {
            matches!(e, GameEvent::GameScheduled { .. })
        })
        .await;
        // startedAt = now + 2 s, entered 2 s after that.
        assert_eq!(
            scheduled,
            GameEvent::GameScheduled {
                starts_in: Duration::from_secs(4)
            }
        );
    }
    let room = m.store.peek(&StorePath::room(&m.room_id)).unwrap();
    assert_eq!(room["gameStarted"], true);
    assert_eq!(room["startedAt"], T0 + 2_000);

    let mut ticks = Vec::new();
    loop {
        match common::next_event(&mut m.guest_events).await {
            GameEvent::Countdown(tick) => ticks.push(tick),
            GameEvent::CountdownDismissed => break,
            _ => {}
        }
    }
    assert_eq!(
        ticks,
        vec![
            CountdownTick::Three,
            CountdownTick::Two,
            CountdownTick::One,
            CountdownTick::Grow
        ]
    );
    assert_eq!(m.guest.current_phase().await, Some(Phase::Playing));

    m.host.shutdown().await;
    m.guest.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn collecting_before_play_is_ignored() {
    let clock = ManualClock::new(T0);
    let mut m = lobby(&clock).await;

    collect_full_set(&m.guest);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = m
        .store
        .peek(&StorePath::player(&m.room_id, &PlayerId::new(GUEST_ID)))
        .unwrap();
    assert_eq!(record["currentStage"], 1);
    assert!(!drain(&mut m.guest_events)
        .iter()
        .any(|e| matches!(e, GameEvent::ProgressUpdated { .. })));

    m.host.shutdown().await;
    m.guest.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn full_match_through_rematch() {
    let clock = ManualClock::new(T0);
    let mut m = lobby(&clock).await;
    play(&mut m).await;

    // Host grows to stage 6; guest watches.
    for _ in 0..5 {
        collect_full_set(&m.host);
    }
    let (progress, _) = wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::ProgressUpdated { stage, .. } if stage.is_final())
    })
    .await;
    assert!(matches!(progress, GameEvent::ProgressUpdated { collected, .. } if collected.is_empty()));

    let (decided, skipped) = wait_for(&mut m.guest_events, |e| {
        matches!(e, GameEvent::WinnerDecided { .. })
    })
    .await;
    assert_eq!(
        decided,
        GameEvent::WinnerDecided {
            winner: Side::Opponent,
            player: PlayerId::new(HOST_ID),
        }
    );
    let opponent_stages: Vec<u8> = skipped
        .iter()
        .filter_map(|e| match e {
            GameEvent::StageChanged {
                side: Side::Opponent,
                stage,
                ..
            } => Some(stage.get()),
            _ => None,
        })
        .collect();
    assert_eq!(opponent_stages, vec![2, 3, 4, 5, 6]);

    let (decided, _) = wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::WinnerDecided { .. })
    })
    .await;
    assert!(matches!(decided, GameEvent::WinnerDecided { winner: Side::Me, .. }));

    let host_record = m
        .store
        .peek(&StorePath::player(&m.room_id, &PlayerId::new(HOST_ID)))
        .unwrap();
    assert_eq!(host_record["currentStage"], 6);
    assert_eq!(host_record["completedAt"], T0);

    // Banner, then both ask for a rematch.
    for (client, events) in [(&m.host, &mut m.host_events), (&m.guest, &mut m.guest_events)] {
        wait_for(events, |e| matches!(e, GameEvent::WinnerRevealed { .. })).await;
        assert_ok!(client.request_restart());
        wait_for(events, |e| matches!(e, GameEvent::RestartRequested)).await;
    }

    for events in [&mut m.host_events, &mut m.guest_events] {
        let (reset, _) = wait_for(events, |e| matches!(e, GameEvent::RoundReset { .. })).await;
        assert!(matches!(reset, GameEvent::RoundReset { .. }));
        let (_, skipped) = wait_for(events, |e| matches!(e, GameEvent::GameEntered)).await;
        assert!(!skipped
            .iter()
            .any(|e| matches!(e, GameEvent::WinnerDecided { .. })));
    }
    assert_eq!(m.host.current_phase().await, Some(Phase::Playing));

    let host_record = m
        .store
        .peek(&StorePath::player(&m.room_id, &PlayerId::new(HOST_ID)))
        .unwrap();
    assert_eq!(host_record["currentStage"], 1);
    assert!(host_record.get("completedAt").is_none());
    assert_eq!(host_record["readyForRestart"], false);

    // The new round plays normally.
    collect_full_set(&m.guest);
    let (progress, _) = wait_for(&mut m.guest_events, |e| {
        matches!(e, GameEvent::ProgressUpdated { .. })
    })
    .await;
    assert!(matches!(progress, GameEvent::ProgressUpdated { stage, .. } if stage == Stage::new(1).unwrap()));
    let (changed, _) = wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StageChanged { side: Side::Opponent, .. })
    })
    .await;
    assert_eq!(
        changed,
        GameEvent::StageChanged {
            side: Side::Opponent,
            stage: Stage::new(2).unwrap(),
            plant: PlantKind::Rose,
        }
    );

    m.host.shutdown().await;
    m.guest.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn selecting_a_plant_mid_game_resets_and_rerenders() {
    let clock = ManualClock::new(T0);
    let mut m = lobby(&clock).await;
    play(&mut m).await;

    collect_full_set(&m.guest);
    wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StageChanged { side: Side::Opponent, .. })
    })
    .await;

    assert_ok!(m.guest.select_plant(PlantKind::Sunflower));
    let (changed, _) = wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StageChanged { side: Side::Opponent, .. })
    })
    .await;
    assert_eq!(
        changed,
        GameEvent::StageChanged {
            side: Side::Opponent,
            stage: Stage::FIRST,
            plant: PlantKind::Sunflower,
        }
    );

    m.host.shutdown().await;
    m.guest.shutdown().await;
}

#[tokio::test]
async fn create_fails_while_store_is_offline() {
    init_tracing();
    let store = MemoryStore::new();
    store.set_offline(Some(StoreErrorKind::Network));
    let (mut client, mut events) =
        GameClient::start(store.clone(), PlayerId::new(HOST_ID), GameConfig::new("Hana"));

    assert_ok!(client.create_room());
    let (failed, _) = wait_for(&mut events, |e| matches!(e, GameEvent::ActionFailed { .. })).await;
    assert!(matches!(
        failed,
        GameEvent::ActionFailed {
            action: UserAction::CreateRoom,
            ..
        }
    ));
    assert!(client.current_room_id().await.is_none());

    // Recovery is a fresh attempt.
    store.set_offline(None);
    assert_ok!(client.create_room());
    wait_for(&mut events, |e| matches!(e, GameEvent::RoomCreated { .. })).await;
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_start_is_reported_and_can_be_retried() {
    let clock = ManualClock::new(T0);
    let mut m = lobby(&clock).await;
    wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::StartEnabled { .. })
    })
    .await;

    m.store.fail_next(StoreErrorKind::Unavailable);
    assert_ok!(m.host.start_game());
    let (failed, _) = wait_for(&mut m.host_events, |e| {
        matches!(e, GameEvent::ActionFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        GameEvent::ActionFailed {
            action: UserAction::StartGame,
            ..
        }
    ));
    assert_eq!(m.host.current_phase().await, Some(Phase::LobbyReady));
    let room = m.store.peek(&StorePath::room(&m.room_id)).unwrap();
    assert_eq!(room["gameStarted"], false);

    assert_ok!(m.host.start_game());
    for events in [&mut m.host_events, &mut m.guest_events] {
        wait_for(events, |e| matches!(e, GameEvent::GameEntered)).await;
    }

    m.host.shutdown().await;
    m.guest.shutdown().await;
}

#[tokio::test]
async fn joining_an_unknown_room_fails() {
    init_tracing();
    let store = MemoryStore::new();
    let (mut client, mut events) =
        GameClient::start(store.clone(), PlayerId::new(GUEST_ID), GameConfig::new("Gil"));

    assert_ok!(client.join_room("nope42"));
    let (failed, _) = wait_for(&mut events, |e| matches!(e, GameEvent::ActionFailed { .. })).await;
    match failed {
        GameEvent::ActionFailed { action, message } => {
            assert_eq!(action, UserAction::JoinRoom);
            assert!(message.contains("not found"), "{message}");
        }
        _ => unreachable!(),
    }
    assert!(store.peek(&StorePath::new(["rooms"])).is_none());
    assert_err!(client.start_game());
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_the_room_subscription() {
    init_tracing();
    let store = MemoryStore::new();
    let (mut client, mut events) =
        GameClient::start(store.clone(), PlayerId::new(HOST_ID), GameConfig::new("Hana"));
    assert_ok!(client.create_room());
    wait_for(&mut events, |e| matches!(e, GameEvent::RoomCreated { .. })).await;
    assert_eq!(store.subscriber_count(), 1);

    client.shutdown().await;
    assert_eq!(store.subscriber_count(), 0);
    let (closed, _) = wait_for(&mut events, |e| {
        matches!(e, GameEvent::SessionClosed { .. })
    })
    .await;
    assert_eq!(
        closed,
        GameEvent::SessionClosed {
            reason: Some("client shut down".into())
        }
    );
    assert!(!client.is_running());
}
