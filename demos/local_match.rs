//! # Local Match Example
//!
//! Plays a complete BloomCraft round between two in-process clients that
//! share one [`MemoryStore`]:
//!
//! 1. The host creates a room and the guest joins it by code
//! 2. The host starts the game once the guest shows up
//! 3. Both count down, then race to grow their plant to stage 6
//! 4. The winner is revealed, both ask for a rematch, and a second round
//!    starts before the clients shut down
//!
//! ## Running
//!
//! ```sh
//! cargo run --example local_match
//!
//! # Watch every store write and reconciler transition:
//! RUST_LOG=bloomcraft_client=debug cargo run --example local_match
//! ```

use std::time::Duration;

use bloomcraft_client::identity::{get_or_create_local_id, MemoryIdentityStorage};
use bloomcraft_client::{Element, GameClient, GameConfig, GameEvent, MemoryStore, PlantKind, Side};
use tokio::sync::mpsc;

/// Shortened delays so the demo finishes in a few seconds.
fn demo_config(name: &str, plant: PlantKind) -> GameConfig {
    GameConfig::new(name)
        .with_plant(plant)
        .with_sync_buffer(Duration::from_millis(300))
        .with_countdown_tick(Duration::from_millis(200))
        .with_winner_reveal_delay(Duration::from_millis(500))
        .with_restart_delay(Duration::from_millis(200))
}

/// Collect elements at `pace` until the round is decided.
async fn grow(client: &GameClient, events: &mut mpsc::Receiver<GameEvent>, pace: Duration) {
    let mut ticker = tokio::time::interval(pace);
    let mut next = Element::REQUIRED.iter().copied().cycle();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(element) = next.next() {
                    if let Err(e) = client.collect(element) {
                        tracing::warn!("collect failed: {e}");
                        return;
                    }
                }
            }
            event = events.recv() => match event {
                Some(GameEvent::WinnerDecided { winner, player }) => {
                    let who = if winner == Side::Me { "I" } else { "my opponent" };
                    tracing::info!("{}: {who} won ({player})", client.player_id());
                    return;
                }
                Some(GameEvent::StageChanged { side: Side::Me, stage, plant }) => {
                    tracing::info!("{}: {plant:?} reached stage {stage}", client.player_id());
                }
                Some(GameEvent::SessionClosed { .. }) | None => return,
                Some(_) => {}
            }
        }
    }
}

/// Skip events until `pred` matches. `false` if the session ended first.
async fn wait_for(
    events: &mut mpsc::Receiver<GameEvent>,
    pred: impl Fn(&GameEvent) -> bool,
) -> Option<GameEvent> {
    while let Some(event) = events.recv().await {
        if pred(&event) {
            return Some(event);
        }
        if matches!(event, GameEvent::SessionClosed { .. }) {
            return None;
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Two players, one store ──────────────────────────────────────
    // Each device keeps its own identity storage.
    let host_id = get_or_create_local_id(&MemoryIdentityStorage::new());
    let guest_id = get_or_create_local_id(&MemoryIdentityStorage::new());
    let store = MemoryStore::new();
    let (mut host, mut host_events) = GameClient::start(
        store.clone(),
        host_id,
        demo_config("Hana", PlantKind::Sunflower),
    );
    let (mut guest, mut guest_events) = GameClient::start(
        store,
        guest_id,
        demo_config("Gil", PlantKind::Rose),
    );

    // ── Lobby ───────────────────────────────────────────────────────
    host.create_room()?;
    let Some(GameEvent::RoomCreated { room_id }) =
        wait_for(&mut host_events, |e| matches!(e, GameEvent::RoomCreated { .. })).await
    else {
        return Err("host never created a room".into());
    };
    tracing::info!("room code: {room_id}");

    guest.join_room(room_id.as_str())?;
    wait_for(&mut host_events, |e| matches!(e, GameEvent::StartEnabled { .. }))
        .await
        .ok_or("guest never arrived")?;
    host.start_game()?;

    // ── Two rounds ──────────────────────────────────────────────────
    for round in 1..=2 {
        for events in [&mut host_events, &mut guest_events] {
            wait_for(events, |e| matches!(e, GameEvent::CountdownDismissed))
                .await
                .ok_or("session ended before the countdown finished")?;
        }
        tracing::info!("round {round}: grow!");

        tokio::join!(
            grow(&host, &mut host_events, Duration::from_millis(20)),
            grow(&guest, &mut guest_events, Duration::from_millis(25)),
        );

        if round == 2 {
            break;
        }
        for (client, events) in [(&host, &mut host_events), (&guest, &mut guest_events)] {
            wait_for(events, |e| matches!(e, GameEvent::WinnerRevealed { .. }))
                .await
                .ok_or("session ended before the banner")?;
            client.request_restart()?;
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    host.shutdown().await;
    guest.shutdown().await;
    tracing::info!("Done.");
    Ok(())
}
