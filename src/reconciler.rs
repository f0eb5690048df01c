//! Room reconciliation state machine.
//!
//! Both clients of a room run the same [`Reconciler`]. It turns each room
//! snapshot (and each timer it asked for) into a list of [`Effect`]s and
//! performs no I/O itself, which keeps every transition unit-testable.
//!
//! ```text
//!  LobbyWaiting ──opponent named (host)──▶ LobbyReady
//!       │  ▲                                   │
//!       │  └──────opponent gone (host)─────────┘
//!       │                                      │
//!       └──────gameStarted + startedAt─────────┴──▶ CountingDown
//!                                                      │ start delay
//!                                                      ▼
//!      Restarting ◀──both ready── RoundWon ◀──done── Playing
//!          │                                            ▲
//!          └──restart delay──▶ CountingDown ──now───────┘
//! ```
//!
//! The store may coalesce or repeat snapshots, so every transition is
//! guarded: a start is scheduled once per session, a winner announced once
//! per round, and a restart only leaves `RoundWon`. The latest snapshot is
//! kept and replayed on entering play, so progress the opponent made while
//! this client was still counting down is not lost.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, trace};

use crate::event::{CountdownTick, GameEvent, Side};
use crate::protocol::{
    PlantKind, PlayerId, PlayerRecord, PlayerUpdate, RoomDocument, Stage, Timestamp,
};
use crate::rooms::{duration_ms, SYNC_BUFFER};

/// Which side of the room this client created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created the room; owns `gameStarted`/`startedAt`.
    Host,
    /// Joined an existing room.
    Joiner,
}

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// In the room, no game yet. The host waits here for a named opponent.
    LobbyWaiting,
    /// Host only: an opponent is present and the game may be started.
    LobbyReady,
    /// Start detected; waiting out the delay until `startedAt`.
    CountingDown,
    /// Round in progress. Stage changes are diffed and a winner looked for.
    Playing,
    /// Winner decided; waiting for both players to ask for a rematch.
    RoundWon,
    /// Both players agreed; the next countdown follows after a short delay.
    Restarting,
}

/// What a scheduled timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    EnterPlaying,
    Countdown(CountdownTick),
    DismissCountdown,
    RevealWinner,
    ResumeCountdown,
}

/// A timer requested by the reconciler, tagged with the round it belongs to.
/// Timers from an earlier round are ignored when they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer {
    pub kind: TimerKind,
    pub round: u32,
}

/// A side effect for the session driver to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Deliver an event to the presentation layer.
    Emit(GameEvent),
    /// Call [`Reconciler::on_timer`] with `timer` after `after`.
    Schedule { timer: Timer, after: Duration },
    /// Merge into the local player's own record.
    WriteOwnRecord(PlayerUpdate),
    /// Reset the local progress tracker to stage 1.
    ResetProgress,
}

/// Delays used by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerTimings {
    /// Added to `startedAt` before entering the game.
    pub sync_buffer: Duration,
    /// Spacing of countdown ticks.
    pub countdown_tick: Duration,
    /// Pause between deciding the winner and showing the banner.
    pub winner_reveal_delay: Duration,
    /// Pause between a restart and the next countdown.
    pub restart_delay: Duration,
}

impl Default for ReconcilerTimings {
    fn default() -> Self {
        Self {
            sync_buffer: SYNC_BUFFER,
            countdown_tick: Duration::from_secs(1),
            winner_reveal_delay: Duration::from_millis(2000),
            restart_delay: Duration::from_millis(500),
        }
    }
}

/// Last accepted state of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlayerView {
    stage: Stage,
    plant: PlantKind,
    completed_at: Option<Timestamp>,
}

impl PlayerView {
    fn fresh(plant: PlantKind) -> Self {
        Self {
            stage: Stage::FIRST,
            plant,
            completed_at: None,
        }
    }

    fn done_at(&self) -> Option<Timestamp> {
        self.completed_at.filter(|_| self.stage.is_final())
    }
}

/// Per-session room state machine. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct Reconciler {
    self_id: PlayerId,
    role: Role,
    timings: ReconcilerTimings,
    phase: Phase,
    round: u32,
    /// Start detected; never cleared within a session.
    started: bool,
    /// Winner announced for the current round.
    announced: bool,
    winner: Option<Side>,
    winner_revealed: bool,
    restart_requested: bool,
    self_ready_seen: bool,
    opponent_ready_seen: bool,
    lobby_count: Option<usize>,
    opponent: Option<(PlayerId, String)>,
    me: PlayerView,
    them: PlayerView,
    /// Most recent snapshot, replayed when play begins.
    latest: Option<RoomDocument>,
}

impl Reconciler {
    /// A reconciler in [`Phase::LobbyWaiting`] for player `self_id`.
    pub fn new(self_id: PlayerId, role: Role, plant: PlantKind) -> Self {
        Self {
            self_id,
            role,
            timings: ReconcilerTimings::default(),
            phase: Phase::LobbyWaiting,
            round: 0,
            started: false,
            announced: false,
            winner: None,
            winner_revealed: false,
            restart_requested: false,
            self_ready_seen: false,
            opponent_ready_seen: false,
            lobby_count: None,
            opponent: None,
            me: PlayerView::fresh(plant),
            them: PlayerView::fresh(PlantKind::default()),
            latest: None,
        }
    }

    /// Override the default delays.
    #[must_use]
    pub fn with_timings(mut self, timings: ReconcilerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn self_id(&self) -> &PlayerId {
        &self.self_id
    }

    /// Winner of the current round, once decided.
    pub fn winner(&self) -> Option<Side> {
        self.winner
    }

    /// Number of restarts so far.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// The opponent currently recognised, with their display name.
    pub fn opponent(&self) -> Option<(&PlayerId, &str)> {
        self.opponent.as_ref().map(|(id, name)| (id, name.as_str()))
    }

    /// Whether local element collection counts right now.
    pub fn accepts_collect(&self) -> bool {
        self.phase == Phase::Playing
    }

    /// Whether the host may start the game.
    pub fn can_start(&self) -> bool {
        self.role == Role::Host && self.phase == Phase::LobbyReady && !self.started
    }

    /// Interpret a raw store payload. Malformed payloads change nothing.
    pub fn apply_value(&mut self, value: Value, now: Timestamp) -> Vec<Effect> {
        match RoomDocument::from_value(value) {
            Ok(room) => self.apply(&room, now),
            Err(e) => {
                debug!("ignoring room payload: {e}");
                Vec::new()
            }
        }
    }

    /// Fold one room snapshot into the session.
    pub fn apply(&mut self, room: &RoomDocument, now: Timestamp) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.latest = Some(room.clone());
        self.track_opponent(room, &mut effects);

        match self.phase {
            Phase::LobbyWaiting | Phase::LobbyReady => {
                if let (true, Some(started_at), false) =
                    (room.game_started, room.started_at, self.started)
                {
                    self.schedule_start(started_at, now, &mut effects);
                } else if self.role == Role::Host {
                    self.reconcile_lobby(room, &mut effects);
                }
            }
            Phase::CountingDown | Phase::Restarting => {
                trace!(phase = ?self.phase, "snapshot held until play begins");
            }
            Phase::Playing | Phase::RoundWon => {
                if self.phase == Phase::RoundWon && self.both_ready(room) {
                    self.restart(&mut effects);
                    return effects;
                }
                self.diff_stages(room, &mut effects);
                if self.phase == Phase::Playing && !self.announced {
                    self.maybe_announce(&mut effects);
                }
            }
        }
        effects
    }

    /// Handle a timer previously requested through [`Effect::Schedule`].
    pub fn on_timer(&mut self, timer: Timer) -> Vec<Effect> {
        let mut effects = Vec::new();
        if timer.round != self.round {
            debug!(?timer, round = self.round, "dropping timer from an earlier round");
            return effects;
        }
        match timer.kind {
            TimerKind::EnterPlaying if self.phase == Phase::CountingDown => {
                self.phase = Phase::Playing;
                info!(round = self.round, "entering play");
                effects.push(Effect::Emit(GameEvent::GameEntered));
                self.tick(CountdownTick::Three, &mut effects);
                // The opponent's clock may have let them play already.
                if let Some(room) = self.latest.take() {
                    self.diff_stages(&room, &mut effects);
                    if !self.announced {
                        self.maybe_announce(&mut effects);
                    }
                    self.latest = Some(room);
                }
            }
            TimerKind::Countdown(tick) => self.tick(tick, &mut effects),
            TimerKind::DismissCountdown => {
                effects.push(Effect::Emit(GameEvent::CountdownDismissed));
            }
            TimerKind::RevealWinner if self.phase == Phase::RoundWon && !self.winner_revealed => {
                if let Some(winner) = self.winner {
                    self.winner_revealed = true;
                    effects.push(Effect::Emit(GameEvent::WinnerRevealed { winner }));
                }
            }
            TimerKind::ResumeCountdown if self.phase == Phase::Restarting => {
                self.phase = Phase::CountingDown;
                self.schedule(TimerKind::EnterPlaying, Duration::ZERO, &mut effects);
            }
            kind => debug!(?kind, phase = ?self.phase, "timer no longer applies"),
        }
        effects
    }

    /// The local player pressed "play again".
    ///
    /// Only honoured once per round, after the winner banner is shown.
    pub fn request_restart(&mut self) -> Vec<Effect> {
        if self.phase != Phase::RoundWon || !self.winner_revealed || self.restart_requested {
            debug!(phase = ?self.phase, "restart request ignored");
            return Vec::new();
        }
        self.restart_requested = true;
        vec![
            Effect::WriteOwnRecord(PlayerUpdate::new().with_ready_for_restart(true)),
            Effect::Emit(GameEvent::RestartRequested),
        ]
    }

    // ── Transitions ─────────────────────────────────────────────────

    fn schedule_start(&mut self, started_at: Timestamp, now: Timestamp, effects: &mut Vec<Effect>) {
        self.started = true;
        self.phase = Phase::CountingDown;
        let enter_at = started_at.saturating_add(duration_ms(self.timings.sync_buffer));
        let starts_in = Duration::from_millis(enter_at.saturating_sub(now));
        info!(started_at, ?starts_in, "game start detected");
        effects.push(Effect::Emit(GameEvent::GameScheduled { starts_in }));
        self.schedule(TimerKind::EnterPlaying, starts_in, effects);
    }

    fn reconcile_lobby(&mut self, room: &RoomDocument, effects: &mut Vec<Effect>) {
        let named_opponent = room
            .opponent_of(&self.self_id)
            .filter(|(_, record)| !record.player_name.trim().is_empty());
        match named_opponent {
            Some((id, record)) => {
                if self.phase != Phase::LobbyReady {
                    self.phase = Phase::LobbyReady;
                    info!(opponent = %id, "opponent joined, start enabled");
                    effects.push(Effect::Emit(GameEvent::StartEnabled {
                        opponent: id.clone(),
                        opponent_name: record.player_name.clone(),
                    }));
                }
                self.lobby_count = None;
            }
            None => {
                let count = room.player_count();
                if self.phase == Phase::LobbyReady || self.lobby_count != Some(count) {
                    self.phase = Phase::LobbyWaiting;
                    self.lobby_count = Some(count);
                    debug!(count, "waiting for opponent");
                    effects.push(Effect::Emit(GameEvent::WaitingForOpponent {
                        player_count: count,
                    }));
                }
            }
        }
    }

    fn track_opponent(&mut self, room: &RoomDocument, effects: &mut Vec<Effect>) {
        let Some((id, record)) = room.opponent_of(&self.self_id) else {
            return;
        };
        if record.player_name.trim().is_empty() {
            return;
        }
        let changed = self
            .opponent
            .as_ref()
            .is_none_or(|(known_id, name)| known_id != id || *name != record.player_name);
        if changed {
            let is_new = self.opponent.as_ref().is_none_or(|(known_id, _)| known_id != id);
            if is_new {
                self.them = PlayerView::fresh(record.selected_plant);
            }
            self.opponent = Some((id.clone(), record.player_name.clone()));
            effects.push(Effect::Emit(GameEvent::OpponentUpdated {
                opponent: id.clone(),
                name: record.player_name.clone(),
            }));
        }
    }

    /// A record still flagged for restart outside `RoundWon` is left over
    /// from the finished round; its progress is not current.
    fn is_stale(&self, record: &PlayerRecord) -> bool {
        record.ready_for_restart && self.phase != Phase::RoundWon
    }

    fn diff_stages(&mut self, room: &RoomDocument, effects: &mut Vec<Effect>) {
        if let Some(record) = room.player(&self.self_id).filter(|r| !self.is_stale(r)) {
            let next = view_of(record);
            if (next.stage, next.plant) != (self.me.stage, self.me.plant) {
                effects.push(Effect::Emit(GameEvent::StageChanged {
                    side: Side::Me,
                    stage: next.stage,
                    plant: next.plant,
                }));
            }
            self.me = next;
        }
        if let Some((_, record)) = room
            .opponent_of(&self.self_id)
            .filter(|(_, r)| !self.is_stale(r))
        {
            let next = view_of(record);
            if (next.stage, next.plant) != (self.them.stage, self.them.plant) {
                effects.push(Effect::Emit(GameEvent::StageChanged {
                    side: Side::Opponent,
                    stage: next.stage,
                    plant: next.plant,
                }));
            }
            self.them = next;
        }
    }

    fn maybe_announce(&mut self, effects: &mut Vec<Effect>) {
        let opponent_id = self.opponent.as_ref().map(|(id, _)| id);
        let winner = match (self.me.done_at(), self.them.done_at().zip(opponent_id)) {
            (Some(mine), Some((theirs, their_id))) => {
                if (mine, &self.self_id) <= (theirs, their_id) {
                    Side::Me
                } else {
                    Side::Opponent
                }
            }
            (Some(_), None) => Side::Me,
            (None, Some(_)) => Side::Opponent,
            (None, None) => return,
        };
        let player = match winner {
            Side::Me => self.self_id.clone(),
            Side::Opponent => match opponent_id {
                Some(id) => id.clone(),
                None => return,
            },
        };

        self.announced = true;
        self.winner = Some(winner);
        self.phase = Phase::RoundWon;
        info!(?winner, %player, "round won");
        effects.push(Effect::Emit(GameEvent::WinnerDecided { winner, player }));
        self.schedule(TimerKind::RevealWinner, self.timings.winner_reveal_delay, effects);
    }

    fn both_ready(&mut self, room: &RoomDocument) -> bool {
        if room.player(&self.self_id).is_some_and(|r| r.ready_for_restart) {
            self.self_ready_seen = true;
        }
        if let Some((id, record)) = room.opponent_of(&self.self_id) {
            if record.ready_for_restart {
                self.opponent_ready_seen = true;
            } else if self.self_ready_seen && self.opponent_restarted(record) {
                debug!(opponent = %id, "opponent already reset for the next round");
                self.opponent_ready_seen = true;
            }
        }
        self.self_ready_seen && self.opponent_ready_seen
    }

    /// The opponent only clears their finished round after seeing both
    /// players ready, so a reset record stands in for a flag we never saw.
    ///
    /// A loser still at stage 1 resets to an identical record; that case
    /// waits for the flag itself.
    fn opponent_restarted(&self, record: &PlayerRecord) -> bool {
        let rewound = record.current_stage < self.them.stage
            || (self.them.completed_at.is_some() && record.completed_at.is_none());
        rewound && record.completed_at.is_none() && record.selected_plant == self.them.plant
    }

    fn restart(&mut self, effects: &mut Vec<Effect>) {
        self.round = self.round.wrapping_add(1);
        self.phase = Phase::Restarting;
        self.announced = false;
        self.winner = None;
        self.winner_revealed = false;
        self.restart_requested = false;
        self.self_ready_seen = false;
        self.opponent_ready_seen = false;
        self.me = PlayerView::fresh(self.me.plant);
        self.them = PlayerView::fresh(self.them.plant);
        info!(round = self.round, "both players ready, restarting");

        effects.push(Effect::Emit(GameEvent::RoundReset {
            my_plant: self.me.plant,
            opponent_plant: self.them.plant,
        }));
        effects.push(Effect::ResetProgress);
        effects.push(Effect::WriteOwnRecord(PlayerUpdate::round_reset()));
        self.schedule(TimerKind::ResumeCountdown, self.timings.restart_delay, effects);
    }

    fn tick(&mut self, tick: CountdownTick, effects: &mut Vec<Effect>) {
        effects.push(Effect::Emit(GameEvent::Countdown(tick)));
        let next = tick.next().map_or(TimerKind::DismissCountdown, TimerKind::Countdown);
        self.schedule(next, self.timings.countdown_tick, effects);
    }

    fn schedule(&self, kind: TimerKind, after: Duration, effects: &mut Vec<Effect>) {
        effects.push(Effect::Schedule {
            timer: Timer {
                kind,
                round: self.round,
            },
            after,
        });
    }
}

fn view_of(record: &PlayerRecord) -> PlayerView {
    PlayerView {
        stage: record.current_stage,
        plant: record.selected_plant,
        completed_at: record.completed_at,
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

    const HOST: &str = "p_host0001_aaaa";
    const GUEST: &str = "p_guest001_bbbb";

    fn id(raw: &str) -> PlayerId {
        PlayerId::new(raw)
    }

    fn record(name: &str, stage: u8, completed_at: Option<Timestamp>) -> PlayerRecord {
        let mut record = PlayerRecord::new(name, PlantKind::Lotus);
        record.current_stage = Stage::new(stage).unwrap();
        record.completed_at = completed_at;
        record
    }

    fn room(players: Vec<(&str, PlayerRecord)>) -> RoomDocument {
        RoomDocument {
            created_at: 1,
            game_started: false,
            started_at: None,
            players: players.into_iter().map(|(k, v)| (id(k), v)).collect(),
        }
    }

    fn started(mut room: RoomDocument, started_at: Timestamp) -> RoomDocument {
        room.game_started = true;
        room.started_at = Some(started_at);
        room
    }

    fn events(effects: &[Effect]) -> Vec<GameEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn scheduled(effects: &[Effect]) -> Vec<(TimerKind, Duration)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Schedule { timer, after } => Some((timer.kind, *after)),
                _ => None,
            })
            .collect()
    }

    fn timer_of(effects: &[Effect], kind: TimerKind) -> Timer {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Schedule { timer, .. } if timer.kind == kind => Some(*timer),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no {kind:?} scheduled in {effects:?}"))
    }

    /// A host reconciler driven into `Playing` against `GUEST`.
    fn playing_host() -> Reconciler {
        let mut r = Reconciler::new(id(HOST), Role::Host, PlantKind::Lotus);
        let lobby = room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 1, None))]);
        r.apply(&lobby, 0);
        let effects = r.apply(&started(lobby, 1_000), 1_000);
        let enter = timer_of(&effects, TimerKind::EnterPlaying);
        r.on_timer(enter);
        assert_eq!(r.phase(), Phase::Playing);
        r
    }

    fn won_host() -> Reconciler {
        let mut r = playing_host();
        let done = started(
            room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, record("Gil", 3, None))]),
            1_000,
        );
        let effects = r.apply(&done, 5_000);
        r.on_timer(timer_of(&effects, TimerKind::RevealWinner));
        assert_eq!(r.phase(), Phase::RoundWon);
        r
    }

    #[test]
    fn host_waits_then_enables_start_when_opponent_is_named() {
        let mut r = Reconciler::new(id(HOST), Role::Host, PlantKind::Lotus);

        let effects = r.apply(&room(vec![(HOST, record("Hana", 1, None))]), 0);
        assert_eq!(events(&effects), vec![GameEvent::WaitingForOpponent { player_count: 1 }]);
        assert_eq!(r.phase(), Phase::LobbyWaiting);

        // Same snapshot again: nothing new to say.
        assert!(r.apply(&room(vec![(HOST, record("Hana", 1, None))]), 0).is_empty());

        // A record without a name does not count as an opponent yet.
        let unnamed = room(vec![(HOST, record("Hana", 1, None)), (GUEST, record(" ", 1, None))]);
        let effects = r.apply(&unnamed, 0);
        assert_eq!(events(&effects), vec![GameEvent::WaitingForOpponent { player_count: 2 }]);

        let named = room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 1, None))]);
        let effects = r.apply(&named, 0);
        assert_eq!(r.phase(), Phase::LobbyReady);
        assert!(r.can_start());
        assert!(events(&effects).contains(&GameEvent::StartEnabled {
            opponent: id(GUEST),
            opponent_name: "Gil".into(),
        }));
        assert!(events(&effects).contains(&GameEvent::OpponentUpdated {
            opponent: id(GUEST),
            name: "Gil".into(),
        }));

        // Idempotent on repeats.
        assert!(r.apply(&named, 0).is_empty());
    }

    #[test]
    fn host_falls_back_to_waiting_when_opponent_leaves() {
        let mut r = Reconciler::new(id(HOST), Role::Host, PlantKind::Lotus);
        r.apply(&room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 1, None))]), 0);
        let effects = r.apply(&room(vec![(HOST, record("Hana", 1, None))]), 0);
        assert_eq!(r.phase(), Phase::LobbyWaiting);
        assert_eq!(events(&effects), vec![GameEvent::WaitingForOpponent { player_count: 1 }]);
    }

    #[test]
    fn joiner_never_enters_lobby_ready() {
        let mut r = Reconciler::new(id(GUEST), Role::Joiner, PlantKind::Rose);
        let effects = r.apply(
            &room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 1, None))]),
            0,
        );
        assert_eq!(r.phase(), Phase::LobbyWaiting);
        assert!(!r.can_start());
        assert_eq!(
            events(&effects),
            vec![GameEvent::OpponentUpdated {
                opponent: id(HOST),
                name: "Hana".into()
            }]
        );
    }

    #[test]
    fn start_delay_is_started_at_plus_buffer_minus_now_and_scheduled_once() {
        let mut r = Reconciler::new(id(GUEST), Role::Joiner, PlantKind::Lotus);
        let t: Timestamp = 1_700_000_000_000;
        let snapshot = started(
            room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 1, None))]),
            t,
        );

        let effects = r.apply(&snapshot, t - 500);
        assert_eq!(r.phase(), Phase::CountingDown);
        assert_eq!(
            scheduled(&effects),
            vec![(TimerKind::EnterPlaying, Duration::from_millis(2_500))]
        );
        let (_, delay) = scheduled(&effects)[0];
        assert!(delay >= Duration::from_millis(500));
        assert!(events(&effects).contains(&GameEvent::GameScheduled {
            starts_in: Duration::from_millis(2_500)
        }));

        for _ in 0..3 {
            let repeat = r.apply(&snapshot, t - 400);
            assert!(scheduled(&repeat).is_empty());
        }
    }

    #[test]
    fn start_in_the_past_enters_immediately() {
        let mut r = Reconciler::new(id(GUEST), Role::Joiner, PlantKind::Lotus);
        let snapshot = started(room(vec![(GUEST, record("Gil", 1, None))]), 1_000);
        let effects = r.apply(&snapshot, 10_000);
        assert_eq!(scheduled(&effects), vec![(TimerKind::EnterPlaying, Duration::ZERO)]);
    }

    #[test]
    fn game_started_without_started_at_is_not_a_start() {
        let mut r = Reconciler::new(id(GUEST), Role::Joiner, PlantKind::Lotus);
        let mut snapshot = room(vec![(GUEST, record("Gil", 1, None))]);
        snapshot.game_started = true;
        r.apply(&snapshot, 0);
        assert_eq!(r.phase(), Phase::LobbyWaiting);
    }

    #[test]
    fn countdown_runs_three_two_one_grow_then_dismisses() {
        let mut r = Reconciler::new(id(GUEST), Role::Joiner, PlantKind::Lotus);
        let effects = r.apply(&started(room(vec![(GUEST, record("Gil", 1, None))]), 0), 0);
        let mut pending = timer_of(&effects, TimerKind::EnterPlaying);
        let mut shown = Vec::new();
        loop {
            let effects = r.on_timer(pending);
            shown.extend(events(&effects));
            match effects.iter().find_map(|e| match e {
                Effect::Schedule { timer, after } => Some((*timer, *after)),
                _ => None,
            }) {
                Some((timer, after)) => {
                    assert_eq!(after, Duration::from_secs(1));
                    pending = timer;
                }
                None => break,
            }
        }
        assert_eq!(
            shown,
            vec![
                GameEvent::GameEntered,
                GameEvent::Countdown(CountdownTick::Three),
                GameEvent::Countdown(CountdownTick::Two),
                GameEvent::Countdown(CountdownTick::One),
                GameEvent::Countdown(CountdownTick::Grow),
                GameEvent::CountdownDismissed,
            ]
        );
        assert_eq!(r.phase(), Phase::Playing);
    }

    #[test]
    fn stage_changes_are_diffed_not_replayed() {
        let mut r = playing_host();
        let snapshot = started(
            room(vec![(HOST, record("Hana", 2, None)), (GUEST, record("Gil", 1, None))]),
            1_000,
        );
        let effects = r.apply(&snapshot, 2_000);
        assert_eq!(
            events(&effects),
            vec![GameEvent::StageChanged {
                side: Side::Me,
                stage: Stage::new(2).unwrap(),
                plant: PlantKind::Lotus
            }]
        );
        assert!(r.apply(&snapshot, 2_100).is_empty());

        let snapshot = started(
            room(vec![(HOST, record("Hana", 2, None)), (GUEST, record("Gil", 4, None))]),
            1_000,
        );
        let effects = r.apply(&snapshot, 2_200);
        assert_eq!(
            events(&effects),
            vec![GameEvent::StageChanged {
                side: Side::Opponent,
                stage: Stage::new(4).unwrap(),
                plant: PlantKind::Lotus
            }]
        );
    }

    #[test]
    fn earlier_completion_wins() {
        let mut r = playing_host();
        let both_done = started(
            room(vec![(HOST, record("Hana", 6, Some(150))), (GUEST, record("Gil", 6, Some(100)))]),
            1_000,
        );
        let effects = r.apply(&both_done, 5_000);
        assert_eq!(r.winner(), Some(Side::Opponent));
        assert!(events(&effects).contains(&GameEvent::WinnerDecided {
            winner: Side::Opponent,
            player: id(GUEST)
        }));
        assert!(scheduled(&effects)
            .contains(&(TimerKind::RevealWinner, Duration::from_millis(2000))));
    }

    #[test]
    fn player_a_at_100_beats_player_b_at_150() {
        let mut r = playing_host();
        let both_done = started(
            room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, record("Gil", 6, Some(150)))]),
            1_000,
        );
        r.apply(&both_done, 5_000);
        assert_eq!(r.winner(), Some(Side::Me));
    }

    #[test]
    fn exact_tie_goes_to_the_smaller_player_id() {
        let mut r = playing_host();
        let tie = started(
            room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, record("Gil", 6, Some(100)))]),
            1_000,
        );
        r.apply(&tie, 5_000);
        // "p_guest…" < "p_host…"
        assert_eq!(r.winner(), Some(Side::Opponent));
    }

    #[test]
    fn stage_six_without_completion_is_not_done() {
        let mut r = playing_host();
        let snapshot = started(
            room(vec![(HOST, record("Hana", 6, None)), (GUEST, record("Gil", 2, None))]),
            1_000,
        );
        r.apply(&snapshot, 5_000);
        assert_eq!(r.phase(), Phase::Playing);
        assert_eq!(r.winner(), None);
    }

    #[test]
    fn winner_is_announced_once() {
        let mut r = playing_host();
        let done = started(
            room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, record("Gil", 3, None))]),
            1_000,
        );
        let first = r.apply(&done, 5_000);
        assert_eq!(
            events(&first)
                .iter()
                .filter(|e| matches!(e, GameEvent::WinnerDecided { .. }))
                .count(),
            1
        );
        let later = started(
            room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, record("Gil", 6, Some(90)))]),
            1_000,
        );
        let second = r.apply(&later, 5_100);
        assert!(!events(&second)
            .iter()
            .any(|e| matches!(e, GameEvent::WinnerDecided { .. })));
        assert_eq!(r.winner(), Some(Side::Me));
    }

    #[test]
    fn reveal_and_restart_request_flow() {
        let mut r = playing_host();
        assert!(r.request_restart().is_empty());

        let done = started(
            room(vec![(HOST, record("Hana", 3, None)), (GUEST, record("Gil", 6, Some(90)))]),
            1_000,
        );
        let effects = r.apply(&done, 5_000);
        // Not before the banner is shown.
        assert!(r.request_restart().is_empty());

        let effects = r.on_timer(timer_of(&effects, TimerKind::RevealWinner));
        assert_eq!(
            events(&effects),
            vec![GameEvent::WinnerRevealed {
                winner: Side::Opponent
            }]
        );
        let effects = r.request_restart();
        assert_eq!(
            effects,
            vec![
                Effect::WriteOwnRecord(PlayerUpdate::new().with_ready_for_restart(true)),
                Effect::Emit(GameEvent::RestartRequested),
            ]
        );
        assert!(r.request_restart().is_empty());
    }

    #[test]
    fn both_ready_restarts_once_and_resumes_countdown() {
        let mut r = won_host();
        let mut host = record("Hana", 6, Some(100));
        host.ready_for_restart = true;
        let mut guest = record("Gil", 3, None);
        guest.ready_for_restart = true;
        let both_ready = started(room(vec![(HOST, host.clone()), (GUEST, guest.clone())]), 1_000);

        let effects = r.apply(&both_ready, 9_000);
        assert_eq!(r.phase(), Phase::Restarting);
        assert_eq!(r.winner(), None);
        assert!(events(&effects).contains(&GameEvent::RoundReset {
            my_plant: PlantKind::Lotus,
            opponent_plant: PlantKind::Lotus
        }));
        assert!(effects.contains(&Effect::ResetProgress));
        assert!(effects.contains(&Effect::WriteOwnRecord(PlayerUpdate::round_reset())));
        let resume = timer_of(&effects, TimerKind::ResumeCountdown);
        assert_eq!(
            scheduled(&effects),
            vec![(TimerKind::ResumeCountdown, Duration::from_millis(500))]
        );

        // The same stale snapshot again: no second restart.
        let again = r.apply(&both_ready, 9_100);
        assert!(again.is_empty());

        let effects = r.on_timer(resume);
        assert_eq!(r.phase(), Phase::CountingDown);
        let enter = timer_of(&effects, TimerKind::EnterPlaying);
        let effects = r.on_timer(enter);
        assert_eq!(r.phase(), Phase::Playing);
        assert!(events(&effects).contains(&GameEvent::Countdown(CountdownTick::Three)));

        // Own record cleared, opponent's still stale: no restart, no stage
        // replay, no winner from the previous round.
        let mut cleared = record("Hana", 1, None);
        cleared.ready_for_restart = false;
        let mut stale_guest = record("Gil", 6, Some(80));
        stale_guest.ready_for_restart = true;
        let effects = r.apply(&started(room(vec![(HOST, cleared), (GUEST, stale_guest)]), 1_000), 9_800);
        assert!(effects.is_empty(), "unexpected {effects:?}");
        assert_eq!(r.phase(), Phase::Playing);
        assert_eq!(r.round(), 1);
    }

    #[test]
    fn readiness_may_be_observed_across_snapshots() {
        let mut r = won_host();
        let mut guest = record("Gil", 3, None);
        guest.ready_for_restart = true;
        let effects = r.apply(
            &started(room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, guest)]), 1_000),
            9_000,
        );
        assert!(effects.is_empty());
        assert_eq!(r.phase(), Phase::RoundWon);

        // The opponent already reset by the time our own flag is seen.
        let mut host = record("Hana", 6, Some(100));
        host.ready_for_restart = true;
        let effects = r.apply(
            &started(room(vec![(HOST, host), (GUEST, record("Gil", 1, None))]), 1_000),
            9_100,
        );
        assert_eq!(r.phase(), Phase::Restarting);
        assert!(effects.contains(&Effect::ResetProgress));
    }

    #[test]
    fn opponent_reset_stands_in_for_an_unseen_ready_flag() {
        let mut r = won_host();
        assert!(!r.request_restart().is_empty());

        // Guest ready, host ready, guest reset: only the last state arrives.
        let mut host = record("Hana", 6, Some(100));
        host.ready_for_restart = true;
        let effects = r.apply(
            &started(room(vec![(HOST, host), (GUEST, record("Gil", 1, None))]), 1_000),
            9_000,
        );
        assert_eq!(r.phase(), Phase::Restarting);
        assert_eq!(r.round(), 1);
        assert!(effects.contains(&Effect::ResetProgress));
        assert!(effects.contains(&Effect::WriteOwnRecord(PlayerUpdate::round_reset())));
    }

    #[test]
    fn opponent_rewind_before_our_flag_is_not_a_restart() {
        let mut r = won_host();
        let effects = r.apply(
            &started(
                room(vec![(HOST, record("Hana", 6, Some(100))), (GUEST, record("Gil", 1, None))]),
                1_000,
            ),
            9_000,
        );
        assert_eq!(r.phase(), Phase::RoundWon);
        assert!(!effects.contains(&Effect::ResetProgress));
    }

    #[test]
    fn opponent_finishing_during_countdown_is_announced_on_entry() {
        let mut r = Reconciler::new(id(GUEST), Role::Joiner, PlantKind::Lotus);
        let lobby = room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 1, None))]);
        let effects = r.apply(&started(lobby, 10_000), 9_000);
        let enter = timer_of(&effects, TimerKind::EnterPlaying);

        // The host's clock ran ahead: they played and finished already.
        let host_done = started(
            room(vec![(HOST, record("Hana", 6, Some(11_000))), (GUEST, record("Gil", 1, None))]),
            10_000,
        );
        assert!(r.apply(&host_done, 11_500).is_empty());
        assert_eq!(r.phase(), Phase::CountingDown);

        let effects = r.on_timer(enter);
        let shown = events(&effects);
        assert_eq!(shown.first(), Some(&GameEvent::GameEntered));
        assert!(shown.contains(&GameEvent::StageChanged {
            side: Side::Opponent,
            stage: Stage::FINAL,
            plant: PlantKind::Lotus
        }));
        assert!(shown.contains(&GameEvent::WinnerDecided {
            winner: Side::Opponent,
            player: id(HOST)
        }));
        assert!(scheduled(&effects)
            .contains(&(TimerKind::RevealWinner, Duration::from_millis(2000))));
        assert_eq!(r.phase(), Phase::RoundWon);

        assert!(r.apply(&host_done, 12_000).is_empty());
    }

    #[test]
    fn opponent_progress_during_restart_is_shown_on_entry() {
        let mut r = won_host();
        let mut host = record("Hana", 6, Some(100));
        host.ready_for_restart = true;
        let mut guest = record("Gil", 3, None);
        guest.ready_for_restart = true;
        let effects = r.apply(&started(room(vec![(HOST, host), (GUEST, guest)]), 1_000), 9_000);
        let resume = timer_of(&effects, TimerKind::ResumeCountdown);

        // The guest is already growing the next round.
        let next = started(
            room(vec![(HOST, record("Hana", 1, None)), (GUEST, record("Gil", 3, None))]),
            1_000,
        );
        assert!(r.apply(&next, 9_200).is_empty());

        let effects = r.on_timer(resume);
        let effects = r.on_timer(timer_of(&effects, TimerKind::EnterPlaying));
        let stage_changes: Vec<GameEvent> = events(&effects)
            .into_iter()
            .filter(|e| matches!(e, GameEvent::StageChanged { .. }))
            .collect();
        assert_eq!(
            stage_changes,
            vec![GameEvent::StageChanged {
                side: Side::Opponent,
                stage: Stage::new(3).unwrap(),
                plant: PlantKind::Lotus
            }]
        );
        assert_eq!(r.phase(), Phase::Playing);
        assert_eq!(r.winner(), None);
    }

    #[test]
    fn timers_from_an_earlier_round_are_ignored() {
        let mut r = won_host();
        let stale_tick = Timer {
            kind: TimerKind::Countdown(CountdownTick::Two),
            round: 0,
        };
        let mut host = record("Hana", 6, Some(100));
        host.ready_for_restart = true;
        let mut guest = record("Gil", 3, None);
        guest.ready_for_restart = true;
        r.apply(&started(room(vec![(HOST, host), (GUEST, guest)]), 1_000), 9_000);
        assert!(r.on_timer(stale_tick).is_empty());
    }

    #[test]
    fn malformed_payloads_change_nothing() {
        let mut r = playing_host();
        let before = format!("{r:?}");
        for payload in [
            Value::Null,
            json!(42),
            json!("room"),
            json!([1, 2]),
            json!({}),
            json!({ "gameStarted": true }),
            json!({ "createdAt": 1, "gameStarted": true, "p_x": { "playerName": "X" } }),
            json!({ "createdAt": 1, "gameStarted": true, "p_x": { "playerName": "X", "currentStage": 9 } }),
            json!({ "createdAt": 1, "gameStarted": true, "stray": 7 }),
        ] {
            assert!(r.apply_value(payload, 5_000).is_empty());
        }
        assert_eq!(format!("{r:?}"), before);
    }

    #[test]
    fn well_formed_payloads_are_applied() {
        let mut r = Reconciler::new(id(HOST), Role::Host, PlantKind::Lotus);
        let effects = r.apply_value(
            json!({
                "createdAt": 1,
                "gameStarted": false,
                HOST: { "playerName": "Hana", "currentStage": 1 },
            }),
            0,
        );
        assert_eq!(events(&effects), vec![GameEvent::WaitingForOpponent { player_count: 1 }]);
    }
}
