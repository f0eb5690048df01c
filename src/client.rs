//! Async session driver for a BloomCraft match.
//!
//! [`GameClient`] is a thin handle that talks to a background session loop
//! over an unbounded MPSC channel. The loop owns the whole session context
//! (room adapter, progress tracker, reconciler, room subscription and pending
//! timers) and emits [`GameEvent`]s on a bounded channel returned from
//! [`GameClient::start`].
//!
//! # Example
//!
//! ```rust
//! use bloomcraft_client::{GameClient, GameConfig, GameEvent, MemoryStore, PlayerId};
//!
//! # async fn run() -> bloomcraft_client::Result<()> {
//! let store = MemoryStore::new();
//! let config = GameConfig::new("Hana");
//! let (client, mut events) = GameClient::start(store, PlayerId::new("p_hana0001_k2"), config);
//!
//! client.create_room()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         GameEvent::RoomCreated { room_id } => println!("share code {room_id}"),
//!         GameEvent::StartEnabled { .. } => client.start_game()?,
//!         GameEvent::SessionClosed { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{BloomcraftError, Result};
use crate::event::{GameEvent, UserAction};
use crate::progress::{CollectOutcome, ProgressTracker};
use crate::protocol::{Element, PlantKind, PlayerId, PlayerUpdate, RoomDocument, RoomId};
use crate::reconciler::{Effect, Phase, Reconciler, ReconcilerTimings, Role, Timer};
use crate::rooms::{RoomStoreAdapter, RoomSubscription};
use crate::store::DocumentStore;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GameClient`] session.
///
/// # Example
///
/// ```
/// use bloomcraft_client::client::GameConfig;
/// use bloomcraft_client::protocol::PlantKind;
/// use std::time::Duration;
///
/// let config = GameConfig::new("Hana")
///     .with_plant(PlantKind::Sunflower)
///     .with_event_channel_capacity(0)
///     .with_restart_delay(Duration::from_millis(250));
/// assert_eq!(config.event_channel_capacity, 1);
/// assert_eq!(config.sync_buffer, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Display name written into the local player record. Creating or
    /// joining a room requires it to be non-blank.
    pub player_name: String,
    /// Plant grown when the session starts.
    pub plant: PlantKind,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning.
    /// The final `SessionClosed` event is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`GameClient::shutdown`] waits for the loop before aborting it.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Added to "now" when the host starts a game, and to `startedAt` before
    /// a client enters play. Defaults to **2 seconds**.
    pub sync_buffer: Duration,
    /// Pause between deciding the winner and showing the banner.
    /// Defaults to **2 seconds**.
    pub winner_reveal_delay: Duration,
    /// Pause between a restart and the next countdown. Defaults to **500 ms**.
    pub restart_delay: Duration,
    /// Spacing of the 3-2-1-"Grow!" countdown. Defaults to **1 second**.
    pub countdown_tick: Duration,
    /// Wall clock for `startedAt` and `completedAt` stamps.
    pub clock: Arc<dyn Clock>,
}

impl GameConfig {
    /// Create a configuration for `player_name` with default values.
    pub fn new(player_name: impl Into<String>) -> Self {
        let timings = ReconcilerTimings::default();
        Self {
            player_name: player_name.into(),
            plant: PlantKind::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            sync_buffer: timings.sync_buffer,
            winner_reveal_delay: timings.winner_reveal_delay,
            restart_delay: timings.restart_delay,
            countdown_tick: timings.countdown_tick,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_plant(mut self, plant: PlantKind) -> Self {
        self.plant = plant;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown. A zero timeout aborts the
    /// session loop immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sync_buffer(mut self, sync_buffer: Duration) -> Self {
        self.sync_buffer = sync_buffer;
        self
    }

    #[must_use]
    pub fn with_winner_reveal_delay(mut self, delay: Duration) -> Self {
        self.winner_reveal_delay = delay;
        self
    }

    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    #[must_use]
    pub fn with_countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = tick;
        self
    }

    /// Use a different wall clock, e.g. a
    /// [`ManualClock`](crate::clock::ManualClock) in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The subset of delays the reconciler works with.
    pub fn timings(&self) -> ReconcilerTimings {
        ReconcilerTimings {
            sync_buffer: self.sync_buffer,
            countdown_tick: self.countdown_tick,
            winner_reveal_delay: self.winner_reveal_delay,
            restart_delay: self.restart_delay,
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Work queued by the handle for the session loop.
#[derive(Debug)]
enum Command {
    CreateRoom,
    JoinRoom(RoomId),
    StartGame,
    Collect(Element),
    SelectPlant(PlantKind),
    RequestRestart,
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the session loop.
struct ClientState {
    running: AtomicBool,
    in_room: AtomicBool,
    room_id: Mutex<Option<RoomId>>,
    phase: Mutex<Option<Phase>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            in_room: AtomicBool::new(false),
            room_id: Mutex::new(None),
            phase: Mutex::new(None),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to one player's BloomCraft session.
///
/// Created via [`GameClient::start`]. Every action method validates its
/// input, queues a command for the session loop and returns immediately;
/// outcomes arrive as [`GameEvent`]s.
pub struct GameClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<ClientState>,
    player_id: PlayerId,
    player_name: String,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl GameClient {
    /// Start the session loop for `player_id` and return a handle plus the
    /// event receiver.
    ///
    /// `store` is shared with the other player; clone a
    /// [`MemoryStore`](crate::MemoryStore) to play both sides in-process.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        store: impl DocumentStore,
        player_id: PlayerId,
        config: GameConfig,
    ) -> (Self, mpsc::Receiver<GameEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<GameEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let state = Arc::new(ClientState::new());
        let adapter = RoomStoreAdapter::new(Arc::new(store), Arc::clone(&config.clock))
            .with_sync_buffer(config.sync_buffer);
        let session = Session {
            adapter,
            player_id: player_id.clone(),
            player_name: config.player_name.trim().to_string(),
            tracker: ProgressTracker::new(config.plant),
            timings: config.timings(),
            room: None,
            timers: Vec::new(),
            event_tx,
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(session_loop(session, cmd_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            state,
            player_id,
            player_name: config.player_name,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Create a fresh room hosted by this player.
    ///
    /// # Errors
    ///
    /// [`BloomcraftError::MissingPlayerName`] for a blank name,
    /// [`BloomcraftError::AlreadyInRoom`] once a room was entered and
    /// [`BloomcraftError::NotRunning`] after the session ended. Store
    /// failures arrive as [`GameEvent::ActionFailed`].
    pub fn create_room(&self) -> Result<()> {
        self.require_name()?;
        self.require_no_room()?;
        self.send(Command::CreateRoom)
    }

    /// Join the room identified by `code`. The `room_` prefix is optional.
    ///
    /// # Errors
    ///
    /// [`BloomcraftError::MissingPlayerName`],
    /// [`BloomcraftError::MissingRoomCode`] for a blank code,
    /// [`BloomcraftError::AlreadyInRoom`] or [`BloomcraftError::NotRunning`].
    /// A missing room or store failure arrives as [`GameEvent::ActionFailed`].
    pub fn join_room(&self, code: &str) -> Result<()> {
        self.require_name()?;
        let room_id = RoomId::from_code(code).ok_or(BloomcraftError::MissingRoomCode)?;
        self.require_no_room()?;
        self.send(Command::JoinRoom(room_id))
    }

    /// Host only: start the game once an opponent has joined. Ignored by the
    /// loop when the lobby is not ready.
    ///
    /// # Errors
    ///
    /// [`BloomcraftError::NotInRoom`] or [`BloomcraftError::NotRunning`].
    pub fn start_game(&self) -> Result<()> {
        self.require_room()?;
        self.send(Command::StartGame)
    }

    /// Collect one element. Only counts while the round is being played.
    ///
    /// # Errors
    ///
    /// [`BloomcraftError::NotInRoom`] or [`BloomcraftError::NotRunning`].
    pub fn collect(&self, element: Element) -> Result<()> {
        self.require_room()?;
        self.send(Command::Collect(element))
    }

    /// Switch plants. Local growth restarts at stage 1 and, inside a room,
    /// the reset is pushed to the store.
    ///
    /// # Errors
    ///
    /// [`BloomcraftError::NotRunning`] after the session ended.
    pub fn select_plant(&self, plant: PlantKind) -> Result<()> {
        self.send(Command::SelectPlant(plant))
    }

    /// Ask for a rematch once the winner banner is shown.
    ///
    /// # Errors
    ///
    /// [`BloomcraftError::NotInRoom`] or [`BloomcraftError::NotRunning`].
    pub fn request_restart(&self) -> Result<()> {
        self.require_room()?;
        self.send(Command::RequestRestart)
    }

    /// Stop the session loop and cancel the room subscription.
    ///
    /// The event receiver yields `SessionClosed` and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("GameClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Returns `true` until the session loop has stopped.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// The room this session created or joined.
    pub async fn current_room_id(&self) -> Option<RoomId> {
        self.state.room_id.lock().await.clone()
    }

    /// The reconciler phase, once inside a room.
    pub async fn current_phase(&self) -> Option<Phase> {
        *self.state.phase.lock().await
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn require_name(&self) -> Result<()> {
        if self.player_name.trim().is_empty() {
            return Err(BloomcraftError::MissingPlayerName);
        }
        Ok(())
    }

    fn require_room(&self) -> Result<()> {
        if !self.state.in_room.load(Ordering::Acquire) {
            return Err(BloomcraftError::NotInRoom);
        }
        Ok(())
    }

    fn require_no_room(&self) -> Result<()> {
        if self.state.in_room.load(Ordering::Acquire) {
            return Err(BloomcraftError::AlreadyInRoom);
        }
        Ok(())
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if !self.state.running.load(Ordering::Acquire) {
            return Err(BloomcraftError::NotRunning);
        }
        self.cmd_tx.send(cmd).map_err(|_| BloomcraftError::NotRunning)
    }
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("player_id", &self.player_id)
            .field("running", &self.is_running())
            .field("in_room", &self.state.in_room.load(Ordering::Acquire))
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        // No executor to drive a graceful exit here; aborting drops the loop
        // future, which cancels the room subscription with it.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session context ─────────────────────────────────────────────────

/// The room a session is in.
struct ActiveRoom {
    room_id: RoomId,
    reconciler: Reconciler,
    subscription: RoomSubscription,
}

struct PendingTimer {
    deadline: Instant,
    timer: Timer,
}

/// Everything one session owns. Only the session loop touches it.
struct Session {
    adapter: RoomStoreAdapter,
    player_id: PlayerId,
    player_name: String,
    tracker: ProgressTracker,
    timings: ReconcilerTimings,
    room: Option<ActiveRoom>,
    timers: Vec<PendingTimer>,
    event_tx: mpsc::Sender<GameEvent>,
    state: Arc<ClientState>,
}

impl Session {
    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateRoom => self.create_room().await,
            Command::JoinRoom(room_id) => self.join_room(room_id).await,
            Command::StartGame => self.start_game().await,
            Command::Collect(element) => self.collect(element).await,
            Command::SelectPlant(plant) => {
                let update = self.tracker.select_plant(plant);
                if self.room.is_some() {
                    self.write_own(update).await;
                }
            }
            Command::RequestRestart => {
                let effects = match self.room.as_mut() {
                    Some(active) => active.reconciler.request_restart(),
                    None => return,
                };
                self.apply_effects(effects).await;
            }
        }
    }

    async fn create_room(&mut self) {
        if self.room.is_some() {
            self.fail(UserAction::CreateRoom, &BloomcraftError::AlreadyInRoom);
            return;
        }
        let room_id = RoomId::generate();
        let record = self
            .tracker
            .to_record(&self.player_name)
            .with_joined_at(self.adapter.now_ms());
        let entered = async {
            self.adapter
                .create_room(&room_id, &self.player_id, record)
                .await?;
            self.adapter.subscribe(&room_id).await
        }
        .await;
        match entered {
            Ok(subscription) => {
                self.enter_room(room_id.clone(), Role::Host, subscription).await;
                emit_event(&self.event_tx, GameEvent::RoomCreated { room_id });
            }
            Err(e) => {
                error!(room = %room_id, "failed to create room: {e}");
                self.fail(UserAction::CreateRoom, &e);
            }
        }
    }

    async fn join_room(&mut self, room_id: RoomId) {
        if self.room.is_some() {
            self.fail(UserAction::JoinRoom, &BloomcraftError::AlreadyInRoom);
            return;
        }
        let record = self
            .tracker
            .to_record(&self.player_name)
            .with_joined_at(self.adapter.now_ms());
        let entered = async {
            if !self.adapter.room_exists(&room_id).await? {
                return Err(BloomcraftError::RoomNotFound(room_id.clone()));
            }
            self.adapter
                .update_player(&room_id, &self.player_id, &PlayerUpdate::from(&record))
                .await?;
            self.adapter.subscribe(&room_id).await
        }
        .await;
        match entered {
            Ok(subscription) => {
                self.enter_room(room_id.clone(), Role::Joiner, subscription).await;
                emit_event(&self.event_tx, GameEvent::RoomJoined { room_id });
            }
            Err(e) => {
                error!(room = %room_id, "failed to join room: {e}");
                self.fail(UserAction::JoinRoom, &e);
            }
        }
    }

    async fn enter_room(&mut self, room_id: RoomId, role: Role, subscription: RoomSubscription) {
        info!(room = %room_id, ?role, player = %self.player_id, "entered room");
        let reconciler = Reconciler::new(self.player_id.clone(), role, self.tracker.plant())
            .with_timings(self.timings);
        *self.state.room_id.lock().await = Some(room_id.clone());
        *self.state.phase.lock().await = Some(reconciler.phase());
        self.state.in_room.store(true, Ordering::Release);
        self.room = Some(ActiveRoom {
            room_id,
            reconciler,
            subscription,
        });
    }

    async fn start_game(&mut self) {
        let Some(active) = &self.room else {
            return;
        };
        if !active.reconciler.can_start() {
            debug!(phase = ?active.reconciler.phase(), "start ignored");
            return;
        }
        if let Err(e) = self.adapter.mark_started(&active.room_id).await {
            warn!(room = %active.room_id, "failed to start game: {e}");
            self.fail(UserAction::StartGame, &e);
        }
    }

    async fn collect(&mut self, element: Element) {
        let Some(active) = &self.room else {
            return;
        };
        if !active.reconciler.accepts_collect() {
            debug!(?element, phase = ?active.reconciler.phase(), "collect outside play ignored");
            return;
        }
        let outcome = self.tracker.collect(element, self.adapter.now_ms());
        match outcome {
            CollectOutcome::AlreadyComplete | CollectOutcome::Duplicate => {
                debug!(?element, ?outcome, "collect changed nothing");
            }
            CollectOutcome::Collected => self.emit_progress(),
            CollectOutcome::Advanced(update) => {
                self.emit_progress();
                self.write_own(update).await;
            }
        }
    }

    async fn on_snapshot(&mut self, room: RoomDocument) {
        let now = self.adapter.now_ms();
        let effects = match self.room.as_mut() {
            Some(active) => active.reconciler.apply(&room, now),
            None => return,
        };
        self.apply_effects(effects).await;
    }

    async fn on_timers_due(&mut self) {
        while let Some(timer) = self.pop_due(Instant::now()) {
            let effects = match self.room.as_mut() {
                Some(active) => active.reconciler.on_timer(timer),
                None => return,
            };
            self.apply_effects(effects).await;
        }
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => emit_event(&self.event_tx, event),
                Effect::Schedule { timer, after } => self.timers.push(PendingTimer {
                    deadline: Instant::now() + after,
                    timer,
                }),
                Effect::WriteOwnRecord(update) => self.write_own(update).await,
                Effect::ResetProgress => self.tracker.reset(),
            }
        }
        if let Some(active) = &self.room {
            *self.state.phase.lock().await = Some(active.reconciler.phase());
        }
    }

    /// Push to the local player's record. Failures are logged and dropped;
    /// the next successful write carries the newer state.
    async fn write_own(&self, update: PlayerUpdate) {
        let Some(active) = &self.room else {
            return;
        };
        if let Err(e) = self
            .adapter
            .update_player(&active.room_id, &self.player_id, &update)
            .await
        {
            warn!(room = %active.room_id, "failed to write own record: {e}");
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    /// Earliest due timer, scheduling order breaking ties.
    fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        let (index, _) = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| t.deadline)?;
        Some(self.timers.remove(index).timer)
    }

    fn emit_progress(&self) {
        emit_event(
            &self.event_tx,
            GameEvent::ProgressUpdated {
                stage: self.tracker.stage(),
                collected: self.tracker.collected().clone(),
            },
        );
    }

    fn fail(&self, action: UserAction, err: &BloomcraftError) {
        emit_event(
            &self.event_tx,
            GameEvent::ActionFailed {
                action,
                message: err.to_string(),
            },
        );
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Background loop multiplexing commands, snapshots and timers.
///
/// Exits when:
/// - the command channel closes (handle dropped)
/// - shutdown is signalled
/// - the room subscription stops delivering
async fn session_loop(
    mut session: Session,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    debug!(player = %session.player_id, "session loop started");

    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        debug!(?cmd, "handling command");
                        session.handle_command(cmd).await;
                    }
                    None => {
                        debug!("command channel closed, shutting down session loop");
                        emit_closed(&session, Some("client shut down".into())).await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                emit_closed(&session, Some("client shut down".into())).await;
                break;
            }

            snapshot = next_snapshot(session.room.as_mut().map(|r| &mut r.subscription)) => {
                match snapshot {
                    Some(room) => session.on_snapshot(room).await,
                    None => {
                        warn!("room subscription ended");
                        emit_closed(&session, Some("room subscription ended".into())).await;
                        break;
                    }
                }
            }

            () = sleep_until_next(deadline) => session.on_timers_due().await,
        }
    }

    if let Some(active) = session.room.take() {
        active.subscription.cancel();
    }
    debug!("session loop exited");
}

/// Next snapshot of the active room; pending forever outside a room.
async fn next_snapshot(subscription: Option<&mut RoomSubscription>) -> Option<RoomDocument> {
    match subscription {
        Some(subscription) => subscription.next_snapshot().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Emit an event, dropping it with a warning if the consumer is behind.
fn emit_event(event_tx: &mpsc::Sender<GameEvent>, event: GameEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit [`GameEvent::SessionClosed`] and mark the session stopped.
///
/// Uses `send().await` because it is always the last event and must not be
/// dropped.
async fn emit_closed(session: &Session, reason: Option<String>) {
    session.state.running.store(false, Ordering::Release);
    session.state.in_room.store(false, Ordering::Release);
    let event = GameEvent::SessionClosed { reason };
    if session.event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error_codes::StoreErrorKind;
    use crate::store::{StorePath, Subscription};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Mutex as StdMutex;

    // ── Mock store ──────────────────────────────────────────────────

    /// A store that records writes and answers reads from a fixed value.
    struct MockStore {
        existing: Option<Value>,
        fail_with: Option<StoreErrorKind>,
        writes: Arc<StdMutex<Vec<(String, Value)>>>,
    }

    impl MockStore {
        fn new(existing: Option<Value>) -> (Self, Arc<StdMutex<Vec<(String, Value)>>>) {
            let writes = Arc::new(StdMutex::new(Vec::new()));
            let store = Self {
                existing,
                fail_with: None,
                writes: Arc::clone(&writes),
            };
            (store, writes)
        }

        fn failing(kind: StoreErrorKind) -> Self {
            Self {
                existing: None,
                fail_with: Some(kind),
                writes: Arc::default(),
            }
        }

        fn check(&self) -> Result<()> {
            match self.fail_with {
                Some(kind) => Err(BloomcraftError::store(kind, "scripted")),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for MockStore {
        async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
            self.check()?;
            self.writes.lock().unwrap().push((path.to_string(), value));
            Ok(())
        }

        async fn get(&self, _path: &StorePath) -> Result<Option<Value>> {
            self.check()?;
            Ok(self.existing.clone())
        }

        async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
            self.check()?;
            self.writes
                .lock()
                .unwrap()
                .push((path.to_string(), Value::Object(fields)));
            Ok(())
        }

        async fn subscribe(&self, _path: &StorePath) -> Result<Subscription> {
            self.check()?;
            let (tx, rx) = mpsc::unbounded_channel();
            // Keep the sender alive so the subscription never ends.
            Ok(Subscription::new(rx, move || drop(tx)))
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<GameEvent>) -> GameEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = GameConfig::new("Hana");
        assert_eq!(config.player_name, "Hana");
        assert_eq!(config.plant, PlantKind::Lotus);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.timings(), ReconcilerTimings::default());
    }

    #[tokio::test]
    async fn blank_name_is_rejected_before_queueing() {
        let (store, writes) = MockStore::new(None);
        let (mut client, _events) =
            GameClient::start(store, PlayerId::new("p_test0001_a"), GameConfig::new("   "));

        assert!(matches!(client.create_room(), Err(BloomcraftError::MissingPlayerName)));
        assert!(matches!(
            client.join_room("abc123"),
            Err(BloomcraftError::MissingPlayerName)
        ));
        client.shutdown().await;
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_code_and_room_actions_outside_a_room_are_rejected() {
        let (store, _writes) = MockStore::new(None);
        let (mut client, _events) =
            GameClient::start(store, PlayerId::new("p_test0001_a"), GameConfig::new("Gil"));

        assert!(matches!(client.join_room("  "), Err(BloomcraftError::MissingRoomCode)));
        assert!(matches!(client.start_game(), Err(BloomcraftError::NotInRoom)));
        assert!(matches!(client.collect(Element::Sun), Err(BloomcraftError::NotInRoom)));
        assert!(matches!(client.request_restart(), Err(BloomcraftError::NotInRoom)));
        assert!(client.select_plant(PlantKind::Rose).is_ok());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn create_writes_host_record_and_enters_room() {
        let (store, writes) = MockStore::new(None);
        let (mut client, mut events) = GameClient::start(
            store,
            PlayerId::new("p_host0001_a"),
            GameConfig::new("Hana").with_plant(PlantKind::Rose),
        );
        client.create_room().unwrap();

        let GameEvent::RoomCreated { room_id } = next_event(&mut events).await else {
            panic!("expected RoomCreated");
        };
        assert!(room_id.as_str().starts_with(RoomId::PREFIX));
        assert_eq!(client.current_room_id().await, Some(room_id.clone()));
        assert_eq!(client.current_phase().await, Some(Phase::LobbyWaiting));
        assert!(matches!(client.create_room(), Err(BloomcraftError::AlreadyInRoom)));

        {
            let writes = writes.lock().unwrap();
            assert_eq!(writes.len(), 1);
            let (path, value) = &writes[0];
            assert_eq!(path, &format!("rooms/{room_id}"));
            assert_eq!(value["gameStarted"], false);
            assert_eq!(value["p_host0001_a"]["playerName"], "Hana");
            assert_eq!(value["p_host0001_a"]["selectedPlant"], "rose");
            assert_eq!(value["p_host0001_a"]["currentStage"], 1);
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn join_of_missing_room_reports_failure() {
        let (store, writes) = MockStore::new(None);
        let (mut client, mut events) =
            GameClient::start(store, PlayerId::new("p_guest001_b"), GameConfig::new("Gil"));
        client.join_room("zzz999").unwrap();

        match next_event(&mut events).await {
            GameEvent::ActionFailed { action, message } => {
                assert_eq!(action, UserAction::JoinRoom);
                assert!(message.contains("room_zzz999"), "{message}");
            }
            other => panic!("expected ActionFailed, got {other:?}"),
        }
        assert!(client.current_room_id().await.is_none());
        assert!(writes.lock().unwrap().is_empty());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn join_merges_full_record_with_join_time() {
        let existing = serde_json::json!({ "createdAt": 1, "gameStarted": false });
        let (store, writes) = MockStore::new(Some(existing));
        let (mut client, mut events) =
            GameClient::start(store, PlayerId::new("p_guest001_b"), GameConfig::new("Gil"));
        client.join_room("abc123").unwrap();

        assert_eq!(
            next_event(&mut events).await,
            GameEvent::RoomJoined {
                room_id: RoomId::new("room_abc123")
            }
        );
        {
            let writes = writes.lock().unwrap();
            let (path, value) = &writes[0];
            assert_eq!(path, "rooms/room_abc123/p_guest001_b");
            assert_eq!(value["playerName"], "Gil");
            assert_eq!(value["currentStage"], 1);
            assert!(value["joinedAt"].is_u64());
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn store_failure_on_create_is_surfaced() {
        let (mut client, mut events) = GameClient::start(
            MockStore::failing(StoreErrorKind::PermissionDenied),
            PlayerId::new("p_host0001_a"),
            GameConfig::new("Hana"),
        );
        client.create_room().unwrap();

        match next_event(&mut events).await {
            GameEvent::ActionFailed { action, .. } => assert_eq!(action, UserAction::CreateRoom),
            other => panic!("expected ActionFailed, got {other:?}"),
        }
        assert!(matches!(client.start_game(), Err(BloomcraftError::NotInRoom)));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_emits_session_closed_last() {
        let (store, _writes) = MockStore::new(None);
        let (mut client, mut events) =
            GameClient::start(store, PlayerId::new("p_host0001_a"), GameConfig::new("Hana"));
        client.shutdown().await;

        assert!(matches!(
            next_event(&mut events).await,
            GameEvent::SessionClosed { .. }
        ));
        assert!(events.recv().await.is_none());
        assert!(!client.is_running());
        assert!(matches!(
            client.select_plant(PlantKind::Lotus),
            Err(BloomcraftError::NotRunning)
        ));
    }
}
