//! Room-level operations over a [`DocumentStore`].
//!
//! [`RoomStoreAdapter`] knows where rooms live in the store and how a room
//! is created, joined, started and watched. It holds no game state of its
//! own; every method is a single store round-trip (two for
//! [`create_room`](RoomStoreAdapter::create_room)).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::protocol::{PlayerId, PlayerRecord, PlayerUpdate, RoomDocument, RoomId, Timestamp};
use crate::store::{DocumentStore, StorePath, Subscription};

/// Delay added to "now" when the host stamps `startedAt`, so that both
/// clients can receive the stamp before it passes.
pub const SYNC_BUFFER: Duration = Duration::from_millis(2000);

/// Converts a duration to whole milliseconds, saturating.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Room operations against a shared document store.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct RoomStoreAdapter {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    sync_buffer: Duration,
}

impl RoomStoreAdapter {
    /// Wrap a store. `startedAt` stamps are computed with `clock`.
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sync_buffer: SYNC_BUFFER,
        }
    }

    /// Override the start buffer (defaults to [`SYNC_BUFFER`]).
    #[must_use]
    pub fn with_sync_buffer(mut self, sync_buffer: Duration) -> Self {
        self.sync_buffer = sync_buffer;
        self
    }

    /// Current wall-clock time according to the adapter's clock.
    pub fn now_ms(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Write a fresh room holding only its host.
    ///
    /// An existing room with the same id is overwritten (last writer wins);
    /// that case is only logged.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Store`](crate::BloomcraftError::Store) if
    /// the existence check or the write fails.
    pub async fn create_room(
        &self,
        room_id: &RoomId,
        host_id: &PlayerId,
        host: PlayerRecord,
    ) -> Result<RoomDocument> {
        let path = StorePath::room(room_id);
        if self.store.get(&path).await?.is_some() {
            warn!(room = %room_id, "room already exists, overwriting it");
        }
        let room = RoomDocument::new(self.clock.now_ms(), host_id.clone(), host);
        self.store.set(&path, room.to_value()?).await?;
        info!(room = %room_id, host = %host_id, "room created");
        Ok(room)
    }

    /// Whether anything is stored for `room_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Store`](crate::BloomcraftError::Store) if
    /// the read fails.
    pub async fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        Ok(self.store.get(&StorePath::room(room_id)).await?.is_some())
    }

    /// Merge `update` into one player's record.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Store`](crate::BloomcraftError::Store) if
    /// the merge fails.
    pub async fn update_player(
        &self,
        room_id: &RoomId,
        player_id: &PlayerId,
        update: &PlayerUpdate,
    ) -> Result<()> {
        if update.is_empty() {
            debug!(room = %room_id, player = %player_id, "skipping empty player update");
            return Ok(());
        }
        self.store
            .merge(&StorePath::player(room_id, player_id), update.to_fields()?)
            .await?;
        debug!(room = %room_id, player = %player_id, ?update, "player updated");
        Ok(())
    }

    /// Flag the room as started and stamp the shared start instant.
    ///
    /// Returns the `startedAt` value written.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Store`](crate::BloomcraftError::Store) if
    /// the merge fails.
    pub async fn mark_started(&self, room_id: &RoomId) -> Result<Timestamp> {
        let started_at = self
            .clock
            .now_ms()
            .saturating_add(duration_ms(self.sync_buffer));
        let mut fields = serde_json::Map::new();
        fields.insert("gameStarted".into(), true.into());
        fields.insert("startedAt".into(), started_at.into());
        self.store.merge(&StorePath::room(room_id), fields).await?;
        info!(room = %room_id, started_at, "game marked as started");
        Ok(started_at)
    }

    /// Watch a room.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Store`](crate::BloomcraftError::Store) if
    /// the subscription cannot be registered.
    pub async fn subscribe(&self, room_id: &RoomId) -> Result<RoomSubscription> {
        let inner = self.store.subscribe(&StorePath::room(room_id)).await?;
        debug!(room = %room_id, "subscribed to room");
        Ok(RoomSubscription {
            room_id: room_id.clone(),
            inner,
        })
    }
}

impl fmt::Debug for RoomStoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomStoreAdapter")
            .field("clock", &self.clock)
            .field("sync_buffer", &self.sync_buffer)
            .finish()
    }
}

/// A watch on one room that yields only well-formed snapshots.
///
/// Absent, empty and malformed payloads are logged and skipped.
#[derive(Debug)]
pub struct RoomSubscription {
    room_id: RoomId,
    inner: Subscription,
}

impl RoomSubscription {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The next well-formed snapshot. `None` once the store stops
    /// delivering.
    ///
    /// # Cancel Safety
    ///
    /// Cancel-safe: a snapshot is only taken off the channel when it is
    /// either returned or discarded as malformed.
    pub async fn next_snapshot(&mut self) -> Option<RoomDocument> {
        loop {
            let value = self.inner.recv().await?;
            match RoomDocument::from_value(value) {
                Ok(room) => return Some(room),
                Err(e) => debug!(room = %self.room_id, "ignoring room payload: {e}"),
            }
        }
    }

    /// Stop watching the room.
    pub fn cancel(self) {
        self.inner.cancel();
    }
}
