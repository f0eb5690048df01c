//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the only channel between the two clients
//! of a room: a hierarchical JSON document with whole-value writes,
//! non-destructive merges, point reads and change subscriptions. Anything
//! offering those four operations (a realtime database, a key-value service
//! behind a gateway, the in-process [`MemoryStore`](crate::stores::MemoryStore))
//! can back a game session.
//!
//! # Implementing a Custom Store
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use bloomcraft_client::error::Result;
//! use bloomcraft_client::store::{DocumentStore, StorePath, Subscription};
//! use serde_json::{Map, Value};
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl DocumentStore for MyStore {
//!     async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
//!         // Replace the value at `path`
//!         todo!()
//!     }
//!
//!     async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
//!         // Read the value at `path`, `None` when absent
//!         todo!()
//!     }
//!
//!     async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
//!         // Write each field under `path`, leaving other fields untouched
//!         todo!()
//!     }
//!
//!     async fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
//!         // Deliver the value at `path` now and after every change
//!         todo!()
//!     }
//! }
//! ```

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{PlayerId, RoomId};

/// Top-level collection holding every room.
pub const ROOMS_ROOT: &str = "rooms";

// ── Paths ───────────────────────────────────────────────────────────

/// A `/`-separated location inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// Build a path from raw segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// `rooms/<room_id>`
    pub fn room(room_id: &RoomId) -> Self {
        Self::new([ROOMS_ROOT, room_id.as_str()])
    }

    /// `rooms/<room_id>/<player_id>`
    pub fn player(room_id: &RoomId, player_id: &PlayerId) -> Self {
        Self::room(room_id).child(player_id.as_str())
    }

    /// This path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether `self` equals `other` or lies above it.
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

// ── Store contract ──────────────────────────────────────────────────

/// A shared hierarchical JSON document.
///
/// Every method may fail with [`BloomcraftError::Store`](crate::BloomcraftError::Store).
/// Callers treat such failures as final for that attempt; nothing is retried.
///
/// # Delivery guarantees
///
/// Subscribers observe values in the order of a single global sequence of
/// writes, but may skip intermediate values. A subscriber also observes the
/// writes it issued itself.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Replace the value at `path`. Writing `null` removes it.
    async fn set(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Read the value at `path`, `None` when nothing is stored there.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Write each field as a child of `path`, leaving other children in
    /// place. A `null` field removes that child. Missing parents are created.
    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()>;

    /// Watch `path`. The current value is delivered first, then the new
    /// value after every change beneath it (`null` once it is removed).
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription>;
}

// ── Subscription handle ─────────────────────────────────────────────

type CancelFn = Box<dyn FnOnce() + Send + Sync>;

/// A live watch on a store path.
///
/// Yields the full value at the watched path after each change. Dropping the
/// handle (or calling [`cancel`](Subscription::cancel)) unregisters it.
///
/// # Cancel Safety
///
/// [`recv`](Subscription::recv) is cancel-safe and may be used inside
/// `tokio::select!`.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
    on_cancel: Option<CancelFn>,
}

impl Subscription {
    /// Wrap a value channel. `on_cancel` runs once when the handle is
    /// cancelled or dropped.
    pub fn new(
        rx: mpsc::UnboundedReceiver<Value>,
        on_cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Receive the next value. `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Stop watching.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}
