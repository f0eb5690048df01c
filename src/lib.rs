//! # BloomCraft Client
//!
//! Room synchronization and game-state reconciliation for BloomCraft, a
//! two-player race to grow a plant by collecting sun, water, soil and food.
//!
//! Two clients meet in a room stored in a shared document store. Each writes
//! only its own player record and watches the whole room; the
//! [`Reconciler`] turns every room snapshot into lobby, start, countdown,
//! stage, winner and rematch events exactly once per transition.
//!
//! ## Features
//!
//! - **Store-agnostic**: implement [`DocumentStore`] for any backend with
//!   set/get/merge/subscribe
//! - **In-memory store built in**: the default `memory-store` feature provides
//!   [`MemoryStore`] with failure injection
//! - **Pure core**: [`Reconciler`] maps `(state, snapshot)` to effects and is
//!   testable without a store or runtime
//! - **Event-driven**: a [`GameClient`] session emits typed [`GameEvent`]s
//!   on a channel
//!
//! ## Quick Start
//!
//! ```rust
//! use bloomcraft_client::{GameClient, GameConfig, GameEvent, MemoryStore, PlayerId};
//!
//! # async fn run() -> bloomcraft_client::Result<()> {
//! let store = MemoryStore::new();
//! let (host, mut host_events) =
//!     GameClient::start(store.clone(), PlayerId::new("p_hana0001_k2"), GameConfig::new("Hana"));
//! host.create_room()?;
//!
//! if let Some(GameEvent::RoomCreated { room_id }) = host_events.recv().await {
//!     let (guest, _guest_events) =
//!         GameClient::start(store, PlayerId::new("p_gil00001_k3"), GameConfig::new("Gil"));
//!     guest.join_room(room_id.as_str())?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod identity;
pub mod progress;
pub mod protocol;
pub mod reconciler;
pub mod rooms;
pub mod store;
pub mod stores;

// Re-export primary types for ergonomic imports.
pub use client::{GameClient, GameConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BloomcraftError, Result};
pub use error_codes::StoreErrorKind;
pub use event::{CountdownTick, GameEvent, Side, UserAction};
pub use protocol::{Element, PlantKind, PlayerId, PlayerRecord, RoomDocument, RoomId, Stage};
pub use reconciler::{Effect, Phase, Reconciler, Role};
pub use store::{DocumentStore, StorePath, Subscription};

#[cfg(feature = "memory-store")]
pub use stores::MemoryStore;
