//! Document store backends.
//!
//! This module provides concrete [`DocumentStore`](crate::store::DocumentStore)
//! implementations behind feature gates:
//!
//! | Feature        | Store           |
//! |----------------|-----------------|
//! | `memory-store` | [`MemoryStore`] |
//!
//! # Example
//!
//! ```rust
//! # async fn example() -> bloomcraft_client::error::Result<()> {
//! use bloomcraft_client::store::{DocumentStore, StorePath};
//! use bloomcraft_client::stores::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let path = StorePath::new(["rooms", "room_abc123"]);
//! let mut watch = store.subscribe(&path).await?;
//! store.set(&path, serde_json::json!({ "createdAt": 1, "gameStarted": false })).await?;
//!
//! // The current value (absent) arrives first, then the write.
//! assert!(watch.recv().await.unwrap().is_null());
//! assert_eq!(watch.recv().await.unwrap()["gameStarted"], false);
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "memory-store")]
pub mod memory;

#[cfg(feature = "memory-store")]
pub use memory::MemoryStore;
