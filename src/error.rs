//! Error types for the BloomCraft client.

use thiserror::Error;

use crate::error_codes::StoreErrorKind;
use crate::protocol::RoomId;

/// Errors that can occur when using the BloomCraft client.
#[derive(Debug, Error)]
pub enum BloomcraftError {
    /// A document store operation failed (network, permission, outage).
    #[error("store error: {message} ({kind:?})")]
    Store {
        /// Failure category reported by the backend.
        kind: StoreErrorKind,
        /// Backend-specific detail.
        message: String,
    },

    /// A room snapshot was not an object or lacked a required field.
    #[error("malformed room snapshot: {0}")]
    MalformedSnapshot(String),

    /// Failed to serialize or deserialize a room document fragment.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred (identity persistence).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background session loop is no longer running.
    #[error("session is not running")]
    NotRunning,

    /// Attempted a room operation before creating or joining a room.
    #[error("not in a room")]
    NotInRoom,

    /// Attempted to create or join a room while already in one.
    #[error("already in a room")]
    AlreadyInRoom,

    /// The requested room does not exist in the store.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// Creating or joining a room requires a non-empty player name.
    #[error("player name is required")]
    MissingPlayerName,

    /// Joining a room requires a non-empty room code.
    #[error("room code is required")]
    MissingRoomCode,
}

impl BloomcraftError {
    /// Shorthand for a [`BloomcraftError::Store`] error.
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self::Store {
            kind,
            message: message.into(),
        }
    }
}

/// A specialized [`Result`] type for BloomCraft client operations.
pub type Result<T> = std::result::Result<T, BloomcraftError>;
