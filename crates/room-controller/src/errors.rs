//! Room Controller error types.
//!
//! Error types map to the wire `error` event codes returned to clients.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Room Controller error type.
///
/// Maps to wire error codes:
/// - `RoomNotFound`: `NOT_FOUND`
/// - `RoomFull`: `FULL`
/// - `NotHost`: `NOT_HOST`
/// - `Internal`: `INTERNAL`
#[derive(Debug, Error)]
pub enum RcError {
    /// Room code unknown among live rooms.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room is at guest capacity.
    #[error("Room at capacity: {0}")]
    RoomFull(String),

    /// Privileged operation attempted by a non-host.
    #[error("Not the room host: {0}")]
    NotHost(String),

    /// Internal error (channel failures, actor shutdown).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RcError::RoomNotFound(_) => "NOT_FOUND",
            RcError::RoomFull(_) => "FULL",
            RcError::NotHost(_) => "NOT_HOST",
            RcError::Internal(_) => "INTERNAL",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::RoomFull(_) => "Room is full".to_string(),
            RcError::NotHost(_) => "Only the host may do that".to_string(),
            RcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
