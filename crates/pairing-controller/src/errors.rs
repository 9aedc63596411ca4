//! Pairing Controller error types.
//!
//! Internal details are logged server-side; clients only ever see the
//! output of [`PcError::client_message`], carried in an `error` event.

use thiserror::Error;

/// Pairing Controller error type.
#[derive(Debug, Error)]
pub enum PcError {
    /// Shared state store operation failed (connection, timeout, protocol).
    #[error("Store error: {0}")]
    Store(String),

    /// Shared state store operation exceeded its deadline.
    #[error("Store operation timed out: {0}")]
    StoreTimeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller is already waiting in the queue.
    #[error("Already queued")]
    AlreadyQueued,

    /// Caller is already a participant of a live room.
    #[error("Already in a room")]
    AlreadyInRoom,

    /// Room does not exist (or was already closed).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Caller is not a participant of the room it named.
    #[error("Not a participant of room {0}")]
    NotAParticipant(String),

    /// Target client has no live session on this instance.
    #[error("Peer gone")]
    PeerGone,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PcError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            PcError::Store(_)
            | PcError::StoreTimeout(_)
            | PcError::Config(_)
            | PcError::Serialization(_)
            | PcError::Internal(_) => "An internal error occurred".to_string(),
            PcError::AlreadyQueued => "Already waiting for a partner".to_string(),
            PcError::AlreadyInRoom => "Already in a chat".to_string(),
            PcError::RoomNotFound(_) => "Room not found".to_string(),
            PcError::NotAParticipant(_) => "Not a participant of this room".to_string(),
            PcError::PeerGone => "Your partner is no longer connected".to_string(),
        }
    }
}

impl From<serde_json::Error> for PcError {
    fn from(err: serde_json::Error) -> Self {
        PcError::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = PcError::Store("connection refused at 10.0.0.3:6379".to_string());
        assert!(!store_err.client_message().contains("10.0.0.3"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let config_err = PcError::Config("missing REDIS_PASSWORD".to_string());
        assert!(!config_err.client_message().contains("REDIS_PASSWORD"));
    }

    #[test]
    fn test_benign_errors_keep_their_wording() {
        assert_eq!(PcError::AlreadyInRoom.client_message(), "Already in a chat");
        assert_eq!(
            PcError::AlreadyQueued.client_message(),
            "Already waiting for a partner"
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", PcError::Store("timeout".to_string())),
            "Store error: timeout"
        );
        assert_eq!(
            format!("{}", PcError::RoomNotFound("r-1".to_string())),
            "Room not found: r-1"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: PcError = bad.unwrap_err().into();
        assert!(matches!(err, PcError::Serialization(_)));
    }
}
