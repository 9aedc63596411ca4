//! Common data types for Switchboard components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one client connection.
///
/// Assigned by the transport gateway when the connection is accepted and
/// valid for the life of that connection only. Reconnecting yields a fresh
/// id, so a `ClientId` never outlives its WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a signaling room.
///
/// A v4 UUID carries 122 random bits, which is enough that collision
/// handling is not needed anywhere in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub Uuid);

impl RoomId {
    /// Create a new random room ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn test_room_id_unique() {
        assert_ne!(RoomId::new(), RoomId::new());
    }

    #[test]
    fn test_ids_serialize_as_plain_uuid_strings() {
        let id = ClientId::new();
        let json = serde_json::to_string(&id).unwrap();
        // Newtype structs serialize as their inner value: a hyphenated uuid.
        assert_eq!(json, format!("\"{}\"", id.0));

        let parsed: ClientId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_display_matches_inner_uuid() {
        let id = RoomId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
