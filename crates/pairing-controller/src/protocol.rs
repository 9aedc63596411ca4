//! Wire protocol for the signaling channel.
//!
//! Messages are JSON objects exchanged as named events:
//!
//! ```json
//! { "event": "offer", "data": { "offer": { ... }, "roomId": "..." } }
//! ```
//!
//! The adjacently-tagged representation keeps the event name out of the
//! payload, which is what browser clients expect. Relay payloads (SDP
//! bodies, ICE candidates) are kept as raw [`serde_json::Value`] - the
//! server forwards them verbatim and never inspects their contents.

use common::types::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An ICE-server descriptor handed to clients on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// STUN/TURN URLs for this server entry.
    pub urls: Vec<String>,
    /// TURN username, absent for plain STUN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential, absent for plain STUN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Request a chat partner.
    FindPartner,

    /// Session-description offer, relayed to the peer.
    #[serde(rename_all = "camelCase")]
    Offer { offer: Value, room_id: RoomId },

    /// Session-description answer, relayed to the peer.
    #[serde(rename_all = "camelCase")]
    Answer { answer: Value, room_id: RoomId },

    /// ICE candidate, relayed to the peer.
    #[serde(rename_all = "camelCase")]
    IceCandidate { candidate: Value, room_id: RoomId },

    /// Leave the current chat.
    LeaveChat,

    /// Leave the current chat and look for a new partner shortly after.
    SkipPartner,
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::FindPartner => "find-partner",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::IceCandidate { .. } => "ice-candidate",
            ClientEvent::LeaveChat => "leave-chat",
            ClientEvent::SkipPartner => "skip-partner",
        }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// ICE-server configuration, sent once per connection.
    IceServers(Vec<IceServer>),

    /// No partner available yet; the caller was enqueued.
    Waiting { message: String },

    /// Queue size after enqueue, 1-based.
    QueueUpdate { position: u64 },

    /// A room was created for the caller and a partner.
    #[serde(rename_all = "camelCase")]
    Matched { room_id: RoomId, is_initiator: bool },

    /// Relayed offer from the peer.
    #[serde(rename_all = "camelCase")]
    Offer { offer: Value, room_id: RoomId },

    /// Relayed answer from the peer.
    #[serde(rename_all = "camelCase")]
    Answer { answer: Value, room_id: RoomId },

    /// Relayed ICE candidate from the peer.
    #[serde(rename_all = "camelCase")]
    IceCandidate { candidate: Value, room_id: RoomId },

    /// The partner left the chat.
    PartnerLeft { message: String },

    /// The partner's connection dropped.
    PartnerDisconnected { message: String },

    /// Acknowledges the caller's own leave.
    LeftChat { message: String },

    /// Generic error report.
    Error { message: String },
}

impl ServerEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::IceServers(_) => "ice-servers",
            ServerEvent::Waiting { .. } => "waiting",
            ServerEvent::QueueUpdate { .. } => "queue-update",
            ServerEvent::Matched { .. } => "matched",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::PartnerLeft { .. } => "partner-left",
            ServerEvent::PartnerDisconnected { .. } => "partner-disconnected",
            ServerEvent::LeftChat { .. } => "left-chat",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Whether this event may be dropped when the receiver's outbound
    /// queue is full. ICE candidates are best-effort; everything else is
    /// critical and overflow forces a disconnect instead.
    #[must_use]
    pub fn is_droppable(&self) -> bool {
        matches!(self, ServerEvent::IceCandidate { .. })
    }

    /// Convenience constructor for `error` events.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}
