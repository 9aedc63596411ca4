//! Shared State Store adapter.
//!
//! The queue, the room registry, and the global counters live in an
//! external key/value store so that every instance of the controller sees
//! the same state. [`SharedStore`] is the seam: [`RedisStore`] is the
//! production backend, [`MemoryStore`] backs tests and single-node
//! development with identical semantics.
//!
//! # Key layout (Redis backend)
//!
//! | Key | Type | Content | TTL |
//! |---|---|---|---|
//! | `queue:waiting` | sorted set | member = JSON `{userId, timestamp}`, score = timestamp (ms) | none |
//! | `rooms:active` | set | room-id strings | none |
//! | `room:data:<roomId>` | string | JSON room record | 3600 s |
//! | `user:room:<userId>` | string | room-id | 3600 s |
//! | `stats:global` | hash | counter name → integer | none |
//!
//! The one-hour TTLs are a crash-recovery backstop: no signaling session
//! lasts that long, so stale state self-evicts.

mod lua_scripts;
mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::errors::PcError;
use async_trait::async_trait;
use common::types::{ClientId, RoomId};
use serde::{Deserialize, Serialize};

/// Sorted-set key holding the FIFO waiting queue.
pub const QUEUE_KEY: &str = "queue:waiting";

/// Set key indexing the active rooms.
pub const ACTIVE_ROOMS_KEY: &str = "rooms:active";

/// Hash key holding the global counters.
pub const STATS_KEY: &str = "stats:global";

/// Counter field tracking the all-time number of rooms created.
pub const TOTAL_ROOMS_COUNTER: &str = "totalRooms";

/// Crash-recovery TTL for room payloads and user→room mappings.
pub const ROOM_TTL_SECONDS: u64 = 3600;

/// Key for a room payload.
#[must_use]
pub fn room_data_key(room_id: RoomId) -> String {
    format!("room:data:{room_id}")
}

/// Key for a user→room mapping.
#[must_use]
pub fn user_room_key(user_id: ClientId) -> String {
    format!("user:room:{user_id}")
}

/// One waiting client's entry in the FIFO pool.
///
/// Serialized as the sorted-set member, so the field set here is the exact
/// wire shape stored in `queue:waiting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// The waiting client (equals its connection id).
    pub user_id: ClientId,
    /// Enqueue time, milliseconds since the epoch. Doubles as the score.
    pub timestamp: i64,
}

impl QueueEntry {
    /// Entry for `user_id` stamped with the current time.
    #[must_use]
    pub fn now(user_id: ClientId) -> Self {
        Self {
            user_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Room lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Closed,
}

/// A room record binding exactly two clients for one signaling session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: RoomId,
    /// The two participants. Order carries no meaning.
    pub users: [ClientId; 2],
    /// Creation time, milliseconds since the epoch.
    pub created_at: i64,
    pub status: RoomStatus,
}

impl RoomRecord {
    /// Whether `user_id` is one of the two participants.
    #[must_use]
    pub fn has_participant(&self, user_id: ClientId) -> bool {
        self.users.contains(&user_id)
    }

    /// The other participant, or `None` if `user_id` is not in the room.
    #[must_use]
    pub fn peer_of(&self, user_id: ClientId) -> Option<ClientId> {
        match self.users {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The entry was added; `position` is the queue size after the add,
    /// 1-based.
    Queued { position: u64 },
    /// The user already has a queue entry; nothing was written.
    AlreadyQueued,
    /// The user has a live user→room mapping; nothing was written.
    InRoom,
}

/// Operations the matching layer needs from the shared store.
///
/// Every method is a single atomic step at the store level: multi-entity
/// operations (room creation, teardown) are composed - and rolled back on
/// failure - by the [`Matcher`](crate::matcher::Matcher), not here.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// Add `entry` to the waiting queue unless its user is already queued
    /// or already mapped to a room. The membership checks and the insert
    /// are atomic.
    async fn queue_push(&self, entry: &QueueEntry) -> Result<EnqueueOutcome, PcError>;

    /// Remove and return the entry with the lowest score. `None` when the
    /// queue is empty.
    async fn queue_pop_oldest(&self) -> Result<Option<QueueEntry>, PcError>;

    /// Remove the entry belonging to `user_id`. Returns whether an entry
    /// was present. Idempotent; O(queue size).
    async fn queue_remove(&self, user_id: ClientId) -> Result<bool, PcError>;

    /// Whether `user_id` currently has a queue entry. O(queue size).
    async fn queue_contains(&self, user_id: ClientId) -> Result<bool, PcError>;

    /// Current queue size.
    async fn queue_len(&self) -> Result<u64, PcError>;

    /// Write a room payload (with the crash-recovery TTL).
    async fn room_write(&self, room: &RoomRecord) -> Result<(), PcError>;

    /// Read a room payload.
    async fn room_read(&self, room_id: RoomId) -> Result<Option<RoomRecord>, PcError>;

    /// Delete a room payload. Idempotent.
    async fn room_delete(&self, room_id: RoomId) -> Result<(), PcError>;

    /// Point `user_id` at `room_id` (with the crash-recovery TTL).
    async fn user_room_set(&self, user_id: ClientId, room_id: RoomId) -> Result<(), PcError>;

    /// The room `user_id` is mapped to, if any.
    async fn user_room_get(&self, user_id: ClientId) -> Result<Option<RoomId>, PcError>;

    /// Drop the user→room mapping. Idempotent.
    async fn user_room_clear(&self, user_id: ClientId) -> Result<(), PcError>;

    /// Add a room to the active index.
    async fn active_room_add(&self, room_id: RoomId) -> Result<(), PcError>;

    /// Remove a room from the active index. Idempotent.
    async fn active_room_remove(&self, room_id: RoomId) -> Result<(), PcError>;

    /// Number of rooms in the active index.
    async fn active_room_count(&self) -> Result<u64, PcError>;

    /// Increment a global counter and return the new value.
    async fn counter_incr(&self, name: &str) -> Result<u64, PcError>;

    /// Read a global counter (0 when absent).
    async fn counter_get(&self, name: &str) -> Result<u64, PcError>;
}
