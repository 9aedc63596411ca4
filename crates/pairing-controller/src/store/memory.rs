//! In-process [`SharedStore`] implementation.
//!
//! Backs tests and single-node development with the same semantics as the
//! Redis backend: FIFO ordering by (timestamp, insertion order), guarded
//! enqueue, idempotent removes. The crash-recovery TTLs are not simulated;
//! entries live until explicitly deleted.

use super::{EnqueueOutcome, QueueEntry, RoomRecord, SharedStore};
use crate::errors::PcError;
use async_trait::async_trait;
use common::types::{ClientId, RoomId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    /// Queue entries with their insertion sequence, kept sorted by
    /// (timestamp, sequence).
    queue: Vec<(QueueEntry, u64)>,
    /// Monotonic insertion counter for tie-breaking equal timestamps.
    next_seq: u64,
    rooms: HashMap<RoomId, RoomRecord>,
    user_rooms: HashMap<ClientId, RoomId>,
    active: HashSet<RoomId>,
    counters: HashMap<String, u64>,
}

/// In-memory shared store. Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn queue_push(&self, entry: &QueueEntry) -> Result<EnqueueOutcome, PcError> {
        let mut inner = self.inner.lock().await;

        if inner.user_rooms.contains_key(&entry.user_id) {
            return Ok(EnqueueOutcome::InRoom);
        }
        if inner.queue.iter().any(|(e, _)| e.user_id == entry.user_id) {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push((entry.clone(), seq));
        inner.queue.sort_by_key(|(e, s)| (e.timestamp, *s));

        Ok(EnqueueOutcome::Queued {
            position: inner.queue.len() as u64,
        })
    }

    async fn queue_pop_oldest(&self) -> Result<Option<QueueEntry>, PcError> {
        let mut inner = self.inner.lock().await;
        if inner.queue.is_empty() {
            return Ok(None);
        }
        let (entry, _) = inner.queue.remove(0);
        Ok(Some(entry))
    }

    async fn queue_remove(&self, user_id: ClientId) -> Result<bool, PcError> {
        let mut inner = self.inner.lock().await;
        let before = inner.queue.len();
        inner.queue.retain(|(e, _)| e.user_id != user_id);
        Ok(inner.queue.len() < before)
    }

    async fn queue_contains(&self, user_id: ClientId) -> Result<bool, PcError> {
        let inner = self.inner.lock().await;
        Ok(inner.queue.iter().any(|(e, _)| e.user_id == user_id))
    }

    async fn queue_len(&self) -> Result<u64, PcError> {
        let inner = self.inner.lock().await;
        Ok(inner.queue.len() as u64)
    }

    async fn room_write(&self, room: &RoomRecord) -> Result<(), PcError> {
        let mut inner = self.inner.lock().await;
        inner.rooms.insert(room.room_id, room.clone());
        Ok(())
    }

    async fn room_read(&self, room_id: RoomId) -> Result<Option<RoomRecord>, PcError> {
        let inner = self.inner.lock().await;
        Ok(inner.rooms.get(&room_id).cloned())
    }

    async fn room_delete(&self, room_id: RoomId) -> Result<(), PcError> {
        let mut inner = self.inner.lock().await;
        inner.rooms.remove(&room_id);
        Ok(())
    }

    async fn user_room_set(&self, user_id: ClientId, room_id: RoomId) -> Result<(), PcError> {
        let mut inner = self.inner.lock().await;
        inner.user_rooms.insert(user_id, room_id);
        Ok(())
    }

    async fn user_room_get(&self, user_id: ClientId) -> Result<Option<RoomId>, PcError> {
        let inner = self.inner.lock().await;
        Ok(inner.user_rooms.get(&user_id).copied())
    }

    async fn user_room_clear(&self, user_id: ClientId) -> Result<(), PcError> {
        let mut inner = self.inner.lock().await;
        inner.user_rooms.remove(&user_id);
        Ok(())
    }

    async fn active_room_add(&self, room_id: RoomId) -> Result<(), PcError> {
        let mut inner = self.inner.lock().await;
        inner.active.insert(room_id);
        Ok(())
    }

    async fn active_room_remove(&self, room_id: RoomId) -> Result<(), PcError> {
        let mut inner = self.inner.lock().await;
        inner.active.remove(&room_id);
        Ok(())
    }

    async fn active_room_count(&self) -> Result<u64, PcError> {
        let inner = self.inner.lock().await;
        Ok(inner.active.len() as u64)
    }

    async fn counter_incr(&self, name: &str) -> Result<u64, PcError> {
        let mut inner = self.inner.lock().await;
        let value = inner.counters.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn counter_get(&self, name: &str) -> Result<u64, PcError> {
        let inner = self.inner.lock().await;
        Ok(inner.counters.get(name).copied().unwrap_or(0))
    }
}
