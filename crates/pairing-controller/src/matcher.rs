//! Matcher - the FIFO waiting queue and the room registry.
//!
//! The matcher is the sole writer of room records and user→room mappings.
//! Every successful pairing produces exactly one room, leaves neither user
//! in the queue, and publishes both user→room mappings before the session
//! layer is notified.
//!
//! # Concurrency
//!
//! The matcher holds no state of its own; it serializes through the shared
//! store's atomic operations. Two racing pairing attempts that pick the
//! same partner are resolved by the store's atomic pop: only one gets the
//! entry, the loser sees an empty queue and enqueues.
//!
//! Pairing can also race a partner's disconnect: the pop and the room
//! writes may land while the popped user's session is already draining.
//! The registry stays the source of truth for that window - sessions
//! reconcile against it on both ends (teardown closes any room the store
//! binds the user to; a `matched` notification is only committed while
//! the store still holds the membership), so a room whose participant is
//! gone is torn down in bounded time rather than lingering until the TTL.

use crate::analytics::{AnalyticsRecorder, AuditEvent};
use crate::errors::PcError;
use crate::store::{
    EnqueueOutcome, QueueEntry, RoomRecord, RoomStatus, SharedStore, TOTAL_ROOMS_COUNTER,
};
use chrono::{TimeZone, Utc};
use common::types::{ClientId, RoomId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Global matcher statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub active_rooms: u64,
    pub queue_size: u64,
    pub total_rooms: u64,
}

/// Result of a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// No partner was available; the caller is now waiting. `position` is
    /// the queue size after the enqueue, 1-based.
    Queued { position: u64 },
    /// A room was created. The caller is the initiator; `partner` is the
    /// dequeued waiter.
    Paired { room: RoomRecord, partner: ClientId },
}

/// Queue + room registry atop the shared store.
#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn SharedStore>,
    analytics: AnalyticsRecorder,
}

impl Matcher {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            analytics: AnalyticsRecorder::disabled(),
        }
    }

    /// Attach an analytics recorder for room lifecycle audit.
    #[must_use]
    pub fn with_analytics(mut self, analytics: AnalyticsRecorder) -> Self {
        self.analytics = analytics;
        self
    }

    /// Attempt to pair `caller` with the oldest waiting client.
    ///
    /// # Errors
    ///
    /// - [`PcError::AlreadyInRoom`] / [`PcError::AlreadyQueued`] when the
    ///   caller is not eligible.
    /// - Store errors for transient failures; on a failed room creation
    ///   both parties are re-enqueued before the error is returned.
    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn find_partner(&self, caller: ClientId) -> Result<PairingOutcome, PcError> {
        // Eligibility is checked, not assumed: the session layer keeps its
        // own state but a crashed or raced controller must not corrupt the
        // registry.
        if self.store.user_room_get(caller).await?.is_some() {
            return Err(PcError::AlreadyInRoom);
        }
        if self.store.queue_contains(caller).await? {
            return Err(PcError::AlreadyQueued);
        }

        let Some(partner_entry) = self.store.queue_pop_oldest().await? else {
            return self.enqueue(QueueEntry::now(caller)).await;
        };

        if partner_entry.user_id == caller {
            // A reconnect can leave the caller's own stale entry at the
            // head of the queue; discard it and wait like everyone else.
            return self.enqueue(QueueEntry::now(caller)).await;
        }

        match self.create_room(caller, partner_entry.user_id).await {
            Ok(room) => Ok(PairingOutcome::Paired {
                partner: partner_entry.user_id,
                room,
            }),
            Err(e) => {
                warn!(
                    target: "pc.matcher",
                    caller = %caller,
                    partner = %partner_entry.user_id,
                    error = %e,
                    "Room creation failed, re-enqueueing both parties"
                );
                // Caller first with a fresh stamp, then the partner with
                // its original stamp so it keeps its place in line.
                if let Err(re) = self.store.queue_push(&QueueEntry::now(caller)).await {
                    warn!(target: "pc.matcher", error = %re, "Failed to re-enqueue caller");
                }
                if let Err(re) = self.store.queue_push(&partner_entry).await {
                    warn!(target: "pc.matcher", error = %re, "Failed to re-enqueue partner");
                }
                Err(e)
            }
        }
    }

    /// Remove `user_id` from the waiting queue. Idempotent.
    pub async fn remove_from_queue(&self, user_id: ClientId) -> Result<bool, PcError> {
        self.store.queue_remove(user_id).await
    }

    /// Re-add a user to the queue with a fresh timestamp and return its
    /// 1-based position. Used when a freshly matched partner turns out to
    /// be gone.
    pub async fn requeue(&self, user_id: ClientId) -> Result<u64, PcError> {
        match self.enqueue(QueueEntry::now(user_id)).await? {
            PairingOutcome::Queued { position } => Ok(position),
            PairingOutcome::Paired { .. } => {
                Err(PcError::Internal("requeue produced a pairing".to_string()))
            }
        }
    }

    /// Look up a room by id.
    pub async fn room(&self, room_id: RoomId) -> Result<Option<RoomRecord>, PcError> {
        self.store.room_read(room_id).await
    }

    /// Look up the room a user participates in, if any.
    pub async fn room_for_user(&self, user_id: ClientId) -> Result<Option<RoomRecord>, PcError> {
        match self.store.user_room_get(user_id).await? {
            Some(room_id) => self.store.room_read(room_id).await,
            None => Ok(None),
        }
    }

    /// The peer of `user_id` in `room_id`.
    ///
    /// # Errors
    ///
    /// [`PcError::RoomNotFound`] if the room is gone,
    /// [`PcError::NotAParticipant`] if the caller is not in it.
    pub async fn peer_of(&self, room_id: RoomId, user_id: ClientId) -> Result<ClientId, PcError> {
        let room = self
            .store
            .room_read(room_id)
            .await?
            .ok_or_else(|| PcError::RoomNotFound(room_id.to_string()))?;

        room.peer_of(user_id)
            .ok_or_else(|| PcError::NotAParticipant(room_id.to_string()))
    }

    /// Tear a room down: both user→room mappings, the payload, and the
    /// active-set entry. Returns `None` when the room was already gone, so
    /// a second close is a harmless no-op.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn close_room(&self, room_id: RoomId) -> Result<Option<RoomRecord>, PcError> {
        let Some(room) = self.store.room_read(room_id).await? else {
            return Ok(None);
        };

        for user in room.users {
            // Clear only mappings that still point at this room - the user
            // may already have been paired into a newer one.
            match self.store.user_room_get(user).await {
                Ok(Some(mapped)) if mapped == room_id => {
                    if let Err(e) = self.store.user_room_clear(user).await {
                        warn!(
                            target: "pc.matcher",
                            user = %user,
                            error = %e,
                            "Failed to clear user-room mapping"
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(
                    target: "pc.matcher",
                    user = %user,
                    error = %e,
                    "Failed to read user-room mapping during close"
                ),
            }
        }

        self.store.room_delete(room_id).await?;
        if let Err(e) = self.store.active_room_remove(room_id).await {
            warn!(
                target: "pc.matcher",
                room_id = %room_id,
                error = %e,
                "Failed to remove room from active set"
            );
        }

        info!(target: "pc.matcher", room_id = %room_id, "Room closed");
        self.analytics.record(AuditEvent::RoomClosed {
            room_id,
            closed_at: Utc::now(),
        });

        Ok(Some(RoomRecord {
            status: RoomStatus::Closed,
            ..room
        }))
    }

    /// Current global statistics.
    pub async fn stats(&self) -> Result<Stats, PcError> {
        Ok(Stats {
            active_rooms: self.store.active_room_count().await?,
            queue_size: self.store.queue_len().await?,
            total_rooms: self.store.counter_get(TOTAL_ROOMS_COUNTER).await?,
        })
    }

    async fn enqueue(&self, entry: QueueEntry) -> Result<PairingOutcome, PcError> {
        match self.store.queue_push(&entry).await? {
            EnqueueOutcome::Queued { position } => Ok(PairingOutcome::Queued { position }),
            EnqueueOutcome::AlreadyQueued => Err(PcError::AlreadyQueued),
            EnqueueOutcome::InRoom => Err(PcError::AlreadyInRoom),
        }
    }

    /// Create a room for `caller` and `partner`: payload, both mappings,
    /// active-set entry, total counter. Partial writes are rolled back
    /// before the error is returned.
    ///
    /// The partner was dequeued a moment ago but its session may already
    /// be draining; the room is still created, and the partner's teardown
    /// (which checks the registry, not its own state) closes it if so.
    async fn create_room(
        &self,
        caller: ClientId,
        partner: ClientId,
    ) -> Result<RoomRecord, PcError> {
        let room = RoomRecord {
            room_id: RoomId::new(),
            users: [caller, partner],
            created_at: Utc::now().timestamp_millis(),
            status: RoomStatus::Active,
        };

        self.store.room_write(&room).await?;

        if let Err(e) = self.store.user_room_set(caller, room.room_id).await {
            self.unwind(&room, &[], false).await;
            return Err(e);
        }
        if let Err(e) = self.store.user_room_set(partner, room.room_id).await {
            self.unwind(&room, &[caller], false).await;
            return Err(e);
        }
        if let Err(e) = self.store.active_room_add(room.room_id).await {
            self.unwind(&room, &[caller, partner], false).await;
            return Err(e);
        }
        if let Err(e) = self.store.counter_incr(TOTAL_ROOMS_COUNTER).await {
            self.unwind(&room, &[caller, partner], true).await;
            return Err(e);
        }

        info!(
            target: "pc.matcher",
            room_id = %room.room_id,
            initiator = %caller,
            partner = %partner,
            "Room created"
        );
        self.analytics.record(AuditEvent::RoomCreated {
            room_id: room.room_id,
            users: room.users,
            created_at: Utc
                .timestamp_millis_opt(room.created_at)
                .single()
                .unwrap_or_else(Utc::now),
        });

        Ok(room)
    }

    /// Best-effort rollback of a partially created room. Failures are
    /// logged and left to the crash-recovery TTLs.
    async fn unwind(&self, room: &RoomRecord, mapped: &[ClientId], active_added: bool) {
        if active_added {
            if let Err(e) = self.store.active_room_remove(room.room_id).await {
                warn!(target: "pc.matcher", error = %e, "Rollback: active-set remove failed");
            }
        }
        for user in mapped {
            if let Err(e) = self.store.user_room_clear(*user).await {
                warn!(target: "pc.matcher", error = %e, user = %user, "Rollback: mapping clear failed");
            }
        }
        if let Err(e) = self.store.room_delete(room.room_id).await {
            warn!(target: "pc.matcher", error = %e, "Rollback: room delete failed");
        }
    }
}
