//! Redis-backed [`SharedStore`] implementation.
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is designed to be cloned cheaply
//! and used concurrently. No locking is needed - the connection is cloned
//! for each operation.
//!
//! # Timeouts
//!
//! Connecting is bounded to 2 s; every operation is bounded to 5 s. An
//! expired deadline surfaces as [`PcError::StoreTimeout`] and is treated by
//! callers as a transient failure.

use super::lua_scripts;
use super::{
    room_data_key, user_room_key, EnqueueOutcome, QueueEntry, RoomRecord, SharedStore,
    ACTIVE_ROOMS_KEY, QUEUE_KEY, ROOM_TTL_SECONDS, STATS_KEY,
};
use crate::errors::PcError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ClientId, RoomId};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Deadline for establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for a single store operation.
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed shared store.
///
/// Cheaply cloneable - the underlying `MultiplexedConnection` is designed
/// for concurrent use without locking.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    queue_push_script: Script,
    queue_remove_script: Script,
}

impl RedisStore {
    /// Connect to the store.
    ///
    /// # Errors
    ///
    /// Returns `PcError::Store` if the URL is invalid or the connection
    /// cannot be established within the connect timeout.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, PcError> {
        // Note: never log the URL - it may embed the password.
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            error!(
                target: "pc.store.redis",
                error = %e,
                "Failed to open Redis client"
            );
            PcError::Store(format!("failed to open client: {e}"))
        })?;

        let connection = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            error!(target: "pc.store.redis", "Timed out connecting to Redis");
            PcError::StoreTimeout("connect".to_string())
        })?
        .map_err(|e| {
            error!(
                target: "pc.store.redis",
                error = %e,
                "Failed to connect to Redis"
            );
            PcError::Store(format!("failed to connect: {e}"))
        })?;

        Ok(Self {
            connection,
            queue_push_script: Script::new(lua_scripts::QUEUE_PUSH),
            queue_remove_script: Script::new(lua_scripts::QUEUE_REMOVE),
        })
    }

    /// Run one store operation under the per-operation deadline.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T, PcError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(
                    target: "pc.store.redis",
                    operation = op,
                    error = %e,
                    "Store operation failed"
                );
                Err(PcError::Store(format!("{op}: {e}")))
            }
            Err(_) => {
                warn!(
                    target: "pc.store.redis",
                    operation = op,
                    "Store operation timed out"
                );
                Err(PcError::StoreTimeout(op.to_string()))
            }
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn queue_push(&self, entry: &QueueEntry) -> Result<EnqueueOutcome, PcError> {
        let member = serde_json::to_string(entry)?;
        let mut conn = self.connection.clone();

        let result: i64 = self
            .timed(
                "queue_push",
                self.queue_push_script
                    .key(QUEUE_KEY)
                    .key(user_room_key(entry.user_id))
                    .arg(&member)
                    .arg(entry.timestamp)
                    .arg(entry.user_id.to_string())
                    .invoke_async(&mut conn),
            )
            .await?;

        match result {
            -1 => Ok(EnqueueOutcome::InRoom),
            0 => Ok(EnqueueOutcome::AlreadyQueued),
            n if n > 0 => Ok(EnqueueOutcome::Queued {
                position: n as u64,
            }),
            n => Err(PcError::Store(format!(
                "queue_push: unexpected script result {n}"
            ))),
        }
    }

    async fn queue_pop_oldest(&self) -> Result<Option<QueueEntry>, PcError> {
        let mut conn = self.connection.clone();

        let popped: Vec<(String, f64)> = self
            .timed("queue_pop_oldest", conn.zpopmin(QUEUE_KEY, 1))
            .await?;

        match popped.into_iter().next() {
            Some((member, _score)) => {
                let entry: QueueEntry = serde_json::from_str(&member)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn queue_remove(&self, user_id: ClientId) -> Result<bool, PcError> {
        let mut conn = self.connection.clone();

        let removed: i64 = self
            .timed(
                "queue_remove",
                self.queue_remove_script
                    .key(QUEUE_KEY)
                    .arg(user_id.to_string())
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(removed == 1)
    }

    async fn queue_contains(&self, user_id: ClientId) -> Result<bool, PcError> {
        let mut conn = self.connection.clone();

        let members: Vec<String> = self
            .timed("queue_contains", conn.zrange(QUEUE_KEY, 0, -1))
            .await?;

        for member in members {
            let entry: QueueEntry = serde_json::from_str(&member)?;
            if entry.user_id == user_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn queue_len(&self) -> Result<u64, PcError> {
        let mut conn = self.connection.clone();
        self.timed("queue_len", conn.zcard(QUEUE_KEY)).await
    }

    async fn room_write(&self, room: &RoomRecord) -> Result<(), PcError> {
        let payload = serde_json::to_string(room)?;
        let mut conn = self.connection.clone();

        self.timed(
            "room_write",
            conn.set_ex(room_data_key(room.room_id), payload, ROOM_TTL_SECONDS),
        )
        .await
    }

    async fn room_read(&self, room_id: RoomId) -> Result<Option<RoomRecord>, PcError> {
        let mut conn = self.connection.clone();

        let payload: Option<String> = self
            .timed("room_read", conn.get(room_data_key(room_id)))
            .await?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn room_delete(&self, room_id: RoomId) -> Result<(), PcError> {
        let mut conn = self.connection.clone();
        self.timed("room_delete", conn.del(room_data_key(room_id)))
            .await
    }

    async fn user_room_set(&self, user_id: ClientId, room_id: RoomId) -> Result<(), PcError> {
        let mut conn = self.connection.clone();
        self.timed(
            "user_room_set",
            conn.set_ex(user_room_key(user_id), room_id.to_string(), ROOM_TTL_SECONDS),
        )
        .await
    }

    async fn user_room_get(&self, user_id: ClientId) -> Result<Option<RoomId>, PcError> {
        let mut conn = self.connection.clone();

        let value: Option<String> = self
            .timed("user_room_get", conn.get(user_room_key(user_id)))
            .await?;

        match value {
            Some(raw) => {
                let uuid = raw
                    .parse::<uuid::Uuid>()
                    .map_err(|e| PcError::Store(format!("user_room_get: bad room id: {e}")))?;
                Ok(Some(RoomId(uuid)))
            }
            None => Ok(None),
        }
    }

    async fn user_room_clear(&self, user_id: ClientId) -> Result<(), PcError> {
        let mut conn = self.connection.clone();
        self.timed("user_room_clear", conn.del(user_room_key(user_id)))
            .await
    }

    async fn active_room_add(&self, room_id: RoomId) -> Result<(), PcError> {
        let mut conn = self.connection.clone();
        self.timed(
            "active_room_add",
            conn.sadd(ACTIVE_ROOMS_KEY, room_id.to_string()),
        )
        .await
    }

    async fn active_room_remove(&self, room_id: RoomId) -> Result<(), PcError> {
        let mut conn = self.connection.clone();
        self.timed(
            "active_room_remove",
            conn.srem(ACTIVE_ROOMS_KEY, room_id.to_string()),
        )
        .await
    }

    async fn active_room_count(&self) -> Result<u64, PcError> {
        let mut conn = self.connection.clone();
        self.timed("active_room_count", conn.scard(ACTIVE_ROOMS_KEY))
            .await
    }

    async fn counter_incr(&self, name: &str) -> Result<u64, PcError> {
        let mut conn = self.connection.clone();
        self.timed("counter_incr", conn.hincr(STATS_KEY, name, 1))
            .await
    }

    async fn counter_get(&self, name: &str) -> Result<u64, PcError> {
        let mut conn = self.connection.clone();

        let value: Option<u64> = self.timed("counter_get", conn.hget(STATS_KEY, name)).await?;
        Ok(value.unwrap_or(0))
    }
}
