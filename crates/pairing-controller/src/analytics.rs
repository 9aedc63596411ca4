//! Fire-and-forget durable audit of room lifecycle.
//!
//! The analytics store exists for offline reporting only: writes are
//! queued in-process and flushed by a background task, and a failing or
//! absent database never blocks - or even fails - a signaling operation.
//!
//! # Overflow policy
//!
//! The queue is bounded. When full, the oldest pending event is dropped to
//! make room for the newest one, on the theory that recent history is the
//! more valuable half of an already-degraded record.

use chrono::{DateTime, Utc};
use common::types::{ClientId, RoomId};
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum number of pending audit events.
const AUDIT_QUEUE_CAPACITY: usize = 256;

/// A room lifecycle event bound for the analytics store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    RoomCreated {
        room_id: RoomId,
        users: [ClientId; 2],
        created_at: DateTime<Utc>,
    },
    RoomClosed {
        room_id: RoomId,
        closed_at: DateTime<Utc>,
    },
}

struct Shared {
    queue: Mutex<VecDeque<AuditEvent>>,
    notify: Notify,
}

/// Handle for enqueueing audit events.
///
/// A disabled recorder (analytics off) accepts and discards every event,
/// so call sites never need to branch.
#[derive(Clone, Default)]
pub struct AnalyticsRecorder {
    shared: Option<Arc<Shared>>,
}

impl AnalyticsRecorder {
    /// A recorder that drops everything (analytics disabled).
    #[must_use]
    pub fn disabled() -> Self {
        Self { shared: None }
    }

    /// Spawn the background writer and return a recorder feeding it.
    ///
    /// The writer drains remaining events after cancellation before
    /// exiting, so a graceful shutdown flushes the tail of the audit log.
    pub fn spawn(pool: PgPool, cancel_token: CancellationToken) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(AUDIT_QUEUE_CAPACITY)),
            notify: Notify::new(),
        });

        let writer_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            run_writer(pool, writer_shared, cancel_token).await;
        });

        (
            Self {
                shared: Some(shared),
            },
            task,
        )
    }

    /// Enqueue an event. Never blocks; drops the oldest pending event on
    /// overflow.
    pub fn record(&self, event: AuditEvent) {
        let Some(shared) = &self.shared else {
            return;
        };

        {
            let mut queue = match shared.queue.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            if queue.len() >= AUDIT_QUEUE_CAPACITY {
                let dropped = queue.pop_front();
                warn!(
                    target: "pc.analytics",
                    dropped = ?dropped,
                    "Audit queue full, dropping oldest event"
                );
            }
            queue.push_back(event);
        }
        shared.notify.notify_one();
    }

    #[cfg(test)]
    fn detached() -> Self {
        Self {
            shared: Some(Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(AUDIT_QUEUE_CAPACITY)),
                notify: Notify::new(),
            })),
        }
    }

    #[cfg(test)]
    fn pending(&self) -> Vec<AuditEvent> {
        self.shared
            .as_ref()
            .map(|s| s.queue.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Create the analytics tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rooms (
            id UUID PRIMARY KEY,
            user1 TEXT NOT NULL,
            user2 TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            closed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn run_writer(pool: PgPool, shared: Arc<Shared>, cancel_token: CancellationToken) {
    debug!(target: "pc.analytics", "Analytics writer started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                drain(&pool, &shared).await;
                break;
            }
            () = shared.notify.notified() => {
                drain(&pool, &shared).await;
            }
        }
    }

    info!(target: "pc.analytics", "Analytics writer stopped");
}

async fn drain(pool: &PgPool, shared: &Shared) {
    loop {
        let event = {
            let mut queue = match shared.queue.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.pop_front()
        };

        let Some(event) = event else { break };

        if let Err(e) = write_event(pool, &event).await {
            // Best effort only: log and move on, never surface upstream.
            warn!(
                target: "pc.analytics",
                error = %e,
                event = ?event,
                "Failed to write audit event"
            );
        }
    }
}

async fn write_event(pool: &PgPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    match event {
        AuditEvent::RoomCreated {
            room_id,
            users,
            created_at,
        } => {
            sqlx::query(
                r#"
                INSERT INTO rooms (id, user1, user2, status, created_at)
                VALUES ($1, $2, $3, 'active', $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(room_id.0)
            .bind(users[0].to_string())
            .bind(users[1].to_string())
            .bind(created_at)
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO counters (name, value)
                VALUES ('rooms_created', 1)
                ON CONFLICT (name) DO UPDATE SET value = counters.value + 1
                "#,
            )
            .execute(pool)
            .await?;
        }
        AuditEvent::RoomClosed { room_id, closed_at } => {
            sqlx::query(
                r#"
                UPDATE rooms
                SET status = 'closed', closed_at = $2
                WHERE id = $1
                "#,
            )
            .bind(room_id.0)
            .bind(closed_at)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
