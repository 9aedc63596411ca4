//! Per-connection session layer.
//!
//! Each WebSocket connection gets one [`SessionActor`]: a tokio task that
//! owns the connection's state machine and mediates every matcher
//! interaction for it. All mutations of a session's state happen inside
//! its own task, so no session-internal locking exists anywhere.
//!
//! The pure transition logic lives in [`state`]; [`actor`] is the async
//! shell that executes the decisions.

pub mod actor;
pub mod state;

pub use actor::{PartnerGoneReason, SessionActor, SessionHandle, SessionMessage};
pub use state::SessionState;

/// Capacity of the per-connection outbound frame queue.
///
/// When full, ICE-candidate relays are dropped (best-effort) and any other
/// frame forces a disconnect - critical frames must never be silently
/// lost.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Capacity of the session actor's mailbox.
pub const SESSION_MAILBOX_CAPACITY: usize = 128;
