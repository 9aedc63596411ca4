//! Process-wide registry mapping connected clients to their sessions.
//!
//! The router is the single place that knows whether a peer still has a
//! live session on this instance. Senders address peers by [`ClientId`]
//! only; the fact that the peer may have disconnected between pairing and
//! delivery is absorbed here and surfaced as [`PcError::PeerGone`].

use crate::errors::PcError;
use crate::session::{SessionHandle, SessionMessage};
use common::types::ClientId;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Concurrent `ClientId → SessionHandle` map.
#[derive(Default)]
pub struct Router {
    sessions: DashMap<ClientId, SessionHandle>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned session.
    pub fn register(&self, handle: SessionHandle) {
        let client_id = handle.client_id();
        self.sessions.insert(client_id, handle);
        debug!(target: "pc.router", client_id = %client_id, "Session registered");
    }

    /// Remove a session. Idempotent; returns whether it was present.
    pub fn unregister(&self, client_id: ClientId) -> bool {
        let removed = self.sessions.remove(&client_id).is_some();
        if removed {
            debug!(target: "pc.router", client_id = %client_id, "Session unregistered");
        }
        removed
    }

    /// Whether a client has a live session on this instance.
    #[must_use]
    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.sessions.contains_key(&client_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Enqueue a message on the target's mailbox.
    ///
    /// Overflow policy: droppable messages (ICE-candidate relays) are
    /// discarded silently; overflow on anything else means the target is
    /// not draining its mailbox, so it is disconnected.
    ///
    /// # Errors
    ///
    /// [`PcError::PeerGone`] when the target has no live session here (or
    /// just lost it to the overflow policy).
    pub fn deliver(&self, target: ClientId, message: SessionMessage) -> Result<(), PcError> {
        let Some(handle) = self.sessions.get(&target) else {
            return Err(PcError::PeerGone);
        };

        match handle.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                if message.is_droppable() {
                    debug!(
                        target: "pc.router",
                        client_id = %target,
                        "Mailbox full, dropping best-effort frame"
                    );
                    Ok(())
                } else {
                    warn!(
                        target: "pc.router",
                        client_id = %target,
                        "Mailbox overflow on critical frame, disconnecting peer"
                    );
                    handle.cancel();
                    Err(PcError::PeerGone)
                }
            }
            Err(TrySendError::Closed(_)) => Err(PcError::PeerGone),
        }
    }
}
