//! Pure session state machine.
//!
//! A client is at every moment in exactly one of `Idle`, `Queued`, or
//! `Paired`. The functions here map (state, inbound event) to a
//! [`Decision`] without performing any I/O, which makes every transition
//! table-testable. The async actor executes the decisions.

use common::types::RoomId;

/// Connection-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, neither waiting nor chatting.
    Idle,
    /// Waiting in the FIFO queue.
    Queued,
    /// Bound to a live room.
    Paired { room_id: RoomId },
}

impl SessionState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, SessionState::Queued)
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        matches!(self, SessionState::Paired { .. })
    }

    /// The bound room, when paired.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            SessionState::Paired { room_id } => Some(*room_id),
            _ => None,
        }
    }
}

/// What the actor should do with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the pairing flow (enqueue or match).
    StartPairing,
    /// Tell the caller it is still waiting; no state change.
    StillWaiting,
    /// Benign rejection: the caller is already in a chat.
    RejectAlreadyPaired,
    /// Validate room membership, then relay the payload to the peer.
    Relay { room_id: RoomId },
    /// Drop the event silently.
    Ignore,
    /// Leave the room: notify the peer, close it, acknowledge the caller.
    LeaveRoom { room_id: RoomId },
    /// Leave the waiting queue.
    LeaveQueue,
    /// Leave the room like [`Decision::LeaveRoom`], then re-pair after the
    /// cooperative delay.
    SkipRoom { room_id: RoomId },
}

/// `find-partner` transition.
#[must_use]
pub fn on_find_partner(state: SessionState) -> Decision {
    match state {
        SessionState::Idle => Decision::StartPairing,
        SessionState::Queued => Decision::StillWaiting,
        SessionState::Paired { .. } => Decision::RejectAlreadyPaired,
    }
}

/// `leave-chat` (and the disconnect path shares this shape).
#[must_use]
pub fn on_leave_chat(state: SessionState) -> Decision {
    match state {
        SessionState::Paired { room_id } => Decision::LeaveRoom { room_id },
        SessionState::Queued => Decision::LeaveQueue,
        SessionState::Idle => Decision::Ignore,
    }
}

/// `skip-partner` transition.
#[must_use]
pub fn on_skip_partner(state: SessionState) -> Decision {
    match state {
        SessionState::Paired { room_id } => Decision::SkipRoom { room_id },
        // Skipping while waiting or idle is client confusion; ignore it.
        SessionState::Queued | SessionState::Idle => Decision::Ignore,
    }
}

/// `offer` / `answer` / `ice-candidate` transition.
///
/// Signals outside a room are dropped silently - ICE candidates in
/// particular keep arriving during teardown. Membership in the *named*
/// room is validated by the actor against the registry.
#[must_use]
pub fn on_signal(state: SessionState) -> Decision {
    match state {
        SessionState::Paired { room_id } => Decision::Relay { room_id },
        SessionState::Queued | SessionState::Idle => Decision::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> SessionState {
        SessionState::Paired {
            room_id: RoomId::new(),
        }
    }

    #[test]
    fn test_find_partner_transitions() {
        assert_eq!(on_find_partner(SessionState::Idle), Decision::StartPairing);
        assert_eq!(on_find_partner(SessionState::Queued), Decision::StillWaiting);
        assert_eq!(on_find_partner(paired()), Decision::RejectAlreadyPaired);
    }

    #[test]
    fn test_leave_chat_transitions() {
        let state = paired();
        let Some(room_id) = state.room_id() else {
            unreachable!()
        };
        assert_eq!(on_leave_chat(state), Decision::LeaveRoom { room_id });
        assert_eq!(on_leave_chat(SessionState::Queued), Decision::LeaveQueue);
        assert_eq!(on_leave_chat(SessionState::Idle), Decision::Ignore);
    }

    #[test]
    fn test_skip_partner_transitions() {
        let state = paired();
        let Some(room_id) = state.room_id() else {
            unreachable!()
        };
        assert_eq!(on_skip_partner(state), Decision::SkipRoom { room_id });
        assert_eq!(on_skip_partner(SessionState::Queued), Decision::Ignore);
        assert_eq!(on_skip_partner(SessionState::Idle), Decision::Ignore);
    }

    #[test]
    fn test_signals_relay_only_when_paired() {
        let state = paired();
        let Some(room_id) = state.room_id() else {
            unreachable!()
        };
        assert_eq!(on_signal(state), Decision::Relay { room_id });
        assert_eq!(on_signal(SessionState::Queued), Decision::Ignore);
        assert_eq!(on_signal(SessionState::Idle), Decision::Ignore);
    }

    #[test]
    fn test_state_predicates_are_exclusive() {
        for state in [SessionState::Idle, SessionState::Queued, paired()] {
            let flags = [state.is_idle(), state.is_queued(), state.is_paired()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        }
    }
}
