//! `SessionActor` - one task per connected client.
//!
//! The actor owns the connection's [`SessionState`] and is the only thing
//! that mutates it. Inbound protocol events, pairing notifications from
//! peers, and the disconnect signal all arrive through one mailbox, so
//! transitions for a given client are totally ordered.
//!
//! # Lifecycle
//!
//! 1. Spawned by the gateway when the WebSocket is accepted
//! 2. Runs until the socket closes, a critical-frame overflow forces a
//!    disconnect, or the server shuts down (cancellation token)
//! 3. Teardown runs exactly once, even when a `leave-chat` races the
//!    disconnect

use crate::errors::PcError;
use crate::matcher::{Matcher, PairingOutcome};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::router::Router;
use crate::session::state::{self, Decision, SessionState};
use crate::session::SESSION_MAILBOX_CAPACITY;
use common::types::{ClientId, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Cooperative delay between a skip and the follow-up pairing attempt.
/// Gives the skipped peer time to observe `partner-left` before the
/// skipper can be matched again.
pub const SKIP_REPAIR_DELAY: Duration = Duration::from_millis(500);

const WAITING_MESSAGE: &str = "Waiting for a partner...";
const PARTNER_LEFT_MESSAGE: &str = "Your partner left the chat";
const PARTNER_DISCONNECTED_MESSAGE: &str = "Your partner disconnected";
const LEFT_CHAT_MESSAGE: &str = "You left the chat";

/// Why a partner is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerGoneReason {
    /// The partner left or skipped.
    Left,
    /// The partner's connection dropped.
    Disconnected,
}

/// Messages accepted by a session's mailbox.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// Inbound protocol event from this client's own socket.
    FromClient(ClientEvent),
    /// This client was matched by a peer's pairing flow.
    Matched { room_id: RoomId },
    /// Verbatim signaling payload relayed from the peer.
    Relay(ServerEvent),
    /// The peer ended the session (and already closed the room).
    PartnerGone { reason: PartnerGoneReason },
    /// The socket closed; run teardown exactly once.
    Disconnected,
}

impl SessionMessage {
    /// Whether the router may drop this message when the target's mailbox
    /// is full.
    #[must_use]
    pub fn is_droppable(&self) -> bool {
        matches!(self, SessionMessage::Relay(event) if event.is_droppable())
    }
}

/// Handle to a [`SessionActor`].
#[derive(Clone)]
pub struct SessionHandle {
    client_id: ClientId,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// The connection this session belongs to.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Enqueue a message, waiting for mailbox space.
    pub async fn send(&self, message: SessionMessage) -> Result<(), PcError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| PcError::PeerGone)
    }

    /// Enqueue a message without waiting. Used by the router, which
    /// applies the overflow policy itself.
    pub fn try_send(&self, message: SessionMessage) -> Result<(), TrySendError<SessionMessage>> {
        self.sender.try_send(message)
    }

    /// Force-disconnect this session.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the session was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Completes when the session is cancelled.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await;
    }
}

/// The per-connection actor.
pub struct SessionActor {
    client_id: ClientId,
    state: SessionState,
    matcher: Matcher,
    router: Arc<Router>,
    outbound: mpsc::Sender<ServerEvent>,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    /// Pending follow-up pairing after a skip; cleared on disconnect.
    skip_deadline: Option<Instant>,
    torn_down: bool,
}

impl SessionActor {
    /// Spawn a session actor. Returns a handle and the task join handle.
    ///
    /// `outbound` is the connection's bounded frame queue; the gateway's
    /// writer task drains it into the socket.
    pub fn spawn(
        client_id: ClientId,
        matcher: Matcher,
        router: Arc<Router>,
        outbound: mpsc::Sender<ServerEvent>,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_MAILBOX_CAPACITY);

        let actor = Self {
            client_id,
            state: SessionState::Idle,
            matcher,
            router,
            outbound,
            receiver,
            cancel_token: cancel_token.clone(),
            skip_deadline: None,
            torn_down: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            client_id,
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "pc.session", fields(client_id = %self.client_id))]
    async fn run(mut self) {
        debug!(target: "pc.session", client_id = %self.client_id, "Session started");

        loop {
            let deadline = self.skip_deadline;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.teardown().await;
                    break;
                }

                () = maybe_sleep(deadline), if deadline.is_some() => {
                    // The cooperative skip delay elapsed; look again.
                    self.skip_deadline = None;
                    if self.state.is_idle() {
                        self.start_pairing().await;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await {
                                break;
                            }
                        }
                        None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "pc.session", client_id = %self.client_id, "Session stopped");
    }

    /// Handle one message. Returns true when the actor should exit.
    async fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::FromClient(event) => {
                self.handle_client_event(event).await;
                false
            }

            SessionMessage::Matched { room_id } => {
                self.handle_matched(room_id).await;
                false
            }

            SessionMessage::Relay(event) => {
                if self.state.is_paired() {
                    self.emit(event);
                } else {
                    // Teardown window: the peer's frames may still be in
                    // flight after we left the room.
                    debug!(
                        target: "pc.session",
                        client_id = %self.client_id,
                        event = event.name(),
                        "Dropping relay outside a room"
                    );
                }
                false
            }

            SessionMessage::PartnerGone { reason } => {
                if self.state.is_paired() {
                    self.state = SessionState::Idle;
                    match reason {
                        PartnerGoneReason::Left => self.emit(ServerEvent::PartnerLeft {
                            message: PARTNER_LEFT_MESSAGE.to_string(),
                        }),
                        PartnerGoneReason::Disconnected => {
                            self.emit(ServerEvent::PartnerDisconnected {
                                message: PARTNER_DISCONNECTED_MESSAGE.to_string(),
                            });
                        }
                    }
                }
                false
            }

            SessionMessage::Disconnected => {
                self.teardown().await;
                true
            }
        }
    }

    async fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::FindPartner => match state::on_find_partner(self.state) {
                Decision::StartPairing => {
                    self.skip_deadline = None;
                    self.start_pairing().await;
                }
                Decision::StillWaiting => self.emit(ServerEvent::Waiting {
                    message: WAITING_MESSAGE.to_string(),
                }),
                Decision::RejectAlreadyPaired => {
                    self.emit(ServerEvent::error(PcError::AlreadyInRoom.client_message()));
                }
                _ => {}
            },

            ClientEvent::LeaveChat => match state::on_leave_chat(self.state) {
                Decision::LeaveRoom { room_id } => self.leave_room(room_id, true).await,
                Decision::LeaveQueue => self.leave_queue().await,
                _ => {}
            },

            ClientEvent::SkipPartner => match state::on_skip_partner(self.state) {
                Decision::SkipRoom { room_id } => {
                    self.leave_room(room_id, true).await;
                    self.skip_deadline = Some(Instant::now() + SKIP_REPAIR_DELAY);
                }
                _ => {}
            },

            ClientEvent::Offer { offer, room_id } => {
                self.signal(room_id, ServerEvent::Offer { offer, room_id })
                    .await;
            }
            ClientEvent::Answer { answer, room_id } => {
                self.signal(room_id, ServerEvent::Answer { answer, room_id })
                    .await;
            }
            ClientEvent::IceCandidate { candidate, room_id } => {
                self.signal(
                    room_id,
                    ServerEvent::IceCandidate { candidate, room_id },
                )
                .await;
            }
        }
    }

    /// Run the pairing flow out of the Idle state.
    async fn start_pairing(&mut self) {
        match self.matcher.find_partner(self.client_id).await {
            Ok(PairingOutcome::Queued { position }) => {
                self.state = SessionState::Queued;
                self.emit(ServerEvent::Waiting {
                    message: WAITING_MESSAGE.to_string(),
                });
                self.emit(ServerEvent::QueueUpdate { position });
            }

            Ok(PairingOutcome::Paired { room, partner }) => {
                // Notify the partner before committing locally; if it is
                // gone, the match never happened as far as anyone can see.
                match self.router.deliver(
                    partner,
                    SessionMessage::Matched {
                        room_id: room.room_id,
                    },
                ) {
                    Ok(()) => {
                        self.state = SessionState::Paired {
                            room_id: room.room_id,
                        };
                        self.emit(ServerEvent::Matched {
                            room_id: room.room_id,
                            is_initiator: true,
                        });
                    }
                    Err(_) => {
                        debug!(
                            target: "pc.session",
                            client_id = %self.client_id,
                            partner = %partner,
                            "Dequeued partner is gone, undoing the match"
                        );
                        if let Err(e) = self.matcher.close_room(room.room_id).await {
                            warn!(
                                target: "pc.session",
                                error = %e,
                                "Failed to close room after ghost match"
                            );
                        }
                        match self.matcher.requeue(self.client_id).await {
                            Ok(position) => {
                                self.state = SessionState::Queued;
                                self.emit(ServerEvent::Waiting {
                                    message: WAITING_MESSAGE.to_string(),
                                });
                                self.emit(ServerEvent::QueueUpdate { position });
                            }
                            Err(e) => {
                                warn!(
                                    target: "pc.session",
                                    error = %e,
                                    "Failed to requeue after ghost match"
                                );
                                self.state = SessionState::Idle;
                                self.emit(ServerEvent::error(e.client_message()));
                            }
                        }
                    }
                }
            }

            Err(e) => {
                if !matches!(e, PcError::AlreadyInRoom | PcError::AlreadyQueued) {
                    warn!(
                        target: "pc.session",
                        client_id = %self.client_id,
                        error = %e,
                        "Pairing attempt failed"
                    );
                }
                self.emit(ServerEvent::error(e.client_message()));
            }
        }
    }

    /// Leave a room: notify the peer, close the room, acknowledge the
    /// caller when `ack` is set.
    async fn leave_room(&mut self, room_id: RoomId, ack: bool) {
        match self.matcher.peer_of(room_id, self.client_id).await {
            Ok(peer) => {
                let _ = self.router.deliver(
                    peer,
                    SessionMessage::PartnerGone {
                        reason: PartnerGoneReason::Left,
                    },
                );
            }
            Err(PcError::RoomNotFound(_)) => {}
            Err(e) => warn!(
                target: "pc.session",
                client_id = %self.client_id,
                error = %e,
                "Peer lookup failed during leave"
            ),
        }

        match self.matcher.close_room(room_id).await {
            Ok(_) => {
                self.state = SessionState::Idle;
                if ack {
                    self.emit(ServerEvent::LeftChat {
                        message: LEFT_CHAT_MESSAGE.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    room_id = %room_id,
                    error = %e,
                    "Room close failed during leave"
                );
                // The peer was already notified; staying Paired would be
                // inconsistent. The store TTL reclaims whatever is left.
                self.state = SessionState::Idle;
                self.emit(ServerEvent::error(e.client_message()));
            }
        }
    }

    async fn leave_queue(&mut self) {
        match self.matcher.remove_from_queue(self.client_id).await {
            Ok(_) => self.state = SessionState::Idle,
            Err(e) => {
                warn!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    error = %e,
                    "Queue removal failed"
                );
                self.emit(ServerEvent::error(e.client_message()));
            }
        }
    }

    async fn handle_matched(&mut self, room_id: RoomId) {
        if let SessionState::Paired { room_id: bound } = self.state {
            // A paired client must never be matched again; the registry
            // and this session disagree.
            error!(
                target: "pc.session",
                client_id = %self.client_id,
                bound_room = %bound,
                ghost_room = %room_id,
                "Matched while already paired, terminating connection"
            );
            if let Err(e) = self.matcher.close_room(room_id).await {
                warn!(target: "pc.session", error = %e, "Failed to close ghost room");
            }
            self.cancel_token.cancel();
            return;
        }

        // The initiator may already be tearing the match down by the time
        // this message is processed. Commit to Paired only while the
        // registry still binds us to the room.
        match self.matcher.room(room_id).await {
            Ok(Some(room)) if room.has_participant(self.client_id) => {
                self.skip_deadline = None;
                self.state = SessionState::Paired { room_id };
                self.emit(ServerEvent::Matched {
                    room_id,
                    is_initiator: false,
                });
            }
            Ok(_) => {
                debug!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    room_id = %room_id,
                    "Match already torn down"
                );
                // The aborted match consumed our queue slot; take a fresh
                // one so the client keeps waiting for real.
                if self.state.is_queued() {
                    match self.matcher.requeue(self.client_id).await {
                        Ok(position) => {
                            self.emit(ServerEvent::Waiting {
                                message: WAITING_MESSAGE.to_string(),
                            });
                            self.emit(ServerEvent::QueueUpdate { position });
                        }
                        // The slot is somehow still there; keep waiting.
                        Err(PcError::AlreadyQueued) => {}
                        Err(e) => {
                            warn!(
                                target: "pc.session",
                                client_id = %self.client_id,
                                error = %e,
                                "Requeue failed after a torn-down match"
                            );
                            self.state = SessionState::Idle;
                            self.emit(ServerEvent::error(e.client_message()));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    room_id = %room_id,
                    error = %e,
                    "Room check failed for incoming match"
                );
                // Unverifiable matches are not committed; the session must
                // never sit Paired on a room it cannot prove it is in.
                self.state = SessionState::Idle;
                self.emit(ServerEvent::error(e.client_message()));
            }
        }
    }

    /// Validate and relay an `offer`/`answer`/`ice-candidate` payload.
    async fn signal(&mut self, named_room: RoomId, outbound: ServerEvent) {
        match state::on_signal(self.state) {
            Decision::Relay { room_id: bound } => {
                if named_room != bound {
                    self.emit(ServerEvent::error(
                        PcError::NotAParticipant(named_room.to_string()).client_message(),
                    ));
                    return;
                }

                match self.matcher.peer_of(named_room, self.client_id).await {
                    Ok(peer) => {
                        if self
                            .router
                            .deliver(peer, SessionMessage::Relay(outbound))
                            .is_err()
                        {
                            debug!(
                                target: "pc.session",
                                client_id = %self.client_id,
                                peer = %peer,
                                "Peer gone, dropping relay"
                            );
                        }
                    }
                    // Room already torn down; late candidates are expected.
                    Err(PcError::RoomNotFound(_)) => {}
                    Err(PcError::NotAParticipant(_)) => {
                        self.emit(ServerEvent::error(
                            PcError::NotAParticipant(named_room.to_string()).client_message(),
                        ));
                    }
                    Err(e) => {
                        warn!(
                            target: "pc.session",
                            client_id = %self.client_id,
                            error = %e,
                            "Membership check failed"
                        );
                        self.emit(ServerEvent::error(e.client_message()));
                    }
                }
            }
            _ => {
                debug!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    "Dropping signal outside a room"
                );
            }
        }
    }

    /// Push a frame onto the connection's outbound queue, applying the
    /// overflow policy.
    fn emit(&mut self, event: ServerEvent) {
        match self.outbound.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                if event.is_droppable() {
                    debug!(
                        target: "pc.session",
                        client_id = %self.client_id,
                        event = event.name(),
                        "Outbound queue full, dropping best-effort frame"
                    );
                } else {
                    warn!(
                        target: "pc.session",
                        client_id = %self.client_id,
                        event = event.name(),
                        "Outbound queue full on critical frame, disconnecting"
                    );
                    self.cancel_token.cancel();
                }
            }
            // Writer already gone; the disconnect path is under way.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Disconnect transition. Idempotent - the gateway's disconnect signal
    /// and an in-flight `leave-chat` may both land here.
    ///
    /// Room cleanup is decided against the registry, not this session's
    /// local state: a pairing on another task can pop this user's queue
    /// entry and bind it to a room after the disconnect is already in the
    /// mailbox. Whatever the registry says this user is part of gets torn
    /// down here, so the surviving peer is never left paired with a ghost.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.skip_deadline = None;
        self.router.unregister(self.client_id);

        if self.state.is_queued() {
            if let Err(e) = self.matcher.remove_from_queue(self.client_id).await {
                warn!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    error = %e,
                    "Queue cleanup failed during teardown"
                );
            }
        }

        let room = match self.matcher.room_for_user(self.client_id).await {
            Ok(room) => room,
            Err(e) => {
                warn!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    error = %e,
                    "Room lookup failed during teardown"
                );
                // Fall back to the room this session last knew about.
                match self.state.room_id() {
                    Some(room_id) => self.matcher.room(room_id).await.ok().flatten(),
                    None => None,
                }
            }
        };

        if let Some(room) = room {
            if let Some(peer) = room.peer_of(self.client_id) {
                let _ = self.router.deliver(
                    peer,
                    SessionMessage::PartnerGone {
                        reason: PartnerGoneReason::Disconnected,
                    },
                );
            }
            // Tell our own client too. Pointless after a socket death,
            // but during a server shutdown both actors are cancelled
            // at once and the peer's mailbox may never be drained;
            // this is the delivery path that still works.
            self.emit(ServerEvent::PartnerDisconnected {
                message: PARTNER_DISCONNECTED_MESSAGE.to_string(),
            });
            if let Err(e) = self.matcher.close_room(room.room_id).await {
                warn!(
                    target: "pc.session",
                    client_id = %self.client_id,
                    room_id = %room.room_id,
                    error = %e,
                    "Room close failed during teardown"
                );
            }
        } else if self.state.is_paired() {
            // The peer tore the room down first (its own disconnect, or a
            // shutdown cancelling both sessions at once) and its mailbox
            // notification may never be drained; the client notification
            // is all that remains.
            self.emit(ServerEvent::PartnerDisconnected {
                message: PARTNER_DISCONNECTED_MESSAGE.to_string(),
            });
        }

        self.state = SessionState::Idle;
    }
}

/// Sleep until `deadline`, or forever when there is none. The select arm
/// is guarded on `deadline.is_some()`, the pending fallback just keeps the
/// future well-formed.
async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
