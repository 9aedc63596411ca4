//! End-to-end session scenarios: actors, router, and matcher wired
//! together over the in-memory store, with the outbound frame queues
//! observed directly in place of sockets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::ClientId;
use pairing_controller::matcher::{Matcher, PairingOutcome};
use pairing_controller::protocol::{ClientEvent, ServerEvent};
use pairing_controller::router::Router;
use pairing_controller::session::actor::SKIP_REPAIR_DELAY;
use pairing_controller::session::{
    SessionActor, SessionHandle, SessionMessage, OUTBOUND_QUEUE_CAPACITY,
};
use pairing_controller::store::{MemoryStore, SharedStore};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Harness {
    store: Arc<MemoryStore>,
    matcher: Matcher,
    router: Arc<Router>,
    root: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            matcher: Matcher::new(store.clone()),
            store,
            router: Arc::new(Router::new()),
            root: CancellationToken::new(),
        }
    }

    /// "Connect" a client: spawn its session and register it, exactly as
    /// the gateway would.
    fn connect(&self) -> TestClient {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (handle, _task) = SessionActor::spawn(
            ClientId::new(),
            self.matcher.clone(),
            Arc::clone(&self.router),
            outbound_tx,
            self.root.child_token(),
        );
        self.router.register(handle.clone());
        TestClient {
            handle,
            outbound: outbound_rx,
        }
    }
}

struct TestClient {
    handle: SessionHandle,
    outbound: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    fn id(&self) -> ClientId {
        self.handle.client_id()
    }

    async fn send(&self, event: ClientEvent) {
        self.handle
            .send(SessionMessage::FromClient(event))
            .await
            .expect("session mailbox open");
    }

    async fn recv(&mut self) -> ServerEvent {
        self.outbound.recv().await.expect("an event")
    }
}

/// Pair two fresh clients, draining the pairing events from both sides.
async fn paired(harness: &Harness) -> (TestClient, TestClient, common::types::RoomId) {
    let mut waiter = harness.connect();
    let mut initiator = harness.connect();

    waiter.send(ClientEvent::FindPartner).await;
    assert!(matches!(waiter.recv().await, ServerEvent::Waiting { .. }));
    assert!(matches!(
        waiter.recv().await,
        ServerEvent::QueueUpdate { position: 1 }
    ));

    initiator.send(ClientEvent::FindPartner).await;
    let ServerEvent::Matched {
        room_id,
        is_initiator: true,
    } = initiator.recv().await
    else {
        panic!("expected matched for the initiator");
    };
    let ServerEvent::Matched {
        room_id: waiter_room,
        is_initiator: false,
    } = waiter.recv().await
    else {
        panic!("expected matched for the waiter");
    };
    assert_eq!(room_id, waiter_room);

    (waiter, initiator, room_id)
}

#[tokio::test]
async fn test_solo_wait() {
    let harness = Harness::new();
    let mut client = harness.connect();

    client.send(ClientEvent::FindPartner).await;

    assert!(matches!(client.recv().await, ServerEvent::Waiting { .. }));
    assert!(matches!(
        client.recv().await,
        ServerEvent::QueueUpdate { position: 1 }
    ));
    assert_eq!(harness.matcher.stats().await.unwrap().queue_size, 1);
}

#[tokio::test]
async fn test_immediate_match() {
    let harness = Harness::new();
    let before = harness.matcher.stats().await.unwrap().total_rooms;

    let (_waiter, _initiator, _room) = paired(&harness).await;

    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.active_rooms, 1);
    assert_eq!(stats.total_rooms, before + 1);
}

#[tokio::test]
async fn test_signaling_relay_round() {
    let harness = Harness::new();
    let (mut waiter, mut initiator, room_id) = paired(&harness).await;

    // Offer: initiator → waiter, verbatim.
    let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n"});
    initiator
        .send(ClientEvent::Offer {
            offer: offer.clone(),
            room_id,
        })
        .await;
    assert_eq!(
        waiter.recv().await,
        ServerEvent::Offer { offer, room_id }
    );

    // Answer: waiter → initiator.
    let answer = json!({"type": "answer", "sdp": "v=0\r\n"});
    waiter
        .send(ClientEvent::Answer {
            answer: answer.clone(),
            room_id,
        })
        .await;
    assert_eq!(
        initiator.recv().await,
        ServerEvent::Answer { answer, room_id }
    );

    // Candidates flow both ways.
    let candidate = json!({"candidate": "candidate:0 1 UDP 2122252543 192.0.2.1 54400 typ host", "sdpMLineIndex": 0});
    initiator
        .send(ClientEvent::IceCandidate {
            candidate: candidate.clone(),
            room_id,
        })
        .await;
    assert_eq!(
        waiter.recv().await,
        ServerEvent::IceCandidate {
            candidate: candidate.clone(),
            room_id
        }
    );
    waiter
        .send(ClientEvent::IceCandidate {
            candidate: candidate.clone(),
            room_id,
        })
        .await;
    assert_eq!(
        initiator.recv().await,
        ServerEvent::IceCandidate { candidate, room_id }
    );
}

#[tokio::test]
async fn test_leave_chat() {
    let harness = Harness::new();
    let (mut waiter, mut initiator, _room) = paired(&harness).await;

    initiator.send(ClientEvent::LeaveChat).await;

    assert!(matches!(
        initiator.recv().await,
        ServerEvent::LeftChat { .. }
    ));
    assert!(matches!(
        waiter.recv().await,
        ServerEvent::PartnerLeft { .. }
    ));

    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 0);

    // Both are Idle again and can be re-matched - with each other.
    waiter.send(ClientEvent::FindPartner).await;
    assert!(matches!(waiter.recv().await, ServerEvent::Waiting { .. }));
    assert!(matches!(
        waiter.recv().await,
        ServerEvent::QueueUpdate { .. }
    ));
    initiator.send(ClientEvent::FindPartner).await;
    assert!(matches!(
        initiator.recv().await,
        ServerEvent::Matched { .. }
    ));
    assert!(matches!(waiter.recv().await, ServerEvent::Matched { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_skip_partner() {
    let harness = Harness::new();
    let (mut waiter, mut skipper, _room) = paired(&harness).await;

    let before = tokio::time::Instant::now();
    skipper.send(ClientEvent::SkipPartner).await;

    assert!(matches!(
        skipper.recv().await,
        ServerEvent::LeftChat { .. }
    ));
    assert!(matches!(
        waiter.recv().await,
        ServerEvent::PartnerLeft { .. }
    ));
    assert_eq!(harness.matcher.stats().await.unwrap().active_rooms, 0);

    // After the cooperative delay the skipper is waiting again.
    assert!(matches!(skipper.recv().await, ServerEvent::Waiting { .. }));
    assert!(matches!(
        skipper.recv().await,
        ServerEvent::QueueUpdate { position: 1 }
    ));
    assert!(
        tokio::time::Instant::now().duration_since(before) >= SKIP_REPAIR_DELAY,
        "the re-pair must wait out the cooperative delay"
    );
}

#[tokio::test(start_paused = true)]
async fn test_skip_delay_is_cancelled_by_disconnect() {
    let harness = Harness::new();
    let (_waiter, mut skipper, _room) = paired(&harness).await;

    skipper.send(ClientEvent::SkipPartner).await;
    assert!(matches!(
        skipper.recv().await,
        ServerEvent::LeftChat { .. }
    ));

    // Disconnect inside the 500 ms window: the pending find-partner must
    // never fire.
    let skipper_id = skipper.id();
    skipper
        .handle
        .send(SessionMessage::Disconnected)
        .await
        .unwrap();
    while harness.router.is_registered(skipper_id) {
        tokio::task::yield_now().await;
    }

    tokio::time::sleep(SKIP_REPAIR_DELAY * 2).await;
    assert_eq!(harness.matcher.stats().await.unwrap().queue_size, 0);
}

#[tokio::test]
async fn test_disconnect_notifies_partner() {
    let harness = Harness::new();
    let (mut waiter, initiator, _room) = paired(&harness).await;

    let initiator_id = initiator.id();
    initiator
        .handle
        .send(SessionMessage::Disconnected)
        .await
        .unwrap();

    assert!(matches!(
        waiter.recv().await,
        ServerEvent::PartnerDisconnected { .. }
    ));

    while harness.router.is_registered(initiator_id) {
        tokio::task::yield_now().await;
    }
    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 0);
    assert_eq!(stats.queue_size, 0);
}

#[tokio::test]
async fn test_ghost_waiter_is_never_paired() {
    let harness = Harness::new();

    // A waits, then its instance-local session evaporates (crash/drop)
    // before the queue entry could be cleaned up.
    let mut ghost = harness.connect();
    ghost.send(ClientEvent::FindPartner).await;
    ghost.recv().await;
    ghost.recv().await;
    harness.router.unregister(ghost.id());

    // B's pairing attempt dequeues the ghost, fails to notify it, undoes
    // the match, and waits instead.
    let mut live = harness.connect();
    live.send(ClientEvent::FindPartner).await;

    assert!(matches!(live.recv().await, ServerEvent::Waiting { .. }));
    assert!(matches!(
        live.recv().await,
        ServerEvent::QueueUpdate { position: 1 }
    ));

    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 0, "no ghost room survives");
    assert_eq!(stats.queue_size, 1, "only the live client waits");
}

#[tokio::test]
async fn test_concurrent_find_partner_single_waiter() {
    let harness = Harness::new();

    let mut waiter = harness.connect();
    waiter.send(ClientEvent::FindPartner).await;
    waiter.recv().await;
    waiter.recv().await;

    let mut b = harness.connect();
    let mut c = harness.connect();
    tokio::join!(
        b.send(ClientEvent::FindPartner),
        c.send(ClientEvent::FindPartner)
    );

    let b_event = b.recv().await;
    let c_event = c.recv().await;

    let matched = [&b_event, &c_event]
        .iter()
        .filter(|e| matches!(e, ServerEvent::Matched { .. }))
        .count();
    let waiting = [&b_event, &c_event]
        .iter()
        .filter(|e| matches!(e, ServerEvent::Waiting { .. }))
        .count();
    assert_eq!(matched, 1, "exactly one of B, C pairs with the waiter");
    assert_eq!(waiting, 1);

    assert!(matches!(waiter.recv().await, ServerEvent::Matched { .. }));

    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 1);
    assert_eq!(stats.queue_size, 1);
}

#[tokio::test]
async fn test_late_ice_candidate_is_dropped_silently() {
    let harness = Harness::new();
    let (mut waiter, mut initiator, room_id) = paired(&harness).await;

    initiator.send(ClientEvent::LeaveChat).await;
    assert!(matches!(
        initiator.recv().await,
        ServerEvent::LeftChat { .. }
    ));
    assert!(matches!(
        waiter.recv().await,
        ServerEvent::PartnerLeft { .. }
    ));

    // A candidate still in flight for the closed room: dropped without an
    // error. The next event the waiter sees is its own fresh `waiting`.
    waiter
        .send(ClientEvent::IceCandidate {
            candidate: json!({"candidate": "late"}),
            room_id,
        })
        .await;
    waiter.send(ClientEvent::FindPartner).await;

    assert!(matches!(waiter.recv().await, ServerEvent::Waiting { .. }));
}

#[tokio::test]
async fn test_pairing_that_races_a_disconnect_is_torn_down() {
    let harness = Harness::new();

    // A waits; its disconnect is about to be processed.
    let mut a = harness.connect();
    a.send(ClientEvent::FindPartner).await;
    a.recv().await;
    a.recv().await;

    // A pairing attempt from another instance pops A and creates the room
    // before A's teardown runs. No `matched` ever reaches A's mailbox
    // (the other instance's router cannot see it).
    let b = ClientId::new();
    let PairingOutcome::Paired { room, partner } = harness.matcher.find_partner(b).await.unwrap()
    else {
        panic!("expected the racing pairing to win the pop");
    };
    assert_eq!(partner, a.id());

    // A's teardown must reconcile against the store: its local state still
    // says Queued, but the room it was just bound to has to go.
    let a_id = a.id();
    a.handle.send(SessionMessage::Disconnected).await.unwrap();
    while harness.router.is_registered(a_id) {
        tokio::task::yield_now().await;
    }

    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 0, "the raced room is closed");
    assert_eq!(stats.queue_size, 0);
    assert_eq!(harness.store.user_room_get(a_id).await.unwrap(), None);
    assert_eq!(harness.store.user_room_get(b).await.unwrap(), None);
    assert_eq!(harness.matcher.room(room.room_id).await.unwrap(), None);
}

#[tokio::test]
async fn test_disconnect_racing_pair_never_leaves_ghost() {
    let harness = Harness::new();

    let mut a = harness.connect();
    a.send(ClientEvent::FindPartner).await;
    a.recv().await;
    a.recv().await;

    // Enqueue A's disconnect, then fire B's pairing without waiting for
    // A's actor to observe it. Whichever side wins the race, B must end
    // up either matched-then-notified or waiting, never paired with a
    // ghost.
    let a_id = a.id();
    a.handle.send(SessionMessage::Disconnected).await.unwrap();

    let mut b = harness.connect();
    b.send(ClientEvent::FindPartner).await;

    match b.recv().await {
        ServerEvent::Matched { .. } => {
            // The pairing won: A's teardown closes the room and B hears
            // about it.
            assert!(matches!(
                b.recv().await,
                ServerEvent::PartnerDisconnected { .. }
            ));
            let stats = harness.matcher.stats().await.unwrap();
            assert_eq!(stats.active_rooms, 0);
            assert_eq!(harness.store.user_room_get(b.id()).await.unwrap(), None);
        }
        ServerEvent::Waiting { .. } => {
            // The disconnect won: A was removed first and B just waits.
            assert!(matches!(
                b.recv().await,
                ServerEvent::QueueUpdate { position: 1 }
            ));
            assert_eq!(harness.matcher.stats().await.unwrap().queue_size, 1);
        }
        other => panic!("unexpected first event for B: {other:?}"),
    }

    while harness.router.is_registered(a_id) {
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.store.user_room_get(a_id).await.unwrap(), None);
    assert_eq!(harness.matcher.stats().await.unwrap().active_rooms, 0);
}

#[tokio::test]
async fn test_stale_matched_is_not_committed() {
    let harness = Harness::new();
    let mut client = harness.connect();

    // A `matched` for a room the registry no longer holds (or never held)
    // must not flip the session to Paired.
    client
        .handle
        .send(SessionMessage::Matched {
            room_id: common::types::RoomId::new(),
        })
        .await
        .unwrap();

    // Were the session Paired, this would be rejected with an error; an
    // idle session simply starts waiting.
    client.send(ClientEvent::FindPartner).await;
    assert!(matches!(client.recv().await, ServerEvent::Waiting { .. }));
    assert!(matches!(
        client.recv().await,
        ServerEvent::QueueUpdate { position: 1 }
    ));
}

#[tokio::test]
async fn test_shutdown_notifies_paired_clients() {
    let harness = Harness::new();
    let (mut waiter, mut initiator, _room) = paired(&harness).await;

    harness.root.cancel();

    assert!(matches!(
        waiter.recv().await,
        ServerEvent::PartnerDisconnected { .. }
    ));
    assert!(matches!(
        initiator.recv().await,
        ServerEvent::PartnerDisconnected { .. }
    ));

    let stats = harness.matcher.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 0);
}
