//! WebSocket connection handling.
//!
//! Each accepted connection gets a fresh [`ClientId`], one session actor,
//! and two pumps: a read loop feeding the actor's mailbox and a writer
//! task draining the bounded outbound queue into the socket.
//!
//! # Keepalive
//!
//! The writer pings every 25 s. A connection that produces no frame at all
//! (pong included) for 60 s is treated as disconnected.

use super::AppState;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::{SessionActor, SessionHandle, SessionMessage, OUTBOUND_QUEUE_CAPACITY};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::types::ClientId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Server-initiated ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// A connection silent for this long is considered dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted text frame. Signaling payloads are small; anything
/// bigger is a protocol violation.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Upgrade handler for `GET /ws`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = ClientId::new();
    info!(target: "pc.gateway", client_id = %client_id, "Connection accepted");

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

    // The ICE configuration goes out first, before the session can emit
    // anything. The queue is empty here, so this cannot fail.
    if outbound_tx
        .try_send(ServerEvent::IceServers(state.ice_servers.clone()))
        .is_err()
    {
        warn!(target: "pc.gateway", client_id = %client_id, "Failed to queue greeting");
        return;
    }

    // Protocol-level errors (bad JSON, oversized frames) are reported by
    // the read loop directly, without a round-trip through the actor.
    let error_tx = outbound_tx.clone();

    let cancel_token = state.shutdown.child_token();
    let (handle, actor_task) = SessionActor::spawn(
        client_id,
        state.matcher.clone(),
        Arc::clone(&state.router),
        outbound_tx,
        cancel_token.clone(),
    );
    state.router.register(handle.clone());

    let (sink, stream) = socket.split();
    let writer_task = tokio::spawn(write_loop(sink, outbound_rx, client_id));

    read_loop(stream, &handle, &error_tx).await;
    drop(error_tx);

    // Drive the disconnect transition exactly once. The actor's teardown
    // flag makes this safe even when a leave-chat is still in flight.
    if handle.send(SessionMessage::Disconnected).await.is_err() {
        // Mailbox already closed - the actor was cancelled; make sure it
        // runs its teardown.
        handle.cancel();
    }

    if let Err(e) = actor_task.await {
        warn!(target: "pc.gateway", client_id = %client_id, error = %e, "Session task panicked");
    }
    if let Err(e) = writer_task.await {
        warn!(target: "pc.gateway", client_id = %client_id, error = %e, "Writer task panicked");
    }

    info!(target: "pc.gateway", client_id = %client_id, "Connection closed");
}

/// Pump inbound frames into the session mailbox until the socket closes,
/// the server shuts down, or the keepalive window lapses.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    handle: &SessionHandle,
    error_tx: &mpsc::Sender<ServerEvent>,
) {
    loop {
        let frame = tokio::select! {
            // Cancellation means shutdown or the overflow policy fired;
            // either way the socket must go.
            () = handle.cancelled() => break,
            frame = tokio::time::timeout(IDLE_TIMEOUT, stream.next()) => frame,
        };

        let message = match frame {
            Err(_) => {
                info!(
                    target: "pc.gateway",
                    client_id = %handle.client_id(),
                    "Keepalive lost, treating as disconnect"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(
                    target: "pc.gateway",
                    client_id = %handle.client_id(),
                    error = %e,
                    "Socket error"
                );
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    report_protocol_error(error_tx, "Message too large");
                    continue;
                }
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        // Awaiting here applies back-pressure to the
                        // client when the session is busy.
                        if handle
                            .send(SessionMessage::FromClient(event))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(
                            target: "pc.gateway",
                            client_id = %handle.client_id(),
                            error = %e,
                            "Unparseable frame"
                        );
                        report_protocol_error(error_tx, "Invalid message format");
                    }
                }
            }
            Message::Binary(_) => {
                report_protocol_error(error_tx, "Binary frames are not supported");
            }
            Message::Close(_) => break,
            // Ping is answered by axum automatically; pong already reset
            // the idle timeout by arriving.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

fn report_protocol_error(error_tx: &mpsc::Sender<ServerEvent>, message: &str) {
    // Best effort: if the outbound queue is full the connection is
    // struggling anyway.
    let _ = error_tx.try_send(ServerEvent::error(message));
}

/// Drain the outbound queue into the socket, pinging on an interval.
/// Terminates when the queue closes (the session actor exited) or a write
/// fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerEvent>,
    client_id: ClientId,
) {
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(
                                    target: "pc.gateway",
                                    client_id = %client_id,
                                    error = %e,
                                    "Failed to serialize outbound event"
                                );
                                continue;
                            }
                        };
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
