//! Live subscriber bridge: pushes one identifier's statuses over a WebSocket.
//!
//! Each connection gets its own forwarding task. The task owns the outbound
//! half of the socket and the channel's receiver; the connection handler
//! keeps the inbound half and cancels the task as soon as the client goes
//! away, so no forwarding task outlives its connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use status_relay::{ImageId, StatusReceiver, StatusValue};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::types::StatusFrame;

/// How a forwarding task finished, with the number of frames it sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The status sequence ended and the connection was closed.
    Completed(usize),
    /// The connection closed or the server is shutting down.
    Cancelled(usize),
    /// Writing to the connection failed.
    ConnectionLost(usize),
}

/// WebSocket handler for streaming one upload's status updates
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let id = ImageId::from(id);
    info!("🔌 WebSocket connection request for {}", id);

    ws.on_upgrade(move |socket| handle_socket(socket, id, state))
}

async fn handle_socket(socket: WebSocket, id: ImageId, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let statuses = match state.registry.lookup(&id).await {
        Some(channel) => channel.consume(),
        None => {
            warn!("⚠️ No live status channel for {}, closing", id);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let statuses = match statuses {
        Ok(rx) => rx,
        Err(e) => {
            warn!("⚠️ {}, closing", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("📡 Waiting for status messages for {}", id);

    let cancel = state.shutdown.child_token();
    let (control_tx, control_rx) = mpsc::channel(8);
    let mut forwarder = tokio::spawn(forward_statuses(
        sender,
        statuses,
        control_rx,
        cancel.clone(),
    ));

    let end = loop {
        tokio::select! {
            joined = &mut forwarder => break joined,

            msg_result = receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            let _ = control_tx.send(Message::Text("pong".into())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("🔌 WebSocket closed by client for {}", id);
                        cancel.cancel();
                        break forwarder.await;
                    }
                    Some(Err(e)) => {
                        warn!("❌ WebSocket error for {}: {}", id, e);
                        cancel.cancel();
                        break forwarder.await;
                    }
                    _ => {}
                }
            }
        }
    };

    match end {
        Ok(end) => info!("📊 WebSocket for {} finished: {:?}", id, end),
        Err(e) => error!("❌ Forwarding task for {} failed: {}", id, e),
    }
}

/// Forwards every status from `statuses` to `sink` as a JSON text frame,
/// interleaving control replies from `control`. Ends with a close frame when
/// the sequence ends or when cancelled. On cancel, values still buffered in
/// an already closed channel are flushed first; an open channel keeps them
/// for the next subscriber.
pub async fn forward_statuses<S>(
    mut sink: S,
    mut statuses: StatusReceiver,
    mut control: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> ForwardEnd
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let id = statuses.id().clone();
    let mut sent = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                if statuses.is_closed() {
                    while let Some(status) = statuses.try_recv() {
                        if send_status(&mut sink, &id, status).await.is_err() {
                            return ForwardEnd::ConnectionLost(sent);
                        }
                        sent += 1;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                return ForwardEnd::Cancelled(sent);
            }

            Some(reply) = control.recv() => {
                if let Err(e) = sink.send(reply).await {
                    warn!("❌ Failed to send control reply for {}: {}", id, e);
                    return ForwardEnd::ConnectionLost(sent);
                }
            }

            next = statuses.recv() => {
                let Some(status) = next else {
                    info!("📡 Status sequence for {} ended, closing WebSocket", id);
                    let _ = sink.send(Message::Close(None)).await;
                    return ForwardEnd::Completed(sent);
                };

                if send_status(&mut sink, &id, status).await.is_err() {
                    return ForwardEnd::ConnectionLost(sent);
                }
                sent += 1;
            }
        }
    }
}

async fn send_status<S>(sink: &mut S, id: &ImageId, status: StatusValue) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    info!("📨 Status for {}: {}", id, status);
    let text = match serde_json::to_string(&StatusFrame { status }) {
        Ok(text) => text,
        Err(e) => {
            error!("❌ Failed to serialize status frame: {}", e);
            return Ok(());
        }
    };

    sink.send(Message::Text(text.into())).await.map_err(|e| {
        warn!("❌ Failed to send status for {}: {}", id, e);
    })
}
