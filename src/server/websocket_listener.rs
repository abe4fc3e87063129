use super::route::PeerQuery;
use super::ConnectionHandler;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use omniverse_core::{ClientMessage, PeerId, RelayMessage};
use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, error, info, warn};

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    query: PeerQuery,
    connection_handler: ConnectionHandler,
    channel_capacity: usize,
) -> Response {
    let Some(peer_id) = query.peer_id() else {
        warn!("Rejecting socket without a uid");
        return (StatusCode::BAD_REQUEST, "missing uid").into_response();
    };
    ws.on_upgrade(move |socket| listen(socket, peer_id, connection_handler, channel_capacity))
}

async fn listen(
    socket: WebSocket,
    peer_id: PeerId,
    connection_handler: ConnectionHandler,
    channel_capacity: usize,
) {
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel(channel_capacity);
    let connection_handler = connection_handler.with_sender(tx);

    if let Err(e) = connection_handler.connect(peer_id.clone()).await {
        error!(%peer_id, error = %e, "Failed to register socket");
        return;
    }

    let sender_task = handle_outgoing_messages(rx, ws_sender);
    let receiver_task = handle_incoming_messages(ws_receiver, &connection_handler);

    tokio::select! {
        _ = sender_task => {
            info!(%peer_id, "Sender task completed");
        }
        _ = receiver_task => {
            info!(%peer_id, "Receiver task completed");
        }
    }
    if let Err(e) = connection_handler.disconnect().await {
        error!(%peer_id, error = %e, "Failed to disconnect");
    }
}

pub async fn handle_outgoing_messages(
    mut rx: Receiver<RelayMessage>,
    mut ws_sender: SplitSink<WebSocket, Message>,
) {
    while let Some(message) = rx.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode relay message");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Text(text)).await {
            error!(error = %e, "Failed to send message");
            break;
        }
    }
}

pub async fn handle_incoming_messages(
    mut receiver: SplitStream<WebSocket>,
    connection_handler: &ConnectionHandler,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) => {
                debug!(peer = ?connection_handler.peer_id(), "Client closed the socket");
                break;
            }
            Ok(message) => handle_message(message, connection_handler).await,
            Err(e) => {
                error!(error = %e, "Failed to receive message");
                break;
            }
        }
    }
}

pub async fn handle_message(message: Message, connection_handler: &ConnectionHandler) {
    match message {
        Message::Text(text) => match ClientMessage::from_json(&text) {
            Ok(message) => {
                if let Err(e) = connection_handler.handle_message(message).await {
                    error!(error = %e, "Failed to handle message");
                }
            }
            Err(e) => {
                warn!(peer = ?connection_handler.peer_id(), error = %e, "⚠️ Dropping malformed envelope");
            }
        },
        Message::Ping(_) | Message::Pong(_) => {}
        other => {
            warn!(
                peer = ?connection_handler.peer_id(),
                "Unsupported message type: {:?}",
                other
            );
        }
    }
}
