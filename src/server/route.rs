use super::{websocket_listener, ConnectionHandler, RelayConfig};
use axum::extract::{Query, WebSocketUpgrade};
use axum::{routing::get, Router};
use omniverse_core::PeerId;
use serde::Deserialize;

/// `?uid=<peer id>` carried by every relay socket
#[derive(Debug, Default, Deserialize)]
pub struct PeerQuery {
    pub uid: Option<String>,
}

impl PeerQuery {
    pub fn peer_id(&self) -> Option<PeerId> {
        self.uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(PeerId::from)
    }
}

pub fn create_relay_route(connection_handler: ConnectionHandler, config: &RelayConfig) -> Router {
    let channel_capacity = config.channel_capacity();
    Router::new().route(
        &config.route_path(),
        get(
            move |ws: WebSocketUpgrade, Query(query): Query<PeerQuery>| {
                websocket_listener::handle_websocket(
                    ws,
                    query,
                    ConnectionHandler::new_from(&connection_handler),
                    channel_capacity,
                )
            },
        ),
    )
}
