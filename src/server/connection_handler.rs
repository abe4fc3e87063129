use super::error::{RelayError, Result};
use super::{Connection, ConnectionRepository, Membership, RoomRepository};
use omniverse_core::{ClientMessage, PeerId, PlaneId, RelayMessage, RoomKey};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-socket relay logic. One handler is created for each accepted
/// socket with [`ConnectionHandler::new_from`]; all of them share the
/// same repositories.
#[derive(Clone)]
pub struct ConnectionHandler {
    connection: Arc<RwLock<Option<Connection>>>,
    connection_repo: Arc<dyn ConnectionRepository>,
    room_repo: Arc<dyn RoomRepository>,
    sender: Option<Sender<RelayMessage>>,
}

impl ConnectionHandler {
    pub fn new(
        connection_repo: Arc<dyn ConnectionRepository>,
        room_repo: Arc<dyn RoomRepository>,
    ) -> Self {
        ConnectionHandler {
            connection: Arc::new(RwLock::new(None)),
            sender: None,
            connection_repo,
            room_repo,
        }
    }

    pub fn new_from(cloneable: &Self) -> Self {
        ConnectionHandler {
            connection: Arc::new(RwLock::new(None)),
            sender: None,
            connection_repo: cloneable.connection_repo.clone(),
            room_repo: cloneable.room_repo.clone(),
        }
    }

    pub fn with_sender(&self, sender: Sender<RelayMessage>) -> Self {
        let mut new_self = Self::new_from(self);
        new_self.sender = Some(sender);
        new_self
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.current().map(|connection| connection.peer_id)
    }

    fn current(&self) -> Option<Connection> {
        self.connection
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn require(&self) -> Result<Connection> {
        self.current().ok_or(RelayError::NotConnected)
    }

    /// Register the socket under its claimed peer id and join its private room
    #[instrument(skip(self))]
    pub async fn connect(&self, peer_id: PeerId) -> Result<()> {
        let sender = self.sender.clone().ok_or(RelayError::NotConnected)?;
        let connection = Connection::new(peer_id.clone(), sender);
        let socket_id = connection.socket_id;

        self.connection_repo.add_connection(connection.clone()).await?;
        self.room_repo
            .join_room(
                Membership {
                    room: RoomKey::for_peer(&peer_id),
                    plane: None,
                },
                socket_id,
            )
            .await?;
        *self
            .connection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(connection);

        info!(%peer_id, %socket_id, "🔌 Socket connected");
        Ok(())
    }

    #[instrument(skip(self, message), fields(event = message.event_name()))]
    pub async fn handle_message(&self, message: ClientMessage) -> Result<()> {
        let me = self.require()?;

        if let Some(claimed) = message.claimed_sender() {
            if claimed != &me.peer_id {
                warn!(
                    socket = %me.peer_id,
                    %claimed,
                    "⚠️ Dropping envelope with a spoofed sender"
                );
                return Ok(());
            }
        }

        match message {
            ClientMessage::Heartbeat { memo } => {
                self.send_to_socket(me.socket_id, RelayMessage::heartbeat_ack(memo))
                    .await;
            }
            ClientMessage::EnterPlane { plane_id } => {
                self.enter_plane(&me, plane_id).await?;
            }
            ClientMessage::LeavePlane { plane_id } => {
                let room = plane_id.room_key();
                if self.room_repo.leave_room(&room, me.socket_id).await? {
                    info!(peer = %me.peer_id, plane = %plane_id, "🚪 Left plane");
                    self.broadcast(
                        &room,
                        me.socket_id,
                        RelayMessage::PeerLeave {
                            uid: me.peer_id.clone(),
                            plane: Some(plane_id),
                        },
                    )
                    .await?;
                }
            }
            ClientMessage::Announce { from_peer, plane } => {
                let room = plane.room_key();
                if !self.room_repo.is_member(&room, me.socket_id).await? {
                    warn!(peer = %me.peer_id, %plane, "⚠️ Dropping announce for a plane not entered");
                    return Ok(());
                }
                self.broadcast(&room, me.socket_id, RelayMessage::Announce { from_peer, plane })
                    .await?;
            }
            ClientMessage::InitiateConnection {
                to_peer,
                from_peer,
                offer,
            } => {
                debug!(%from_peer, %to_peer, "📨 Relaying offer");
                let room = RoomKey::for_peer(&to_peer);
                self.broadcast(
                    &room,
                    me.socket_id,
                    RelayMessage::ConnectionOffer {
                        to_peer,
                        from_peer,
                        offer,
                    },
                )
                .await?;
            }
            ClientMessage::ConnectionAnswer {
                to_peer,
                from_peer,
                answer,
            } => {
                debug!(%from_peer, %to_peer, "📨 Relaying answer");
                let room = RoomKey::for_peer(&to_peer);
                self.broadcast(
                    &room,
                    me.socket_id,
                    RelayMessage::ConnectionAnswer {
                        to_peer,
                        from_peer,
                        answer,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn enter_plane(&self, me: &Connection, plane_id: PlaneId) -> Result<()> {
        let room = plane_id.room_key();
        if self.room_repo.is_member(&room, me.socket_id).await? {
            debug!(plane = %plane_id, "Plane already entered");
            return Ok(());
        }

        self.broadcast(
            &room,
            me.socket_id,
            RelayMessage::RollCall {
                newbie: me.peer_id.clone(),
                plane: plane_id.clone(),
            },
        )
        .await?;
        self.broadcast(
            &room,
            me.socket_id,
            RelayMessage::Announce {
                from_peer: me.peer_id.clone(),
                plane: plane_id.clone(),
            },
        )
        .await?;

        self.room_repo
            .join_room(
                Membership {
                    room,
                    plane: Some(plane_id.clone()),
                },
                me.socket_id,
            )
            .await?;
        info!(peer = %me.peer_id, plane = %plane_id, "🌐 Entered plane");
        Ok(())
    }

    /// Leave every room, telling the rest of each room, and forget the socket
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let taken = {
            let mut connection = self
                .connection
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            connection.take()
        };
        let Some(me) = taken else {
            return Ok(());
        };

        let memberships = self.room_repo.leave_all(me.socket_id).await?;
        for membership in memberships {
            self.broadcast(
                &membership.room,
                me.socket_id,
                RelayMessage::PeerLeave {
                    uid: me.peer_id.clone(),
                    plane: membership.plane,
                },
            )
            .await?;
        }
        self.connection_repo.remove_connection(me.socket_id).await?;

        info!(peer = %me.peer_id, socket = %me.socket_id, "👋 Socket disconnected");
        Ok(())
    }

    /// Send to every socket in `room` except `except`
    async fn broadcast(&self, room: &RoomKey, except: Uuid, message: RelayMessage) -> Result<()> {
        let sockets = self.room_repo.get_sockets_in_room(room).await?;
        for socket_id in sockets.into_iter().filter(|id| *id != except) {
            self.send_to_socket(socket_id, message.clone()).await;
        }
        Ok(())
    }

    /// Delivery failures only concern the receiving socket
    async fn send_to_socket(&self, socket_id: Uuid, message: RelayMessage) {
        let connection = match self.connection_repo.get_connection(socket_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => return,
            Err(e) => {
                warn!(%socket_id, error = %e, "Failed to look up socket");
                return;
            }
        };
        if let Err(e) = connection.sender.send(message).await {
            warn!(
                %socket_id,
                error = %RelayError::DeliveryFailed(e.to_string()),
                "Dropping undeliverable message"
            );
        }
    }
}
