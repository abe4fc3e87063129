//! In-process stand-in for the rendezvous relay.
//!
//! Implements the same room rules as the real relay: plane rooms keyed by
//! the hashed plane id, a private room per peer, no echo to the sender.

use async_trait::async_trait;
use omniverse_core::{ClientMessage, PeerId, PlaneId, RelayMessage, RoomKey};
use omniverse_p2p::infrastructure::relay::{
    RelayConnection, RelayConnector, RelayLink, RelayLinkEvent,
};
use omniverse_p2p::{P2PError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};

#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    clients: HashMap<PeerId, Client>,
    rooms: HashMap<RoomKey, (Option<PlaneId>, HashSet<PeerId>)>,
    /// Client events received, per peer, in order
    log: HashMap<PeerId, Vec<String>>,
}

struct Client {
    events: UnboundedSender<RelayLinkEvent>,
    connected: bool,
}

impl RelayState {
    fn deliver(&self, to: &PeerId, message: RelayMessage) {
        if let Some(client) = self.clients.get(to) {
            if client.connected {
                let _ = client.events.send(RelayLinkEvent::Message(message));
            }
        }
    }

    fn broadcast(&self, room: &RoomKey, except: &PeerId, message: RelayMessage) {
        if let Some((_, members)) = self.rooms.get(room) {
            for member in members.iter().filter(|member| *member != except) {
                self.deliver(member, message.clone());
            }
        }
    }

    fn handle(&mut self, from: &PeerId, message: ClientMessage) {
        self.log
            .entry(from.clone())
            .or_default()
            .push(message.event_name().to_string());

        if let Some(claimed) = message.claimed_sender() {
            if claimed != from {
                return;
            }
        }

        match message {
            ClientMessage::Heartbeat { memo } => {
                self.deliver(from, RelayMessage::heartbeat_ack(memo));
            }
            ClientMessage::EnterPlane { plane_id } => {
                let room = plane_id.room_key();
                self.broadcast(
                    &room,
                    from,
                    RelayMessage::RollCall {
                        newbie: from.clone(),
                        plane: plane_id.clone(),
                    },
                );
                self.broadcast(
                    &room,
                    from,
                    RelayMessage::Announce {
                        from_peer: from.clone(),
                        plane: plane_id.clone(),
                    },
                );
                self.rooms
                    .entry(room)
                    .or_insert_with(|| (Some(plane_id), HashSet::new()))
                    .1
                    .insert(from.clone());
            }
            ClientMessage::LeavePlane { plane_id } => {
                let room = plane_id.room_key();
                let left = self
                    .rooms
                    .get_mut(&room)
                    .map(|(_, members)| members.remove(from))
                    .unwrap_or(false);
                if left {
                    self.broadcast(
                        &room,
                        from,
                        RelayMessage::PeerLeave {
                            uid: from.clone(),
                            plane: Some(plane_id),
                        },
                    );
                }
            }
            ClientMessage::Announce { from_peer, plane } => {
                let room = plane.room_key();
                let member = self
                    .rooms
                    .get(&room)
                    .map(|(_, members)| members.contains(from))
                    .unwrap_or(false);
                if member {
                    self.broadcast(&room, from, RelayMessage::Announce { from_peer, plane });
                }
            }
            ClientMessage::InitiateConnection {
                to_peer,
                from_peer,
                offer,
            } => self.deliver(
                &to_peer.clone(),
                RelayMessage::ConnectionOffer {
                    to_peer,
                    from_peer,
                    offer,
                },
            ),
            ClientMessage::ConnectionAnswer {
                to_peer,
                from_peer,
                answer,
            } => self.deliver(
                &to_peer.clone(),
                RelayMessage::ConnectionAnswer {
                    to_peer,
                    from_peer,
                    answer,
                },
            ),
        }
    }

    fn disconnect(&mut self, peer: &PeerId) {
        let rooms: Vec<(RoomKey, Option<PlaneId>)> = self
            .rooms
            .iter_mut()
            .filter_map(|(key, (plane, members))| {
                members.remove(peer).then(|| (key.clone(), plane.clone()))
            })
            .collect();
        for (room, plane) in rooms {
            self.broadcast(
                &room,
                peer,
                RelayMessage::PeerLeave {
                    uid: peer.clone(),
                    plane,
                },
            );
        }
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client events the relay received from `peer`, by event name
    pub fn log(&self, peer: &PeerId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .log
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate a dropped socket: the peer leaves every room and is told so
    pub fn drop_link(&self, peer: &PeerId) {
        let mut state = self.state.lock().unwrap();
        state.disconnect(peer);
        if let Some(client) = state.clients.get_mut(peer) {
            client.connected = false;
            let _ = client.events.send(RelayLinkEvent::Disconnected);
        }
    }

    /// Bring a dropped link back
    pub fn restore_link(&self, peer: &PeerId) {
        let mut state = self.state.lock().unwrap();
        if let Some(client) = state.clients.get_mut(peer) {
            client.connected = true;
            let _ = client.events.send(RelayLinkEvent::Reconnected);
        }
    }

    /// Hand `message` to `peer` as if the relay had routed it there
    pub fn inject(&self, peer: &PeerId, message: RelayMessage) {
        self.state.lock().unwrap().deliver(peer, message);
    }

    pub fn members(&self, plane: &PlaneId) -> usize {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(&plane.room_key())
            .map(|(_, members)| members.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    async fn connect(&self, peer: &PeerId) -> Result<RelayConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            state.clients.insert(
                peer.clone(),
                Client {
                    events: tx,
                    connected: true,
                },
            );
            state
                .rooms
                .entry(RoomKey::for_peer(peer))
                .or_insert_with(|| (None, HashSet::new()))
                .1
                .insert(peer.clone());
        }
        let link: Arc<dyn RelayLink> = Arc::new(MemoryRelayLink {
            relay: self.clone(),
            peer: peer.clone(),
        });
        Ok((link, rx))
    }
}

struct MemoryRelayLink {
    relay: MemoryRelay,
    peer: PeerId,
}

impl RelayLink for MemoryRelayLink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        let mut state = self.relay.state.lock().unwrap();
        let connected = state
            .clients
            .get(&self.peer)
            .map(|client| client.connected)
            .unwrap_or(false);
        if !connected {
            return Err(P2PError::RelayDisconnected);
        }
        state.handle(&self.peer, message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.relay
            .state
            .lock()
            .unwrap()
            .clients
            .get(&self.peer)
            .map(|client| client.connected)
            .unwrap_or(false)
    }

    fn close(&self) {
        let mut state = self.relay.state.lock().unwrap();
        state.disconnect(&self.peer);
        state.clients.remove(&self.peer);
    }
}
