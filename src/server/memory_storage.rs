use super::error::{RelayError, Result};
use super::{Connection, ConnectionRepository, Membership, RoomRepository};
use async_trait::async_trait;
use omniverse_core::{PeerId, PlaneId, RoomKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, instrument};
use uuid::Uuid;

struct Room {
    plane: Option<PlaneId>,
    sockets: Vec<Uuid>,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
    rooms: Arc<RwLock<HashMap<RoomKey, Room>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRepository for MemoryStorage {
    #[instrument(skip(self, connection))]
    async fn add_connection(&self, connection: Connection) -> Result<()> {
        debug!(?connection.socket_id, %connection.peer_id, "Adding connection");
        match self.connections.write() {
            Ok(mut connections) => {
                connections.insert(connection.socket_id, connection);
                debug!("Connection added successfully");
                Ok(())
            }
            Err(e) => {
                error!(?e, "Failed to add connection");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn remove_connection(&self, socket_id: Uuid) -> Result<()> {
        debug!("Removing connection");
        match self.connections.write() {
            Ok(mut connections) => {
                connections.remove(&socket_id);
                debug!("Connection removed successfully");
                Ok(())
            }
            Err(e) => {
                error!(?e, "Failed to remove connection");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_connection(&self, socket_id: Uuid) -> Result<Option<Connection>> {
        match self.connections.read() {
            Ok(connections) => Ok(connections.get(&socket_id).cloned()),
            Err(e) => {
                error!(?e, "Failed to get connection");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_by_peer(&self, peer_id: &PeerId) -> Result<Vec<Connection>> {
        match self.connections.read() {
            Ok(connections) => Ok(connections
                .values()
                .filter(|connection| &connection.peer_id == peer_id)
                .cloned()
                .collect()),
            Err(e) => {
                error!(?e, "Failed to look up peer");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_all_connections(&self) -> Result<Vec<Connection>> {
        match self.connections.read() {
            Ok(connections) => {
                let connections: Vec<_> = connections.values().cloned().collect();
                debug!(count = connections.len(), "Retrieved all connections");
                Ok(connections)
            }
            Err(e) => {
                error!(?e, "Failed to get all connections");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl RoomRepository for MemoryStorage {
    #[instrument(skip(self))]
    async fn join_room(&self, membership: Membership, socket_id: Uuid) -> Result<bool> {
        match self.rooms.write() {
            Ok(mut rooms) => {
                let room = rooms.entry(membership.room).or_insert_with(|| Room {
                    plane: membership.plane,
                    sockets: Vec::new(),
                });
                if room.sockets.contains(&socket_id) {
                    debug!("Socket already in room");
                    return Ok(false);
                }
                room.sockets.push(socket_id);
                debug!(members = room.sockets.len(), "Socket joined room");
                Ok(true)
            }
            Err(e) => {
                error!(?e, "Failed to join room");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn leave_room(&self, room: &RoomKey, socket_id: Uuid) -> Result<bool> {
        match self.rooms.write() {
            Ok(mut rooms) => {
                let Some(entry) = rooms.get_mut(room) else {
                    return Ok(false);
                };
                let before = entry.sockets.len();
                entry.sockets.retain(|id| *id != socket_id);
                let left = entry.sockets.len() != before;
                if entry.sockets.is_empty() {
                    rooms.remove(room);
                }
                Ok(left)
            }
            Err(e) => {
                error!(?e, "Failed to leave room");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_sockets_in_room(&self, room: &RoomKey) -> Result<Vec<Uuid>> {
        match self.rooms.read() {
            Ok(rooms) => Ok(rooms
                .get(room)
                .map(|entry| entry.sockets.clone())
                .unwrap_or_default()),
            Err(e) => {
                error!(?e, "Failed to get room members");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }

    async fn is_member(&self, room: &RoomKey, socket_id: Uuid) -> Result<bool> {
        match self.rooms.read() {
            Ok(rooms) => Ok(rooms
                .get(room)
                .map(|entry| entry.sockets.contains(&socket_id))
                .unwrap_or(false)),
            Err(e) => Err(RelayError::InternalError(e.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn leave_all(&self, socket_id: Uuid) -> Result<Vec<Membership>> {
        match self.rooms.write() {
            Ok(mut rooms) => {
                let mut left = Vec::new();
                for (key, room) in rooms.iter_mut() {
                    let before = room.sockets.len();
                    room.sockets.retain(|id| *id != socket_id);
                    if room.sockets.len() != before {
                        left.push(Membership {
                            room: key.clone(),
                            plane: room.plane.clone(),
                        });
                    }
                }
                rooms.retain(|_, room| !room.sockets.is_empty());
                debug!(rooms = left.len(), "Socket left all rooms");
                Ok(left)
            }
            Err(e) => {
                error!(?e, "Failed to leave rooms");
                Err(RelayError::InternalError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_membership(name: &str) -> Membership {
        let plane = PlaneId::from(name);
        Membership {
            room: plane.room_key(),
            plane: Some(plane),
        }
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let storage = MemoryStorage::new();
        let socket = Uuid::new_v4();

        assert!(storage.join_room(plane_membership("red"), socket).await.unwrap());
        assert!(!storage.join_room(plane_membership("red"), socket).await.unwrap());

        let members = storage
            .get_sockets_in_room(&PlaneId::from("red").room_key())
            .await
            .unwrap();
        assert_eq!(members, vec![socket]);
    }

    #[tokio::test]
    async fn test_leave_all_reports_planes() {
        let storage = MemoryStorage::new();
        let socket = Uuid::new_v4();
        let other = Uuid::new_v4();
        let private = Membership {
            room: RoomKey::for_peer(&PeerId::from("p1")),
            plane: None,
        };

        storage.join_room(private.clone(), socket).await.unwrap();
        storage.join_room(plane_membership("red"), socket).await.unwrap();
        storage.join_room(plane_membership("red"), other).await.unwrap();

        let mut left = storage.leave_all(socket).await.unwrap();
        left.sort_by(|a, b| a.room.as_str().cmp(b.room.as_str()));
        let mut expected = vec![private, plane_membership("red")];
        expected.sort_by(|a, b| a.room.as_str().cmp(b.room.as_str()));
        assert_eq!(left, expected);

        let red = PlaneId::from("red").room_key();
        assert_eq!(storage.get_sockets_in_room(&red).await.unwrap(), vec![other]);
        assert!(!storage.is_member(&red, socket).await.unwrap());
    }

    #[tokio::test]
    async fn test_leave_room_drops_empty_rooms() {
        let storage = MemoryStorage::new();
        let socket = Uuid::new_v4();
        let red = PlaneId::from("red").room_key();

        storage.join_room(plane_membership("red"), socket).await.unwrap();
        assert!(storage.leave_room(&red, socket).await.unwrap());
        assert!(!storage.leave_room(&red, socket).await.unwrap());
        assert!(storage.get_sockets_in_room(&red).await.unwrap().is_empty());
    }
}
