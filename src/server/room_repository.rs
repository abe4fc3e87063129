use super::error::Result;
use async_trait::async_trait;
use omniverse_core::{PlaneId, RoomKey};
use uuid::Uuid;

/// Room a socket sits in. Plane rooms remember their plane so leave
/// notices can name it; private rooms carry `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room: RoomKey,
    pub plane: Option<PlaneId>,
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Returns false when the socket was already in the room
    async fn join_room(&self, membership: Membership, socket_id: Uuid) -> Result<bool>;
    /// Returns false when the socket was not in the room
    async fn leave_room(&self, room: &RoomKey, socket_id: Uuid) -> Result<bool>;
    async fn get_sockets_in_room(&self, room: &RoomKey) -> Result<Vec<Uuid>>;
    async fn is_member(&self, room: &RoomKey, socket_id: Uuid) -> Result<bool>;
    /// Removes the socket from every room, returning where it was
    async fn leave_all(&self, socket_id: Uuid) -> Result<Vec<Membership>>;
}
