use super::error::Result;
use super::Connection;
use async_trait::async_trait;
use omniverse_core::PeerId;
use uuid::Uuid;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn add_connection(&self, connection: Connection) -> Result<()>;
    async fn remove_connection(&self, socket_id: Uuid) -> Result<()>;
    async fn get_connection(&self, socket_id: Uuid) -> Result<Option<Connection>>;
    async fn find_by_peer(&self, peer_id: &PeerId) -> Result<Vec<Connection>>;
    async fn get_all_connections(&self) -> Result<Vec<Connection>>;
}
