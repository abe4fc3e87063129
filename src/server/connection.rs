use omniverse_core::{PeerId, RelayMessage};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

/// One live relay socket
#[derive(Debug, Clone)]
pub struct Connection {
    pub socket_id: Uuid,
    pub peer_id: PeerId,
    pub sender: Sender<RelayMessage>,
}

impl Connection {
    pub fn new(peer_id: PeerId, sender: Sender<RelayMessage>) -> Self {
        Connection {
            socket_id: Uuid::new_v4(),
            peer_id,
            sender,
        }
    }
}
