use omniverse_core::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity persisted between runs so a client keeps its peer id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalIdentity {
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
    #[serde(default)]
    pub identities: Vec<Value>,
}

impl LocalIdentity {
    pub fn generate() -> Self {
        Self {
            peer_id: PeerId::new(),
            identities: Vec::new(),
        }
    }

    pub fn with_peer_id(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            identities: Vec::new(),
        }
    }
}
