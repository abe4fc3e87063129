use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Plane every client enters when no other plane was requested.
pub const DEFAULT_PLANE: &str = "00000000-0000-0000-0000-000000000000";

/// Unique identifier of a node in the network.
///
/// Ordering is plain string ordering. Glare resolution depends on it, so both
/// sides of a handshake must compare the exact same representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh random (v4) identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First hyphen-separated segment, handy for log lines
    pub fn short(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Name of a group of peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaneId(String);

impl PlaneId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relay room this plane maps to
    pub fn room_key(&self) -> RoomKey {
        RoomKey::for_plane(self)
    }
}

impl Default for PlaneId {
    fn default() -> Self {
        Self(DEFAULT_PLANE.to_string())
    }
}

impl fmt::Display for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlaneId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for PlaneId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Key of a relay room.
///
/// Plane rooms use the lowercase hex SHA-256 of the plane name so the relay
/// never groups sockets by the raw name. Private rooms use the raw peer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn for_plane(plane: &PlaneId) -> Self {
        let digest = Sha256::digest(plane.as_str().as_bytes());
        Self(hex::encode(digest))
    }

    pub fn for_peer(peer: &PeerId) -> Self {
        Self(peer.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_uuid() {
        let id = PeerId::new();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_short_uid() {
        let id = PeerId::from("c0ffee12-3456-4789-abcd-0123456789ab");
        assert_eq!(id.short(), "c0ffee12");

        let plain = PeerId::from("nohyphen");
        assert_eq!(plain.short(), "nohyphen");
    }

    #[test]
    fn test_peer_id_ordering_is_lexical() {
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        let longer = PeerId::from("ab");
        assert!(a < b);
        assert!(a < longer);
        assert!(longer < b);
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let id = PeerId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_default_plane() {
        assert_eq!(PlaneId::default().as_str(), DEFAULT_PLANE);
    }

    #[test]
    fn test_room_key_is_deterministic_sha256() {
        let plane = PlaneId::from("town");
        assert_eq!(plane.room_key(), PlaneId::from("town").room_key());
        assert_ne!(plane.room_key(), PlaneId::from("city").room_key());
        assert_eq!(plane.room_key().as_str().len(), 64);
        assert_ne!(plane.room_key().as_str(), "town");
        // sha256("abc")
        assert_eq!(
            PlaneId::from("abc").room_key().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_private_room_is_raw_peer_id() {
        let peer = PeerId::from("peer-1");
        assert_eq!(RoomKey::for_peer(&peer).as_str(), "peer-1");
    }
}
