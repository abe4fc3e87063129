//! Envelopes exchanged between a client and the rendezvous relay.
//!
//! Frames are JSON text of the shape `{"event": "<name>", "data": {...}}`.

use crate::ids::{PeerId, PlaneId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Acknowledgement the relay attaches to every heartbeat
pub const HEARTBEAT_ACK: &str = "dub";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Malformed relay envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Client → relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat {
        memo: String,
    },
    EnterPlane {
        plane_id: PlaneId,
    },
    LeavePlane {
        plane_id: PlaneId,
    },
    Announce {
        #[serde(rename = "fromPeer")]
        from_peer: PeerId,
        plane: PlaneId,
    },
    InitiateConnection {
        to_peer: PeerId,
        from_peer: PeerId,
        offer: Value,
    },
    ConnectionAnswer {
        to_peer: PeerId,
        from_peer: PeerId,
        answer: Value,
    },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Sender id claimed inside the envelope, if the event carries one
    pub fn claimed_sender(&self) -> Option<&PeerId> {
        match self {
            ClientMessage::Announce { from_peer, .. }
            | ClientMessage::InitiateConnection { from_peer, .. }
            | ClientMessage::ConnectionAnswer { from_peer, .. } => Some(from_peer),
            _ => None,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Heartbeat { .. } => "heartbeat",
            ClientMessage::EnterPlane { .. } => "enter_plane",
            ClientMessage::LeavePlane { .. } => "leave_plane",
            ClientMessage::Announce { .. } => "announce",
            ClientMessage::InitiateConnection { .. } => "initiate_connection",
            ClientMessage::ConnectionAnswer { .. } => "connection_answer",
        }
    }
}

/// Relay → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RelayMessage {
    HeartbeatAck {
        memo: String,
        ack: String,
    },
    RollCall {
        newbie: PeerId,
        plane: PlaneId,
    },
    Announce {
        #[serde(rename = "fromPeer")]
        from_peer: PeerId,
        plane: PlaneId,
    },
    PeerLeave {
        uid: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plane: Option<PlaneId>,
    },
    ConnectionOffer {
        to_peer: PeerId,
        from_peer: PeerId,
        offer: Value,
    },
    ConnectionAnswer {
        to_peer: PeerId,
        from_peer: PeerId,
        answer: Value,
    },
}

impl RelayMessage {
    pub fn heartbeat_ack(memo: impl Into<String>) -> Self {
        RelayMessage::HeartbeatAck {
            memo: memo.into(),
            ack: HEARTBEAT_ACK.to_string(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            RelayMessage::HeartbeatAck { .. } => "heartbeat_ack",
            RelayMessage::RollCall { .. } => "roll_call",
            RelayMessage::Announce { .. } => "announce",
            RelayMessage::PeerLeave { .. } => "peer_leave",
            RelayMessage::ConnectionOffer { .. } => "connection_offer",
            RelayMessage::ConnectionAnswer { .. } => "connection_answer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_envelope() {
        let message = ClientMessage::EnterPlane {
            plane_id: PlaneId::from("town"),
        };
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "enter_plane", "data": {"plane_id": "town"}})
        );
    }

    #[test]
    fn test_announce_uses_camel_case_sender() {
        let text = r#"{"event":"announce","data":{"fromPeer":"p1","plane":"town"}}"#;
        let message = ClientMessage::from_json(text).unwrap();
        assert_eq!(message.claimed_sender(), Some(&PeerId::from("p1")));
        assert_eq!(message.event_name(), "announce");
    }

    #[test]
    fn test_heartbeat_ack() {
        let ack = RelayMessage::heartbeat_ack("lub");
        let value: Value = serde_json::from_str(&ack.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "heartbeat_ack", "data": {"memo": "lub", "ack": "dub"}})
        );
    }

    #[test]
    fn test_peer_leave_plane_is_optional() {
        let legacy = r#"{"event":"peer_leave","data":{"uid":"p1"}}"#;
        assert_eq!(
            RelayMessage::from_json(legacy).unwrap(),
            RelayMessage::PeerLeave {
                uid: PeerId::from("p1"),
                plane: None
            }
        );
    }

    #[test]
    fn test_rejects_unknown_event() {
        assert!(ClientMessage::from_json(r#"{"event":"shout","data":{}}"#).is_err());
    }
}
