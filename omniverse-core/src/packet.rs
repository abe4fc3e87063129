//! Frames exchanged directly between two peers once their transport is open.
//!
//! Every frame is a JSON object carrying `_type` and `_version`. Receivers
//! validate the description fields and the per-type required fields before
//! handing a [`Packet`] to the application; anything else is rejected with a
//! [`PacketError`] and dropped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The only packet version this implementation speaks
pub const PACKET_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Packet is not a JSON object")]
    NotAnObject,

    #[error("Missing packet description fields")]
    MissingDescription,

    #[error("Unsupported packet version: {0}")]
    UnsupportedVersion(String),

    #[error("Unknown packet type: {0}")]
    UnknownType(String),

    #[error("{kind} packet missing required fields: {fields}")]
    MissingFields { kind: PacketKind, fields: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Discriminator of the three packet shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Data,
    RpcRequest,
    RpcResponse,
}

impl PacketKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "data" => Some(Self::Data),
            "rpc_request" => Some(Self::RpcRequest),
            "rpc_response" => Some(Self::RpcResponse),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::RpcRequest => "rpc_request",
            Self::RpcResponse => "rpc_response",
        }
    }

    /// Fields that must be present (they may still be `null`)
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Data => &["_scope", "_payload"],
            Self::RpcRequest => &["_method", "_invocationId", "_args"],
            Self::RpcResponse => &["_method", "_invocationId", "_returnValue"],
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application payload addressed to a named scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    #[serde(rename = "_version")]
    pub version: u64,
    #[serde(rename = "_scope")]
    pub scope: String,
    #[serde(rename = "_payload")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequestPacket {
    #[serde(rename = "_version")]
    pub version: u64,
    #[serde(rename = "_method")]
    pub method: String,
    #[serde(rename = "_args")]
    pub args: Value,
    /// `true` means the caller does not wait for a response
    #[serde(rename = "_cast", default)]
    pub cast: bool,
    #[serde(rename = "_invocationId")]
    pub invocation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponsePacket {
    #[serde(rename = "_version")]
    pub version: u64,
    #[serde(rename = "_method")]
    pub method: String,
    #[serde(rename = "_invocationId")]
    pub invocation_id: String,
    #[serde(rename = "_returnValue")]
    pub return_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Packet {
    Data(DataPacket),
    RpcRequest(RpcRequestPacket),
    RpcResponse(RpcResponsePacket),
}

impl Packet {
    pub fn data(scope: impl Into<String>, payload: Value) -> Self {
        Packet::Data(DataPacket {
            version: PACKET_VERSION,
            scope: scope.into(),
            payload,
        })
    }

    pub fn rpc_request(
        method: impl Into<String>,
        args: Value,
        cast: bool,
        invocation_id: impl Into<String>,
    ) -> Self {
        Packet::RpcRequest(RpcRequestPacket {
            version: PACKET_VERSION,
            method: method.into(),
            args,
            cast,
            invocation_id: invocation_id.into(),
        })
    }

    pub fn rpc_response(
        method: impl Into<String>,
        invocation_id: impl Into<String>,
        return_value: Value,
    ) -> Self {
        Packet::RpcResponse(RpcResponsePacket {
            version: PACKET_VERSION,
            method: method.into(),
            invocation_id: invocation_id.into(),
            return_value,
        })
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Data(_) => PacketKind::Data,
            Packet::RpcRequest(_) => PacketKind::RpcRequest,
            Packet::RpcResponse(_) => PacketKind::RpcResponse,
        }
    }

    pub fn encode(&self) -> Result<String, PacketError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a raw text frame
    pub fn decode(frame: &str) -> Result<Packet, PacketError> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| PacketError::Malformed(e.to_string()))?;
        let object = value.as_object().ok_or(PacketError::NotAnObject)?;

        let kind = validate_description(object)?;

        let missing: Vec<&str> = kind
            .required_fields()
            .iter()
            .filter(|field| !object.contains_key(**field))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(PacketError::MissingFields {
                kind,
                fields: missing.join(", "),
            });
        }

        serde_json::from_value(value).map_err(|e| PacketError::Malformed(e.to_string()))
    }
}

fn validate_description(object: &Map<String, Value>) -> Result<PacketKind, PacketError> {
    let (tag, version) = match (object.get("_type"), object.get("_version")) {
        (Some(Value::String(tag)), Some(version)) if !version.is_null() => (tag, version),
        _ => return Err(PacketError::MissingDescription),
    };

    if version.as_u64() != Some(PACKET_VERSION) {
        return Err(PacketError::UnsupportedVersion(version.to_string()));
    }

    PacketKind::parse(tag).ok_or_else(|| PacketError::UnknownType(tag.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_packet_wire_shape() {
        let packet = Packet::data("shout", json!({"text": "hello"}));
        let encoded: Value = serde_json::from_str(&packet.encode().unwrap()).unwrap();

        assert_eq!(
            encoded,
            json!({
                "_type": "data",
                "_version": 1,
                "_scope": "shout",
                "_payload": {"text": "hello"}
            })
        );
    }

    #[test]
    fn test_rpc_request_round_trip() {
        let packet = Packet::rpc_request("ping", json!([1, 2]), false, "inv-1");
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.kind(), PacketKind::RpcRequest);
    }

    #[test]
    fn test_cast_defaults_to_false() {
        let frame = r#"{"_type":"rpc_request","_version":1,"_method":"m","_args":null,"_invocationId":"x"}"#;
        match Packet::decode(frame).unwrap() {
            Packet::RpcRequest(request) => {
                assert!(!request.cast);
                assert_eq!(request.args, Value::Null);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_rejects_other_versions() {
        let frame = r#"{"_type":"data","_version":2,"_scope":"s","_payload":{}}"#;
        assert!(matches!(
            Packet::decode(frame),
            Err(PacketError::UnsupportedVersion(v)) if v == "2"
        ));
    }

    #[test]
    fn test_rejects_missing_description() {
        assert!(matches!(
            Packet::decode(r#"{"_scope":"s","_payload":{}}"#),
            Err(PacketError::MissingDescription)
        ));
        assert!(matches!(
            Packet::decode(r#"{"_type":"data","_scope":"s","_payload":{}}"#),
            Err(PacketError::MissingDescription)
        ));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let frame = r#"{"_type":"gossip","_version":1}"#;
        assert!(matches!(
            Packet::decode(frame),
            Err(PacketError::UnknownType(t)) if t == "gossip"
        ));
    }

    #[test]
    fn test_reports_missing_fields_per_kind() {
        let frame = r#"{"_type":"rpc_response","_version":1,"_method":"m"}"#;
        match Packet::decode(frame) {
            Err(PacketError::MissingFields { kind, fields }) => {
                assert_eq!(kind, PacketKind::RpcResponse);
                assert_eq!(fields, "_invocationId, _returnValue");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let frame = r#"{"_type":"data","_version":1,"_payload":1}"#;
        assert!(matches!(
            Packet::decode(frame),
            Err(PacketError::MissingFields { kind: PacketKind::Data, .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Packet::decode("not json"),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(
            Packet::decode("[1,2,3]"),
            Err(PacketError::NotAnObject)
        ));
    }

    #[test]
    fn test_accepts_null_payload() {
        let frame = r#"{"_type":"data","_version":1,"_scope":"s","_payload":null}"#;
        let packet = Packet::decode(frame).unwrap();
        assert_eq!(packet, Packet::data("s", Value::Null));
    }
}
