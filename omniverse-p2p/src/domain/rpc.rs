use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Why a remote call did not produce a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcErrorReason {
    /// No response arrived before the deadline
    Timeout,
    /// There was no writable transport to the peer
    NoConnection,
    /// The callee has no handler for the method
    NotImplemented,
    /// The transport refused the request frame
    SendFailed,
    /// Reason string we do not know about
    Unknown(String),
}

impl RpcErrorReason {
    pub fn as_str(&self) -> &str {
        match self {
            RpcErrorReason::Timeout => "timeout",
            RpcErrorReason::NoConnection => "no_connection",
            RpcErrorReason::NotImplemented => "rpc_not_implemented",
            RpcErrorReason::SendFailed => "send_failed",
            RpcErrorReason::Unknown(reason) => reason,
        }
    }

    pub fn parse(reason: &str) -> Self {
        match reason {
            "timeout" => RpcErrorReason::Timeout,
            "no_connection" => RpcErrorReason::NoConnection,
            "rpc_not_implemented" => RpcErrorReason::NotImplemented,
            "send_failed" => RpcErrorReason::SendFailed,
            other => RpcErrorReason::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcFailure {
    pub reason: RpcErrorReason,
    pub meta: Option<Value>,
}

/// Outcome of `send_call`. Failures are values, never `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Ok(Value),
    Error(RpcFailure),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    status: String,
    error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
}

impl RpcResponse {
    pub fn ok(payload: Value) -> Self {
        RpcResponse::Ok(payload)
    }

    pub fn error(reason: RpcErrorReason, meta: Option<Value>) -> Self {
        RpcResponse::Error(RpcFailure { reason, meta })
    }

    pub fn timeout(after: Duration) -> Self {
        Self::error(
            RpcErrorReason::Timeout,
            Some(json!({ "after": after.as_millis() as u64 })),
        )
    }

    pub fn no_connection() -> Self {
        Self::error(RpcErrorReason::NoConnection, None)
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::error(
            RpcErrorReason::NotImplemented,
            Some(json!({ "method": method })),
        )
    }

    pub fn send_failed(detail: impl Into<String>) -> Self {
        Self::error(
            RpcErrorReason::SendFailed,
            Some(json!({ "detail": detail.into() })),
        )
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RpcResponse::Ok(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            RpcResponse::Ok(payload) => Some(payload),
            RpcResponse::Error(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&RpcErrorReason> {
        match self {
            RpcResponse::Ok(_) => None,
            RpcResponse::Error(failure) => Some(&failure.reason),
        }
    }

    /// Envelope carried in `_returnValue`
    pub fn to_value(&self) -> Value {
        let envelope = match self {
            RpcResponse::Ok(payload) => Envelope {
                status: "ok".to_string(),
                error: false,
                payload: Some(payload.clone()),
                reason: None,
                meta: None,
            },
            RpcResponse::Error(failure) => Envelope {
                status: "error".to_string(),
                error: true,
                payload: None,
                reason: Some(failure.reason.as_str().to_string()),
                meta: failure.meta.clone(),
            },
        };
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }

    /// Interpret a `_returnValue`; anything that is not an envelope is a bare payload
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<Envelope>(value.clone()) {
            Ok(envelope) if envelope.status == "ok" && !envelope.error => {
                RpcResponse::Ok(envelope.payload.unwrap_or(Value::Null))
            }
            Ok(envelope) if envelope.status == "error" => RpcResponse::Error(RpcFailure {
                reason: envelope
                    .reason
                    .as_deref()
                    .map(RpcErrorReason::parse)
                    .unwrap_or_else(|| RpcErrorReason::Unknown(String::new())),
                meta: envelope.meta,
            }),
            _ => RpcResponse::Ok(value),
        }
    }
}
