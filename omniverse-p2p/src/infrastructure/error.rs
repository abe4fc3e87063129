use omniverse_core::{PacketError, WireError};

/// Infrastructure layer errors
#[derive(Debug, thiserror::Error)]
pub enum P2PError {
    #[error("No connection to peer: {0}")]
    NoConnection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Signal failed: {0}")]
    SignalFailed(String),

    #[error("Connection closed before it opened")]
    ConnectionClosed,

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Relay link is not connected")]
    RelayDisconnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Identity store error: {0}")]
    Identity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, P2PError>;
