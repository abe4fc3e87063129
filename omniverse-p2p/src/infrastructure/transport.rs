use crate::infrastructure::error::Result;
use async_trait::async_trait;
use omniverse_core::PeerId;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Which end of the handshake a transport plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRole {
    /// Produces the offer as soon as it is created
    Initiator,
    /// Produces an answer once it is fed a remote offer
    Responder,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub role: TransportRole,
    /// Emit ICE candidates as separate signals instead of one complete SDP
    pub trickle: bool,
}

impl TransportOptions {
    pub fn initiator() -> Self {
        Self {
            role: TransportRole::Initiator,
            trickle: false,
        }
    }

    pub fn responder() -> Self {
        Self {
            role: TransportRole::Responder,
            trickle: false,
        }
    }
}

/// Everything a transport reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Local offer or answer, to be relayed to the remote peer
    Signal(Value),
    /// The direct channel is open
    Connected,
    /// A text frame arrived
    Data(String),
    /// The transport failed
    Error(String),
    /// The remote side or the network closed the channel
    Closed,
}

/// A direct, bidirectional channel to one remote peer
pub trait Transport: Send + Sync {
    /// Feed a remote offer or answer
    fn signal(&self, remote: Value) -> Result<()>;

    /// Send one text frame
    fn send(&self, frame: &str) -> Result<()>;

    fn is_writable(&self) -> bool;

    /// Close the channel; calling it twice is a no-op
    fn destroy(&self);
}

pub type TransportHandle = (Arc<dyn Transport>, UnboundedReceiver<TransportEvent>);

/// Allocates transports for peer handles
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        local: &PeerId,
        remote: &PeerId,
        options: TransportOptions,
    ) -> Result<TransportHandle>;
}
