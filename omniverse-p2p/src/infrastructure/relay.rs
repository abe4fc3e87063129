use crate::infrastructure::error::Result;
use async_trait::async_trait;
use omniverse_core::{ClientMessage, PeerId, RelayMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Events a relay link delivers to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum RelayLinkEvent {
    Message(RelayMessage),
    /// The link dropped; a reconnect may follow
    Disconnected,
    /// The link came back after a drop
    Reconnected,
}

/// Outbound half of a connection to the rendezvous relay
pub trait RelayLink: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Close the link for good, no reconnect follows
    fn close(&self);
}

pub type RelayConnection = (Arc<dyn RelayLink>, UnboundedReceiver<RelayLinkEvent>);

/// Opens relay links on behalf of a peer
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, peer: &PeerId) -> Result<RelayConnection>;
}

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    /// Delay before attempt number `attempt` (0-based), `None` when exhausted
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let factor = 2u32.saturating_pow(attempt.min(16));
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}
