use crate::domain::PlaneId;
use crate::infrastructure::ReconnectPolicy;
use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8765/peer";
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for an Omniverse session
#[derive(Debug, Clone)]
pub struct OmniverseConfig {
    /// Rendezvous relay socket endpoint
    pub relay_url: String,

    /// Originate offers to announced peers that sort higher than us
    pub auto_peer: bool,

    /// Plane entered on boot
    pub plane: PlaneId,

    /// How long `send_call` waits for a matching response
    pub rpc_timeout: Duration,

    pub reconnect: ReconnectPolicy,

    /// Log every relay frame at debug level
    pub debug: bool,
}

impl Default for OmniverseConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            auto_peer: true,
            plane: PlaneId::default(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            debug: false,
        }
    }
}

impl OmniverseConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }

    pub fn with_auto_peer(mut self, auto_peer: bool) -> Self {
        self.auto_peer = auto_peer;
        self
    }

    pub fn with_plane(mut self, plane: impl Into<PlaneId>) -> Self {
        self.plane = plane.into();
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OmniverseConfig::default();
        assert!(config.auto_peer);
        assert_eq!(config.plane, PlaneId::default());
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
    }

    #[test]
    fn test_builder() {
        let config = OmniverseConfig::new("ws://relay:9000/peer")
            .with_auto_peer(false)
            .with_plane("lobby")
            .with_rpc_timeout(Duration::from_millis(500));
        assert_eq!(config.relay_url, "ws://relay:9000/peer");
        assert!(!config.auto_peer);
        assert_eq!(config.plane, PlaneId::from("lobby"));
        assert_eq!(config.rpc_timeout, Duration::from_millis(500));
    }
}
