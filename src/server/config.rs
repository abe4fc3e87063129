use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_PATH: &str = "/peer";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Relay process settings, read from flags with environment fallbacks
#[derive(Debug, Clone, Parser)]
#[command(
    name = "omniverse-relay",
    version,
    about = "Rendezvous relay for omniverse peers"
)]
pub struct RelayConfig {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// WebSocket path peers connect to
    #[arg(long, env = "RELAY_PATH", default_value = DEFAULT_PATH)]
    pub path: String,

    /// Outgoing queue length per socket
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            json_logs: false,
        }
    }
}

impl RelayConfig {
    /// Loopback on an OS-assigned port
    pub fn ephemeral() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The websocket path with a leading slash
    pub fn route_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}
