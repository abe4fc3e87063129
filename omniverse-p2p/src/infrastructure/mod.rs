pub mod error;
pub mod identity_store;
pub mod memory;
pub mod relay;
pub mod transport;
#[cfg(feature = "webrtc")]
pub mod webrtc_transport;
#[cfg(feature = "native")]
pub mod websocket_relay;

pub use error::{P2PError, Result};
pub use identity_store::{FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use relay::{ReconnectPolicy, RelayConnection, RelayConnector, RelayLink, RelayLinkEvent};
pub use transport::{
    Transport, TransportEvent, TransportFactory, TransportHandle, TransportOptions, TransportRole,
};
#[cfg(feature = "webrtc")]
pub use webrtc_transport::{WebRtcTransport, WebRtcTransportFactory};
#[cfg(feature = "native")]
pub use websocket_relay::{WebSocketRelayConnector, WebSocketRelayLink};
