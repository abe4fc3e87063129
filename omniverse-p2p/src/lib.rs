// Domain layer (core)
pub mod domain;

// Application layer (use cases)
pub mod application;

// Infrastructure layer (adapters)
pub mod infrastructure;

// Re-exports for convenience
pub use application::{
    Omniverse, OmniverseBuilder, OmniverseConfig, OmniverseEvent, PeerHandle, PeerRecord,
    PeerRegistry, PlaneScope, RegistryError, RegistryEvent, ScopeFilter, SessionError,
};
pub use domain::{
    ConnectionOffer, ConnectionState, LocalIdentity, OfferStatus, PeerId, PlaneId, RpcErrorReason,
    RpcResponse,
};
pub use infrastructure::error::{P2PError, Result};
pub use infrastructure::{
    FileIdentityStore, IdentityStore, MemoryIdentityStore, MemoryNetwork, ReconnectPolicy,
    RelayConnector, TransportFactory,
};
