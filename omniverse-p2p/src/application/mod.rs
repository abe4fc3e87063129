mod config;
mod events;
mod peer;
mod registry;
mod session;

pub use config::{OmniverseConfig, DEFAULT_RELAY_URL, DEFAULT_RPC_TIMEOUT};
pub use events::{EventBus, EventListener, ListenerId, OmniverseEvent, TopicPattern};
pub use peer::{
    DataListener, PeerHandle, ReleaseListener, RpcHandler, ScopeFilter, SubscriptionId,
};
pub use registry::{PeerRecord, PeerRegistry, RegistryError, RegistryEvent};
pub use session::{Omniverse, OmniverseBuilder, PlaneScope, SessionError};
