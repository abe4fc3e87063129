pub mod association;
pub mod connection_state;
pub mod identity;
pub mod negotiation;
pub mod offer;
pub mod rpc;

pub use association::AssociationGraph;
pub use connection_state::ConnectionState;
pub use identity::LocalIdentity;
pub use negotiation::{
    should_originate, step, NegotiationAction, NegotiationError, NegotiationEvent, Step,
};
pub use offer::{ConnectionOffer, OfferLedger, OfferStatus};
pub use rpc::{RpcErrorReason, RpcFailure, RpcResponse};

pub use omniverse_core::{PeerId, PlaneId};
