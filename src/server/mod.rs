//! Rendezvous relay: groups sockets into plane rooms and forwards
//! signaling envelopes between peer ids.

mod config;
mod connection;
mod connection_handler;
mod connection_repository;
mod error;
mod memory_storage;
mod observability;
mod relay_server;
mod room_repository;
pub mod route;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod websocket_listener;

pub use config::{RelayConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_PATH, DEFAULT_PORT};
pub use connection::Connection;
pub use connection_handler::ConnectionHandler;
pub use connection_repository::ConnectionRepository;
pub use error::{RelayError, Result};
pub use memory_storage::MemoryStorage;
pub use observability::init_tracing;
pub use relay_server::RelayServer;
pub use room_repository::{Membership, RoomRepository};
pub use route::create_relay_route;
