//! Rendezvous relay for the omniverse peer-to-peer network.
//!
//! Client-side session code lives in `omniverse-p2p`; this crate only
//! carries the relay service, behind the `server` feature.

#[cfg(feature = "server")]
pub mod server;
