pub mod relay;

pub use relay::InProcessRelay;

use cucumber::World;
use omniverse_core::{Packet, PeerId};
use omniverse_p2p::domain::{NegotiationAction, OfferLedger};
use omniverse_p2p::{
    LocalIdentity, MemoryIdentityStore, MemoryNetwork, Omniverse, OmniverseConfig, PeerRegistry,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A message a session heard: (listener, sender, payload)
pub type Heard = (String, String, Value);

#[derive(World, Default)]
pub struct OmniverseWorld {
    /// Registry under test for the plane scenarios
    pub registry: PeerRegistry,

    /// Offer ledgers keyed by their local peer id
    pub ledgers: HashMap<String, OfferLedger>,

    /// Action requested by the last ledger transition
    pub last_action: Option<NegotiationAction>,

    /// Outcome of the last packet decode
    pub decoded: Option<Result<Packet, String>>,

    pub relay: InProcessRelay,
    pub network: MemoryNetwork,
    pub sessions: HashMap<String, Omniverse>,
    pub heard: Arc<Mutex<Vec<Heard>>>,

    pub last_error: Option<String>,
}

impl fmt::Debug for OmniverseWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OmniverseWorld")
            .field("registry_len", &self.registry.unscoped().len())
            .field("ledgers", &self.ledgers.keys().collect::<Vec<_>>())
            .field("last_action", &self.last_action)
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl OmniverseWorld {
    pub fn ledger(&mut self, local: &str) -> &mut OfferLedger {
        self.ledgers
            .entry(local.to_string())
            .or_insert_with(|| OfferLedger::new(PeerId::from(local)))
    }

    /// Boot a session for `name` against the in-process relay
    pub async fn join(&mut self, name: &str, config: OmniverseConfig) -> Omniverse {
        let session = Omniverse::builder(config)
            .with_identity_store(Arc::new(MemoryIdentityStore::with_identity(
                LocalIdentity::with_peer_id(PeerId::from(name)),
            )))
            .with_relay(Arc::new(self.relay.clone()))
            .with_transports(Arc::new(self.network.clone()))
            .build()
            .expect("session builds");

        let heard = self.heard.clone();
        let listener = name.to_string();
        session.on("peers.*.message.*", move |event| {
            if let omniverse_p2p::OmniverseEvent::PeerMessage { peer, payload, .. } = event {
                heard
                    .lock()
                    .unwrap()
                    .push((listener.clone(), peer.to_string(), payload.clone()));
            }
        });

        session.boot().await.expect("session boots");
        self.sessions.insert(name.to_string(), session.clone());
        session
    }

    pub fn session(&self, name: &str) -> &Omniverse {
        self.sessions
            .get(name)
            .unwrap_or_else(|| panic!("No session named '{}'", name))
    }
}

/// Poll `condition` until it holds, failing after five seconds
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting until {}", what);
}
