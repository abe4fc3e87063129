pub mod memory_relay;

use memory_relay::MemoryRelay;
use omniverse_p2p::{
    LocalIdentity, MemoryIdentityStore, MemoryNetwork, Omniverse, OmniverseConfig, OmniverseEvent,
    PeerId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Relay and transport network shared by every session of a test
#[derive(Clone, Default)]
pub struct Universe {
    pub relay: MemoryRelay,
    pub network: MemoryNetwork,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, peer_id: &str, config: OmniverseConfig) -> Omniverse {
        Omniverse::builder(config)
            .with_identity_store(Arc::new(MemoryIdentityStore::with_identity(
                LocalIdentity::with_peer_id(PeerId::from(peer_id)),
            )))
            .with_relay(Arc::new(self.relay.clone()))
            .with_transports(Arc::new(self.network.clone()))
            .build()
            .expect("session builds")
    }

    pub async fn boot(&self, peer_id: &str, config: OmniverseConfig) -> Omniverse {
        let session = self.session(peer_id, config);
        session.boot().await.expect("session boots");
        session
    }
}

/// Wait for the first event matching `predicate`, failing after five seconds
pub async fn expect_event<F>(
    events: &mut broadcast::Receiver<OmniverseEvent>,
    predicate: F,
) -> OmniverseEvent
where
    F: Fn(&OmniverseEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

/// Poll `condition` until it holds, failing after five seconds
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition did not hold in time")
}
