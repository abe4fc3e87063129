//! Relay links served by the real relay handler, without a socket.

use async_trait::async_trait;
use omniverse::server::{
    ConnectionHandler, MemoryStorage, DEFAULT_CHANNEL_CAPACITY,
};
use omniverse_core::{ClientMessage, PeerId};
use omniverse_p2p::infrastructure::{RelayConnection, RelayLink, RelayLinkEvent};
use omniverse_p2p::{P2PError, RelayConnector, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::warn;

#[derive(Clone)]
pub struct InProcessRelay {
    handler: ConnectionHandler,
    storage: Arc<MemoryStorage>,
}

impl Default for InProcessRelay {
    fn default() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self {
            handler: ConnectionHandler::new(storage.clone(), storage.clone()),
            storage,
        }
    }
}

impl InProcessRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }
}

#[async_trait]
impl RelayConnector for InProcessRelay {
    async fn connect(&self, peer: &PeerId) -> Result<RelayConnection> {
        let (to_client, mut from_relay) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let handler = self.handler.with_sender(to_client);
        handler
            .connect(peer.clone())
            .await
            .map_err(|e| P2PError::Relay(e.to_string()))?;

        let (events, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = from_relay.recv().await {
                if events.send(RelayLinkEvent::Message(message)).is_err() {
                    break;
                }
            }
        });

        // one task per link keeps the socket's messages in order
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ClientMessage>();
        tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(e) = handler.handle_message(message).await {
                    warn!(error = %e, "Relay rejected message");
                }
            }
            if let Err(e) = handler.disconnect().await {
                warn!(error = %e, "Relay disconnect failed");
            }
        });

        let link: Arc<dyn RelayLink> = Arc::new(InProcessLink {
            outbox: Mutex::new(Some(outbox)),
            connected: AtomicBool::new(true),
        });
        Ok((link, events_rx))
    }
}

struct InProcessLink {
    outbox: Mutex<Option<UnboundedSender<ClientMessage>>>,
    connected: AtomicBool,
}

impl RelayLink for InProcessLink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        let outbox = self.outbox.lock().unwrap_or_else(|p| p.into_inner());
        match outbox.as_ref() {
            Some(outbox) => outbox
                .send(message)
                .map_err(|_| P2PError::RelayDisconnected),
            None => Err(P2PError::RelayDisconnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbox.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}
