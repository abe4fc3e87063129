//! Relay link over a WebSocket, with a supervisor that reconnects on drops.

use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::relay::{
    ReconnectPolicy, RelayConnection, RelayConnector, RelayLink, RelayLinkEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use omniverse_core::{ClientMessage, PeerId, RelayMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketRelayConnector {
    url: String,
    policy: ReconnectPolicy,
}

impl WebSocketRelayConnector {
    /// `url` points at the relay socket endpoint, e.g. `ws://host:8765/peer`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Relay URL with the peer id attached as `uid` query parameter
    pub fn peer_url(&self, peer: &PeerId) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}uid={}", self.url, separator, peer)
    }
}

#[async_trait]
impl RelayConnector for WebSocketRelayConnector {
    async fn connect(&self, peer: &PeerId) -> Result<RelayConnection> {
        let url = self.peer_url(peer);
        info!("🔌 Connecting to relay {}", url);

        let (socket, _response) = connect_async(url.clone())
            .await
            .map_err(|e| P2PError::Relay(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        let supervisor = Supervisor {
            url,
            policy: self.policy.clone(),
            outbound: outbound_rx,
            events: events_tx,
            shutdown: shutdown_rx,
            connected: connected.clone(),
        };
        tokio::spawn(supervisor.run(socket));

        let link: Arc<dyn RelayLink> = Arc::new(WebSocketRelayLink {
            outbound: outbound_tx,
            connected,
            shutdown: shutdown_tx,
        });
        Ok((link, events_rx))
    }
}

pub struct WebSocketRelayLink {
    outbound: UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl RelayLink for WebSocketRelayLink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(P2PError::RelayDisconnected);
        }
        let text = message.to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| P2PError::ChannelClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

enum PumpExit {
    Dropped,
    Shutdown,
}

struct Supervisor {
    url: String,
    policy: ReconnectPolicy,
    outbound: UnboundedReceiver<String>,
    events: UnboundedSender<RelayLinkEvent>,
    shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
}

impl Supervisor {
    async fn run(mut self, socket: Socket) {
        let mut socket = Some(socket);
        loop {
            let current = match socket.take() {
                Some(current) => current,
                None => match self.reconnect().await {
                    Some(current) => {
                        self.connected.store(true, Ordering::SeqCst);
                        let _ = self.events.send(RelayLinkEvent::Reconnected);
                        current
                    }
                    None => break,
                },
            };

            self.connected.store(true, Ordering::SeqCst);
            let exit = self.pump(current).await;
            self.connected.store(false, Ordering::SeqCst);

            match exit {
                PumpExit::Shutdown => break,
                PumpExit::Dropped => {
                    warn!("⚠️  Relay link to {} dropped", self.url);
                    let _ = self.events.send(RelayLinkEvent::Disconnected);
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("Relay supervisor for {} stopped", self.url);
    }

    /// Closed explicitly, or the link handle was dropped
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    async fn reconnect(&mut self) -> Option<Socket> {
        let mut attempt = 0;
        while let Some(delay) = self.policy.delay(attempt) {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {}
            }
            if self.is_shut_down() {
                return None;
            }

            match connect_async(self.url.clone()).await {
                Ok((socket, _)) => {
                    info!("🔁 Reconnected to relay {} after {} attempts", self.url, attempt + 1);
                    return Some(socket);
                }
                Err(e) => {
                    debug!("Reconnect attempt {} to {} failed: {}", attempt + 1, self.url, e);
                }
            }
            attempt += 1;
        }
        error!("❌ Giving up on relay {}", self.url);
        None
    }

    async fn pump(&mut self, socket: Socket) -> PumpExit {
        let (mut sink, mut stream) = socket.split();
        if self.is_shut_down() {
            let _ = sink.send(Message::Close(None)).await;
            return PumpExit::Shutdown;
        }

        loop {
            tokio::select! {
                frame = self.outbound.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!("Failed to send to relay: {}", e);
                            return PumpExit::Dropped;
                        }
                    }
                    None => return PumpExit::Shutdown,
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match RelayMessage::from_json(&text.to_string()) {
                            Ok(message) => {
                                let _ = self.events.send(RelayLinkEvent::Message(message));
                            }
                            Err(e) => warn!("Dropping malformed relay frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return PumpExit::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Relay socket error: {}", e);
                        return PumpExit::Dropped;
                    }
                },
                _ = self.shutdown.changed() => {
                    if self.is_shut_down() {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpExit::Shutdown;
                    }
                }
            }
        }
    }
}
