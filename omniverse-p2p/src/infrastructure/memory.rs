//! In-process transport used by tests and by sessions living in one process.
//!
//! Offers and answers are JSON objects shaped like session descriptions
//! (`{"type": "offer", "sdp": "memory:<token>"}`) so they travel through the
//! relay exactly like real ones.

use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::transport::{
    Transport, TransportEvent, TransportFactory, TransportHandle, TransportOptions, TransportRole,
};
use async_trait::async_trait;
use omniverse_core::PeerId;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

/// Shared switchboard for [`MemoryTransport`]s
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    next_token: u64,
    endpoints: HashMap<u64, Arc<Endpoint>>,
    refused: HashSet<PeerId>,
}

struct Endpoint {
    token: u64,
    local: PeerId,
    role: TransportRole,
    events: UnboundedSender<TransportEvent>,
    link: Mutex<Link>,
}

#[derive(Default)]
struct Link {
    remote: Option<Weak<Endpoint>>,
    open: bool,
    destroyed: bool,
}

impl Endpoint {
    fn emit(&self, event: TransportEvent) {
        // receiver gone means the owner already stopped listening
        let _ = self.events.send(event);
    }

    fn is_destroyed(&self) -> bool {
        self.link.lock().map(|link| link.destroyed).unwrap_or(true)
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every responder owned by `peer` fail when fed an offer
    pub fn refuse_connections_to(&self, peer: &PeerId) {
        if let Ok(mut state) = self.state.lock() {
            state.refused.insert(peer.clone());
        }
    }

    pub fn accept_connections_to(&self, peer: &PeerId) {
        if let Ok(mut state) = self.state.lock() {
            state.refused.remove(peer);
        }
    }

    /// Number of live (not destroyed) endpoints
    pub fn endpoint_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.endpoints.len())
            .unwrap_or(0)
    }

    fn allocate(&self, local: &PeerId, role: TransportRole) -> Result<TransportHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self
            .state
            .lock()
            .map_err(|e| P2PError::Transport(e.to_string()))?;
        state.next_token += 1;
        let endpoint = Arc::new(Endpoint {
            token: state.next_token,
            local: local.clone(),
            role,
            events: tx,
            link: Mutex::new(Link::default()),
        });
        state.endpoints.insert(endpoint.token, endpoint.clone());
        drop(state);

        if role == TransportRole::Initiator {
            endpoint.emit(TransportEvent::Signal(description("offer", endpoint.token)));
        }

        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport {
            endpoint,
            network: self.clone(),
        });
        Ok((transport, rx))
    }

    fn lookup(&self, token: u64) -> Option<Arc<Endpoint>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.endpoints.get(&token).cloned())
    }

    fn is_refused(&self, peer: &PeerId) -> bool {
        self.state
            .lock()
            .map(|state| state.refused.contains(peer))
            .unwrap_or(false)
    }

    fn release(&self, token: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.endpoints.remove(&token);
        }
    }
}

#[async_trait]
impl TransportFactory for MemoryNetwork {
    async fn create(
        &self,
        local: &PeerId,
        remote: &PeerId,
        options: TransportOptions,
    ) -> Result<TransportHandle> {
        debug!(
            "🧪 Allocating memory transport {} → {} ({:?})",
            local.short(),
            remote.short(),
            options.role
        );
        self.allocate(local, options.role)
    }
}

pub struct MemoryTransport {
    endpoint: Arc<Endpoint>,
    network: MemoryNetwork,
}

fn description(kind: &str, token: u64) -> Value {
    json!({ "type": kind, "sdp": format!("memory:{}", token) })
}

fn parse_description(remote: &Value) -> Option<(&str, u64)> {
    let kind = remote.get("type")?.as_str()?;
    let token = remote
        .get("sdp")?
        .as_str()?
        .strip_prefix("memory:")?
        .parse()
        .ok()?;
    Some((kind, token))
}

impl MemoryTransport {
    fn accept_offer(&self, token: u64) -> Result<()> {
        let endpoint = &self.endpoint;
        if self.network.is_refused(&endpoint.local) {
            endpoint.emit(TransportEvent::Error("connection refused".to_string()));
            return Ok(());
        }

        let initiator = match self.network.lookup(token) {
            Some(initiator) if !initiator.is_destroyed() => initiator,
            _ => {
                endpoint.emit(TransportEvent::Error(format!("unknown offer {}", token)));
                return Ok(());
            }
        };

        {
            let mut link = endpoint
                .link
                .lock()
                .map_err(|e| P2PError::Transport(e.to_string()))?;
            link.remote = Some(Arc::downgrade(&initiator));
        }
        endpoint.emit(TransportEvent::Signal(description("answer", endpoint.token)));
        Ok(())
    }

    fn accept_answer(&self, token: u64) -> Result<()> {
        let endpoint = &self.endpoint;
        let responder = match self.network.lookup(token) {
            Some(responder) if !responder.is_destroyed() => responder,
            _ => {
                endpoint.emit(TransportEvent::Error(format!("unknown answer {}", token)));
                return Ok(());
            }
        };

        let answers_us = responder
            .link
            .lock()
            .ok()
            .and_then(|link| link.remote.as_ref().and_then(Weak::upgrade))
            .map(|remote| remote.token == endpoint.token)
            .unwrap_or(false);
        if !answers_us {
            endpoint.emit(TransportEvent::Error(format!(
                "answer {} does not belong to offer {}",
                token, endpoint.token
            )));
            return Ok(());
        }

        {
            let mut link = endpoint
                .link
                .lock()
                .map_err(|e| P2PError::Transport(e.to_string()))?;
            link.remote = Some(Arc::downgrade(&responder));
            link.open = true;
        }
        if let Ok(mut link) = responder.link.lock() {
            link.open = true;
        }

        endpoint.emit(TransportEvent::Connected);
        responder.emit(TransportEvent::Connected);
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn signal(&self, remote: Value) -> Result<()> {
        let (kind, token) = parse_description(&remote)
            .ok_or_else(|| P2PError::SignalFailed(format!("unrecognised signal {}", remote)))?;

        match (kind, self.endpoint.role) {
            ("offer", TransportRole::Responder) => self.accept_offer(token),
            ("answer", TransportRole::Initiator) => self.accept_answer(token),
            (kind, role) => Err(P2PError::SignalFailed(format!(
                "{} is not valid for a {:?}",
                kind, role
            ))),
        }
    }

    fn send(&self, frame: &str) -> Result<()> {
        let remote = {
            let link = self
                .endpoint
                .link
                .lock()
                .map_err(|e| P2PError::Transport(e.to_string()))?;
            if !link.open || link.destroyed {
                return Err(P2PError::SendFailed("transport not writable".to_string()));
            }
            link.remote.as_ref().and_then(Weak::upgrade)
        };

        match remote {
            Some(remote) if !remote.is_destroyed() => {
                remote.emit(TransportEvent::Data(frame.to_string()));
                Ok(())
            }
            _ => Err(P2PError::SendFailed("remote endpoint is gone".to_string())),
        }
    }

    fn is_writable(&self) -> bool {
        self.endpoint
            .link
            .lock()
            .map(|link| link.open && !link.destroyed)
            .unwrap_or(false)
    }

    fn destroy(&self) {
        let remote = match self.endpoint.link.lock() {
            Ok(mut link) => {
                if link.destroyed {
                    return;
                }
                link.destroyed = true;
                link.open = false;
                link.remote.take().and_then(|remote| remote.upgrade())
            }
            Err(e) => {
                warn!("Memory transport lock poisoned: {}", e);
                return;
            }
        };
        self.network.release(self.endpoint.token);

        if let Some(remote) = remote {
            let notify = match remote.link.lock() {
                Ok(mut link) if !link.destroyed => {
                    link.open = false;
                    link.remote = None;
                    true
                }
                _ => false,
            };
            if notify {
                remote.emit(TransportEvent::Closed);
            }
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}
