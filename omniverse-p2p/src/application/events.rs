use crate::domain::{PeerId, PlaneId};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::trace;

const STREAM_CAPACITY: usize = 1024;

/// Events published by an Omniverse session
#[derive(Debug, Clone, PartialEq)]
pub enum OmniverseEvent {
    /// A peer announced itself in a plane we are in
    PeerJoin { peer: PeerId, plane: PlaneId },
    /// The relay reported a peer gone
    PeerLeave {
        peer: PeerId,
        plane: Option<PlaneId>,
    },
    /// A direct transport to the peer opened
    PeerConnected { peer: PeerId },
    /// The direct transport to the peer went away
    PeerDisconnected { peer: PeerId },
    /// A data packet arrived from a peer
    PeerMessage {
        peer: PeerId,
        scope: String,
        payload: Value,
    },
    RelayConnected,
    RelayDisconnected,
    RelayReconnected,
}

impl OmniverseEvent {
    /// Dotted topic name, e.g. `peers.<id>.message.shout`
    pub fn topic(&self) -> String {
        match self {
            OmniverseEvent::PeerJoin { .. } => "peer_join".to_string(),
            OmniverseEvent::PeerLeave { .. } => "peer_leave".to_string(),
            OmniverseEvent::PeerConnected { .. } => "peer_connected".to_string(),
            OmniverseEvent::PeerDisconnected { .. } => "peer_disconnected".to_string(),
            OmniverseEvent::PeerMessage { peer, scope, .. } => {
                format!("peers.{}.message.{}", peer, scope)
            }
            OmniverseEvent::RelayConnected => "relay.connected".to_string(),
            OmniverseEvent::RelayDisconnected => "relay.disconnected".to_string(),
            OmniverseEvent::RelayReconnected => "relay.reconnected".to_string(),
        }
    }
}

/// Dotted topic pattern; `*` matches exactly one segment, a lone `*` matches
/// every topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<String>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        Self {
            segments: pattern.split('.').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        if self.segments.len() == 1 && self.segments[0] == "*" {
            return true;
        }
        let parts: Vec<&str> = topic.split('.').collect();
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(parts)
                .all(|(pattern, part)| pattern == "*" || pattern == part)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventListener = Arc<dyn Fn(&OmniverseEvent) + Send + Sync>;

/// Topic based publish/subscribe with callback listeners and a broadcast
/// stream for async consumers
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, TopicPattern, EventListener)>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<OmniverseEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    pub fn on<F>(&self, pattern: impl Into<TopicPattern>, listener: F) -> ListenerId
    where
        F: Fn(&OmniverseEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, pattern.into(), Arc::new(listener)));
        }
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        match self.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _, _)| *existing != id);
                before != listeners.len()
            }
            Err(_) => false,
        }
    }

    /// Every published event, for consumers that prefer a stream
    pub fn subscribe(&self) -> broadcast::Receiver<OmniverseEvent> {
        self.stream.subscribe()
    }

    pub fn publish(&self, event: OmniverseEvent) {
        let topic = event.topic();
        let matching: Vec<EventListener> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .filter(|(_, pattern, _)| pattern.matches(&topic))
                .map(|(_, _, listener)| listener.clone())
                .collect(),
            Err(_) => Vec::new(),
        };
        trace!("📣 {} → {} listeners", topic, matching.len());
        for listener in matching {
            listener(&event);
        }
        let _ = self.stream.send(event);
    }
}
