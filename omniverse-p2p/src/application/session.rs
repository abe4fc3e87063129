//! Session coordinator: owns the relay link, the peer registry and the
//! connection-offer ledger, and drives handshakes between them.

use crate::application::config::OmniverseConfig;
use crate::application::events::{EventBus, ListenerId, OmniverseEvent, TopicPattern};
use crate::application::peer::PeerHandle;
use crate::application::registry::{PeerRegistry, RegistryError};
use crate::domain::{
    should_originate, ConnectionOffer, ConnectionState, NegotiationAction, NegotiationError,
    NegotiationEvent, OfferLedger, OfferStatus, PeerId, PlaneId, Step,
};
use crate::infrastructure::error::P2PError;
use crate::infrastructure::identity_store::IdentityStore;
use crate::infrastructure::relay::{RelayConnector, RelayLink, RelayLinkEvent};
use crate::infrastructure::transport::{TransportFactory, TransportOptions};
use omniverse_core::{ClientMessage, RelayMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Peer connection already initiated")]
    AlreadyInitiated,

    #[error("Handshake error: {0}")]
    Negotiation(NegotiationError),

    #[error(transparent)]
    P2P(#[from] P2PError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Session is not booted")]
    NotBooted,

    #[error("Session is already booted")]
    AlreadyBooted,

    #[error("Refusing to connect to ourselves")]
    SelfConnection,

    #[error("Handshake with {0} was replaced by a newer one")]
    Superseded(PeerId),

    #[error("Relay did not acknowledge heartbeat {0}")]
    HeartbeatTimeout(String),

    #[error("Missing {0}")]
    Configuration(String),
}

impl From<NegotiationError> for SessionError {
    fn from(error: NegotiationError) -> Self {
        match error {
            NegotiationError::AlreadyInitiated => SessionError::AlreadyInitiated,
            other => SessionError::Negotiation(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Builds an [`Omniverse`] from its collaborators
pub struct OmniverseBuilder {
    config: OmniverseConfig,
    identity_store: Option<Arc<dyn IdentityStore>>,
    relay: Option<Arc<dyn RelayConnector>>,
    transports: Option<Arc<dyn TransportFactory>>,
}

impl OmniverseBuilder {
    pub fn new(config: OmniverseConfig) -> Self {
        Self {
            config,
            identity_store: None,
            relay: None,
            transports: None,
        }
    }

    pub fn with_identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = Some(store);
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayConnector>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn build(self) -> Result<Omniverse> {
        let identity_store = match self.identity_store {
            Some(store) => store,
            None => default_identity_store(),
        };
        let relay = match self.relay {
            Some(relay) => relay,
            None => default_relay(&self.config)?,
        };
        let transports = match self.transports {
            Some(transports) => transports,
            None => default_transports()?,
        };

        Ok(Omniverse {
            inner: Arc::new(Inner {
                registry: PeerRegistry::with_rpc_timeout(self.config.rpc_timeout),
                config: self.config,
                identity_store,
                relay,
                transports,
                events: EventBus::new(),
                runtime: Mutex::new(Runtime::default()),
            }),
        })
    }
}

fn default_identity_store() -> Arc<dyn IdentityStore> {
    use crate::infrastructure::identity_store::{FileIdentityStore, MemoryIdentityStore};
    match FileIdentityStore::default_path() {
        Some(path) => Arc::new(FileIdentityStore::new(path)),
        None => Arc::new(MemoryIdentityStore::new()),
    }
}

#[cfg(feature = "native")]
fn default_relay(config: &OmniverseConfig) -> Result<Arc<dyn RelayConnector>> {
    use crate::infrastructure::websocket_relay::WebSocketRelayConnector;
    Ok(Arc::new(
        WebSocketRelayConnector::new(config.relay_url.clone())
            .with_reconnect_policy(config.reconnect.clone()),
    ))
}

#[cfg(not(feature = "native"))]
fn default_relay(_config: &OmniverseConfig) -> Result<Arc<dyn RelayConnector>> {
    Err(SessionError::Configuration("relay connector".to_string()))
}

#[cfg(feature = "webrtc")]
fn default_transports() -> Result<Arc<dyn TransportFactory>> {
    use crate::infrastructure::webrtc_transport::WebRtcTransportFactory;
    Ok(Arc::new(WebRtcTransportFactory::default()))
}

#[cfg(not(feature = "webrtc"))]
fn default_transports() -> Result<Arc<dyn TransportFactory>> {
    Err(SessionError::Configuration("transport factory".to_string()))
}

#[derive(Default)]
struct Runtime {
    local: Option<PeerId>,
    link: Option<Arc<dyn RelayLink>>,
    relay_task: Option<JoinHandle<()>>,
    ledger: OfferLedger,
    /// Handshake attempt currently owning each remote's ledger entry
    attempts: HashMap<PeerId, u64>,
    next_attempt: u64,
    /// Entered planes, most recently selected last
    planes: Vec<PlaneId>,
    heartbeats: HashMap<String, oneshot::Sender<String>>,
    /// Peers whose data packets are forwarded to the event bus
    wired: HashMap<PeerId, PeerHandle>,
}

impl Runtime {
    fn apply(
        &mut self,
        remote: &PeerId,
        event: NegotiationEvent,
    ) -> std::result::Result<Step, NegotiationError> {
        self.ledger.apply(remote, event)
    }

    fn begin_attempt(&mut self, remote: &PeerId) -> u64 {
        self.next_attempt += 1;
        self.attempts.insert(remote.clone(), self.next_attempt);
        self.next_attempt
    }

    fn is_current(&self, remote: &PeerId, attempt: u64) -> bool {
        self.attempts.get(remote) == Some(&attempt)
    }

    fn current_plane(&self) -> PlaneId {
        self.planes.last().cloned().unwrap_or_default()
    }
}

struct Inner {
    config: OmniverseConfig,
    identity_store: Arc<dyn IdentityStore>,
    relay: Arc<dyn RelayConnector>,
    transports: Arc<dyn TransportFactory>,
    registry: PeerRegistry,
    events: EventBus,
    runtime: Mutex<Runtime>,
}

/// A peer's view of the omniverse. Cheap to clone.
#[derive(Clone)]
pub struct Omniverse {
    inner: Arc<Inner>,
}

impl Omniverse {
    pub fn builder(config: OmniverseConfig) -> OmniverseBuilder {
        OmniverseBuilder::new(config)
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.inner
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &OmniverseConfig {
        &self.inner.config
    }

    /// Unscoped registry view
    pub fn registry(&self) -> PeerRegistry {
        self.inner.registry.clone()
    }

    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.runtime().local.clone()
    }

    fn require_local(&self) -> Result<PeerId> {
        self.local_peer_id().ok_or(SessionError::NotBooted)
    }

    pub fn is_booted(&self) -> bool {
        self.runtime().link.is_some()
    }

    pub fn current_plane(&self) -> PlaneId {
        self.runtime().current_plane()
    }

    /// Load the identity, connect to the relay and enter the configured plane
    #[instrument(skip(self))]
    pub async fn boot(&self) -> Result<PeerId> {
        if self.is_booted() {
            return Err(SessionError::AlreadyBooted);
        }

        let identity = self.inner.identity_store.load_or_create().await?;
        let local = identity.peer_id.clone();
        let (link, relay_events) = self.inner.relay.connect(&local).await?;

        {
            let mut runtime = self.runtime();
            if runtime.link.is_some() {
                link.close();
                return Err(SessionError::AlreadyBooted);
            }
            runtime.local = Some(local.clone());
            runtime.link = Some(link);
            runtime.ledger = OfferLedger::new(local.clone());
            runtime.relay_task = Some(tokio::spawn(run_relay(
                Arc::downgrade(&self.inner),
                relay_events,
            )));
        }
        info!("🌌 Booted as {}", local);
        self.inner.events.publish(OmniverseEvent::RelayConnected);

        self.enter_plane(self.inner.config.plane.clone())?;
        Ok(local)
    }

    /// Listen for events by dotted topic pattern, e.g. `peers.*.message.shout`
    pub fn on<F>(&self, pattern: impl Into<TopicPattern>, listener: F) -> ListenerId
    where
        F: Fn(&OmniverseEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(pattern, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OmniverseEvent> {
        self.inner.events.subscribe()
    }

    pub fn plane(&self, plane: impl Into<PlaneId>) -> PlaneScope {
        PlaneScope {
            session: self.clone(),
            plane: plane.into(),
        }
    }

    fn send_relay(&self, message: ClientMessage) -> Result<()> {
        let link = self.runtime().link.clone().ok_or(SessionError::NotBooted)?;
        if self.inner.config.debug {
            debug!("⬆️  {}", message.event_name());
        }
        link.send(message)?;
        Ok(())
    }

    /// Join a plane's room on the relay and make it the current plane
    pub fn enter_plane(&self, plane: impl Into<PlaneId>) -> Result<()> {
        let plane = plane.into();
        self.send_relay(ClientMessage::EnterPlane {
            plane_id: plane.clone(),
        })?;
        let mut runtime = self.runtime();
        runtime.planes.retain(|entered| entered != &plane);
        runtime.planes.push(plane.clone());
        info!("🚪 Entered plane {}", plane);
        Ok(())
    }

    /// Leave a plane; peers seen only there are forgotten and disconnected
    pub fn leave_plane(&self, plane: impl Into<PlaneId>) -> Result<()> {
        let plane = plane.into();
        self.send_relay(ClientMessage::LeavePlane {
            plane_id: plane.clone(),
        })?;
        self.runtime().planes.retain(|entered| entered != &plane);

        let scoped = self.inner.registry.plane(plane.clone());
        for peer in scoped.all() {
            scoped.remove_by_uid(peer.uid());
            self.forget_if_orphaned(&peer);
        }
        info!("🚶 Left plane {}", plane);
        Ok(())
    }

    /// Round trip a heartbeat through the relay; resolves to its ack token
    pub async fn ping_relay(&self, memo: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.runtime().heartbeats.insert(memo.to_string(), tx);
        if let Err(e) = self.send_relay(ClientMessage::Heartbeat {
            memo: memo.to_string(),
        }) {
            self.runtime().heartbeats.remove(memo);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.rpc_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            _ => {
                self.runtime().heartbeats.remove(memo);
                Err(SessionError::HeartbeatTimeout(memo.to_string()))
            }
        }
    }

    /// Ledger snapshot, sorted by remote id
    pub fn connection_offers(&self) -> Vec<ConnectionOffer> {
        self.runtime().ledger.snapshot()
    }

    /// Open a direct connection to `remote`, resolving once it is usable
    #[instrument(skip(self), fields(remote = %remote.short()))]
    pub async fn connect_to_peer(&self, remote: &PeerId) -> Result<PeerHandle> {
        let local = self.require_local()?;
        if &local == remote {
            return Err(SessionError::SelfConnection);
        }

        let attempt = {
            let mut runtime = self.runtime();
            runtime.apply(remote, NegotiationEvent::Initiate)?;
            runtime.begin_attempt(remote)
        };

        // stale transports from an earlier session are replaced, never reused
        self.inner.registry.disconnect_from_peer(remote);

        match self.offer(&local, remote, attempt).await {
            Ok(peer) => Ok(peer),
            Err(e) => {
                if self.abandon(remote, attempt) {
                    return Err(e);
                }
                // glare: the remote's offer replaced ours, follow that handshake
                match self.inner.registry.get(remote) {
                    Some(peer) if peer.has_connection() => {
                        peer.wait_connected().await?;
                        Ok(peer)
                    }
                    _ => Err(e),
                }
            }
        }
    }

    async fn offer(&self, local: &PeerId, remote: &PeerId, attempt: u64) -> Result<PeerHandle> {
        let plane = self.current_plane();
        let peer = self
            .inner
            .registry
            .plane(plane)
            .assert_peer_connection(
                remote,
                self.inner.transports.as_ref(),
                local,
                TransportOptions::initiator(),
            )
            .await?;
        self.wire(&peer);

        let offer = peer.signal(None).await?;
        self.require_current(remote, attempt)?;
        self.send_relay(ClientMessage::InitiateConnection {
            to_peer: remote.clone(),
            from_peer: local.clone(),
            offer,
        })?;
        {
            let mut runtime = self.runtime();
            if runtime.is_current(remote, attempt) {
                runtime.apply(remote, NegotiationEvent::OfferSent)?;
            }
        }
        debug!("📨 Offer sent to {}", remote.short());

        peer.wait_connected().await?;
        self.established(&peer, attempt)?;
        Ok(peer)
    }

    /// Answer an incoming offer unless glare resolution keeps our own
    async fn answer(&self, remote: PeerId, offer: Value) {
        let Ok(local) = self.require_local() else {
            return;
        };

        let attempt = {
            let mut runtime = self.runtime();
            let step = match runtime.apply(&remote, NegotiationEvent::OfferReceived) {
                Ok(step) => step,
                Err(e) => {
                    warn!("Dropping offer from {}: {}", remote.short(), e);
                    return;
                }
            };
            match step.action {
                NegotiationAction::Ignore => {
                    debug!("🤝 Glare with {}, keeping our offer", remote.short());
                    return;
                }
                NegotiationAction::SendAnswer | NegotiationAction::ResetAndAnswer => {}
                other => {
                    warn!("Unexpected {:?} for offer from {}", other, remote.short());
                    return;
                }
            }
            runtime.begin_attempt(&remote)
        };

        // re-handshake from a peer that reloaded, or glare we lost
        if self.inner.registry.disconnect_from_peer(&remote) {
            debug!("♻️  Reset connection to {}", remote.short());
        }

        if let Err(e) = self.respond(&local, &remote, offer, attempt).await {
            warn!("❌ Handshake with {} failed: {}", remote.short(), e);
            self.abandon(&remote, attempt);
        }
    }

    async fn respond(
        &self,
        local: &PeerId,
        remote: &PeerId,
        offer: Value,
        attempt: u64,
    ) -> Result<()> {
        let plane = self.current_plane();
        let peer = self
            .inner
            .registry
            .plane(plane)
            .assert_peer_connection(
                remote,
                self.inner.transports.as_ref(),
                local,
                TransportOptions::responder(),
            )
            .await?;
        self.wire(&peer);

        let answer = peer.signal(Some(offer)).await?;
        self.require_current(remote, attempt)?;
        self.send_relay(ClientMessage::ConnectionAnswer {
            to_peer: remote.clone(),
            from_peer: local.clone(),
            answer,
        })?;
        {
            let mut runtime = self.runtime();
            if runtime.is_current(remote, attempt) {
                runtime.apply(remote, NegotiationEvent::AnswerSent)?;
            }
        }
        debug!("📨 Answer sent to {}", remote.short());

        peer.wait_connected().await?;
        self.established(&peer, attempt)?;
        Ok(())
    }

    /// Fails when a newer attempt owns the remote's ledger entry
    fn require_current(&self, remote: &PeerId, attempt: u64) -> Result<()> {
        if self.runtime().is_current(remote, attempt) {
            Ok(())
        } else {
            Err(SessionError::Superseded(remote.clone()))
        }
    }

    fn established(&self, peer: &PeerHandle, attempt: u64) -> Result<()> {
        let local = self.require_local()?;
        {
            // ledger, graph and release handling stay in step under this lock
            let mut runtime = self.runtime();
            if !runtime.is_current(peer.uid(), attempt) {
                return Ok(());
            }
            if !peer.is_ready() {
                return Err(P2PError::ConnectionClosed.into());
            }
            if let Err(e) = runtime.apply(peer.uid(), NegotiationEvent::Connected) {
                warn!("Ledger rejected connect for {}: {}", peer.short_uid(), e);
            }
            self.inner.registry.associate(&local, peer.uid());
        }
        info!("🎉 Connected to {}", peer.short_uid());
        self.inner.events.publish(OmniverseEvent::PeerConnected {
            peer: peer.uid().clone(),
        });
        Ok(())
    }

    /// A transport went away: the edge goes and an open ledger entry is
    /// forgotten. Handshakes in flight are closed by their own attempt.
    fn released(&self, remote: &PeerId, status: ConnectionState) {
        let Some(local) = self.local_peer_id() else {
            return;
        };
        let severed = {
            let mut runtime = self.runtime();
            let open = runtime.ledger.status(remote) == Some(OfferStatus::Open);
            if open {
                runtime.ledger.forget(remote);
                runtime.attempts.remove(remote);
            }
            let dissociated = self.inner.registry.dissociate(&local, remote);
            open || dissociated
        };
        if severed {
            info!("🔌 Lost connection to {} ({})", remote.short(), status);
            self.inner.events.publish(OmniverseEvent::PeerDisconnected {
                peer: remote.clone(),
            });
        }
    }

    /// Close the ledger entry if `attempt` still owns it; false when a newer
    /// attempt took over
    fn abandon(&self, remote: &PeerId, attempt: u64) -> bool {
        let current = {
            let mut runtime = self.runtime();
            let current = runtime.is_current(remote, attempt);
            if current {
                runtime.attempts.remove(remote);
                let _ = runtime.apply(remote, NegotiationEvent::Failed);
            }
            current
        };
        if current {
            self.inner.registry.disconnect_from_peer(remote);
        }
        current
    }

    /// Forward a peer's data packets to the event bus, once per handle
    fn wire(&self, peer: &PeerHandle) {
        {
            let mut runtime = self.runtime();
            if let Some(existing) = runtime.wired.get(peer.uid()) {
                if existing.same_instance(peer) {
                    return;
                }
            }
            runtime.wired.insert(peer.uid().clone(), peer.clone());
        }

        let session: Weak<Inner> = Arc::downgrade(&self.inner);
        peer.on_release(move |remote, status| {
            if let Some(inner) = session.upgrade() {
                Omniverse { inner }.released(remote, status);
            }
        });

        let bus: Weak<Inner> = Arc::downgrade(&self.inner);
        let uid = peer.uid().clone();
        peer.on_data("*", move |payload, scope| {
            if let Some(inner) = bus.upgrade() {
                inner.events.publish(OmniverseEvent::PeerMessage {
                    peer: uid.clone(),
                    scope: scope.to_string(),
                    payload: payload.clone(),
                });
            }
        });
    }

    /// Drop every trace of a peer that is no longer in any plane
    fn forget_if_orphaned(&self, peer: &PeerHandle) {
        if self.inner.registry.contains(peer.uid()) {
            return;
        }
        peer.destroy_connection();
        let mut runtime = self.runtime();
        runtime.ledger.forget(peer.uid());
        runtime.attempts.remove(peer.uid());
        runtime.wired.remove(peer.uid());
    }

    fn handle_relay_message(&self, message: RelayMessage) {
        if self.inner.config.debug {
            debug!("⬇️  {}", message.event_name());
        }
        let Some(local) = self.local_peer_id() else {
            return;
        };

        match message {
            RelayMessage::HeartbeatAck { memo, ack } => {
                if let Some(waiter) = self.runtime().heartbeats.remove(&memo) {
                    let _ = waiter.send(ack);
                }
            }
            RelayMessage::RollCall { newbie, plane } => {
                let entered = self.runtime().planes.contains(&plane);
                if newbie != local && entered {
                    if let Err(e) = self.send_relay(ClientMessage::Announce {
                        from_peer: local,
                        plane,
                    }) {
                        debug!("Could not answer roll call: {}", e);
                    }
                }
            }
            RelayMessage::Announce { from_peer, plane } => {
                if from_peer != local {
                    self.handle_announce(&local, from_peer, plane);
                }
            }
            RelayMessage::PeerLeave { uid, plane } => self.handle_peer_leave(uid, plane),
            RelayMessage::ConnectionOffer {
                to_peer,
                from_peer,
                offer,
            } => {
                if to_peer != local {
                    warn!("Offer addressed to {} reached {}", to_peer, local);
                    return;
                }
                let session = self.clone();
                tokio::spawn(async move { session.answer(from_peer, offer).await });
            }
            RelayMessage::ConnectionAnswer {
                to_peer,
                from_peer,
                answer,
            } => {
                if to_peer != local {
                    warn!("Answer addressed to {} reached {}", to_peer, local);
                    return;
                }
                self.handle_answer(from_peer, answer);
            }
        }
    }

    fn handle_announce(&self, local: &PeerId, remote: PeerId, plane: PlaneId) {
        let scoped = self.inner.registry.plane(plane.clone());
        match scoped.register(&remote) {
            Ok(true) => {
                debug!("👋 {} joined {}", remote.short(), plane);
                if let Some(peer) = scoped.get(&remote) {
                    self.wire(&peer);
                }
                self.inner.events.publish(OmniverseEvent::PeerJoin {
                    peer: remote.clone(),
                    plane,
                });
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Could not register {}: {}", remote.short(), e);
                return;
            }
        }

        if !self.inner.config.auto_peer || !should_originate(local, &remote) {
            return;
        }
        let busy = self.runtime().ledger.is_in_flight(&remote)
            || scoped.get(&remote).map_or(false, |peer| peer.has_connection());
        if busy {
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.connect_to_peer(&remote).await {
                debug!("Auto-connect to {} did not complete: {}", remote.short(), e);
            }
        });
    }

    fn handle_answer(&self, remote: PeerId, answer: Value) {
        let step = self
            .runtime()
            .apply(&remote, NegotiationEvent::AnswerReceived);
        match step {
            Ok(step) if step.action == NegotiationAction::ApplyAnswer => {
                let applied = self
                    .inner
                    .registry
                    .get(&remote)
                    .ok_or_else(|| P2PError::NoConnection(remote.to_string()))
                    .and_then(|peer| peer.accept_signal(answer));
                if let Err(e) = applied {
                    warn!("Could not apply answer from {}: {}", remote.short(), e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring answer from {}: {}", remote.short(), e),
        }
    }

    fn handle_peer_leave(&self, uid: PeerId, plane: Option<PlaneId>) {
        let Some(peer) = self.inner.registry.get(&uid) else {
            return;
        };
        match &plane {
            Some(plane) => self.inner.registry.plane(plane.clone()).remove_by_uid(&uid),
            None => self.inner.registry.remove_by_uid(&uid),
        };
        self.forget_if_orphaned(&peer);
        info!("🚪 {} left", uid.short());
        self.inner
            .events
            .publish(OmniverseEvent::PeerLeave { peer: uid, plane });
    }

    /// Handshakes in flight are void after a relay reconnect; entered planes
    /// are re-entered to rebuild presence
    fn handle_reconnect(&self) {
        let (stale, planes) = {
            let mut runtime = self.runtime();
            let stale = runtime.ledger.drain_in_flight();
            for remote in &stale {
                runtime.attempts.remove(remote);
            }
            (stale, runtime.planes.clone())
        };
        for remote in &stale {
            self.inner.registry.disconnect_from_peer(remote);
        }
        for plane in planes {
            if let Err(e) = self.send_relay(ClientMessage::EnterPlane {
                plane_id: plane.clone(),
            }) {
                warn!("Could not re-enter {}: {}", plane, e);
            }
        }

        info!(
            "🔁 Relay reconnected, dropped {} pending handshakes",
            stale.len()
        );
        self.inner.events.publish(OmniverseEvent::RelayReconnected);
    }

    /// Close the relay link and every peer connection
    pub fn deconstruct(&self) {
        let (link, relay_task) = {
            let mut runtime = self.runtime();
            runtime.attempts.clear();
            runtime.heartbeats.clear();
            runtime.wired.clear();
            runtime.planes.clear();
            if let Some(local) = runtime.local.clone() {
                runtime.ledger = OfferLedger::new(local);
            }
            (runtime.link.take(), runtime.relay_task.take())
        };
        if let Some(task) = relay_task {
            task.abort();
        }
        if let Some(link) = link {
            link.close();
        }
        for peer in self.inner.registry.all() {
            peer.destroy_connection();
        }
        info!("💤 Session deconstructed");
    }
}

async fn run_relay(session: Weak<Inner>, mut events: UnboundedReceiver<RelayLinkEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        let session = Omniverse { inner };
        match event {
            RelayLinkEvent::Message(message) => session.handle_relay_message(message),
            RelayLinkEvent::Disconnected => {
                warn!("⚠️  Relay disconnected");
                session
                    .inner
                    .events
                    .publish(OmniverseEvent::RelayDisconnected);
            }
            RelayLinkEvent::Reconnected => session.handle_reconnect(),
        }
    }
    debug!("Relay event loop finished");
}

/// Operations narrowed to one plane
#[derive(Clone)]
pub struct PlaneScope {
    session: Omniverse,
    plane: PlaneId,
}

impl PlaneScope {
    pub fn id(&self) -> &PlaneId {
        &self.plane
    }

    pub fn peers(&self) -> Vec<PeerHandle> {
        self.session.inner.registry.plane(self.plane.clone()).all()
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerHandle> {
        self.session.inner.registry.plane(self.plane.clone()).get(id)
    }

    /// Peers in this plane we hold a direct connection to
    pub fn neighbors(&self) -> Vec<PeerHandle> {
        match self.session.local_peer_id() {
            Some(local) => self
                .session
                .inner
                .registry
                .plane(self.plane.clone())
                .neighbors(&local),
            None => Vec::new(),
        }
    }

    /// Send `payload` on `scope` to every connected peer in the plane;
    /// returns how many peers it was written to
    pub fn broadcast(&self, scope: &str, payload: Value) -> usize {
        self.peers()
            .iter()
            .filter(|peer| peer.send_data(scope, payload.clone()))
            .count()
    }
}
