//! One remote peer as seen from this process.
//!
//! A [`PeerHandle`] owns at most one transport. Transport events are pumped by
//! a single dispatcher task per transport, so packets from one peer are
//! handled in the order they arrived. Every allocation bumps a generation
//! counter; events from a transport that was replaced or destroyed are
//! dropped.

use crate::application::config::DEFAULT_RPC_TIMEOUT;
use crate::domain::{ConnectionState, PeerId, RpcResponse};
use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::transport::{
    Transport, TransportEvent, TransportFactory, TransportOptions, TransportRole,
};
use omniverse_core::{Packet, RpcRequestPacket};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub type DataListener = Arc<dyn Fn(&Value, &str) + Send + Sync>;
pub type RpcHandler = Arc<dyn Fn(Value) -> RpcResponse + Send + Sync>;
/// Called with the peer id and the resulting status whenever a transport
/// goes away
pub type ReleaseListener = Arc<dyn Fn(&PeerId, ConnectionState) + Send + Sync>;

/// Which data packets a listener receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    Any,
    Scope(String),
}

impl ScopeFilter {
    pub fn matches(&self, scope: &str) -> bool {
        match self {
            ScopeFilter::Any => true,
            ScopeFilter::Scope(expected) => expected == scope,
        }
    }
}

impl From<&str> for ScopeFilter {
    fn from(scope: &str) -> Self {
        if scope == "*" {
            ScopeFilter::Any
        } else {
            ScopeFilter::Scope(scope.to_string())
        }
    }
}

impl From<String> for ScopeFilter {
    fn from(scope: String) -> Self {
        ScopeFilter::from(scope.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Waiters {
    signals: VecDeque<oneshot::Sender<Result<Value>>>,
    connected: Vec<oneshot::Sender<Result<()>>>,
    calls: HashMap<(String, String), oneshot::Sender<RpcResponse>>,
}

impl Waiters {
    fn new() -> Self {
        Self {
            signals: VecDeque::new(),
            connected: Vec::new(),
            calls: HashMap::new(),
        }
    }

    fn fail(self, error: impl Fn() -> P2PError) {
        for waiter in self.signals {
            let _ = waiter.send(Err(error()));
        }
        for waiter in self.connected {
            let _ = waiter.send(Err(error()));
        }
        for (_, waiter) in self.calls {
            let _ = waiter.send(RpcResponse::no_connection());
        }
    }
}

struct PeerState {
    status: ConnectionState,
    direct: bool,
    initiator: bool,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Option<JoinHandle<()>>,
    generation: u64,
    signals: VecDeque<Value>,
    waiters: Waiters,
    last_error: Option<String>,
}

struct PeerInner {
    uid: PeerId,
    rpc_timeout: Duration,
    state: Mutex<PeerState>,
    listeners: Mutex<Vec<(SubscriptionId, ScopeFilter, DataListener)>>,
    handlers: Mutex<HashMap<String, RpcHandler>>,
    release_listeners: Mutex<Vec<ReleaseListener>>,
    next_subscription: AtomicU64,
}

/// Shared handle to a remote peer; clones refer to the same peer
#[derive(Clone)]
pub struct PeerHandle {
    inner: Arc<PeerInner>,
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("uid", &self.inner.uid)
            .field("status", &self.status())
            .field("direct", &self.is_direct())
            .finish()
    }
}

impl PeerHandle {
    /// Indirect handle: known through the relay, no transport yet
    pub fn new(uid: PeerId) -> Self {
        Self::with_rpc_timeout(uid, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_rpc_timeout(uid: PeerId, rpc_timeout: Duration) -> Self {
        let ping: RpcHandler = Arc::new(|_| RpcResponse::ok(json!("pong")));
        let handlers = HashMap::from([("ping".to_string(), ping)]);

        Self {
            inner: Arc::new(PeerInner {
                uid,
                rpc_timeout,
                state: Mutex::new(PeerState {
                    status: ConnectionState::Disconnected,
                    direct: false,
                    initiator: false,
                    transport: None,
                    dispatcher: None,
                    generation: 0,
                    signals: VecDeque::new(),
                    waiters: Waiters::new(),
                    last_error: None,
                }),
                listeners: Mutex::new(Vec::new()),
                handlers: Mutex::new(handlers),
                release_listeners: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn uid(&self) -> &PeerId {
        &self.inner.uid
    }

    pub fn short_uid(&self) -> &str {
        self.inner.uid.short()
    }

    /// Both handles point at the same peer instance
    pub fn same_instance(&self, other: &PeerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> MutexGuard<'_, PeerState> {
        // state is only mutated by short, non-panicking sections
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> ConnectionState {
        self.state().status
    }

    /// True once the transport reported it is open
    pub fn is_ready(&self) -> bool {
        self.status().is_connected()
    }

    /// True iff a transport has been allocated, connected or not
    pub fn has_connection(&self) -> bool {
        self.state().transport.is_some()
    }

    pub fn is_direct(&self) -> bool {
        self.state().direct
    }

    pub fn is_initiator(&self) -> bool {
        self.state().initiator
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// Allocate a transport unless one already exists
    #[instrument(skip(self, factory, options), fields(peer = %self.short_uid()))]
    pub async fn construct_connection(
        &self,
        factory: &dyn TransportFactory,
        local: &PeerId,
        options: TransportOptions,
    ) -> Result<()> {
        if self.has_connection() {
            debug!("Transport to {} already allocated", self.short_uid());
            return Ok(());
        }

        let role = options.role;
        let (transport, events) = factory.create(local, &self.inner.uid, options).await?;

        let generation = {
            let mut state = self.state();
            if state.transport.is_some() {
                // lost a race with another allocation
                drop(state);
                transport.destroy();
                return Ok(());
            }
            state.generation += 1;
            state.transport = Some(transport);
            state.status = ConnectionState::Connecting;
            state.direct = true;
            state.initiator = role == TransportRole::Initiator;
            state.signals.clear();
            state.last_error = None;
            state.generation
        };

        let dispatcher = tokio::spawn(dispatch(Arc::downgrade(&self.inner), generation, events));
        {
            let mut state = self.state();
            if state.generation == generation {
                state.dispatcher = Some(dispatcher);
            } else {
                dispatcher.abort();
            }
        }

        info!(
            "🔗 Allocated {:?} transport to {}",
            role,
            self.short_uid()
        );
        Ok(())
    }

    /// Tear down the transport and reset to `disconnected`; safe to repeat
    pub fn destroy_connection(&self) {
        let (transport, dispatcher, waiters) = {
            let mut state = self.state();
            if state.transport.is_none()
                && state.dispatcher.is_none()
                && state.status == ConnectionState::Disconnected
            {
                return;
            }
            state.generation += 1;
            state.status = ConnectionState::Disconnected;
            state.initiator = false;
            state.signals.clear();
            state.last_error = None;
            (
                state.transport.take(),
                state.dispatcher.take(),
                std::mem::replace(&mut state.waiters, Waiters::new()),
            )
        };

        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }
        if let Some(transport) = transport {
            transport.destroy();
        }
        waiters.fail(|| P2PError::ConnectionClosed);
        info!("🔌 Destroyed connection to {}", self.short_uid());
        self.notify_released(ConnectionState::Disconnected);
    }

    /// Next local signal, optionally after feeding a remote one first.
    ///
    /// An initiator calls this with `None` to obtain its offer; a responder
    /// passes the remote offer and gets its answer back.
    pub async fn signal(&self, remote: Option<Value>) -> Result<Value> {
        let (transport, waiter) = {
            let mut state = self.state();
            let transport = state
                .transport
                .clone()
                .ok_or_else(|| P2PError::NoConnection(self.inner.uid.to_string()))?;
            if remote.is_none() {
                if let Some(signal) = state.signals.pop_front() {
                    return Ok(signal);
                }
            }
            if state.status == ConnectionState::Error {
                let reason = state.last_error.clone().unwrap_or_default();
                return Err(P2PError::Transport(reason));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.signals.push_back(tx);
            (transport, rx)
        };

        if let Some(remote) = remote {
            transport.signal(remote)?;
        }
        waiter.await.map_err(|_| P2PError::ConnectionClosed)?
    }

    /// Feed a remote signal without waiting for anything in return
    pub fn accept_signal(&self, remote: Value) -> Result<()> {
        let transport = self
            .state()
            .transport
            .clone()
            .ok_or_else(|| P2PError::NoConnection(self.inner.uid.to_string()))?;
        transport.signal(remote)
    }

    /// Resolves on the transport's connected event, fails on its error event
    pub async fn wait_connected(&self) -> Result<()> {
        let waiter = {
            let mut state = self.state();
            match state.status {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error => {
                    let reason = state.last_error.clone().unwrap_or_default();
                    return Err(P2PError::Transport(reason));
                }
                _ => {}
            }
            if state.transport.is_none() {
                return Err(P2PError::NoConnection(self.inner.uid.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.connected.push(tx);
            rx
        };
        waiter.await.map_err(|_| P2PError::ConnectionClosed)?
    }

    fn writable_transport(&self) -> Option<Arc<dyn Transport>> {
        self.state()
            .transport
            .clone()
            .filter(|transport| transport.is_writable())
    }

    /// Send a scoped data packet; false when there is no writable transport
    pub fn send_data(&self, scope: &str, payload: Value) -> bool {
        let Some(transport) = self.writable_transport() else {
            debug!("No writable transport to {}, dropping {}", self.short_uid(), scope);
            return false;
        };
        let frame = match Packet::data(scope, payload).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode data packet: {}", e);
                return false;
            }
        };
        match transport.send(&frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {} to {}: {}", scope, self.short_uid(), e);
                false
            }
        }
    }

    pub async fn send_call(&self, method: &str, args: Value) -> RpcResponse {
        self.send_call_with_timeout(method, args, self.inner.rpc_timeout)
            .await
    }

    /// Call `method` on the peer and wait for the matching response
    #[instrument(skip(self, args), fields(peer = %self.short_uid()))]
    pub async fn send_call_with_timeout(
        &self,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> RpcResponse {
        let Some(transport) = self.writable_transport() else {
            return RpcResponse::no_connection();
        };

        let invocation_id = Uuid::new_v4().to_string();
        let key = (method.to_string(), invocation_id.clone());
        let frame = match Packet::rpc_request(method, args, false, &invocation_id).encode() {
            Ok(frame) => frame,
            Err(e) => return RpcResponse::send_failed(e.to_string()),
        };

        let (tx, rx) = oneshot::channel();
        self.state().waiters.calls.insert(key.clone(), tx);

        if let Err(e) = transport.send(&frame) {
            self.state().waiters.calls.remove(&key);
            return RpcResponse::send_failed(e.to_string());
        }
        debug!("📤 Called {} ({})", method, invocation_id);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => RpcResponse::no_connection(),
            Err(_) => {
                self.state().waiters.calls.remove(&key);
                debug!("⏱️  {} timed out after {:?}", method, timeout);
                RpcResponse::timeout(timeout)
            }
        }
    }

    /// Fire-and-forget call; delivery failures are only logged
    pub fn send_cast(&self, method: &str, args: Value) {
        let Some(transport) = self.writable_transport() else {
            debug!("No writable transport to {}, dropping cast {}", self.short_uid(), method);
            return;
        };
        let invocation_id = Uuid::new_v4().to_string();
        let sent = Packet::rpc_request(method, args, true, &invocation_id)
            .encode()
            .map_err(P2PError::from)
            .and_then(|frame| transport.send(&frame));
        if let Err(e) = sent {
            debug!("Cast {} to {} failed: {}", method, self.short_uid(), e);
        }
    }

    /// Subscribe to data packets; `"*"` receives every scope
    pub fn on_data<F>(&self, scope: impl Into<ScopeFilter>, listener: F) -> SubscriptionId
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, scope.into(), Arc::new(listener)));
        }
        id
    }

    pub fn off_data(&self, id: SubscriptionId) -> bool {
        match self.inner.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Serve `method` for this peer, replacing any previous handler
    pub fn handle_rpc<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> RpcResponse + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.inner.handlers.lock() {
            handlers.insert(method.to_string(), Arc::new(handler));
        }
    }

    /// Observe every transport teardown, local or remote
    pub fn on_release<F>(&self, listener: F)
    where
        F: Fn(&PeerId, ConnectionState) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.inner.release_listeners.lock() {
            listeners.push(Arc::new(listener));
        }
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Data(frame) => {
                if self.state().generation != generation {
                    return false;
                }
                self.handle_frame(&frame);
                true
            }
            TransportEvent::Signal(signal) => {
                let mut state = self.state();
                if state.generation != generation {
                    return false;
                }
                let mut pending = Some(signal);
                while let Some(waiter) = state.waiters.signals.pop_front() {
                    match waiter.send(Ok(pending.take().unwrap_or(Value::Null))) {
                        Ok(()) => break,
                        Err(Ok(signal)) => pending = Some(signal),
                        Err(Err(_)) => {}
                    }
                }
                if let Some(signal) = pending {
                    state.signals.push_back(signal);
                }
                true
            }
            TransportEvent::Connected => {
                let mut state = self.state();
                if state.generation != generation {
                    return false;
                }
                state.status = ConnectionState::Connected;
                for waiter in state.waiters.connected.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                info!("✅ Direct connection to {} is open", self.short_uid());
                true
            }
            TransportEvent::Error(reason) => {
                warn!("❌ Transport to {} failed: {}", self.short_uid(), reason);
                self.release(generation, ConnectionState::Error, Some(reason));
                false
            }
            TransportEvent::Closed => {
                info!("👋 Transport to {} closed", self.short_uid());
                self.release(generation, ConnectionState::Disconnected, None);
                false
            }
        }
    }

    /// Terminal transport event: drop the transport but keep the status
    fn release(&self, generation: u64, status: ConnectionState, reason: Option<String>) {
        let (transport, waiters) = {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.generation += 1;
            state.status = status;
            state.signals.clear();
            state.last_error = reason.clone();
            // the dispatcher is the caller, let it finish on its own
            state.dispatcher = None;
            (
                state.transport.take(),
                std::mem::replace(&mut state.waiters, Waiters::new()),
            )
        };
        if let Some(transport) = transport {
            transport.destroy();
        }
        match reason {
            Some(reason) => waiters.fail(|| P2PError::Transport(reason.clone())),
            None => waiters.fail(|| P2PError::ConnectionClosed),
        }
        self.notify_released(status);
    }

    fn notify_released(&self, status: ConnectionState) {
        let listeners: Vec<ReleaseListener> = match self.inner.release_listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(&self.inner.uid, status);
        }
    }

    fn handle_frame(&self, frame: &str) {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping invalid packet from {}: {}", self.short_uid(), e);
                return;
            }
        };

        match packet {
            Packet::Data(data) => self.dispatch_data(&data.scope, &data.payload),
            Packet::RpcRequest(request) => self.answer(request),
            Packet::RpcResponse(response) => {
                let key = (response.method, response.invocation_id);
                let waiter = self.state().waiters.calls.remove(&key);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(RpcResponse::from_value(response.return_value));
                    }
                    None => debug!("Unmatched response {} ({})", key.0, key.1),
                }
            }
        }
    }

    fn dispatch_data(&self, scope: &str, payload: &Value) {
        let listeners: Vec<DataListener> = match self.inner.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .filter(|(_, filter, _)| filter.matches(scope))
                .map(|(_, _, listener)| listener.clone())
                .collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(payload, scope);
        }
    }

    fn answer(&self, request: RpcRequestPacket) {
        let handler = self
            .inner
            .handlers
            .lock()
            .ok()
            .and_then(|handlers| handlers.get(&request.method).cloned());
        let response = match handler {
            Some(handler) => handler(request.args),
            None => RpcResponse::not_implemented(&request.method),
        };
        if request.cast {
            return;
        }

        let Some(transport) = self.writable_transport() else {
            debug!("Cannot answer {}, transport gone", request.method);
            return;
        };
        let sent = Packet::rpc_response(&request.method, &request.invocation_id, response.to_value())
            .encode()
            .map_err(P2PError::from)
            .and_then(|frame| transport.send(&frame));
        if let Err(e) = sent {
            warn!("Failed to answer {} from {}: {}", request.method, self.short_uid(), e);
        }
    }
}

async fn dispatch(
    peer: Weak<PeerInner>,
    generation: u64,
    mut events: UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = peer.upgrade() else {
            break;
        };
        if !(PeerHandle { inner }).handle_event(generation, event) {
            break;
        }
    }
}
