//! Peer registry with plane-scoped views.
//!
//! All views made with [`PeerRegistry::plane`] share one storage. A scoped
//! view filters reads by its plane; writes need a plane and fail without one.

use crate::application::config::DEFAULT_RPC_TIMEOUT;
use crate::application::peer::PeerHandle;
use crate::domain::{AssociationGraph, PeerId, PlaneId};
use crate::infrastructure::error::Result as P2PResult;
use crate::infrastructure::transport::{TransportFactory, TransportOptions};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No plane selected, scope the registry with plane() before writing")]
    NoPlaneSelected,

    #[error("Another handle for peer {0} is already registered")]
    ConflictingHandle(PeerId),
}

/// Mutations published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    PeerAdded { peer: PeerId, plane: PlaneId },
    PeerRemoved { peer: PeerId, plane: PlaneId },
    Associated { a: PeerId, b: PeerId },
    Dissociated { a: PeerId, b: PeerId },
}

/// One (peer, plane) membership
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer: PeerHandle,
    pub plane: PlaneId,
}

#[derive(Default)]
struct RegistryState {
    /// (peer, plane) pairs in insertion order
    memberships: Vec<(PeerId, PlaneId)>,
    handles: HashMap<PeerId, PeerHandle>,
    graph: AssociationGraph,
}

impl RegistryState {
    fn has_membership(&self, peer: &PeerId, plane: &PlaneId) -> bool {
        self.memberships
            .iter()
            .any(|(id, member_of)| id == peer && member_of == plane)
    }

    fn is_member(&self, peer: &PeerId) -> bool {
        self.memberships.iter().any(|(id, _)| id == peer)
    }
}

struct Shared {
    state: Mutex<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
    rpc_timeout: Duration,
}

#[derive(Clone)]
pub struct PeerRegistry {
    shared: Arc<Shared>,
    plane: Option<PlaneId>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::with_rpc_timeout(DEFAULT_RPC_TIMEOUT)
    }

    /// Handles created by this registry use `rpc_timeout` for calls
    pub fn with_rpc_timeout(rpc_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                events,
                rpc_timeout,
            }),
            plane: None,
        }
    }

    /// View narrowed to `plane`, sharing this registry's storage
    pub fn plane(&self, plane: impl Into<PlaneId>) -> PeerRegistry {
        PeerRegistry {
            shared: self.shared.clone(),
            plane: Some(plane.into()),
        }
    }

    /// View over every plane
    pub fn unscoped(&self) -> PeerRegistry {
        PeerRegistry {
            shared: self.shared.clone(),
            plane: None,
        }
    }

    pub fn current_plane(&self) -> Option<&PlaneId> {
        self.plane.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.shared.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: RegistryEvent) {
        // no subscribers is fine
        let _ = self.shared.events.send(event);
    }

    fn require_plane(&self) -> Result<PlaneId, RegistryError> {
        self.plane.clone().ok_or(RegistryError::NoPlaneSelected)
    }

    fn in_scope(&self, plane: &PlaneId) -> bool {
        self.plane.as_ref().map_or(true, |selected| selected == plane)
    }

    /// Record `id` in the selected plane, creating an indirect handle if the
    /// peer is unknown. Returns whether a new record was created.
    #[instrument(skip(self), fields(plane = ?self.plane))]
    pub fn register(&self, id: &PeerId) -> Result<bool, RegistryError> {
        let plane = self.require_plane()?;
        let mut state = self.state();
        if state.has_membership(id, &plane) {
            return Ok(false);
        }
        let handle = state
            .handles
            .get(id)
            .cloned()
            .unwrap_or_else(|| PeerHandle::with_rpc_timeout(id.clone(), self.shared.rpc_timeout));
        self.add(&mut state, handle, plane);
        Ok(true)
    }

    /// Record an existing handle in the selected plane
    #[instrument(skip(self, peer), fields(peer = %peer.short_uid(), plane = ?self.plane))]
    pub fn insert(&self, peer: PeerHandle) -> Result<bool, RegistryError> {
        let plane = self.require_plane()?;
        let mut state = self.state();
        if let Some(existing) = state.handles.get(peer.uid()) {
            if !existing.same_instance(&peer) {
                return Err(RegistryError::ConflictingHandle(peer.uid().clone()));
            }
        }
        if state.has_membership(peer.uid(), &plane) {
            return Ok(false);
        }
        self.add(&mut state, peer, plane);
        Ok(true)
    }

    fn add(&self, state: &mut RegistryState, handle: PeerHandle, plane: PlaneId) {
        let id = handle.uid().clone();
        state.memberships.push((id.clone(), plane.clone()));
        state.graph.add_node(&id);
        state.handles.insert(id.clone(), handle);
        debug!("➕ Registered {} in plane {}", id.short(), plane);
        self.emit(RegistryEvent::PeerAdded { peer: id, plane });
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerHandle> {
        let state = self.state();
        let visible = match &self.plane {
            Some(plane) => state.has_membership(id, plane),
            None => true,
        };
        if visible {
            state.handles.get(id).cloned()
        } else {
            None
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.get(id).is_some()
    }

    pub fn find<F>(&self, predicate: F) -> Option<PeerHandle>
    where
        F: Fn(&PeerHandle) -> bool,
    {
        self.all().into_iter().find(|peer| predicate(peer))
    }

    /// Peers in scope, in insertion order; each peer appears once
    pub fn all(&self) -> Vec<PeerHandle> {
        let state = self.state();
        let mut seen = HashSet::new();
        state
            .memberships
            .iter()
            .filter(|(_, plane)| self.in_scope(plane))
            .filter(|(id, _)| seen.insert(id.clone()))
            .filter_map(|(id, _)| state.handles.get(id).cloned())
            .collect()
    }

    /// Memberships in scope, one per (peer, plane) pair
    pub fn records(&self) -> Vec<PeerRecord> {
        let state = self.state();
        state
            .memberships
            .iter()
            .filter(|(_, plane)| self.in_scope(plane))
            .filter_map(|(id, plane)| {
                state.handles.get(id).map(|peer| PeerRecord {
                    peer: peer.clone(),
                    plane: plane.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, peer: &PeerHandle) -> usize {
        self.remove_by_uid(peer.uid())
    }

    /// Drop the peer's records in scope; returns how many were removed.
    /// The handle is forgotten once it has no plane left.
    #[instrument(skip(self), fields(plane = ?self.plane))]
    pub fn remove_by_uid(&self, id: &PeerId) -> usize {
        let mut removed = Vec::new();
        let mut dropped_edges = Vec::new();
        {
            let mut state = self.state();
            let mut kept = Vec::with_capacity(state.memberships.len());
            for (member, plane) in state.memberships.drain(..) {
                if &member == id && self.in_scope(&plane) {
                    removed.push(plane);
                } else {
                    kept.push((member, plane));
                }
            }
            state.memberships = kept;

            if !removed.is_empty() && !state.is_member(id) {
                state.handles.remove(id);
                dropped_edges = state.graph.remove_node(id);
            }
        }

        for neighbor in dropped_edges {
            self.emit(RegistryEvent::Dissociated {
                a: id.clone(),
                b: neighbor,
            });
        }
        for plane in &removed {
            debug!("➖ Removed {} from plane {}", id.short(), plane);
            self.emit(RegistryEvent::PeerRemoved {
                peer: id.clone(),
                plane: plane.clone(),
            });
        }
        removed.len()
    }

    /// Record that `a` and `b` are directly connected
    pub fn associate(&self, a: &PeerId, b: &PeerId) -> bool {
        let added = {
            let mut state = self.state();
            state.graph.add_node(a);
            state.graph.add_node(b);
            state.graph.associate(a, b)
        };
        if added {
            self.emit(RegistryEvent::Associated {
                a: a.clone(),
                b: b.clone(),
            });
        }
        added
    }

    pub fn dissociate(&self, a: &PeerId, b: &PeerId) -> bool {
        let removed = self.state().graph.dissociate(a, b);
        if removed {
            self.emit(RegistryEvent::Dissociated {
                a: a.clone(),
                b: b.clone(),
            });
        }
        removed
    }

    pub fn is_associated(&self, a: &PeerId, b: &PeerId) -> bool {
        self.state().graph.is_associated(a, b)
    }

    /// Graph neighbors of `id` that are visible in this view
    pub fn neighbors(&self, id: &PeerId) -> Vec<PeerHandle> {
        let state = self.state();
        state
            .graph
            .neighbors(id)
            .into_iter()
            .filter(|neighbor| match &self.plane {
                Some(plane) => state.has_membership(neighbor, plane),
                None => true,
            })
            .filter_map(|neighbor| state.handles.get(&neighbor).cloned())
            .collect()
    }

    /// Handle for `id` with a transport allocated, registering the peer first
    /// when it is unknown. Used for both outgoing and incoming handshakes.
    pub async fn assert_peer_connection(
        &self,
        id: &PeerId,
        factory: &dyn TransportFactory,
        local: &PeerId,
        options: TransportOptions,
    ) -> P2PResult<PeerHandle> {
        // a known peer keeps the planes it was seen in
        let peer = match self.unscoped().get(id) {
            Some(peer) => peer,
            None => {
                let peer = PeerHandle::with_rpc_timeout(id.clone(), self.shared.rpc_timeout);
                match self.insert(peer.clone()) {
                    Ok(_) => peer,
                    Err(RegistryError::NoPlaneSelected) => {
                        let _ = self.plane(PlaneId::default()).insert(peer.clone());
                        peer
                    }
                    Err(RegistryError::ConflictingHandle(_)) => {
                        self.unscoped().get(id).unwrap_or(peer)
                    }
                }
            }
        };

        if !peer.has_connection() {
            peer.construct_connection(factory, local, options).await?;
        }
        Ok(peer)
    }

    /// Destroy the peer's transport; true when there was one
    pub fn disconnect_from_peer(&self, id: &PeerId) -> bool {
        match self.get(id) {
            Some(peer) if peer.has_connection() => {
                peer.destroy_connection();
                true
            }
            _ => false,
        }
    }
}
