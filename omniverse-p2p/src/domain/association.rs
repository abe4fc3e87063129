use omniverse_core::PeerId;
use std::collections::{HashMap, HashSet};

/// Undirected graph of peers known to be directly connected to each other.
///
/// Used for neighbor discovery only, never for routing payloads.
#[derive(Debug, Clone, Default)]
pub struct AssociationGraph {
    edges: HashMap<PeerId, HashSet<PeerId>>,
}

impl AssociationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, peer: &PeerId) {
        self.edges.entry(peer.clone()).or_default();
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, peer: &PeerId) -> Vec<PeerId> {
        let neighbors: Vec<PeerId> = self
            .edges
            .remove(peer)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for neighbor in &neighbors {
            if let Some(set) = self.edges.get_mut(neighbor) {
                set.remove(peer);
            }
        }
        neighbors
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.edges.contains_key(peer)
    }

    /// Returns `true` if the edge was not present before
    pub fn associate(&mut self, a: &PeerId, b: &PeerId) -> bool {
        if a == b {
            return false;
        }
        let added = self.edges.entry(a.clone()).or_default().insert(b.clone());
        self.edges.entry(b.clone()).or_default().insert(a.clone());
        added
    }

    /// Returns `true` if an edge was removed
    pub fn dissociate(&mut self, a: &PeerId, b: &PeerId) -> bool {
        let removed = self
            .edges
            .get_mut(a)
            .map(|set| set.remove(b))
            .unwrap_or(false);
        if let Some(set) = self.edges.get_mut(b) {
            set.remove(a);
        }
        removed
    }

    pub fn is_associated(&self, a: &PeerId, b: &PeerId) -> bool {
        self.edges
            .get(a)
            .map(|set| set.contains(b))
            .unwrap_or(false)
    }

    /// Neighbors of `peer`, sorted by id
    pub fn neighbors(&self, peer: &PeerId) -> Vec<PeerId> {
        let mut neighbors: Vec<PeerId> = self
            .edges
            .get(peer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        neighbors.sort();
        neighbors
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_undirected() {
        let mut graph = AssociationGraph::new();
        let a = PeerId::from("a");
        let b = PeerId::from("b");

        assert!(graph.associate(&a, &b));
        assert!(!graph.associate(&b, &a));
        assert!(graph.is_associated(&b, &a));
        assert_eq!(graph.neighbors(&a), vec![b.clone()]);
        assert_eq!(graph.neighbors(&b), vec![a.clone()]);

        assert!(graph.dissociate(&b, &a));
        assert!(!graph.is_associated(&a, &b));
        assert!(!graph.dissociate(&a, &b));
    }

    #[test]
    fn test_no_self_loops() {
        let mut graph = AssociationGraph::new();
        let a = PeerId::from("a");
        assert!(!graph.associate(&a, &a));
        assert!(graph.neighbors(&a).is_empty());
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = AssociationGraph::new();
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        let c = PeerId::from("c");
        graph.associate(&a, &b);
        graph.associate(&a, &c);

        let mut dropped = graph.remove_node(&a);
        dropped.sort();
        assert_eq!(dropped, vec![b.clone(), c.clone()]);
        assert!(!graph.contains(&a));
        assert!(graph.neighbors(&b).is_empty());
        assert!(graph.contains(&c));
    }
}
