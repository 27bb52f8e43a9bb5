use std::collections::HashMap;

use tracing::debug;

use chatflow_core::traits::EdgeFactory;
use chatflow_core::types::generate_id;
use chatflow_core::{Edge, EdgeSource, EdgeTarget};

/// Edges created at runtime (retry edges, executor-created branches).
///
/// Lives for the whole conversation and is consulted after the active
/// typebot's own edges.
#[derive(Debug, Clone, Default)]
pub struct EdgeRegistry {
    edges: HashMap<String, Edge>,
}

impl EdgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an edge built elsewhere, keeping its id.
    pub fn insert(&mut self, edge: Edge) {
        debug!(edge_id = %edge.id, "Registered edge");
        self.edges.insert(edge.id.clone(), edge);
    }

    pub fn extend(&mut self, edges: impl IntoIterator<Item = Edge>) {
        for edge in edges {
            self.insert(edge);
        }
    }

    pub fn get(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl EdgeFactory for EdgeRegistry {
    fn create_edge(&mut self, from: EdgeSource, to: EdgeTarget) -> String {
        let id = generate_id();
        self.insert(Edge {
            id: id.clone(),
            from,
            to,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_edges_are_retrievable() {
        let mut registry = EdgeRegistry::new();
        let id = registry.create_edge(
            EdgeSource {
                block_id: "b1".into(),
                step_id: Some("retry".into()),
                item_id: None,
            },
            EdgeTarget::block("b1"),
        );
        let other = registry.create_edge(
            EdgeSource {
                block_id: "b1".into(),
                step_id: None,
                item_id: None,
            },
            EdgeTarget::block("b2"),
        );
        assert_ne!(id, other);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&id).unwrap().to.block_id(), Some("b1"));
        assert!(registry.get("missing").is_none());
    }
}
