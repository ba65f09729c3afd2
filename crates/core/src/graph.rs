//! In-memory node/edge model of the board currently open for editing.
//!
//! Structural invariants enforced here:
//!
//! - every edge references two nodes present in the store;
//! - removing a node removes every edge touching it;
//! - an edge connects an output handle to a compatible input handle and never
//!   closes a directed cycle.
//!
//! Rejected operations leave the store untouched.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::canvas::{ports_compatible, validate_node_count, HandleDirection, NodeKind};
use crate::error::CoreError;
use crate::node::{Edge, NewEdge, Node, NodeData, PortValue, Position, Size};
use crate::types::{EdgeId, NodeId};

/// Prefix of every allocated node id.
const NODE_ID_PREFIX: &str = "node-";

/// Deep copy of a board's nodes and edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn counts(&self) -> (usize, usize) {
        (self.nodes.len(), self.edges.len())
    }
}

/// Mutable node/edge store with monotonic id allocation.
#[derive(Debug, Clone)]
pub struct GraphStore {
    nodes: Vec<Node>,
    /// Kept in connection order.
    edges: Vec<Edge>,
    next_id: u64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Empty store whose id counter is seeded from the wall clock.
    pub fn new() -> Self {
        let seed = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::with_seed(seed)
    }

    /// Empty store with an explicit id seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_id: seed,
        }
    }

    // ---- id allocation ----

    /// Allocate a fresh node id. Ids are never reused within a session.
    pub fn allocate_node_id(&mut self) -> NodeId {
        let id = format!("{NODE_ID_PREFIX}{}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Push the counter past any numeric id already present in `nodes`.
    fn bump_past(&mut self, nodes: &[Node]) {
        let max_seen = nodes
            .iter()
            .filter_map(|n| n.id.strip_prefix(NODE_ID_PREFIX)?.parse::<u64>().ok())
            .max();
        if let Some(max_seen) = max_seen {
            self.next_id = self.next_id.max(max_seen + 1);
        }
    }

    // ---- nodes ----

    /// Insert a node built from `data` at `position` and return its id.
    pub fn add_node(&mut self, data: NodeData, position: Position) -> Result<NodeId, CoreError> {
        validate_node_count(self.nodes.len() + 1)?;
        let (w, h) = data.kind().default_size();
        let id = self.allocate_node_id();
        self.nodes.push(Node {
            id: id.clone(),
            position,
            size: Size { w, h },
            data,
        });
        Ok(id)
    }

    /// Handle a drag-and-drop insertion request.
    pub fn add_node_of_kind(
        &mut self,
        kind: NodeKind,
        position: Position,
    ) -> Result<NodeId, CoreError> {
        let data = NodeData::default_for(kind).ok_or_else(|| {
            CoreError::Validation(format!(
                "Nodes of type '{}' cannot be inserted directly",
                kind.name()
            ))
        })?;
        self.add_node(data, position)
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, CoreError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| CoreError::node_not_found(id))?;
        let node = self.nodes.remove(index);
        self.edges.retain(|e| !e.touches(id));
        Ok(node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, CoreError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| CoreError::node_not_found(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Apply `patch` to a node's payload.
    ///
    /// The patch may not change the node's kind; such a patch is rejected
    /// and the previous payload is kept.
    pub fn update_node_data<F>(&mut self, id: &str, patch: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut NodeData),
    {
        let node = self.node_mut(id)?;
        let kind = node.kind();
        let mut data = node.data.clone();
        patch(&mut data);
        if data.kind() != kind {
            return Err(CoreError::Validation(format!(
                "Node {id} cannot change type from '{}' to '{}'",
                kind.name(),
                data.kind().name()
            )));
        }
        node.data = data;
        Ok(())
    }

    pub fn move_node(&mut self, id: &str, position: Position) -> Result<(), CoreError> {
        self.node_mut(id)?.position = position;
        Ok(())
    }

    pub fn resize_node(&mut self, id: &str, size: Size) -> Result<(), CoreError> {
        if !(size.w > 0.0 && size.h > 0.0) {
            return Err(CoreError::Validation(format!(
                "Node size must be positive (got {}x{})",
                size.w, size.h
            )));
        }
        self.node_mut(id)?.size = size;
        Ok(())
    }

    // ---- edges ----

    /// Connect an output handle to an input handle.
    pub fn add_edge(&mut self, request: NewEdge) -> Result<EdgeId, CoreError> {
        let source = self.node(&request.source).ok_or_else(|| {
            CoreError::InvalidConnection(format!("source node {} does not exist", request.source))
        })?;
        let target = self.node(&request.target).ok_or_else(|| {
            CoreError::InvalidConnection(format!("target node {} does not exist", request.target))
        })?;

        let out = source
            .kind()
            .handle(&request.source_handle, HandleDirection::Output)
            .ok_or_else(|| {
                CoreError::InvalidConnection(format!(
                    "'{}' nodes have no output handle '{}'",
                    source.kind().name(),
                    request.source_handle
                ))
            })?;
        let inp = target
            .kind()
            .handle(&request.target_handle, HandleDirection::Input)
            .ok_or_else(|| {
                CoreError::InvalidConnection(format!(
                    "'{}' nodes have no input handle '{}'",
                    target.kind().name(),
                    request.target_handle
                ))
            })?;

        if !ports_compatible(out.kind, inp.kind) {
            return Err(CoreError::InvalidConnection(format!(
                "output '{}' ({:?}) cannot feed input '{}' ({:?})",
                out.id, out.kind, inp.id, inp.kind
            )));
        }
        if request.source == request.target {
            return Err(CoreError::InvalidConnection(format!(
                "node {} cannot connect to itself",
                request.source
            )));
        }
        let duplicate = self.edges.iter().any(|e| {
            e.source == request.source
                && e.source_handle == request.source_handle
                && e.target == request.target
                && e.target_handle == request.target_handle
        });
        if duplicate {
            return Err(CoreError::InvalidConnection(
                "an identical connection already exists".to_string(),
            ));
        }
        if self.reaches(&request.target, &request.source) {
            return Err(CoreError::InvalidConnection(format!(
                "connecting {} to {} would create a cycle",
                request.source, request.target
            )));
        }

        let id = uuid::Uuid::new_v4();
        self.edges.push(Edge {
            id,
            source: request.source,
            source_handle: request.source_handle,
            target: request.target,
            target_handle: request.target_handle,
        });
        Ok(id)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge, CoreError> {
        let index = self
            .edges
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| CoreError::edge_not_found(id))?;
        Ok(self.edges.remove(index))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges arriving at `node_id`, optionally restricted to one handle, in
    /// connection order.
    pub fn list_incoming(&self, node_id: &str, handle: Option<&str>) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.target == node_id && handle.map_or(true, |h| e.target_handle == h))
            .collect()
    }

    /// Value arriving on `handle` over exactly one edge hop.
    ///
    /// The first connected edge wins. Combining several upstream values is
    /// up to the consuming node's runtime behaviour.
    pub fn resolve_upstream_value(&self, node_id: &str, handle: &str) -> Option<PortValue> {
        let edge = self.list_incoming(node_id, Some(handle)).into_iter().next()?;
        self.node(&edge.source)?.data.output(&edge.source_handle)
    }

    /// Whether `to` is reachable from `from` following edge direction.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.extend(
                self.edges
                    .iter()
                    .filter(|e| e.source == current)
                    .map(|e| e.target.as_str()),
            );
        }
        false
    }

    // ---- snapshots ----

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Replace the contents with `snapshot`.
    ///
    /// Edges whose endpoints are missing are dropped. The id counter keeps
    /// moving forward so restored ids are never handed out again.
    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        let GraphSnapshot { nodes, mut edges } = snapshot;
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let before = edges.len();
        edges.retain(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()));
        if edges.len() != before {
            tracing::warn!(
                pruned = before - edges.len(),
                "Dropped dangling edges while restoring graph"
            );
        }
        self.bump_past(&nodes);
        self.nodes = nodes;
        self.edges = edges;
    }

    /// Mutable access to every node payload, used for cross-board updates
    /// such as board renames.
    pub(crate) fn for_each_node_data<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut NodeData),
    {
        for node in &mut self.nodes {
            f(&mut node.data);
        }
    }

    /// Remove every node matching `predicate`, with their edges.
    pub(crate) fn remove_nodes_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Node) -> bool,
    {
        let removed: HashSet<NodeId> = self
            .nodes
            .iter()
            .filter(|n| predicate(n))
            .map(|n| n.id.clone())
            .collect();
        if removed.is_empty() {
            return 0;
        }
        self.nodes.retain(|n| !removed.contains(&n.id));
        self.edges
            .retain(|e| !removed.contains(&e.source) && !removed.contains(&e.target));
        removed.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
