//! Voice processing graph
//!
//! Construction happens in two stages. A [`GraphDraft`] only records unit
//! specs; nothing can be configured on it. [`GraphDraft::open`] turns every
//! spec into a concrete unit and yields a [`Graph`], the DAG (petgraph
//! `StableGraph`) that connections and unit properties are applied to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mixer::MixerState;
use crate::nodes::{MixerNode, OutputNode, VoiceNode};
use crate::primitives::{BoxedNode, NodeDescriptor, NodeId, Port, SignalType, UnitProperty};

/// Wire from an output port to an input port
#[derive(Debug, Clone)]
pub struct Edge {
    pub source_port: String,
    pub dest_port: String,
}

impl Edge {
    pub fn new(source_port: impl Into<String>, dest_port: impl Into<String>) -> Self {
        Self {
            source_port: source_port.into(),
            dest_port: dest_port.into(),
        }
    }
}

/// Why a wiring or property change was refused
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("no unit {0} in graph")]
    NodeNotFound(Uuid),

    #[error("unit {node} has no port '{port}'")]
    PortNotFound { node: Uuid, port: String },

    #[error("cannot wire {got:?} into a {expected:?} port")]
    TypeMismatch {
        expected: SignalType,
        got: SignalType,
    },

    #[error("connection would close a loop")]
    CycleDetected,

    #[error("unit {node} does not accept property '{property}'")]
    PropertyRejected {
        node: Uuid,
        property: &'static str,
    },
}

// =============================================================================
// DRAFT
// =============================================================================

/// What a unit will become once the graph is opened
pub enum UnitKind {
    /// Sampled instrument: MIDI in, stereo audio out
    Voice,
    /// Sums one stereo bus per channel of the shared state
    Mixer { state: Arc<MixerState> },
    /// Pushes the final mix into a ring for an audio sink
    Output { ring: rtrb::Producer<f32> },
}

impl UnitKind {
    fn label(&self) -> &'static str {
        match self {
            UnitKind::Voice => "voice",
            UnitKind::Mixer { .. } => "mixer",
            UnitKind::Output { .. } => "output",
        }
    }
}

/// A unit recorded in a draft, not yet instantiated
pub struct UnitSpec {
    pub id: NodeId,
    pub name: String,
    pub kind: UnitKind,
}

/// Render parameters units are instantiated with
#[derive(Debug, Clone, Copy)]
pub struct UnitSettings {
    pub sample_rate: u32,
    pub block_frames: usize,
}

/// A graph under construction
///
/// Holds unit specs only. There is no way to set a unit property here; that
/// needs the opened [`Graph`].
pub struct GraphDraft {
    id: Uuid,
    specs: Vec<UnitSpec>,
}

impl GraphDraft {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            specs: Vec::new(),
        }
    }

    /// Record a unit and return the id it will keep after opening
    pub fn add_unit(&mut self, name: impl Into<String>, kind: UnitKind) -> NodeId {
        let id = Uuid::new_v4();
        self.specs.push(UnitSpec {
            id,
            name: name.into(),
            kind,
        });
        id
    }

    pub fn unit_count(&self) -> usize {
        self.specs.len()
    }

    /// Instantiate every unit, in the order they were added
    pub fn open(self, settings: UnitSettings) -> Graph {
        let mut graph = Graph::with_id(self.id);

        for spec in self.specs {
            tracing::trace!(unit = %spec.id, kind = spec.kind.label(), "instantiating unit");
            let node: BoxedNode = match spec.kind {
                UnitKind::Voice => Box::new(VoiceNode::new(spec.id, spec.name, settings)),
                UnitKind::Mixer { state } => Box::new(MixerNode::new(spec.id, spec.name, state)),
                UnitKind::Output { ring } => Box::new(OutputNode::new(spec.id, spec.name, ring)),
            };
            graph.add_node(node);
        }

        graph
    }
}

impl Default for GraphDraft {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// OPENED GRAPH
// =============================================================================

/// One wire, by unit id and port name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub source_id: Uuid,
    pub source_port: String,
    pub dest_id: Uuid,
    pub dest_port: String,
}

/// Units and wiring, for diagnostics and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: Uuid,
    pub nodes: Vec<NodeDescriptor>,
    pub edges: Vec<EdgeSnapshot>,
}

/// The opened processing graph
///
/// Units are addressed by id. Insertion order is kept alongside the
/// petgraph indices, and the processing order is cached until the next
/// structural change.
pub struct Graph {
    id: Uuid,
    inner: StableGraph<BoxedNode, Edge>,
    index_map: HashMap<Uuid, NodeIndex>,
    insertion: Vec<Uuid>,
    topo_order: Option<Vec<NodeIndex>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    fn with_id(id: Uuid) -> Self {
        Self {
            id,
            inner: StableGraph::new(),
            index_map: HashMap::new(),
            insertion: Vec::new(),
            topo_order: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_node(&mut self, node: BoxedNode) -> NodeIndex {
        let id = node.descriptor().id;
        let index = self.inner.add_node(node);
        self.index_map.insert(id, index);
        self.insertion.push(id);
        self.invalidate_topo();
        index
    }

    /// Detach a unit without shutting it down
    pub fn remove_node(&mut self, id: Uuid) -> Option<BoxedNode> {
        let index = self.index_map.remove(&id)?;
        self.insertion.retain(|n| *n != id);
        let node = self.inner.remove_node(index)?;
        self.invalidate_topo();
        Some(node)
    }

    /// Wire `source_port` to `dest_port`. A refused wire leaves the graph
    /// unchanged.
    pub fn connect(
        &mut self,
        source_id: Uuid,
        source_port: &str,
        dest_id: Uuid,
        dest_port: &str,
    ) -> Result<EdgeIndex, GraphError> {
        let source_idx = self
            .index_map
            .get(&source_id)
            .copied()
            .ok_or(GraphError::NodeNotFound(source_id))?;

        let dest_idx = self
            .index_map
            .get(&dest_id)
            .copied()
            .ok_or(GraphError::NodeNotFound(dest_id))?;

        self.validate_connection(source_id, source_port, dest_id, dest_port)?;

        let edge = Edge::new(source_port, dest_port);
        let edge_idx = self.inner.add_edge(source_idx, dest_idx, edge);

        if self.has_cycle() {
            self.inner.remove_edge(edge_idx);
            return Err(GraphError::CycleDetected);
        }

        self.invalidate_topo();
        Ok(edge_idx)
    }

    /// Remove the wire between two units; false when there was none
    pub fn disconnect(&mut self, source_id: Uuid, dest_id: Uuid) -> bool {
        let (Some(&source_idx), Some(&dest_idx)) =
            (self.index_map.get(&source_id), self.index_map.get(&dest_id))
        else {
            return false;
        };

        if let Some(edge_idx) = self.inner.find_edge(source_idx, dest_idx) {
            self.inner.remove_edge(edge_idx);
            self.invalidate_topo();
            true
        } else {
            false
        }
    }

    /// Apply a property to an opened unit
    pub fn set_property(&mut self, id: Uuid, property: UnitProperty) -> Result<(), GraphError> {
        let node = self.node_mut(id).ok_or(GraphError::NodeNotFound(id))?;
        node.set_property(property)
            .map_err(|rejected| GraphError::PropertyRejected {
                node: id,
                property: rejected.name(),
            })
    }

    pub fn node(&self, id: Uuid) -> Option<&BoxedNode> {
        let index = self.index_map.get(&id)?;
        self.inner.node_weight(*index)
    }

    pub fn node_mut(&mut self, id: Uuid) -> Option<&mut BoxedNode> {
        let index = self.index_map.get(&id)?;
        self.inner.node_weight_mut(*index)
    }

    /// Node ids in the order they were added
    pub fn node_ids(&self) -> &[Uuid] {
        &self.insertion
    }

    /// The `n`th node added to the graph
    pub fn nth_node(&self, n: usize) -> Option<Uuid> {
        self.insertion.get(n).copied()
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Sources before their destinations
    pub fn processing_order(&mut self) -> Result<&[NodeIndex], GraphError> {
        let order = match self.topo_order.take() {
            Some(order) => order,
            None => toposort(&self.inner, None).map_err(|_| GraphError::CycleDetected)?,
        };
        Ok(self.topo_order.insert(order))
    }

    pub fn node_at(&self, index: NodeIndex) -> Option<&BoxedNode> {
        self.inner.node_weight(index)
    }

    pub fn index_of(&self, id: Uuid) -> Option<NodeIndex> {
        self.index_map.get(&id).copied()
    }

    /// Units visited walking downstream from `source` to `sink`
    pub fn signal_path(&self, source: Uuid, sink: Uuid) -> Option<Vec<Uuid>> {
        let source_idx = self.index_map.get(&source)?;
        let sink_idx = self.index_map.get(&sink)?;

        let mut path = Vec::new();
        let mut visited = HashSet::new();

        if self.dfs_path(*source_idx, *sink_idx, &mut path, &mut visited) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_path(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<Uuid>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        if !visited.insert(current) {
            return false;
        }

        if let Some(node) = self.inner.node_weight(current) {
            path.push(node.descriptor().id);
        }

        if current == target {
            return true;
        }

        for neighbor in self.inner.neighbors_directed(current, Direction::Outgoing) {
            if self.dfs_path(neighbor, target, path, visited) {
                return true;
            }
        }

        path.pop();
        false
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes: Vec<_> = self
            .insertion
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|node| node.descriptor().clone())
            .collect();

        let edges: Vec<_> = self
            .inner
            .edge_references()
            .filter_map(|e| {
                let source = self.inner.node_weight(e.source())?;
                let target = self.inner.node_weight(e.target())?;
                let edge = e.weight();

                Some(EdgeSnapshot {
                    source_id: source.descriptor().id,
                    source_port: edge.source_port.clone(),
                    dest_id: target.descriptor().id,
                    dest_port: edge.dest_port.clone(),
                })
            })
            .collect();

        GraphSnapshot {
            id: self.id,
            nodes,
            edges,
        }
    }

    /// Shut down every unit and empty the graph
    pub fn dispose(&mut self) {
        for id in std::mem::take(&mut self.insertion) {
            if let Some(mut node) = self.index_map.remove(&id).and_then(|idx| self.inner.remove_node(idx)) {
                node.shutdown();
            }
        }
        self.invalidate_topo();
    }

    fn invalidate_topo(&mut self) {
        self.topo_order = None;
    }

    fn has_cycle(&self) -> bool {
        toposort(&self.inner, None).is_err()
    }

    fn validate_connection(
        &self,
        source_id: Uuid,
        source_port: &str,
        dest_id: Uuid,
        dest_port: &str,
    ) -> Result<(), GraphError> {
        let source_node = self
            .node(source_id)
            .ok_or(GraphError::NodeNotFound(source_id))?;
        let dest_node = self
            .node(dest_id)
            .ok_or(GraphError::NodeNotFound(dest_id))?;

        let source_port_def = find_port(&source_node.descriptor().outputs, source_port).ok_or(
            GraphError::PortNotFound {
                node: source_id,
                port: source_port.to_string(),
            },
        )?;

        let dest_port_def = find_port(&dest_node.descriptor().inputs, dest_port).ok_or(
            GraphError::PortNotFound {
                node: dest_id,
                port: dest_port.to_string(),
            },
        )?;

        if source_port_def.signal_type != dest_port_def.signal_type {
            return Err(GraphError::TypeMismatch {
                expected: dest_port_def.signal_type,
                got: source_port_def.signal_type,
            });
        }

        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn find_port<'a>(ports: &'a [Port], name: &str) -> Option<&'a Port> {
    ports.iter().find(|p| p.name == name)
}
