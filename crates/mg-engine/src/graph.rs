//! Processing graph
//!
//! One node per processable (a port or a processor) with directed edges for
//! signal flow. Nodes live in an arena and are addressed by `NodeId`;
//! processables are deduplicated by identity so wiring code can add the
//! same port from several call sites.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use mg_core::{MgError, MgResult, Port, PortId, Processor, ProcessorId, Sample};
use mg_plugin::GroupFader;

/// Index of a node inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a processable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessableId {
    Port(PortId),
    Processor(ProcessorId),
}

impl From<PortId> for ProcessableId {
    fn from(id: PortId) -> Self {
        ProcessableId::Port(id)
    }
}

impl From<ProcessorId> for ProcessableId {
    fn from(id: ProcessorId) -> Self {
        ProcessableId::Processor(id)
    }
}

/// Anything that can sit in the graph
#[derive(Clone)]
pub enum Processable {
    Port(Arc<Port>),
    Processor(Arc<dyn Processor>),
}

impl Processable {
    pub fn id(&self) -> ProcessableId {
        match self {
            Processable::Port(p) => ProcessableId::Port(p.id()),
            Processable::Processor(p) => ProcessableId::Processor(p.id()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Processable::Port(p) => p.name(),
            Processable::Processor(p) => p.name(),
        }
    }

    pub fn as_port(&self) -> Option<&Arc<Port>> {
        match self {
            Processable::Port(p) => Some(p),
            Processable::Processor(_) => None,
        }
    }

    pub fn as_processor(&self) -> Option<&Arc<dyn Processor>> {
        match self {
            Processable::Port(_) => None,
            Processable::Processor(p) => Some(p),
        }
    }
}

impl From<Arc<Port>> for Processable {
    fn from(port: Arc<Port>) -> Self {
        Processable::Port(port)
    }
}

impl From<Arc<dyn Processor>> for Processable {
    fn from(processor: Arc<dyn Processor>) -> Self {
        Processable::Processor(processor)
    }
}

impl fmt::Debug for Processable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processable::Port(p) => write!(f, "Port({} {})", p.name(), p.id()),
            Processable::Processor(p) => write!(f, "Processor({} {})", p.name(), p.id()),
        }
    }
}

/// Gain of a port-to-port edge: the product of the group faders the
/// signal leaves through. Read live on every block.
#[derive(Debug, Clone, Default)]
pub struct EdgeGain {
    faders: Vec<Arc<GroupFader>>,
}

impl EdgeGain {
    pub fn new(faders: Vec<Arc<GroupFader>>) -> Self {
        Self { faders }
    }

    pub fn value(&self) -> Sample {
        self.faders.iter().map(|f| f.linear_gain()).product()
    }
}

/// Graph node wrapping exactly one processable
#[derive(Debug)]
pub struct GraphNode {
    id: NodeId,
    processable: Processable,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
}

impl GraphNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn processable(&self) -> &Processable {
        &self.processable
    }

    /// Downstream nodes
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Upstream nodes
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn feeds(&self, other: NodeId) -> bool {
        self.children.contains(&other)
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    index: HashMap<ProcessableId, NodeId>,
    edge_gains: HashMap<(NodeId, NodeId), EdgeGain>,
    edge_count: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node for `processable`, or return the existing one
    pub fn add_node_for_processable(&mut self, processable: impl Into<Processable>) -> NodeId {
        let processable = processable.into();
        let key = processable.id();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            id,
            processable,
            children: Vec::new(),
            parents: Vec::new(),
        });
        self.index.insert(key, id);
        id
    }

    pub fn find_node_for_processable(&self, id: impl Into<ProcessableId>) -> Option<NodeId> {
        self.index.get(&id.into()).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.node(from).is_some_and(|n| n.feeds(to))
    }

    /// Whether both processables are in the graph and joined by an edge
    pub fn is_connected(&self, from: impl Into<ProcessableId>, to: impl Into<ProcessableId>) -> bool {
        match (
            self.find_node_for_processable(from),
            self.find_node_for_processable(to),
        ) {
            (Some(a), Some(b)) => self.has_edge(a, b),
            _ => false,
        }
    }

    /// Add a directed edge. Returns false if it already existed or an id is
    /// unknown. No cycle check; see `try_connect`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        if from.0 >= self.nodes.len() || to.0 >= self.nodes.len() || self.has_edge(from, to) {
            return false;
        }
        self.nodes[from.0].children.push(to);
        self.nodes[to.0].parents.push(from);
        self.edge_count += 1;
        true
    }

    /// Add an edge unless it would close a cycle
    pub fn try_connect(&mut self, from: NodeId, to: NodeId) -> MgResult<bool> {
        if self.would_create_cycle(from, to) {
            return Err(MgError::WouldCreateCycle {
                from: self.describe(from),
                to: self.describe(to),
            });
        }
        Ok(self.connect(from, to))
    }

    /// Connect two ports, adding their nodes if needed
    pub fn connect_ports(&mut self, from: &Arc<Port>, to: &Arc<Port>) -> bool {
        let a = self.add_node_for_processable(Arc::clone(from));
        let b = self.add_node_for_processable(Arc::clone(to));
        self.connect(a, b)
    }

    /// Scale the signal carried by an existing edge. Returns false if there
    /// is no such edge.
    pub fn set_edge_gain(&mut self, from: NodeId, to: NodeId, gain: EdgeGain) -> bool {
        if !self.has_edge(from, to) {
            return false;
        }
        self.edge_gains.insert((from, to), gain);
        true
    }

    pub fn edge_gain(&self, from: NodeId, to: NodeId) -> Option<&EdgeGain> {
        self.edge_gains.get(&(from, to))
    }

    /// True if `to` already reaches `from` (or they are the same node)
    pub fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if visited.insert(current) {
                if let Some(node) = self.node(current) {
                    stack.extend(node.children.iter().copied());
                }
            }
        }
        false
    }

    /// Add a processor with all of its ports, wired
    /// `input port -> processor -> output port`
    pub fn add_processor(&mut self, processor: &Arc<dyn Processor>) -> NodeId {
        let node = self.add_node_for_processable(Arc::clone(processor));
        for port in processor.input_ports() {
            let port_node = self.add_node_for_processable(Arc::clone(port));
            self.connect(port_node, node);
        }
        for port in processor.output_ports() {
            let port_node = self.add_node_for_processable(Arc::clone(port));
            self.connect(node, port_node);
        }
        node
    }

    /// Nodes with no upstream dependencies
    pub fn trigger_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.parents.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Nodes nothing depends on
    pub fn terminal_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Dependency order using Kahn's algorithm
    pub fn topological_order(&self) -> MgResult<Vec<NodeId>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.parents.len()).collect();
        let mut queue: VecDeque<NodeId> = self.trigger_nodes().into();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &child in &self.nodes[id.0].children {
                in_degree[child.0] -= 1;
                if in_degree[child.0] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(MgError::CycleDetected);
        }
        Ok(order)
    }

    fn describe(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.processable.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_core::{AudioLayout, PortFlow};

    fn port(name: &str) -> Arc<Port> {
        Arc::new(Port::audio(name, PortFlow::Output, AudioLayout::Stereo))
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut graph = Graph::new();
        let p = port("Out");
        let a = graph.add_node_for_processable(Arc::clone(&p));
        let b = graph.add_node_for_processable(Arc::clone(&p));
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.find_node_for_processable(p.id()), Some(a));
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut graph = Graph::new();
        let a = graph.add_node_for_processable(port("A"));
        let b = graph.add_node_for_processable(port("B"));
        assert!(graph.connect(a, b));
        assert!(!graph.connect(a, b));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node(b).unwrap().parents(), &[a]);
    }

    #[test]
    fn test_try_connect_refuses_cycle() {
        let mut graph = Graph::new();
        let a = graph.add_node_for_processable(port("A"));
        let b = graph.add_node_for_processable(port("B"));
        let c = graph.add_node_for_processable(port("C"));
        graph.connect(a, b);
        graph.connect(b, c);

        assert!(graph.would_create_cycle(c, a));
        assert!(matches!(
            graph.try_connect(c, a),
            Err(MgError::WouldCreateCycle { .. })
        ));
        assert!(graph.try_connect(a, c).unwrap());
        assert!(matches!(graph.try_connect(a, a), Err(_)));
    }

    #[test]
    fn test_topological_order() {
        let mut graph = Graph::new();
        let ids: Vec<NodeId> = ["A", "B", "C", "D"]
            .iter()
            .map(|n| graph.add_node_for_processable(port(n)))
            .collect();
        // D -> B -> A, D -> C -> A
        graph.connect(ids[3], ids[1]);
        graph.connect(ids[3], ids[2]);
        graph.connect(ids[1], ids[0]);
        graph.connect(ids[2], ids[0]);

        let order = graph.topological_order().unwrap();
        let pos = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(ids[3]) < pos(ids[1]));
        assert!(pos(ids[1]) < pos(ids[0]));
        assert!(pos(ids[2]) < pos(ids[0]));
        assert_eq!(graph.trigger_nodes(), vec![ids[3]]);
        assert_eq!(graph.terminal_nodes(), vec![ids[0]]);
    }

    #[test]
    fn test_edge_gain_needs_edge() {
        let mut graph = Graph::new();
        let a = graph.add_node_for_processable(port("A"));
        let b = graph.add_node_for_processable(port("B"));
        let fader = Arc::new(GroupFader::default());
        assert!(!graph.set_edge_gain(a, b, EdgeGain::new(vec![Arc::clone(&fader)])));

        graph.connect(a, b);
        assert!(graph.set_edge_gain(a, b, EdgeGain::new(vec![Arc::clone(&fader)])));
        assert_eq!(graph.edge_gain(a, b).map(EdgeGain::value), Some(1.0));
        fader.set_muted(true);
        assert_eq!(graph.edge_gain(a, b).map(EdgeGain::value), Some(0.0));
        assert!(graph.edge_gain(b, a).is_none());
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = Graph::new();
        let a = graph.add_node_for_processable(port("A"));
        let b = graph.add_node_for_processable(port("B"));
        graph.connect(a, b);
        graph.connect(b, a);
        assert!(matches!(graph.topological_order(), Err(MgError::CycleDetected)));
    }
}
