//! Arena-backed computation graph.
//!
//! Nodes and args live in per-graph vectors and are addressed by [`NodeId`] / [`ArgId`].
//! Every graph carries a process-unique [`GraphId`] so handles taken from one graph can be
//! told apart from handles of another. Graphs are immutable once built; neighbor lists,
//! output edge counts and the topological order are all computed up front.

use crate::dtype::DType;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

mod builder;
pub mod onnx_import;

pub use builder::GraphBuilder;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Arg \"{0}\" is produced by more than one node")]
    DuplicateProducer(String),
    #[error("Arg \"{0}\" is a graph input or initializer but is also produced by a node")]
    ProducedGraphInput(String),
    #[error("Graph contains a cycle")]
    CycleDetected,
    #[error("Unknown arg \"{0}\"")]
    UnknownArg(String),
    #[error("Unknown node index {0}")]
    UnknownNode(usize),
}

/// The default ONNX operator domain. `"ai.onnx"` is an alias for it.
pub const ONNX_DOMAIN: &str = "";

pub fn normalize_domain(domain: &str) -> &str {
    if domain == "ai.onnx" { ONNX_DOMAIN } else { domain }
}

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct GraphId(u64);

impl GraphId {
    fn fresh() -> Self {
        Self(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct ArgId(pub(crate) usize);

impl ArgId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Known(usize),
    Symbolic(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum ArgKind {
    GraphInput,
    Initializer,
    Intermediate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgInfo {
    pub(crate) id: ArgId,
    pub(crate) name: String,
    pub(crate) dtype: Option<DType>,
    pub(crate) shape: Option<Vec<Dimension>>,
    pub(crate) kind: ArgKind,
    pub(crate) is_graph_output: bool,
}

impl ArgInfo {
    pub fn id(&self) -> ArgId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    pub fn shape(&self) -> Option<&[Dimension]> {
        self.shape.as_deref()
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(|x| x.len())
    }

    pub fn kind(&self) -> ArgKind {
        self.kind
    }

    pub fn is_constant(&self) -> bool {
        self.kind == ArgKind::Initializer
    }

    pub fn is_graph_output(&self) -> bool {
        self.is_graph_output
    }

    /// True when a shape is known and every dimension is a positive constant.
    /// Scalars (empty shape) count as fixed.
    pub fn is_fixed_size(&self) -> bool {
        match &self.shape {
            Some(shape) => shape
                .iter()
                .all(|d| matches!(d, Dimension::Known(x) if *x > 0)),
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub(crate) index: NodeId,
    pub(crate) name: String,
    pub(crate) op_type: String,
    pub(crate) domain: String,
    pub(crate) since_version: i64,
    pub(crate) inputs: Vec<ArgId>,
    pub(crate) outputs: Vec<ArgId>,
    pub(crate) attributes: BTreeMap<String, AttributeValue>,
    pub(crate) input_nodes: Vec<NodeId>,
    pub(crate) output_nodes: Vec<NodeId>,
    pub(crate) output_edges_count: usize,
}

impl GraphNode {
    pub fn index(&self) -> NodeId {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn since_version(&self) -> i64 {
        self.since_version
    }

    pub fn input_args(&self) -> &[ArgId] {
        &self.inputs
    }

    pub fn output_args(&self) -> &[ArgId] {
        &self.outputs
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Producers of this node's inputs, in input order, each listed once.
    pub fn input_nodes(&self) -> &[NodeId] {
        &self.input_nodes
    }

    /// Consumers of this node's outputs, in output order, each listed once.
    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }

    /// Number of (consumer, input slot) pairs fed by this node's outputs.
    pub fn output_edges_count(&self) -> usize {
        self.output_edges_count
    }
}

#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    name: String,
    nodes: Vec<GraphNode>,
    args: Vec<ArgInfo>,
    args_by_name: HashMap<String, ArgId>,
    producers: Vec<Option<NodeId>>,
    consumers: Vec<Vec<NodeId>>,
    inputs: Vec<ArgId>,
    outputs: Vec<ArgId>,
    topological_order: Vec<NodeId>,
}

impl Clone for Graph {
    fn clone(&self) -> Self {
        Self {
            id: GraphId::fresh(),
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            args: self.args.clone(),
            args_by_name: self.args_by_name.clone(),
            producers: self.producers.clone(),
            consumers: self.consumers.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            topological_order: self.topological_order.clone(),
        }
    }
}

impl Graph {
    pub(crate) fn assemble(
        name: String,
        mut nodes: Vec<GraphNode>,
        args: Vec<ArgInfo>,
        inputs: Vec<ArgId>,
        outputs: Vec<ArgId>,
    ) -> Result<Self, GraphError> {
        let mut producers: Vec<Option<NodeId>> = vec![None; args.len()];
        let mut consumers: Vec<Vec<NodeId>> = vec![vec![]; args.len()];

        for node in &nodes {
            for arg in &node.outputs {
                let info = &args[arg.0];
                if producers[arg.0].is_some() {
                    return Err(GraphError::DuplicateProducer(info.name.clone()));
                }
                if info.kind != ArgKind::Intermediate {
                    return Err(GraphError::ProducedGraphInput(info.name.clone()));
                }
                producers[arg.0] = Some(node.index);
            }
            for arg in &node.inputs {
                if !consumers[arg.0].contains(&node.index) {
                    consumers[arg.0].push(node.index);
                }
            }
        }

        for i in 0..nodes.len() {
            let mut input_nodes = vec![];
            for arg in &nodes[i].inputs {
                if let Some(producer) = producers[arg.0] {
                    if !input_nodes.contains(&producer) {
                        input_nodes.push(producer);
                    }
                }
            }
            let mut output_nodes = vec![];
            let mut output_edges_count = 0;
            for arg in &nodes[i].outputs {
                for consumer in &consumers[arg.0] {
                    output_edges_count += nodes[consumer.0]
                        .inputs
                        .iter()
                        .filter(|x| *x == arg)
                        .count();
                    if !output_nodes.contains(consumer) {
                        output_nodes.push(*consumer);
                    }
                }
            }
            let node = &mut nodes[i];
            node.input_nodes = input_nodes;
            node.output_nodes = output_nodes;
            node.output_edges_count = output_edges_count;
        }

        let topological_order = Self::sort_topologically(&nodes)?;
        let args_by_name = args.iter().map(|a| (a.name.clone(), a.id)).collect();

        Ok(Self {
            id: GraphId::fresh(),
            name,
            nodes,
            args,
            args_by_name,
            producers,
            consumers,
            inputs,
            outputs,
            topological_order,
        })
    }

    /// Kahn's algorithm; among ready nodes the lowest index goes first.
    fn sort_topologically(nodes: &[GraphNode]) -> Result<Vec<NodeId>, GraphError> {
        let mut pending: Vec<usize> = nodes.iter().map(|n| n.input_nodes.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, x)| **x == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(NodeId(i));
            for next in &nodes[i].output_nodes {
                pending[next.0] -= 1;
                if pending[next.0] == 0 {
                    ready.push(Reverse(next.0));
                }
            }
        }
        if order.len() != nodes.len() {
            return Err(GraphError::CycleDetected);
        }
        Ok(order)
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    pub fn get_node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)
    }

    /// First node carrying `name`. Node names are not required to be unique in a target graph.
    pub fn node_by_name(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn args(&self) -> impl Iterator<Item = &ArgInfo> {
        self.args.iter()
    }

    pub fn arg(&self, id: ArgId) -> &ArgInfo {
        &self.args[id.0]
    }

    pub fn get_arg(&self, id: ArgId) -> Option<&ArgInfo> {
        self.args.get(id.0)
    }

    pub fn arg_by_name(&self, name: &str) -> Option<&ArgInfo> {
        self.args_by_name.get(name).map(|x| &self.args[x.0])
    }

    pub fn producer_of(&self, arg: ArgId) -> Option<&GraphNode> {
        self.producers[arg.0].map(|x| &self.nodes[x.0])
    }

    pub fn consumers_of(&self, arg: ArgId) -> impl Iterator<Item = &GraphNode> {
        self.consumers[arg.0].iter().map(|x| &self.nodes[x.0])
    }

    pub fn inputs(&self) -> &[ArgId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArgId] {
        &self.outputs
    }

    pub fn topological_order(&self) -> &[NodeId] {
        &self.topological_order
    }
}
