use super::{
    ArgId, ArgInfo, ArgKind, AttributeValue, Dimension, Graph, GraphError, GraphNode, NodeId,
    normalize_domain, ONNX_DOMAIN,
};
use crate::dtype::DType;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_SINCE_VERSION: i64 = 1;

/// Incrementally assembles a [`Graph`]. Args are created on first mention, so nodes may be
/// added in any order; `build` wires producers to consumers and validates the result.
pub struct GraphBuilder {
    name: String,
    nodes: Vec<GraphNode>,
    args: Vec<ArgInfo>,
    args_by_name: HashMap<String, ArgId>,
    inputs: Vec<ArgId>,
    outputs: Vec<ArgId>,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: vec![],
            args: vec![],
            args_by_name: HashMap::new(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    fn get_or_create_arg(&mut self, name: &str) -> ArgId {
        if let Some(id) = self.args_by_name.get(name) {
            return *id;
        }
        let id = ArgId(self.args.len());
        self.args.push(ArgInfo {
            id,
            name: name.to_string(),
            dtype: None,
            shape: None,
            kind: ArgKind::Intermediate,
            is_graph_output: false,
        });
        self.args_by_name.insert(name.to_string(), id);
        id
    }

    /// Attaches type and shape information to an arg without changing its role.
    pub fn declare_arg(
        &mut self,
        name: &str,
        dtype: Option<DType>,
        shape: Option<Vec<Dimension>>,
    ) -> ArgId {
        let id = self.get_or_create_arg(name);
        let arg = &mut self.args[id.0];
        if dtype.is_some() {
            arg.dtype = dtype;
        }
        if shape.is_some() {
            arg.shape = shape;
        }
        id
    }

    pub fn add_input(
        &mut self,
        name: &str,
        dtype: Option<DType>,
        shape: Option<Vec<Dimension>>,
    ) -> ArgId {
        let id = self.declare_arg(name, dtype, shape);
        self.args[id.0].kind = ArgKind::GraphInput;
        if !self.inputs.contains(&id) {
            self.inputs.push(id);
        }
        id
    }

    pub fn add_initializer(&mut self, name: &str, dtype: DType, dims: &[usize]) -> ArgId {
        let shape = dims.iter().map(|x| Dimension::Known(*x)).collect();
        let id = self.declare_arg(name, Some(dtype), Some(shape));
        self.args[id.0].kind = ArgKind::Initializer;
        // Older models list initializers among the graph inputs as well.
        self.inputs.retain(|x| *x != id);
        id
    }

    pub fn add_node(
        &mut self,
        name: &str,
        op_type: &str,
        inputs: impl IntoIterator<Item = impl AsRef<str>>,
        outputs: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> NodeId {
        let inputs = inputs
            .into_iter()
            .map(|x| self.get_or_create_arg(x.as_ref()))
            .collect();
        let outputs = outputs
            .into_iter()
            .map(|x| self.get_or_create_arg(x.as_ref()))
            .collect();
        let index = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            index,
            name: name.to_string(),
            op_type: op_type.to_string(),
            domain: ONNX_DOMAIN.to_string(),
            since_version: DEFAULT_SINCE_VERSION,
            inputs,
            outputs,
            attributes: BTreeMap::new(),
            input_nodes: vec![],
            output_nodes: vec![],
            output_edges_count: 0,
        });
        index
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut GraphNode, GraphError> {
        self.nodes
            .get_mut(node.0)
            .ok_or(GraphError::UnknownNode(node.0))
    }

    pub fn set_domain(&mut self, node: NodeId, domain: &str) -> Result<(), GraphError> {
        self.node_mut(node)?.domain = normalize_domain(domain).to_string();
        Ok(())
    }

    pub fn set_since_version(&mut self, node: NodeId, version: i64) -> Result<(), GraphError> {
        self.node_mut(node)?.since_version = version;
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), GraphError> {
        self.node_mut(node)?
            .attributes
            .insert(name.to_string(), value);
        Ok(())
    }

    pub fn mark_output(&mut self, name: &str) -> Result<ArgId, GraphError> {
        let id = *self
            .args_by_name
            .get(name)
            .ok_or_else(|| GraphError::UnknownArg(name.to_string()))?;
        self.args[id.0].is_graph_output = true;
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
        Ok(id)
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        log::trace!(
            "Building graph \"{}\" with {} nodes and {} args",
            self.name,
            self.nodes.len(),
            self.args.len()
        );
        Graph::assemble(self.name, self.nodes, self.args, self.inputs, self.outputs)
    }
}
