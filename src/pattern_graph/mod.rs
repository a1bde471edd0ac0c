//! Subgraph pattern matching.
//!
//! A [`PatternGraph`] is a small template of operator nodes and the args flowing between them.
//! [`PatternGraph::try_match`] searches a target [`Graph`] for one occurrence of the template and
//! returns a [`PatternMatchResult`] mapping every pattern node and constrained pattern input to
//! its counterpart in the target.
//!
//! Whether a target node or arg is acceptable is decided by comparators. Each pattern node and
//! input falls back to a default comparator unless a custom one is registered under its name.

mod compare;
mod matcher;
mod result;

pub use compare::{
    ArgComparator, DeclaredArgComparator, DefaultArgComparator, DefaultNodeComparator,
    NodeComparator, ProducerOpTypeComparator, arg_fn, node_fn,
};
pub use result::{MatchedInputGroup, MatchedNodeGroup, PatternMatchResult};

use crate::dtype::DType;
use crate::graph::{
    ArgInfo, Dimension, Graph, GraphBuilder, GraphError, NodeId, ONNX_DOMAIN, normalize_domain,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum PatternGraphError {
    #[error("Duplicate pattern node name \"{0}\"")]
    DuplicateNodeName(String),
    #[error("Duplicate pattern input name \"{0}\"")]
    DuplicateInputName(String),
    #[error("Pattern input \"{0}\" is not consumed by any pattern node")]
    UnreferencedInput(String),
    #[error("Pattern node \"{0}\" accepts no op types")]
    EmptyOpTypes(String),
    #[error("No pattern node named \"{0}\"")]
    UnknownPatternNode(String),
    #[error("No pattern arg named \"{0}\"")]
    UnknownPatternArg(String),
    #[error(transparent)]
    GraphError(#[from] GraphError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("Pattern root \"{0}\" was not found")]
    PatternRootNotFound(String),
    #[error("No match for the target graph")]
    NoMatchFound,
    #[error("No matched entry named \"{0}\" in the pattern match result")]
    UnknownName(String),
    #[error("The match result was produced against a different target graph")]
    GraphMismatch,
    #[error("Search budget of {limit} steps exhausted")]
    SearchBudgetExceeded { limit: usize },
    #[error("Recursion depth limit of {limit} exceeded")]
    RecursionLimitExceeded { limit: usize },
}

/// Bounds on a single `try_match` call. The default is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum number of (target node, pattern node) pairs examined across all root candidates.
    pub max_steps: Option<usize>,
    /// Maximum recursion depth of the node matcher.
    pub max_depth: Option<usize>,
}

impl MatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Declaration of one operator in a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    name: String,
    op_types: Vec<String>,
    domain_versions: BTreeMap<String, Vec<i64>>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    output_edges_count: usize,
}

impl PatternNode {
    pub fn new(name: &str, op_type: &str) -> Self {
        Self {
            name: name.to_string(),
            op_types: vec![op_type.to_string()],
            domain_versions: BTreeMap::new(),
            inputs: vec![],
            outputs: vec![],
            output_edges_count: 0,
        }
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.inputs = inputs.into_iter().map(|x| x.as_ref().to_string()).collect();
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.outputs = outputs.into_iter().map(|x| x.as_ref().to_string()).collect();
        self
    }

    /// Replaces the set of acceptable op types. The first one is used when the pattern's own
    /// graph is built.
    pub fn op_types(mut self, op_types: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.op_types = op_types.into_iter().map(|x| x.as_ref().to_string()).collect();
        self
    }

    /// Accepts `domain` at any of `versions`; an empty version list accepts every version.
    /// Without any domain declared, every domain and version is accepted.
    pub fn domain_versions(mut self, domain: &str, versions: impl IntoIterator<Item = i64>) -> Self {
        self.domain_versions
            .entry(normalize_domain(domain).to_string())
            .or_default()
            .extend(versions);
        self
    }

    /// Requires the matched target node to feed exactly `count` consumer input slots.
    /// Zero leaves the fanout unconstrained.
    pub fn output_edges(mut self, count: usize) -> Self {
        self.output_edges_count = count;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_op_types(&self) -> &[String] {
        &self.op_types
    }

    pub fn get_inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn get_outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn output_edges_count(&self) -> usize {
        self.output_edges_count
    }

    pub fn matches_op_type(&self, op_type: &str) -> bool {
        self.op_types.iter().any(|x| x == op_type)
    }

    pub fn matches_domain_version(&self, domain: &str, version: i64) -> bool {
        if self.domain_versions.is_empty() {
            return true;
        }
        match self.domain_versions.get(normalize_domain(domain)) {
            Some(versions) => versions.is_empty() || versions.contains(&version),
            None => false,
        }
    }

    fn canonical_domain_version(&self) -> (String, Option<i64>) {
        match self.domain_versions.iter().next() {
            Some((domain, versions)) => (domain.clone(), versions.first().copied()),
            None => (ONNX_DOMAIN.to_string(), None),
        }
    }
}

/// Declaration of a value entering the pattern from outside it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternInput {
    name: String,
    dtypes: Vec<DType>,
    rank: Option<usize>,
    constant: Option<bool>,
}

impl PatternInput {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dtypes: vec![],
            rank: None,
            constant: None,
        }
    }

    /// Restricts the element type of the matched target arg.
    ///
    /// Declarations are checked by [`PatternInput::accepts`]. The default arg comparator
    /// accepts any target arg, so they only take effect once [`DeclaredArgComparator`] is
    /// installed with [`PatternGraph::set_default_arg_comparator`] or
    /// [`PatternGraph::add_custom_arg_comparator`].
    pub fn dtypes(mut self, dtypes: impl IntoIterator<Item = DType>) -> Self {
        self.dtypes = dtypes.into_iter().collect();
        self
    }

    /// Requires a target arg of known rank `rank`. Like [`PatternInput::dtypes`], only checked
    /// under [`DeclaredArgComparator`].
    pub fn rank(mut self, rank: usize) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Requires the target arg to be (or not be) an initializer. Only checked under
    /// [`DeclaredArgComparator`]. Also decides whether the pattern's own graph declares this
    /// input as an initializer.
    pub fn constant(mut self, constant: bool) -> Self {
        self.constant = Some(constant);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks the declared element types, rank and constness against a target arg.
    /// Unset declarations accept anything.
    pub fn accepts(&self, arg: &ArgInfo) -> bool {
        if !self.dtypes.is_empty() {
            match arg.dtype() {
                Some(dtype) if self.dtypes.contains(&dtype) => {}
                _ => return false,
            }
        }
        if let Some(rank) = self.rank {
            if arg.rank() != Some(rank) {
                return false;
            }
        }
        if let Some(constant) = self.constant {
            if arg.is_constant() != constant {
                return false;
            }
        }
        true
    }

    fn add_to(&self, builder: &mut GraphBuilder) {
        let dtype = self.dtypes.first().copied();
        if self.constant == Some(true) {
            let dims = vec![1; self.rank.unwrap_or(0)];
            builder.add_initializer(&self.name, dtype.unwrap_or(DType::F32), &dims);
        } else {
            let shape = self.rank.map(|rank| {
                (0..rank)
                    .map(|i| Dimension::Symbolic(format!("{}_{}", self.name, i)))
                    .collect()
            });
            builder.add_input(&self.name, dtype, shape);
        }
    }
}

type BoxedNodeComparator = Box<dyn NodeComparator + Send + Sync>;
type BoxedArgComparator = Box<dyn ArgComparator + Send + Sync>;

/// A template graph plus the comparators used to match it.
///
/// The pattern is read-only while matching and every `try_match` call owns its own search
/// state, so one pattern can be matched against many targets, including from several threads.
pub struct PatternGraph {
    graph: Graph,
    nodes: Vec<PatternNode>,
    nodes_by_name: HashMap<String, NodeId>,
    inputs: Vec<PatternInput>,
    inputs_by_name: HashMap<String, usize>,
    default_node_comparator: BoxedNodeComparator,
    default_arg_comparator: BoxedArgComparator,
    custom_node_comparators: HashMap<String, BoxedNodeComparator>,
    custom_arg_comparators: HashMap<String, BoxedArgComparator>,
    config: MatchConfig,
}

impl fmt::Debug for PatternGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternGraph")
            .field("nodes", &self.nodes)
            .field("inputs", &self.inputs)
            .field(
                "custom_node_comparators",
                &self.custom_node_comparators.keys().collect::<Vec<_>>(),
            )
            .field(
                "custom_arg_comparators",
                &self.custom_arg_comparators.keys().collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PatternGraph {
    pub fn new(
        inputs: Vec<PatternInput>,
        nodes: Vec<PatternNode>,
    ) -> Result<Self, PatternGraphError> {
        let mut inputs_by_name = HashMap::new();
        for (i, input) in inputs.iter().enumerate() {
            if inputs_by_name.insert(input.name.clone(), i).is_some() {
                return Err(PatternGraphError::DuplicateInputName(input.name.clone()));
            }
        }

        let mut builder = GraphBuilder::new("pattern");
        for input in &inputs {
            input.add_to(&mut builder);
        }

        let mut nodes_by_name = HashMap::new();
        let mut consumed: HashSet<&str> = HashSet::new();
        for node in &nodes {
            let Some(op_type) = node.op_types.first() else {
                return Err(PatternGraphError::EmptyOpTypes(node.name.clone()));
            };
            let node_id = builder.add_node(&node.name, op_type, &node.inputs, &node.outputs);
            if nodes_by_name.insert(node.name.clone(), node_id).is_some() {
                return Err(PatternGraphError::DuplicateNodeName(node.name.clone()));
            }
            let (domain, version) = node.canonical_domain_version();
            builder.set_domain(node_id, &domain)?;
            if let Some(version) = version {
                builder.set_since_version(node_id, version)?;
            }
            consumed.extend(node.inputs.iter().map(|x| x.as_str()));
        }

        for input in &inputs {
            if !consumed.contains(input.name.as_str()) {
                return Err(PatternGraphError::UnreferencedInput(input.name.clone()));
            }
        }

        let graph = builder.build()?;
        log::debug!(
            "Built pattern graph with {} nodes and {} declared inputs",
            nodes.len(),
            inputs.len()
        );

        Ok(Self {
            graph,
            nodes,
            nodes_by_name,
            inputs,
            inputs_by_name,
            default_node_comparator: Box::new(DefaultNodeComparator::default()),
            default_arg_comparator: Box::new(DefaultArgComparator),
            custom_node_comparators: HashMap::new(),
            custom_arg_comparators: HashMap::new(),
            config: MatchConfig::default(),
        })
    }

    pub fn with_config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// The graph built from the pattern declarations.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn pattern_nodes(&self) -> impl Iterator<Item = &PatternNode> {
        self.nodes.iter()
    }

    pub fn pattern_node(&self, name: &str) -> Option<&PatternNode> {
        self.nodes_by_name.get(name).map(|x| &self.nodes[x.index()])
    }

    /// The declaration behind a node of [`PatternGraph::graph`].
    pub fn pattern_node_for(&self, node: NodeId) -> &PatternNode {
        &self.nodes[node.index()]
    }

    pub(crate) fn pattern_node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes_by_name.get(name).copied()
    }

    /// Declared inputs, plus any pattern arg that received a custom comparator.
    pub fn pattern_input(&self, name: &str) -> Option<&PatternInput> {
        self.inputs_by_name.get(name).map(|x| &self.inputs[*x])
    }

    pub fn set_default_node_comparator(
        &mut self,
        comparator: impl NodeComparator + Send + Sync + 'static,
    ) {
        self.default_node_comparator = Box::new(comparator);
    }

    pub fn set_default_arg_comparator(
        &mut self,
        comparator: impl ArgComparator + Send + Sync + 'static,
    ) {
        self.default_arg_comparator = Box::new(comparator);
    }

    pub fn add_custom_node_comparator(
        &mut self,
        node_name: &str,
        comparator: impl NodeComparator + Send + Sync + 'static,
    ) -> Result<(), PatternGraphError> {
        if !self.nodes_by_name.contains_key(node_name) {
            return Err(PatternGraphError::UnknownPatternNode(node_name.to_string()));
        }
        self.custom_node_comparators
            .insert(node_name.to_string(), Box::new(comparator));
        Ok(())
    }

    /// Registers a comparator for a pattern arg. The arg becomes constrained, so it must be
    /// matched to a distinct target input of every pattern node consuming it.
    pub fn add_custom_arg_comparator(
        &mut self,
        arg_name: &str,
        comparator: impl ArgComparator + Send + Sync + 'static,
    ) -> Result<(), PatternGraphError> {
        if !self.inputs_by_name.contains_key(arg_name) {
            if self.graph.arg_by_name(arg_name).is_none() {
                return Err(PatternGraphError::UnknownPatternArg(arg_name.to_string()));
            }
            self.inputs_by_name
                .insert(arg_name.to_string(), self.inputs.len());
            self.inputs.push(PatternInput::new(arg_name));
        }
        self.custom_arg_comparators
            .insert(arg_name.to_string(), Box::new(comparator));
        Ok(())
    }

    pub(crate) fn node_comparator_for(&self, node_name: &str) -> &dyn NodeComparator {
        match self.custom_node_comparators.get(node_name) {
            Some(x) => x.as_ref(),
            None => self.default_node_comparator.as_ref(),
        }
    }

    pub(crate) fn arg_comparator_for(&self, arg_name: &str) -> &dyn ArgComparator {
        match self.custom_arg_comparators.get(arg_name) {
            Some(x) => x.as_ref(),
            None => self.default_arg_comparator.as_ref(),
        }
    }

    /// Searches `target` for an occurrence of this pattern.
    ///
    /// The search starts from the pattern node named `root_node`, or from the first pattern node
    /// in topological order when none is given. Target nodes are tried as the root's counterpart
    /// in topological order and the first complete match is returned.
    pub fn try_match(
        &self,
        target: &Graph,
        root_node: Option<&str>,
    ) -> Result<PatternMatchResult, MatchError> {
        self.try_match_with_config(target, root_node, &self.config)
    }

    pub fn try_match_with_config(
        &self,
        target: &Graph,
        root_node: Option<&str>,
        config: &MatchConfig,
    ) -> Result<PatternMatchResult, MatchError> {
        matcher::Matcher::new(self, target, config).run(root_node)
    }
}
