use super::{PatternGraph, PatternInput, PatternNode};
use crate::graph::{ArgInfo, Graph, GraphNode};

/// Decides whether a target node may stand in for a pattern node.
pub trait NodeComparator {
    fn matches(
        &self,
        target: &Graph,
        target_node: &GraphNode,
        pattern: &PatternGraph,
        pattern_node: &PatternNode,
    ) -> bool;
}

/// Decides whether a target arg may stand in for a constrained pattern arg.
pub trait ArgComparator {
    fn matches(
        &self,
        target: &Graph,
        target_arg: &ArgInfo,
        pattern: &PatternGraph,
        pattern_input: &PatternInput,
    ) -> bool;
}

impl<F> NodeComparator for F
where
    F: Fn(&Graph, &GraphNode, &PatternGraph, &PatternNode) -> bool,
{
    fn matches(
        &self,
        target: &Graph,
        target_node: &GraphNode,
        pattern: &PatternGraph,
        pattern_node: &PatternNode,
    ) -> bool {
        self(target, target_node, pattern, pattern_node)
    }
}

impl<F> ArgComparator for F
where
    F: Fn(&Graph, &ArgInfo, &PatternGraph, &PatternInput) -> bool,
{
    fn matches(
        &self,
        target: &Graph,
        target_arg: &ArgInfo,
        pattern: &PatternGraph,
        pattern_input: &PatternInput,
    ) -> bool {
        self(target, target_arg, pattern, pattern_input)
    }
}

/// Pins a closure to the higher-ranked node comparator signature.
pub fn node_fn<F>(f: F) -> F
where
    F: Fn(&Graph, &GraphNode, &PatternGraph, &PatternNode) -> bool,
{
    f
}

/// Pins a closure to the higher-ranked arg comparator signature.
pub fn arg_fn<F>(f: F) -> F
where
    F: Fn(&Graph, &ArgInfo, &PatternGraph, &PatternInput) -> bool,
{
    f
}

/// Compares op type, domain and version, then the required output edge count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultNodeComparator {
    pub skip_op_type: bool,
    pub skip_domain_and_version: bool,
}

impl NodeComparator for DefaultNodeComparator {
    fn matches(
        &self,
        _target: &Graph,
        target_node: &GraphNode,
        _pattern: &PatternGraph,
        pattern_node: &PatternNode,
    ) -> bool {
        if !self.skip_op_type && !pattern_node.matches_op_type(target_node.op_type()) {
            log::trace!(
                "Op type mismatch for {}: {} is not one of {:?}",
                pattern_node.name(),
                target_node.op_type(),
                pattern_node.get_op_types()
            );
            return false;
        }
        if !self.skip_domain_and_version
            && !pattern_node
                .matches_domain_version(target_node.domain(), target_node.since_version())
        {
            log::trace!(
                "Domain/version mismatch for {}: {}:{}",
                pattern_node.name(),
                target_node.domain(),
                target_node.since_version()
            );
            return false;
        }
        let required = pattern_node.output_edges_count();
        if required != 0 && required != target_node.output_edges_count() {
            log::trace!(
                "Output edge count mismatch for {}: expected {}, found {}",
                pattern_node.name(),
                required,
                target_node.output_edges_count()
            );
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultArgComparator;

impl ArgComparator for DefaultArgComparator {
    fn matches(&self, _: &Graph, _: &ArgInfo, _: &PatternGraph, _: &PatternInput) -> bool {
        true
    }
}

/// Checks the dtypes, rank and constness declared on the [`PatternInput`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclaredArgComparator;

impl ArgComparator for DeclaredArgComparator {
    fn matches(
        &self,
        _target: &Graph,
        target_arg: &ArgInfo,
        _pattern: &PatternGraph,
        pattern_input: &PatternInput,
    ) -> bool {
        pattern_input.accepts(target_arg)
    }
}

/// Accepts args produced by a node whose op type is in the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOpTypeComparator {
    op_types: Vec<String>,
}

impl ProducerOpTypeComparator {
    pub fn new(op_types: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            op_types: op_types.into_iter().map(|x| x.as_ref().to_string()).collect(),
        }
    }
}

impl ArgComparator for ProducerOpTypeComparator {
    fn matches(
        &self,
        target: &Graph,
        target_arg: &ArgInfo,
        _pattern: &PatternGraph,
        _pattern_input: &PatternInput,
    ) -> bool {
        match target.producer_of(target_arg.id()) {
            Some(node) => self.op_types.iter().any(|x| x == node.op_type()),
            None => false,
        }
    }
}
