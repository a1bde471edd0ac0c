use super::MatchError;
use crate::graph::{ArgId, ArgInfo, Graph, GraphId, GraphNode, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A target node paired with the pattern node it was matched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchedNodeGroup {
    pub matched_node: NodeId,
    pub pattern_node: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchedInputGroup {
    pub matched_input: ArgId,
    pub pattern_input: ArgId,
}

/// Correspondences found by a successful match, keyed by pattern-side name.
///
/// Entries hold indices into the target graph rather than references; [`PatternMatchResult::node`]
/// and [`PatternMatchResult::input`] resolve them after checking that the graph passed in is the
/// one that was matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatchResult {
    target_graph: GraphId,
    matched_node_groups: BTreeMap<String, MatchedNodeGroup>,
    matched_input_groups: BTreeMap<String, MatchedInputGroup>,
}

impl PatternMatchResult {
    pub(crate) fn new(target_graph: GraphId) -> Self {
        Self {
            target_graph,
            matched_node_groups: BTreeMap::new(),
            matched_input_groups: BTreeMap::new(),
        }
    }

    pub(crate) fn insert_node(&mut self, name: &str, group: MatchedNodeGroup) {
        self.matched_node_groups.insert(name.to_string(), group);
    }

    pub(crate) fn insert_input(&mut self, name: &str, group: MatchedInputGroup) {
        self.matched_input_groups.insert(name.to_string(), group);
    }

    pub fn target_graph(&self) -> GraphId {
        self.target_graph
    }

    pub fn get_node_by_name(&self, name: &str) -> Result<NodeId, MatchError> {
        self.matched_node_groups
            .get(name)
            .map(|x| x.matched_node)
            .ok_or_else(|| MatchError::UnknownName(name.to_string()))
    }

    pub fn get_input_by_name(&self, name: &str) -> Result<ArgId, MatchError> {
        self.matched_input_groups
            .get(name)
            .map(|x| x.matched_input)
            .ok_or_else(|| MatchError::UnknownName(name.to_string()))
    }

    pub fn node<'g>(&self, name: &str, graph: &'g Graph) -> Result<&'g GraphNode, MatchError> {
        if graph.id() != self.target_graph {
            return Err(MatchError::GraphMismatch);
        }
        let id = self.get_node_by_name(name)?;
        graph.get_node(id).ok_or(MatchError::GraphMismatch)
    }

    pub fn input<'g>(&self, name: &str, graph: &'g Graph) -> Result<&'g ArgInfo, MatchError> {
        if graph.id() != self.target_graph {
            return Err(MatchError::GraphMismatch);
        }
        let id = self.get_input_by_name(name)?;
        graph.get_arg(id).ok_or(MatchError::GraphMismatch)
    }

    /// Matched target nodes whose group satisfies `condition`, ordered by pattern node name.
    pub fn get_nodes_with_condition<F>(&self, mut condition: F) -> Vec<NodeId>
    where
        F: FnMut(&str, &MatchedNodeGroup) -> bool,
    {
        self.matched_node_groups
            .iter()
            .filter(|(name, group)| condition(name, group))
            .map(|(_, group)| group.matched_node)
            .collect()
    }

    pub fn node_groups(&self) -> &BTreeMap<String, MatchedNodeGroup> {
        &self.matched_node_groups
    }

    pub fn input_groups(&self) -> &BTreeMap<String, MatchedInputGroup> {
        &self.matched_input_groups
    }

    pub fn len(&self) -> usize {
        self.matched_node_groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matched_node_groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.matched_node_groups.clear();
        self.matched_input_groups.clear();
    }
}
