use super::{MatchConfig, MatchError, MatchedInputGroup, MatchedNodeGroup, PatternGraph, PatternMatchResult};
use crate::graph::{ArgId, Graph, GraphNode, NodeId};
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrailEntry {
    Node { target: NodeId, pattern: NodeId },
    Arg { target: ArgId, pattern: ArgId },
}

/// Mutable state of one search. Every change is recorded on the trail so it can be undone
/// back to any earlier mark.
#[derive(Debug, Default)]
pub(crate) struct SearchState {
    graph_path: HashSet<NodeId>,
    pattern_path: HashSet<NodeId>,
    path_map: HashMap<NodeId, NodeId>,
    arg_bindings: HashMap<ArgId, ArgId>,
    bound_targets: HashMap<ArgId, ArgId>,
    trail: Vec<TrailEntry>,
    steps: usize,
    depth: usize,
}

impl SearchState {
    fn mark(&self) -> usize {
        self.trail.len()
    }

    fn push_node(&mut self, target: NodeId, pattern: NodeId) {
        self.graph_path.insert(target);
        self.pattern_path.insert(pattern);
        self.path_map.insert(pattern, target);
        self.trail.push(TrailEntry::Node { target, pattern });
    }

    fn bind_arg(&mut self, pattern: ArgId, target: ArgId) {
        if self.arg_bindings.contains_key(&pattern) {
            return;
        }
        self.arg_bindings.insert(pattern, target);
        self.bound_targets.insert(target, pattern);
        self.trail.push(TrailEntry::Arg { target, pattern });
    }

    /// Whether `pattern` may be bound to `target` given the bindings made so far.
    fn can_bind(&self, pattern: ArgId, target: ArgId) -> bool {
        match self.arg_bindings.get(&pattern) {
            Some(bound) => *bound == target,
            None => !self.bound_targets.contains_key(&target),
        }
    }

    fn rollback(&mut self, mark: usize) {
        while self.trail.len() > mark {
            match self.trail.pop() {
                Some(TrailEntry::Node { target, pattern }) => {
                    self.graph_path.remove(&target);
                    self.pattern_path.remove(&pattern);
                    self.path_map.remove(&pattern);
                }
                Some(TrailEntry::Arg { target, pattern }) => {
                    self.arg_bindings.remove(&pattern);
                    self.bound_targets.remove(&target);
                }
                None => break,
            }
        }
    }
}

/// Scope of one `find_match` level. Dropping an uncommitted frame undoes everything recorded
/// since it was opened, including the work of committed descendants.
struct SearchFrame<'s> {
    state: &'s mut SearchState,
    mark: usize,
    committed: bool,
}

impl<'s> SearchFrame<'s> {
    fn open(state: &'s mut SearchState) -> Self {
        state.depth += 1;
        let mark = state.mark();
        Self {
            state,
            mark,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for SearchFrame<'_> {
    type Target = SearchState;

    fn deref(&self) -> &SearchState {
        self.state
    }
}

impl DerefMut for SearchFrame<'_> {
    fn deref_mut(&mut self) -> &mut SearchState {
        self.state
    }
}

impl Drop for SearchFrame<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.rollback(self.mark);
        }
        self.state.depth -= 1;
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Inputs,
    Outputs,
}

impl Direction {
    fn neighbors(self, node: &GraphNode) -> &[NodeId] {
        match self {
            Direction::Inputs => node.input_nodes(),
            Direction::Outputs => node.output_nodes(),
        }
    }
}

pub(crate) struct Matcher<'a> {
    pattern: &'a PatternGraph,
    target: &'a Graph,
    config: &'a MatchConfig,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(pattern: &'a PatternGraph, target: &'a Graph, config: &'a MatchConfig) -> Self {
        Self {
            pattern,
            target,
            config,
        }
    }

    pub(crate) fn run(&self, root: Option<&str>) -> Result<PatternMatchResult, MatchError> {
        let pattern_root = match root {
            Some(name) => self
                .pattern
                .pattern_node_id(name)
                .ok_or_else(|| MatchError::PatternRootNotFound(name.to_string()))?,
            None => *self
                .pattern
                .graph()
                .topological_order()
                .first()
                .ok_or_else(|| MatchError::PatternRootNotFound(String::new()))?,
        };
        let root_name = self.pattern.pattern_node_for(pattern_root).name();

        let mut state = SearchState::default();
        for &candidate in self.target.topological_order() {
            if self.find_match(candidate, pattern_root, &mut state)? {
                log::debug!(
                    "Pattern root {} matched target node {} after {} steps",
                    root_name,
                    self.target.node(candidate).name(),
                    state.steps
                );
                return Ok(self.collect(&state));
            }
            log::debug!(
                "Target node {} rejected as a match for pattern root {}",
                self.target.node(candidate).name(),
                root_name
            );
        }
        Err(MatchError::NoMatchFound)
    }

    fn collect(&self, state: &SearchState) -> PatternMatchResult {
        let mut result = PatternMatchResult::new(self.target.id());
        for (pattern_node, matched_node) in &state.path_map {
            result.insert_node(
                self.pattern.pattern_node_for(*pattern_node).name(),
                MatchedNodeGroup {
                    matched_node: *matched_node,
                    pattern_node: *pattern_node,
                },
            );
        }
        for (pattern_input, matched_input) in &state.arg_bindings {
            result.insert_input(
                self.pattern.graph().arg(*pattern_input).name(),
                MatchedInputGroup {
                    matched_input: *matched_input,
                    pattern_input: *pattern_input,
                },
            );
        }
        result
    }

    /// Tries to match target node `g` with pattern node `p` and, through them, every pattern
    /// node reachable from `p`. On success the new correspondences stay in `state`; on failure
    /// `state` is left as it was found.
    fn find_match(
        &self,
        g: NodeId,
        p: NodeId,
        state: &mut SearchState,
    ) -> Result<bool, MatchError> {
        state.steps += 1;
        if let Some(limit) = self.config.max_steps {
            if state.steps > limit {
                log::warn!("Pattern search gave up after {limit} steps");
                return Err(MatchError::SearchBudgetExceeded { limit });
            }
        }
        if let Some(limit) = self.config.max_depth {
            if state.depth >= limit {
                log::warn!("Pattern search exceeded the recursion depth limit of {limit}");
                return Err(MatchError::RecursionLimitExceeded { limit });
            }
        }

        let target_node = self.target.node(g);
        let pattern_graph_node = self.pattern.graph().node(p);
        let pattern_node = self.pattern.pattern_node_for(p);
        log::trace!("Trying {} against {}", target_node.name(), pattern_node.name());

        let comparator = self.pattern.node_comparator_for(pattern_node.name());
        if !comparator.matches(self.target, target_node, self.pattern, pattern_node) {
            log::trace!("{} rejected by node comparator", target_node.name());
            return Ok(false);
        }

        let mut frame = SearchFrame::open(state);
        let mut visited = vec![false; target_node.input_args().len()];
        let mut expand = |state: &mut SearchState| self.match_neighbors(g, p, state);
        if !self.match_args(
            pattern_graph_node.input_args(),
            target_node.input_args(),
            0,
            &mut visited,
            &mut frame,
            &mut expand,
        )? {
            log::trace!("{} rejected: no arg assignment extends to a match", target_node.name());
            return Ok(false);
        }

        frame.commit();
        Ok(true)
    }

    /// Records `g` as the counterpart of `p` and matches every neighbor of `p` in both
    /// directions. Leaves partial work in `state` on failure; the caller rolls it back.
    fn match_neighbors(
        &self,
        g: NodeId,
        p: NodeId,
        state: &mut SearchState,
    ) -> Result<bool, MatchError> {
        let target_node = self.target.node(g);
        let pattern_graph_node = self.pattern.graph().node(p);
        state.push_node(g, p);

        for direction in [Direction::Inputs, Direction::Outputs] {
            for &cur in direction.neighbors(pattern_graph_node) {
                if !self.match_neighbor(target_node, cur, direction, state)? {
                    log::trace!(
                        "{} rejected: no neighbor matches {}",
                        target_node.name(),
                        self.pattern.pattern_node_for(cur).name()
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Finds a counterpart for pattern neighbor `cur` among the neighbors of `target_node`.
    fn match_neighbor(
        &self,
        target_node: &GraphNode,
        cur: NodeId,
        direction: Direction,
        state: &mut SearchState,
    ) -> Result<bool, MatchError> {
        if state.pattern_path.contains(&cur) {
            // Already matched further up: the recorded counterpart must be adjacent here too.
            let Some(mapped) = state.path_map.get(&cur) else {
                return Ok(false);
            };
            return Ok(direction.neighbors(target_node).contains(mapped));
        }
        for &tar in direction.neighbors(target_node) {
            // Matched target nodes stay on the path, so each one is used at most once.
            if state.graph_path.contains(&tar) {
                continue;
            }
            if self.find_match(tar, cur, state)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Assigns every constrained pattern arg from position `i` on to a distinct target arg slot,
    /// then runs `on_complete`. A rejected completion moves on to the next assignment, so a
    /// binding that blocks a neighbor further down is never kept.
    fn match_args(
        &self,
        pattern_args: &[ArgId],
        target_args: &[ArgId],
        i: usize,
        visited: &mut [bool],
        state: &mut SearchState,
        on_complete: &mut dyn FnMut(&mut SearchState) -> Result<bool, MatchError>,
    ) -> Result<bool, MatchError> {
        let Some(&pattern_arg) = pattern_args.get(i) else {
            let mark = state.mark();
            if on_complete(state)? {
                return Ok(true);
            }
            state.rollback(mark);
            return Ok(false);
        };
        let name = self.pattern.graph().arg(pattern_arg).name();
        let Some(pattern_input) = self.pattern.pattern_input(name) else {
            return self.match_args(pattern_args, target_args, i + 1, visited, state, on_complete);
        };
        let comparator = self.pattern.arg_comparator_for(name);
        log::trace!("Looking for a match for arg {name}");

        for (slot, &target_arg) in target_args.iter().enumerate() {
            if visited[slot] || !state.can_bind(pattern_arg, target_arg) {
                continue;
            }
            let arg_info = self.target.arg(target_arg);
            if !comparator.matches(self.target, arg_info, self.pattern, pattern_input) {
                continue;
            }
            let mark = state.mark();
            visited[slot] = true;
            state.bind_arg(pattern_arg, target_arg);
            if self.match_args(pattern_args, target_args, i + 1, visited, state, on_complete)? {
                return Ok(true);
            }
            visited[slot] = false;
            state.rollback(mark);
        }
        Ok(false)
    }
}
