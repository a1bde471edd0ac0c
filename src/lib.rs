pub mod dtype;
pub mod graph;
pub mod onnx;
pub mod pattern_graph;

pub use dtype::DType;
pub use graph::{ArgId, Graph, GraphBuilder, GraphId, NodeId};
pub use pattern_graph::{
    MatchConfig, MatchError, PatternGraph, PatternInput, PatternMatchResult, PatternNode,
};
