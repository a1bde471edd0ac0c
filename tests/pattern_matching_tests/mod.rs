use onnx_pattern_graph::graph::Graph;
use onnx_pattern_graph::pattern_graph::PatternMatchResult;
use std::collections::BTreeMap;
use std::io::Write;

pub mod comparators;

/// How the target graph reaches the matcher.
pub enum TargetSource {
    Builder,
    OnnxBytes,
    OnnxFile,
}

impl TargetSource {
    pub fn prepare(&self, graph: Graph) -> Graph {
        match self {
            TargetSource::Builder => graph,
            TargetSource::OnnxBytes => Graph::from_onnx_bytes(&graph.to_onnx_bytes()).unwrap(),
            TargetSource::OnnxFile => {
                let mut file = tempfile::NamedTempFile::new().unwrap();
                file.write_all(&graph.to_onnx_bytes()).unwrap();
                file.flush().unwrap();
                Graph::from_onnx_file(file.path()).unwrap()
            }
        }
    }
}

/// Pattern node name to matched target node name.
fn matched_names(result: &PatternMatchResult, target: &Graph) -> BTreeMap<String, String> {
    result
        .node_groups()
        .iter()
        .map(|(name, group)| {
            (
                name.clone(),
                target.node(group.matched_node).name().to_string(),
            )
        })
        .collect()
}

fn expected_names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}
