use super::{TargetSource, expected_names, matched_names};
use onnx_pattern_graph::dtype::DType;
use onnx_pattern_graph::graph::{Graph, GraphBuilder};
use onnx_pattern_graph::pattern_graph::{
    DeclaredArgComparator, MatchError, PatternGraph, PatternInput, PatternNode,
    ProducerOpTypeComparator, node_fn,
};

pub fn test_matmul_add(source: &TargetSource) {
    let mut builder = GraphBuilder::new("matmul_add");
    builder.add_input("a", Some(DType::F32), None);
    builder.add_input("b", Some(DType::F32), None);
    builder.add_input("c", Some(DType::F32), None);
    builder.add_node("mm", "MatMul", ["a", "b"], ["t"]);
    builder.add_node("add", "Add", ["c", "t"], ["y"]);
    builder.mark_output("y").unwrap();
    let target = source.prepare(builder.build().unwrap());

    let mut pattern = PatternGraph::new(
        vec![],
        vec![PatternNode::new("P", "Add").inputs(["x"]).outputs(["out"])],
    )
    .unwrap();
    pattern
        .add_custom_arg_comparator("x", ProducerOpTypeComparator::new(["MatMul"]))
        .unwrap();

    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(result.node("P", &target).unwrap().op_type(), "Add");
    assert_eq!(result.input("x", &target).unwrap().name(), "t");
    assert_eq!(
        result.get_input_by_name("x").unwrap(),
        target.arg_by_name("t").unwrap().id()
    );
}

pub fn test_op_type_soundness(source: &TargetSource) {
    let mut builder = GraphBuilder::new("soundness");
    builder.add_input("x", Some(DType::F32), None);
    builder.add_node("r1", "Relu", ["x"], ["a"]);
    builder.add_node("s", "Sigmoid", ["a"], ["b"]);
    builder.add_node("r2", "Relu", ["x"], ["c"]);
    builder.add_node("n", "Neg", ["c"], ["d"]);
    builder.mark_output("b").unwrap();
    builder.mark_output("d").unwrap();
    let target = source.prepare(builder.build().unwrap());

    let pattern = PatternGraph::new(
        vec![],
        vec![
            PatternNode::new("relu", "Relu").inputs(["in"]).outputs(["t"]),
            PatternNode::new("neg", "Neg").inputs(["t"]).outputs(["out"]),
        ],
    )
    .unwrap();

    let result = pattern.try_match(&target, None).unwrap();
    for group in result.node_groups().values() {
        assert_eq!(
            target.node(group.matched_node).op_type(),
            pattern.graph().node(group.pattern_node).op_type()
        );
    }
    assert_eq!(
        matched_names(&result, &target),
        expected_names(&[("neg", "n"), ("relu", "r2")])
    );
}

fn concat_target(order: &[(&str, DType)]) -> Graph {
    let mut builder = GraphBuilder::new("concat");
    for (name, dtype) in order {
        builder.add_input(name, Some(*dtype), None);
    }
    builder.add_node("cat", "Concat", order.iter().map(|(name, _)| *name), ["y"]);
    builder.mark_output("y").unwrap();
    builder.build().unwrap()
}

fn typed_concat_pattern(inputs: Vec<PatternInput>) -> PatternGraph {
    let names: Vec<String> = inputs.iter().map(|x| x.name().to_string()).collect();
    let mut pattern = PatternGraph::new(
        inputs,
        vec![PatternNode::new("cat", "Concat").inputs(names).outputs(["out"])],
    )
    .unwrap();
    pattern.set_default_arg_comparator(DeclaredArgComparator);
    pattern
}

pub fn test_arg_bijection(source: &TargetSource) {
    let pattern = typed_concat_pattern(vec![
        PatternInput::new("p_int").dtypes([DType::I64]),
        PatternInput::new("p_half").dtypes([DType::F16]),
        PatternInput::new("p_bool").dtypes([DType::BOOL]),
    ]);
    let orders = [
        [("b", DType::BOOL), ("h", DType::F16), ("i", DType::I64)],
        [("h", DType::F16), ("i", DType::I64), ("b", DType::BOOL)],
        [("i", DType::I64), ("b", DType::BOOL), ("h", DType::F16)],
    ];
    for order in orders {
        let target = source.prepare(concat_target(&order));
        let result = pattern.try_match(&target, None).unwrap();
        assert_eq!(result.input("p_int", &target).unwrap().name(), "i");
        assert_eq!(result.input("p_half", &target).unwrap().name(), "h");
        assert_eq!(result.input("p_bool", &target).unwrap().name(), "b");
    }

    let target = source.prepare(concat_target(&[
        ("h", DType::F16),
        ("h2", DType::F16),
        ("i", DType::I64),
    ]));
    assert_eq!(
        pattern.try_match(&target, None),
        Err(MatchError::NoMatchFound)
    );
}

pub fn test_arg_backtracking(source: &TargetSource) {
    // The first candidate for "wide" is the only one "narrow" accepts.
    let pattern = typed_concat_pattern(vec![
        PatternInput::new("wide").dtypes([DType::F16, DType::I64]),
        PatternInput::new("narrow").dtypes([DType::F16]),
    ]);
    let target = source.prepare(concat_target(&[("h", DType::F16), ("i", DType::I64)]));
    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(result.input("wide", &target).unwrap().name(), "i");
    assert_eq!(result.input("narrow", &target).unwrap().name(), "h");
}

fn shared_input_target(mul_input: &str) -> Graph {
    let mut builder = GraphBuilder::new("shared");
    builder.add_input("x", Some(DType::F32), None);
    builder.add_input("z", Some(DType::F32), None);
    builder.add_node("n", "Neg", ["x"], ["a"]);
    builder.add_node("m", "Mul", ["a", mul_input], ["b"]);
    builder.mark_output("b").unwrap();
    builder.build().unwrap()
}

pub fn test_shared_input_binds_consistently(source: &TargetSource) {
    let pattern = PatternGraph::new(
        vec![PatternInput::new("x")],
        vec![
            PatternNode::new("neg", "Neg").inputs(["x"]).outputs(["a"]),
            PatternNode::new("mul", "Mul").inputs(["a", "x"]).outputs(["b"]),
        ],
    )
    .unwrap();

    let target = source.prepare(shared_input_target("x"));
    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(result.input("x", &target).unwrap().name(), "x");
    assert_eq!(result.len(), 2);

    let target = source.prepare(shared_input_target("z"));
    assert_eq!(
        pattern.try_match(&target, None),
        Err(MatchError::NoMatchFound)
    );
}

pub fn test_arg_binding_is_revisited(source: &TargetSource) {
    // Binding x to the first Add input leaves the Mul without a counterpart for x.
    let mut builder = GraphBuilder::new("rebind");
    builder.add_input("a", Some(DType::F32), None);
    builder.add_input("b", Some(DType::F32), None);
    builder.add_node("add", "Add", ["a", "b"], ["s"]);
    builder.add_node("mul", "Mul", ["b", "s"], ["y"]);
    builder.mark_output("y").unwrap();
    let target = source.prepare(builder.build().unwrap());

    let pattern = PatternGraph::new(
        vec![PatternInput::new("x"), PatternInput::new("w")],
        vec![
            PatternNode::new("P", "Add").inputs(["x", "w"]).outputs(["o"]),
            PatternNode::new("Q", "Mul").inputs(["x", "o"]).outputs(["out"]),
        ],
    )
    .unwrap();

    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(
        matched_names(&result, &target),
        expected_names(&[("P", "add"), ("Q", "mul")])
    );
    assert_eq!(result.input("x", &target).unwrap().name(), "b");
    assert_eq!(result.input("w", &target).unwrap().name(), "a");

    let result = pattern.try_match(&target, Some("Q")).unwrap();
    assert_eq!(result.input("x", &target).unwrap().name(), "b");
    assert_eq!(result.input("w", &target).unwrap().name(), "a");
}

pub fn test_custom_node_comparator(source: &TargetSource) {
    let mut builder = GraphBuilder::new("gelu");
    builder.add_input("x", Some(DType::F32), None);
    builder.add_initializer("w", DType::F32, &[8, 8]);
    builder.add_node("mm", "MatMul", ["x", "w"], ["t"]);
    builder.add_node("act", "Gelu", ["t"], ["y"]);
    builder.mark_output("y").unwrap();
    let target = source.prepare(builder.build().unwrap());

    let nodes = vec![
        PatternNode::new("mm", "MatMul").inputs(["x", "w"]).outputs(["t"]),
        PatternNode::new("act", "Relu").inputs(["t"]).outputs(["y"]),
    ];
    let mut pattern = PatternGraph::new(vec![], nodes.clone()).unwrap();
    assert_eq!(
        pattern.try_match(&target, None),
        Err(MatchError::NoMatchFound)
    );

    pattern
        .add_custom_node_comparator(
            "act",
            node_fn(|_, node, _, _| matches!(node.op_type(), "Relu" | "Gelu")),
        )
        .unwrap();
    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(result.node("act", &target).unwrap().op_type(), "Gelu");

    let mut nodes = nodes;
    nodes[1] = PatternNode::new("act", "Relu")
        .op_types(["Relu", "Gelu"])
        .inputs(["t"])
        .outputs(["y"]);
    let mut pattern = PatternGraph::new(
        vec![PatternInput::new("w").constant(true).rank(2)],
        nodes,
    )
    .unwrap();
    pattern.set_default_arg_comparator(DeclaredArgComparator);
    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(result.input("w", &target).unwrap().name(), "w");
    assert_eq!(result.node("mm", &target).unwrap().name(), "mm");
}

pub fn test_output_edge_constraint(source: &TargetSource) {
    let mut builder = GraphBuilder::new("fanout");
    builder.add_input("x", Some(DType::F32), None);
    builder.add_node("n1", "Neg", ["x"], ["t1"]);
    builder.add_node("r1", "Relu", ["t1"], ["u1"]);
    builder.add_node("s1", "Sigmoid", ["t1"], ["v1"]);
    builder.add_node("n2", "Neg", ["x"], ["t2"]);
    builder.add_node("r2", "Relu", ["t2"], ["u2"]);
    for output in ["u1", "v1", "u2"] {
        builder.mark_output(output).unwrap();
    }
    let target = source.prepare(builder.build().unwrap());

    let pattern = PatternGraph::new(
        vec![],
        vec![
            PatternNode::new("n", "Neg")
                .inputs(["x"])
                .outputs(["t"])
                .output_edges(1),
            PatternNode::new("r", "Relu").inputs(["t"]).outputs(["u"]),
        ],
    )
    .unwrap();
    let result = pattern.try_match(&target, None).unwrap();
    assert_eq!(
        matched_names(&result, &target),
        expected_names(&[("n", "n2"), ("r", "r2")])
    );

    let unconstrained = PatternGraph::new(
        vec![],
        vec![
            PatternNode::new("n", "Neg").inputs(["x"]).outputs(["t"]),
            PatternNode::new("r", "Relu").inputs(["t"]).outputs(["u"]),
        ],
    )
    .unwrap();
    let result = unconstrained.try_match(&target, None).unwrap();
    assert_eq!(result.node("n", &target).unwrap().name(), "n1");
}

pub fn test_domain_version_constraint(source: &TargetSource) {
    let mut builder = GraphBuilder::new("domains");
    builder.add_input("x", Some(DType::F16), None);
    let mm = builder.add_node("mm", "MatMul", ["x", "x"], ["t"]);
    builder.set_since_version(mm, 13).unwrap();
    let gelu = builder.add_node("gelu", "Gelu", ["t"], ["y"]);
    builder.set_domain(gelu, "com.microsoft").unwrap();
    builder.mark_output("y").unwrap();
    let target = source.prepare(builder.build().unwrap());

    let pattern = |versions: &[i64], gelu_domain: &str| {
        PatternGraph::new(
            vec![],
            vec![
                PatternNode::new("mm", "MatMul")
                    .inputs(["a", "b"])
                    .outputs(["t"])
                    .domain_versions("ai.onnx", versions.iter().copied()),
                PatternNode::new("gelu", "Gelu")
                    .inputs(["t"])
                    .outputs(["y"])
                    .domain_versions(gelu_domain, Vec::new()),
            ],
        )
        .unwrap()
    };

    assert!(pattern(&[13], "com.microsoft").try_match(&target, None).is_ok());
    assert!(pattern(&[9, 11, 13], "com.microsoft").try_match(&target, None).is_ok());
    assert_eq!(
        pattern(&[9, 11], "com.microsoft").try_match(&target, None),
        Err(MatchError::NoMatchFound)
    );
    assert_eq!(
        pattern(&[13], "").try_match(&target, None),
        Err(MatchError::NoMatchFound)
    );
}

pub fn test_mixed_versions_in_one_domain(source: &TargetSource) {
    let mut builder = GraphBuilder::new("mixed_versions");
    builder.add_input("a", Some(DType::F32), None);
    builder.add_input("b", Some(DType::F32), None);
    let mm = builder.add_node("mm", "MatMul", ["a", "b"], ["t"]);
    builder.set_since_version(mm, 13).unwrap();
    let add = builder.add_node("add", "Add", ["t", "b"], ["y"]);
    builder.set_since_version(add, 14).unwrap();
    builder.mark_output("y").unwrap();
    let target = source.prepare(builder.build().unwrap());
    assert_eq!(target.node_by_name("mm").unwrap().since_version(), 13);
    assert_eq!(target.node_by_name("add").unwrap().since_version(), 14);

    let pattern = |mm_version: i64| {
        PatternGraph::new(
            vec![],
            vec![
                PatternNode::new("mm", "MatMul")
                    .inputs(["x", "w"])
                    .outputs(["t"])
                    .domain_versions("", [mm_version]),
                PatternNode::new("add", "Add")
                    .inputs(["t", "w"])
                    .outputs(["y"])
                    .domain_versions("", [14]),
            ],
        )
        .unwrap()
    };

    let result = pattern(13).try_match(&target, None).unwrap();
    assert_eq!(
        matched_names(&result, &target),
        expected_names(&[("add", "add"), ("mm", "mm")])
    );
    assert_eq!(
        pattern(14).try_match(&target, None),
        Err(MatchError::NoMatchFound)
    );
}
