use super::{
    ArgInfo, ArgKind, AttributeValue, Dimension, Graph, GraphBuilder, GraphError, normalize_domain,
};
use crate::dtype::{DType, DTypeError};
use crate::onnx;
use prost::Message;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

// Node-level metadata_props first appear in IR version 10.
const ONNX_IR_VERSION: i64 = 10;

/// Node metadata key holding a version that differs from the opset imported for its domain.
pub const SINCE_VERSION_KEY: &str = "since_version";

#[derive(Debug, thiserror::Error)]
pub enum ONNXDecodingError {
    #[error("Protobuf decoding error")]
    ProtobufDecodeError(#[from] anyhow::Error),
    #[error("Missing field \"{0}\"")]
    MissingField(&'static str),
    #[error(transparent)]
    DTypeError(#[from] DTypeError),
    #[error("Negative dimension in \"{0}\"")]
    NegativeDimensionError(String),
    #[error("Invalid model with missing inputs: {}", .0.join(","))]
    MissingInputs(Vec<String>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    GraphError(#[from] GraphError),
}

type ValueInfo = (Option<DType>, Option<Vec<Dimension>>);

fn parse_value_info(value_info: &onnx::ValueInfoProto) -> Result<ValueInfo, ONNXDecodingError> {
    let Some(onnx::type_proto::Value::TensorType(tensor_type)) = value_info
        .r#type
        .as_ref()
        .and_then(|x| x.value.as_ref())
    else {
        return Ok((None, None));
    };

    let dtype = if tensor_type.elem_type == 0 {
        None
    } else {
        Some(DType::from_onnx_code(tensor_type.elem_type)?)
    };

    let shape = match &tensor_type.shape {
        Some(shape) => {
            let mut dimensions = vec![];
            for dim in &shape.dim {
                dimensions.push(match &dim.value {
                    Some(onnx::tensor_shape_proto::dimension::Value::DimValue(x)) => {
                        if *x < 0 {
                            return Err(ONNXDecodingError::NegativeDimensionError(
                                value_info.name.clone(),
                            ));
                        }
                        Dimension::Known(*x as usize)
                    }
                    Some(onnx::tensor_shape_proto::dimension::Value::DimParam(x)) => {
                        Dimension::Symbolic(x.clone())
                    }
                    None => Dimension::Symbolic(String::new()),
                });
            }
            Some(dimensions)
        }
        None => None,
    };

    Ok((dtype, shape))
}

fn parse_attribute(attr: &onnx::AttributeProto) -> Option<AttributeValue> {
    use onnx::attribute_proto::AttributeType;
    let attribute_type = AttributeType::try_from(attr.r#type).ok()?;
    Some(match attribute_type {
        AttributeType::Float => AttributeValue::Float(attr.f),
        AttributeType::Int => AttributeValue::Int(attr.i),
        AttributeType::String => {
            AttributeValue::String(String::from_utf8_lossy(&attr.s).into_owned())
        }
        AttributeType::Floats => AttributeValue::Floats(attr.floats.clone()),
        AttributeType::Ints => AttributeValue::Ints(attr.ints.clone()),
        AttributeType::Strings => AttributeValue::Strings(
            attr.strings
                .iter()
                .map(|x| String::from_utf8_lossy(x).into_owned())
                .collect(),
        ),
        _ => return None,
    })
}

fn attribute_to_proto(name: &str, value: &AttributeValue) -> onnx::AttributeProto {
    use onnx::attribute_proto::AttributeType;
    let mut proto = onnx::AttributeProto {
        name: name.to_string(),
        ..Default::default()
    };
    let attribute_type = match value {
        AttributeValue::Int(x) => {
            proto.i = *x;
            AttributeType::Int
        }
        AttributeValue::Float(x) => {
            proto.f = *x;
            AttributeType::Float
        }
        AttributeValue::String(x) => {
            proto.s = x.as_bytes().to_vec();
            AttributeType::String
        }
        AttributeValue::Ints(x) => {
            proto.ints = x.clone();
            AttributeType::Ints
        }
        AttributeValue::Floats(x) => {
            proto.floats = x.clone();
            AttributeType::Floats
        }
        AttributeValue::Strings(x) => {
            proto.strings = x.iter().map(|s| s.as_bytes().to_vec()).collect();
            AttributeType::Strings
        }
    };
    proto.r#type = attribute_type as i32;
    proto
}

fn value_info_to_proto(arg: &ArgInfo) -> onnx::ValueInfoProto {
    let r#type = if arg.dtype.is_none() && arg.shape.is_none() {
        None
    } else {
        let shape = arg.shape.as_ref().map(|shape| onnx::TensorShapeProto {
            dim: shape
                .iter()
                .map(|d| onnx::tensor_shape_proto::Dimension {
                    value: Some(match d {
                        Dimension::Known(x) => {
                            onnx::tensor_shape_proto::dimension::Value::DimValue(*x as i64)
                        }
                        Dimension::Symbolic(x) => {
                            onnx::tensor_shape_proto::dimension::Value::DimParam(x.clone())
                        }
                    }),
                    ..Default::default()
                })
                .collect(),
        });
        Some(onnx::TypeProto {
            value: Some(onnx::type_proto::Value::TensorType(
                onnx::type_proto::Tensor {
                    elem_type: arg.dtype.map(|x| x.to_onnx_code()).unwrap_or(0),
                    shape,
                },
            )),
            ..Default::default()
        })
    };
    onnx::ValueInfoProto {
        name: arg.name.clone(),
        r#type,
        ..Default::default()
    }
}

impl Graph {
    pub fn from_onnx_bytes(onnx_bytes: &[u8]) -> Result<Self, ONNXDecodingError> {
        let model = onnx::ModelProto::decode(onnx_bytes)
            .map_err(|x| ONNXDecodingError::ProtobufDecodeError(anyhow::Error::from(x)))?;
        Self::from_onnx_model_proto(model)
    }

    pub fn from_onnx_file(path: impl AsRef<Path>) -> Result<Self, ONNXDecodingError> {
        let onnx_bytes = std::fs::read(path)?;
        Self::from_onnx_bytes(&onnx_bytes)
    }

    /// Builds a graph from a decoded model. Each node's version is the opset imported for its
    /// domain unless its metadata carries [`SINCE_VERSION_KEY`]. Empty input/output names
    /// denote omitted optional values and are dropped.
    pub fn from_onnx_model_proto(model_proto: onnx::ModelProto) -> Result<Self, ONNXDecodingError> {
        let mut opset_versions = HashMap::new();
        for opset_proto in &model_proto.opset_import {
            opset_versions.insert(
                normalize_domain(&opset_proto.domain).to_string(),
                opset_proto.version,
            );
        }

        let onnx_graph = model_proto
            .graph
            .ok_or(ONNXDecodingError::MissingField("graph"))?;

        let mut known_values: HashSet<&str> = HashSet::new();
        for t in &onnx_graph.input {
            known_values.insert(&t.name);
        }
        for t in &onnx_graph.initializer {
            known_values.insert(&t.name);
        }
        for node in &onnx_graph.node {
            for output in &node.output {
                known_values.insert(output);
            }
        }
        let mut missing = BTreeSet::new();
        for node in &onnx_graph.node {
            for input in &node.input {
                if !input.is_empty() && !known_values.contains(input.as_str()) {
                    missing.insert(input.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Err(ONNXDecodingError::MissingInputs(missing.into_iter().collect()));
        }

        let mut builder = GraphBuilder::new(&onnx_graph.name);

        for t in &onnx_graph.input {
            let (dtype, shape) = parse_value_info(t)?;
            builder.add_input(&t.name, dtype, shape);
        }
        for t in &onnx_graph.initializer {
            let dtype = DType::from_onnx_code(t.data_type)?;
            let mut dims = vec![];
            for x in &t.dims {
                if *x < 0 {
                    return Err(ONNXDecodingError::NegativeDimensionError(t.name.clone()));
                }
                dims.push(*x as usize);
            }
            builder.add_initializer(&t.name, dtype, &dims);
        }
        for t in &onnx_graph.value_info {
            let (dtype, shape) = parse_value_info(t)?;
            builder.declare_arg(&t.name, dtype, shape);
        }

        for node in &onnx_graph.node {
            let node_id = builder.add_node(
                &node.name,
                &node.op_type,
                node.input.iter().filter(|x| !x.is_empty()),
                node.output.iter().filter(|x| !x.is_empty()),
            );
            let domain = normalize_domain(&node.domain);
            builder.set_domain(node_id, domain)?;
            let mut since_version = opset_versions.get(domain).copied().unwrap_or(0);
            for entry in &node.metadata_props {
                if entry.key != SINCE_VERSION_KEY {
                    continue;
                }
                match entry.value.parse() {
                    Ok(x) => since_version = x,
                    Err(_) => log::warn!(
                        "Ignoring unparsable {} \"{}\" on node \"{}\"",
                        SINCE_VERSION_KEY,
                        entry.value,
                        node.name
                    ),
                }
            }
            builder.set_since_version(node_id, since_version)?;
            for attr in &node.attribute {
                match parse_attribute(attr) {
                    Some(value) => builder.set_attribute(node_id, &attr.name, value)?,
                    None => log::debug!(
                        "Skipping unsupported attribute \"{}\" on node \"{}\"",
                        attr.name,
                        node.name
                    ),
                }
            }
        }

        for t in &onnx_graph.output {
            let (dtype, shape) = parse_value_info(t)?;
            builder.declare_arg(&t.name, dtype, shape);
            builder.mark_output(&t.name)?;
        }

        Ok(builder.build()?)
    }

    /// Exports the graph structure. Initializers carry type and dims but no data.
    ///
    /// Each domain imports the highest version among its nodes. Nodes below that version
    /// record their own under [`SINCE_VERSION_KEY`] so the import restores them.
    pub fn to_onnx_model_proto(&self) -> onnx::ModelProto {
        let mut opsets: BTreeMap<&str, i64> = BTreeMap::new();
        for node in &self.nodes {
            let version = opsets.entry(node.domain.as_str()).or_insert(0);
            *version = (*version).max(node.since_version);
        }

        let node = self
            .topological_order
            .iter()
            .map(|id| {
                let node = &self.nodes[id.0];
                let mut metadata_props = vec![];
                if opsets.get(node.domain.as_str()) != Some(&node.since_version) {
                    metadata_props.push(onnx::StringStringEntryProto {
                        key: SINCE_VERSION_KEY.to_string(),
                        value: node.since_version.to_string(),
                    });
                }
                onnx::NodeProto {
                    input: node.inputs.iter().map(|x| self.args[x.0].name.clone()).collect(),
                    output: node.outputs.iter().map(|x| self.args[x.0].name.clone()).collect(),
                    name: node.name.clone(),
                    op_type: node.op_type.clone(),
                    domain: node.domain.clone(),
                    attribute: node
                        .attributes
                        .iter()
                        .map(|(name, value)| attribute_to_proto(name, value))
                        .collect(),
                    metadata_props,
                    ..Default::default()
                }
            })
            .collect();

        let initializer = self
            .args
            .iter()
            .filter(|x| x.is_constant())
            .map(|x| onnx::TensorProto {
                dims: x
                    .shape
                    .iter()
                    .flatten()
                    .map(|d| match d {
                        Dimension::Known(v) => *v as i64,
                        Dimension::Symbolic(_) => 0,
                    })
                    .collect(),
                data_type: x.dtype.map(|d| d.to_onnx_code()).unwrap_or(0),
                name: x.name.clone(),
                ..Default::default()
            })
            .collect();

        let value_info = self
            .args
            .iter()
            .filter(|x| {
                x.kind == ArgKind::Intermediate
                    && !x.is_graph_output
                    && (x.dtype.is_some() || x.shape.is_some())
            })
            .map(value_info_to_proto)
            .collect();

        onnx::ModelProto {
            ir_version: ONNX_IR_VERSION,
            opset_import: opsets
                .into_iter()
                .map(|(domain, version)| onnx::OperatorSetIdProto {
                    domain: domain.to_string(),
                    version,
                })
                .collect(),
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph: Some(onnx::GraphProto {
                node,
                name: self.name.clone(),
                initializer,
                input: self.inputs.iter().map(|x| value_info_to_proto(&self.args[x.0])).collect(),
                output: self.outputs.iter().map(|x| value_info_to_proto(&self.args[x.0])).collect(),
                value_info,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn to_onnx_bytes(&self) -> Vec<u8> {
        self.to_onnx_model_proto().encode_to_vec()
    }
}
