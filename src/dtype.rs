use crate::onnx;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DTypeError {
    #[error("The onnx dtype {0:?} is not supported")]
    UnsupportedONNXDtype(onnx::tensor_proto::DataType),
    #[error("Unknown onnx dtype code {0}")]
    UnknownONNXDtypeCode(i32),
}

#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    Eq,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum DType {
    #[strum(serialize = "Float64")]
    F64,
    #[strum(serialize = "Float32")]
    F32,
    #[strum(serialize = "BFloat16")]
    BF16,
    #[strum(serialize = "Float16")]
    F16,
    #[strum(serialize = "UInt64")]
    U64,
    #[strum(serialize = "Int64")]
    I64,
    #[strum(serialize = "UInt32")]
    U32,
    #[strum(serialize = "Int32")]
    I32,
    #[strum(serialize = "UInt16")]
    U16,
    #[strum(serialize = "Int16")]
    I16,
    #[strum(serialize = "UInt8")]
    U8,
    #[strum(serialize = "Int8")]
    I8,
    #[strum(serialize = "Bool")]
    BOOL,
    #[strum(serialize = "String")]
    STRING,
}

impl DType {
    /// Decodes the raw `elem_type` / `data_type` integer found in ONNX protos.
    pub fn from_onnx_code(code: i32) -> Result<Self, DTypeError> {
        let data_type = onnx::tensor_proto::DataType::try_from(code)
            .map_err(|_| DTypeError::UnknownONNXDtypeCode(code))?;
        DType::try_from(data_type)
    }

    pub fn to_onnx_code(self) -> i32 {
        onnx::tensor_proto::DataType::from(self) as i32
    }
}

impl TryFrom<onnx::tensor_proto::DataType> for DType {
    type Error = DTypeError;
    fn try_from(onnx_dtype: onnx::tensor_proto::DataType) -> Result<Self, DTypeError> {
        use onnx::tensor_proto::DataType;
        Ok(match onnx_dtype {
            DataType::Double => DType::F64,
            DataType::Float => DType::F32,
            DataType::Bfloat16 => DType::BF16,
            DataType::Float16 => DType::F16,
            DataType::Int64 => DType::I64,
            DataType::Int32 => DType::I32,
            DataType::Uint64 => DType::U64,
            DataType::Uint32 => DType::U32,
            DataType::Uint16 => DType::U16,
            DataType::Int16 => DType::I16,
            DataType::Uint8 => DType::U8,
            DataType::Int8 => DType::I8,
            DataType::Bool => DType::BOOL,
            DataType::String => DType::STRING,
            _ => Err(DTypeError::UnsupportedONNXDtype(onnx_dtype))?,
        })
    }
}

impl From<DType> for onnx::tensor_proto::DataType {
    fn from(dtype: DType) -> Self {
        use onnx::tensor_proto::DataType;
        match dtype {
            DType::F64 => DataType::Double,
            DType::F32 => DataType::Float,
            DType::BF16 => DataType::Bfloat16,
            DType::F16 => DataType::Float16,
            DType::I64 => DataType::Int64,
            DType::I32 => DataType::Int32,
            DType::U64 => DataType::Uint64,
            DType::U32 => DataType::Uint32,
            DType::U16 => DataType::Uint16,
            DType::I16 => DataType::Int16,
            DType::U8 => DataType::Uint8,
            DType::I8 => DataType::Int8,
            DType::BOOL => DataType::Bool,
            DType::STRING => DataType::String,
        }
    }
}
