use std::str::from_utf8;

use graphconv_ir::{AttributeValue, Attributes, Dim, ElementType, Shape, TensorData};
use half::{bf16, f16};
use protobuf::Enum;

use crate::protos::onnx::{
    AttributeProto, TensorProto, ValueInfoProto, attribute_proto::AttributeType,
    tensor_proto::DataType as DT, tensor_shape_proto::dimension::Value,
};
use crate::{ConversionError, DeclaredTensor, Stage};

fn malformed(location: &str, reason: impl Into<String>) -> ConversionError {
    ConversionError::malformed(Stage::Read, location, reason)
}

/// Convert an ONNX data type code to an element type.
///
/// `UNDEFINED` (0) maps to `None`.
pub fn element_type_from_proto(dt_i32: i32) -> Result<Option<ElementType>, String> {
    let elem_type = match DT::from_i32(dt_i32).ok_or_else(|| format!("unknown dtype {dt_i32}"))? {
        DT::UNDEFINED => return Ok(None),
        DT::FLOAT => ElementType::Float32,
        DT::DOUBLE => ElementType::Float64,
        DT::FLOAT16 => ElementType::Float16,
        DT::BFLOAT16 => ElementType::BFloat16,
        DT::INT64 => ElementType::Int64,
        DT::INT32 => ElementType::Int32,
        DT::INT16 => ElementType::Int16,
        DT::INT8 => ElementType::Int8,
        DT::UINT64 => ElementType::Uint64,
        DT::UINT32 => ElementType::Uint32,
        DT::UINT16 => ElementType::Uint16,
        DT::UINT8 => ElementType::Uint8,
        DT::BOOL => ElementType::Bool,
        other => return Err(format!("unsupported dtype {other:?}")),
    };
    Ok(Some(elem_type))
}

/// Convert TensorProto to TensorData, decoding `raw_data` or the typed field.
impl TryFrom<&TensorProto> for TensorData {
    type Error = ConversionError;

    fn try_from(tensor: &TensorProto) -> Result<TensorData, Self::Error> {
        let location = tensor.name.as_str();
        let elem = element_type_from_proto(tensor.data_type)
            .map_err(|reason| malformed(location, reason))?
            .ok_or_else(|| malformed(location, "tensor has no data type"))?;

        if tensor.dims.iter().any(|&d| d < 0) {
            return Err(malformed(
                location,
                format!("invalid tensor shape (negative dims): {:?}", tensor.dims),
            ));
        }
        let shape: Vec<usize> = tensor.dims.iter().map(|&d| d as usize).collect();

        let data = if !tensor.raw_data.is_empty() {
            TensorData::from_le_bytes(elem, &tensor.raw_data, shape)
                .ok_or_else(|| malformed(location, "raw data length is not a multiple of the element size"))?
        } else {
            let int32 = &tensor.int32_data;
            match elem {
                ElementType::Float32 => TensorData::new(tensor.float_data.clone(), shape),
                ElementType::Float64 => TensorData::new(tensor.double_data.clone(), shape),
                ElementType::Int64 => TensorData::new(tensor.int64_data.clone(), shape),
                ElementType::Int32 => TensorData::new(int32.clone(), shape),
                ElementType::Int16 => {
                    TensorData::new(int32.iter().map(|&x| x as i16).collect::<Vec<_>>(), shape)
                }
                ElementType::Int8 => {
                    TensorData::new(int32.iter().map(|&x| x as i8).collect::<Vec<_>>(), shape)
                }
                ElementType::Uint16 => {
                    TensorData::new(int32.iter().map(|&x| x as u16).collect::<Vec<_>>(), shape)
                }
                ElementType::Uint8 => {
                    TensorData::new(int32.iter().map(|&x| x as u8).collect::<Vec<_>>(), shape)
                }
                ElementType::Bool => {
                    TensorData::new(int32.iter().map(|&x| x != 0).collect::<Vec<_>>(), shape)
                }
                // Half precision values travel as their bit patterns.
                ElementType::Float16 => TensorData::new(
                    int32
                        .iter()
                        .map(|&x| f16::from_bits(x as u16))
                        .collect::<Vec<_>>(),
                    shape,
                ),
                ElementType::BFloat16 => TensorData::new(
                    int32
                        .iter()
                        .map(|&x| bf16::from_bits(x as u16))
                        .collect::<Vec<_>>(),
                    shape,
                ),
                ElementType::Uint32 => TensorData::new(
                    tensor.uint64_data.iter().map(|&x| x as u32).collect::<Vec<_>>(),
                    shape,
                ),
                ElementType::Uint64 => TensorData::new(tensor.uint64_data.clone(), shape),
            }
        };

        let Some(count) = data.num_elements() else {
            return Err(malformed(
                location,
                format!("element count of shape {:?} overflows", data.shape()),
            ));
        };
        if count != data.values.len() {
            return Err(malformed(
                location,
                format!(
                    "shape {:?} holds {count} elements but {} values are stored",
                    data.shape(),
                    data.values.len()
                ),
            ));
        }

        Ok(data)
    }
}

fn to_string(bytes: &[u8], location: &str) -> Result<String, ConversionError> {
    from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| malformed(location, "string attribute is not valid UTF-8"))
}

/// Decode one attribute. Sub-graph and sparse encodings yield `None`.
pub fn convert_attribute(
    attr: &AttributeProto,
    node: &str,
) -> Result<Option<AttributeValue>, ConversionError> {
    let location = format!("{node}.{}", attr.name);
    let attr_type = attr
        .type_
        .enum_value()
        .map_err(|code| malformed(&location, format!("unknown attribute type {code}")))?;

    let value = match attr_type {
        AttributeType::FLOAT => AttributeValue::Float32(attr.f),
        AttributeType::INT => AttributeValue::Int64(attr.i),
        AttributeType::STRING => AttributeValue::String(to_string(&attr.s, &location)?),
        AttributeType::TENSOR => {
            let tensor = attr
                .t
                .as_ref()
                .ok_or_else(|| malformed(&location, "tensor attribute without a tensor"))?;
            AttributeValue::Tensor(TensorData::try_from(tensor)?)
        }
        AttributeType::FLOATS => AttributeValue::Float32s(attr.floats.clone()),
        AttributeType::INTS => AttributeValue::Int64s(attr.ints.clone()),
        AttributeType::STRINGS => AttributeValue::Strings(
            attr.strings
                .iter()
                .map(|s| to_string(s, &location))
                .collect::<Result<_, _>>()?,
        ),
        // Writers older than IR version 2 leave the type unset.
        AttributeType::UNDEFINED => {
            if let Some(tensor) = attr.t.as_ref() {
                AttributeValue::Tensor(TensorData::try_from(tensor)?)
            } else if !attr.floats.is_empty() {
                AttributeValue::Float32s(attr.floats.clone())
            } else if !attr.ints.is_empty() {
                AttributeValue::Int64s(attr.ints.clone())
            } else if !attr.s.is_empty() {
                AttributeValue::String(to_string(&attr.s, &location)?)
            } else if attr.f != 0.0 {
                AttributeValue::Float32(attr.f)
            } else {
                AttributeValue::Int64(attr.i)
            }
        }
        other => {
            log::debug!("Skipping attribute {location} of type {other:?}");
            return Ok(None);
        }
    };

    Ok(Some(value))
}

pub fn convert_attributes(attrs: &[AttributeProto], node: &str) -> Result<Attributes, ConversionError> {
    let mut result = Attributes::new();
    for attr in attrs {
        if let Some(value) = convert_attribute(attr, node)? {
            result.insert(attr.name.clone(), value);
        }
    }
    Ok(result)
}

/// Declared spec of a graph input or output.
///
/// Symbolic and missing dimensions become dynamic; a missing shape stays unknown.
pub fn declared_tensor(info: &ValueInfoProto) -> Result<DeclaredTensor, ConversionError> {
    let location = info.name.as_str();
    let Some(type_proto) = info.type_.as_ref() else {
        return Ok(DeclaredTensor::new(info.name.as_str(), None, None));
    };
    if !type_proto.has_tensor_type() {
        return Err(malformed(location, "only tensor values are supported"));
    }

    let tensor = type_proto.tensor_type();
    let elem_type =
        element_type_from_proto(tensor.elem_type).map_err(|reason| malformed(location, reason))?;

    let shape = tensor.shape.as_ref().map(|shape| {
        Shape::Ranked(
            shape
                .dim
                .iter()
                .map(|dim| match dim.value {
                    Some(Value::DimValue(value)) if value >= 0 => Dim::Static(value as usize),
                    _ => Dim::Dynamic,
                })
                .collect(),
        )
    });

    Ok(DeclaredTensor::new(info.name.as_str(), elem_type, shape))
}
