//! Construction functions for operators that expand into more than one node.

use std::str::FromStr;

use graphconv_ir::{AttributeValue, Attributes, ElementType, NodeDraft, OpKind, TensorData};
use half::f16;
use protobuf::Enum;

use super::MapContext;
use crate::frontend::{onnx, paddle};
use crate::protos::paddle::var_type::Type as VarTypeCode;
use crate::{ConversionError, ForeignNode, Framework, Stage};

/// Decodes an element type attribute using the framework's type codes.
pub fn decode_dtype(framework: Framework, value: &AttributeValue) -> Option<ElementType> {
    match value {
        AttributeValue::ElementType(elem_type) => Some(*elem_type),
        AttributeValue::String(name) => ElementType::from_str(name).ok(),
        AttributeValue::Int64(code) => {
            let code = i32::try_from(*code).ok()?;
            match framework {
                Framework::Onnx => onnx::element_type_from_proto(code).ok().flatten(),
                Framework::Paddle => {
                    VarTypeCode::from_i32(code).and_then(paddle::element_type_from_code)
                }
            }
        }
        _ => None,
    }
}

/// Value carried by an ONNX `Constant` node.
pub fn onnx_constant_value(node: &ForeignNode) -> Result<TensorData, String> {
    let (name, value) = match node.attrs.iter().next() {
        Some(entry) if node.attrs.len() == 1 => entry,
        _ => return Err("constant must carry exactly one value attribute".to_string()),
    };

    let data = match (name.as_str(), value) {
        ("value", AttributeValue::Tensor(data)) => data.clone(),
        ("value_float", AttributeValue::Float32(v)) => TensorData::new(vec![*v], vec![]),
        ("value_floats", AttributeValue::Float32s(v)) => TensorData::new(v.clone(), vec![v.len()]),
        ("value_int", AttributeValue::Int64(v)) => TensorData::new(vec![*v], vec![]),
        ("value_ints", AttributeValue::Int64s(v)) => TensorData::new(v.clone(), vec![v.len()]),
        _ => return Err(format!("unsupported constant attribute `{name}`")),
    };
    Ok(data)
}

pub fn onnx_constant(ctx: &mut MapContext<'_>, node: &ForeignNode) -> Result<(), ConversionError> {
    let data = onnx_constant_value(node)
        .map_err(|reason| ConversionError::malformed(Stage::Map, &node.name, reason))?;
    if let Some(output) = node.outputs.first() {
        ctx.record_value(output, data.clone());
    }
    ctx.emit_node(
        node,
        OpKind::Constant,
        Vec::new(),
        Attributes::from([("value".to_string(), AttributeValue::Tensor(data))]),
    )
}

/// `Cast` becomes `Convert` to the inferred output element type.
pub fn cast(ctx: &mut MapContext<'_>, node: &ForeignNode) -> Result<(), ConversionError> {
    let x = ctx.required_input(node, 0)?;
    let destination = ctx.output_type(node, 0).elem_type;
    ctx.emit_node(
        node,
        OpKind::Convert,
        vec![x],
        Attributes::from([(
            "destination_type".to_string(),
            AttributeValue::ElementType(destination),
        )]),
    )
}

pub fn onnx_leaky_relu(ctx: &mut MapContext<'_>, node: &ForeignNode) -> Result<(), ConversionError> {
    leaky_relu(ctx, node, 0.01)
}

pub fn paddle_leaky_relu(ctx: &mut MapContext<'_>, node: &ForeignNode) -> Result<(), ConversionError> {
    leaky_relu(ctx, node, 0.02)
}

/// `LeakyRelu(x, alpha)` as `PRelu(x, slope)`.
///
/// The slope is stored as a one-element f16 constant and converted to the
/// working precision unless that already is f16.
fn leaky_relu(
    ctx: &mut MapContext<'_>,
    node: &ForeignNode,
    default_alpha: f32,
) -> Result<(), ConversionError> {
    let alpha = match node.attrs.get("alpha") {
        None => default_alpha,
        Some(value) => value.as_f32().ok_or_else(|| {
            ConversionError::malformed(Stage::Map, &node.name, "`alpha` must be numeric")
        })?,
    };

    let x = ctx.required_input(node, 0)?;
    let working = ctx.ty(&x).elem_type;

    let base = format!("{}/slope", node.name);
    let mut slope = ctx.constant(&base, TensorData::new(vec![f16::from_f32(alpha)], vec![1]));
    if working != ElementType::Float16 {
        slope = ctx.convert(&base, &slope, working);
    }

    ctx.emit_node(node, OpKind::PRelu, vec![x, slope], Attributes::new())
}

/// `Clip` with bounds as optional inputs, falling back to attributes.
///
/// Bounds must be known at conversion time; a missing bound is unbounded.
pub fn onnx_clip(ctx: &mut MapContext<'_>, node: &ForeignNode) -> Result<(), ConversionError> {
    let x = ctx.required_input(node, 0)?;

    let mut attrs = Attributes::new();
    for (idx, bound, unbounded) in [(1, "min", f64::NEG_INFINITY), (2, "max", f64::INFINITY)] {
        let value = match node.inputs.get(idx).filter(|name| !name.is_empty()) {
            Some(input) => ctx
                .value(input)
                .and_then(TensorData::scalar_f64)
                .ok_or_else(|| ConversionError::UnsupportedOperator {
                    op_type: format!("{} with a non-constant `{bound}`", node.op_type),
                    node: node.name.clone(),
                })?,
            None => node
                .attrs
                .get(bound)
                .and_then(AttributeValue::as_f32)
                .map(f64::from)
                .unwrap_or(unbounded),
        };
        attrs.insert(bound.to_string(), AttributeValue::Float64(value));
    }

    ctx.emit_node(node, OpKind::Clamp, vec![x], attrs)
}

/// `scale(x) = x * scale + bias`, or `(x + bias) * scale` when the bias comes first.
///
/// A `ScaleTensor` input replaces the `scale` attribute.
pub fn paddle_scale(ctx: &mut MapContext<'_>, node: &ForeignNode) -> Result<(), ConversionError> {
    let number = |attr: &str, default: f64| -> Result<f64, ConversionError> {
        match node.attrs.get(attr) {
            None => Ok(default),
            Some(value) => value.as_f32().map(f64::from).ok_or_else(|| {
                ConversionError::malformed(Stage::Map, &node.name, format!("`{attr}` must be numeric"))
            }),
        }
    };
    let scale = number("scale", 1.0)?;
    let bias = number("bias", 0.0)?;
    let bias_after_scale = node
        .attrs
        .get("bias_after_scale")
        .and_then(AttributeValue::as_bool)
        .unwrap_or(true);

    let x = ctx.required_input(node, 0)?;
    let ty = ctx.ty(&x);
    let scale = match ctx.input(node, 1) {
        Some(tensor) => tensor,
        None => ctx.constant(
            &format!("{}/scale", node.name),
            TensorData::scalar(ty.elem_type, scale),
        ),
    };
    let bias = ctx.constant(
        &format!("{}/bias", node.name),
        TensorData::scalar(ty.elem_type, bias),
    );

    let (first_op, first_operand, second_op, second_operand) = if bias_after_scale {
        (OpKind::Multiply, scale, OpKind::Add, bias)
    } else {
        (OpKind::Add, bias, OpKind::Multiply, scale)
    };

    let intermediate = ctx.fresh(&format!("{}/{}", node.name, first_op.to_string().to_lowercase()));
    ctx.emit(
        NodeDraft::new(intermediate.as_str(), first_op)
            .input(x)
            .input(first_operand)
            .output(intermediate.as_str(), ty),
    );
    ctx.emit_node(node, second_op, vec![intermediate, second_operand], Attributes::new())
}
