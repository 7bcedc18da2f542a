//! Type and shape inference over a foreign graph.

use std::collections::{HashMap, HashSet};

use graphconv_ir::{Diagnostic, DiagnosticKind, ElementType, Shape, TensorType};

use crate::mapper::{InferRule, decode_dtype, onnx_constant_value, select_rule};
use crate::{
    ConversionError, DeclaredTensor, ForeignGraph, ForeignNode, InputOverride, ShapeBinding, Stage,
};

/// Element type used when neither the source nor the caller provides one.
pub const DEFAULT_ELEMENT_TYPE: ElementType = ElementType::Float32;

/// A foreign graph with a type for every tensor it can type.
#[derive(Debug, Clone)]
pub struct AnnotatedGraph {
    pub graph: ForeignGraph,
    /// Types keyed by foreign tensor name.
    pub types: HashMap<String, TensorType>,
    /// Effective input specs in signature order.
    pub parameters: Vec<(String, TensorType)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnnotatedGraph {
    pub fn ty(&self, tensor: &str) -> Option<&TensorType> {
        self.types.get(tensor)
    }
}

fn unknown_type() -> TensorType {
    TensorType::new(DEFAULT_ELEMENT_TYPE, Shape::Unranked)
}

/// Applies `overrides` to the declared inputs and propagates types through every node.
pub fn infer(
    mut graph: ForeignGraph,
    overrides: &[InputOverride],
) -> Result<AnnotatedGraph, ConversionError> {
    let mut diagnostics = std::mem::take(&mut graph.diagnostics);
    let mut types: HashMap<String, TensorType> = HashMap::new();

    let resolved = resolve_overrides(&graph.inputs, overrides)?;
    let mut parameters = Vec::with_capacity(graph.inputs.len());
    for (declared, requested) in graph.inputs.iter().zip(resolved) {
        let ty = effective_type(declared, requested, &mut diagnostics)?;
        log::debug!("Input {} : {ty}", declared.name);
        types.insert(declared.name.clone(), ty.clone());
        parameters.push((declared.name.clone(), ty));
    }

    for (name, data) in &graph.constants {
        types.insert(name.clone(), data.tensor_type());
    }

    for idx in evaluation_order(&graph) {
        let node = &graph.nodes[idx];
        let Some(rule) = select_rule(graph.framework, node) else {
            // Reported by the mapper with the node name.
            log::debug!("No inference rule for {} ({})", node.name, node.op_type);
            continue;
        };

        let ty = infer_node(&graph, node, rule.infer, &types)?;
        log::debug!("Inferred {} ({}) : {ty}", node.name, node.op_type);
        for output in &node.outputs {
            types.insert(output.clone(), ty.clone());
        }
    }

    for declared in &graph.outputs {
        let (Some(ty), Some(shape)) = (types.get_mut(&declared.name), &declared.shape) else {
            continue;
        };
        ty.shape = ty.shape.refine(shape);
    }

    Ok(AnnotatedGraph {
        graph,
        types,
        parameters,
        diagnostics,
    })
}

/// Matches overrides to declared inputs, by name or by position.
fn resolve_overrides<'a>(
    inputs: &[DeclaredTensor],
    overrides: &'a [InputOverride],
) -> Result<Vec<Option<&'a InputOverride>>, ConversionError> {
    let invalid = |reason: String| ConversionError::invalid_request(Stage::Infer, reason);
    let mut resolved = vec![None; inputs.len()];

    let named = overrides.iter().filter(|o| o.name.is_some()).count();
    if named != 0 && named != overrides.len() {
        return Err(invalid(
            "input overrides must be either all named or all positional".to_string(),
        ));
    }

    if named == 0 {
        if overrides.len() > inputs.len() {
            return Err(invalid(format!(
                "{} input overrides given for {} inputs",
                overrides.len(),
                inputs.len()
            )));
        }
        for (slot, input) in resolved.iter_mut().zip(overrides) {
            *slot = Some(input);
        }
        return Ok(resolved);
    }

    for input in overrides {
        let name = input.name.as_deref().unwrap_or_default();
        let idx = inputs
            .iter()
            .position(|declared| declared.name == name)
            .ok_or_else(|| invalid(format!("`{name}` is not an input of the model")))?;
        if resolved[idx].replace(input).is_some() {
            return Err(invalid(format!("input `{name}` is overridden twice")));
        }
    }
    Ok(resolved)
}

fn effective_type(
    declared: &DeclaredTensor,
    requested: Option<&InputOverride>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<TensorType, ConversionError> {
    let elem_type = match requested.and_then(|o| o.elem_type).or(declared.elem_type) {
        Some(elem_type) => elem_type,
        None => {
            log::warn!(
                "Element type of {} is unknown, using {DEFAULT_ELEMENT_TYPE}",
                declared.name
            );
            diagnostics.push(Diagnostic::new(
                declared.name.as_str(),
                DiagnosticKind::DefaultedElementType(DEFAULT_ELEMENT_TYPE),
            ));
            DEFAULT_ELEMENT_TYPE
        }
    };

    let shape = match (requested.and_then(|o| o.shape.as_ref()), &declared.shape) {
        (Some(requested), Some(fixed))
            if declared.binding == ShapeBinding::RankFixed
                && fixed.rank().is_some()
                && requested.rank() != fixed.rank() =>
        {
            return Err(ConversionError::ShapeConflict {
                input: declared.name.clone(),
                declared: fixed.clone(),
                requested: requested.clone(),
            });
        }
        (Some(requested), _) => requested.clone(),
        (None, Some(declared)) => declared.clone(),
        (None, None) => {
            diagnostics.push(Diagnostic::new(
                declared.name.as_str(),
                DiagnosticKind::UnknownShape,
            ));
            Shape::Unranked
        }
    };

    Ok(TensorType::new(elem_type, shape))
}

/// Node indices with every node after the producers of its inputs.
///
/// Nodes caught in a cycle keep their declaration order at the end; the graph
/// builder rejects them.
fn evaluation_order(graph: &ForeignGraph) -> Vec<usize> {
    let mut available: HashSet<&str> = graph
        .inputs
        .iter()
        .map(|input| input.name.as_str())
        .chain(graph.constants.keys().map(String::as_str))
        .collect();
    let mut done = vec![false; graph.nodes.len()];
    let mut order = Vec::with_capacity(graph.nodes.len());

    loop {
        let mut progress = false;
        for (idx, node) in graph.nodes.iter().enumerate() {
            if done[idx] || !node.present_inputs().all(|(_, input)| available.contains(input)) {
                continue;
            }
            done[idx] = true;
            progress = true;
            order.push(idx);
            available.extend(node.outputs.iter().map(String::as_str));
        }
        if !progress {
            break;
        }
    }

    order.extend((0..graph.nodes.len()).filter(|&idx| !done[idx]));
    order
}

fn infer_node(
    graph: &ForeignGraph,
    node: &ForeignNode,
    rule: InferRule,
    types: &HashMap<String, TensorType>,
) -> Result<TensorType, ConversionError> {
    let malformed = |reason: String| ConversionError::malformed(Stage::Infer, &node.name, reason);
    let input_type = |idx: usize| {
        node.inputs
            .get(idx)
            .filter(|name| !name.is_empty())
            .and_then(|name| types.get(name))
            .cloned()
            .unwrap_or_else(unknown_type)
    };

    let ty = match rule {
        InferRule::SameAsInput(idx) => input_type(idx),
        InferRule::Broadcast => {
            let first = input_type(0);
            let mut shape = first.shape.clone();
            for (idx, _) in node.present_inputs().skip(1) {
                let other = input_type(idx);
                shape = shape.broadcast(&other.shape).ok_or_else(|| {
                    malformed(format!("cannot broadcast {shape} with {}", other.shape))
                })?;
            }
            TensorType::new(first.elem_type, shape)
        }
        InferRule::Convert(attr) => {
            let elem_type = node
                .attrs
                .get(attr)
                .and_then(|value| decode_dtype(graph.framework, value))
                .ok_or_else(|| malformed(format!("missing or unsupported `{attr}` attribute")))?;
            TensorType::new(elem_type, input_type(0).shape)
        }
        InferRule::FromValue => onnx_constant_value(node).map_err(malformed)?.tensor_type(),
    };

    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Framework;
    use graphconv_ir::{AttributeValue, Attributes, Dim};

    fn chain(declared: DeclaredTensor) -> ForeignGraph {
        let mut graph = ForeignGraph::new(Framework::Onnx, "chain");
        graph.inputs.push(declared);
        graph.nodes.push(ForeignNode::new(
            "relu",
            "Relu",
            vec!["x".into()],
            vec!["r".into()],
        ));
        graph.outputs.push(DeclaredTensor::new("r", None, None));
        graph
    }

    fn f32_input(shape: impl Into<Shape>) -> DeclaredTensor {
        DeclaredTensor::new("x", Some(ElementType::Float32), Some(shape.into()))
    }

    #[test]
    fn override_shape_wins_over_declared() {
        let graph = chain(f32_input([1, 2]));
        let annotated = infer(graph, &[InputOverride::with_shape([2, 3, 4])]).unwrap();

        assert_eq!(
            annotated.parameters[0].1,
            TensorType::new(ElementType::Float32, [2, 3, 4])
        );
        assert_eq!(
            annotated.ty("r"),
            Some(&TensorType::new(ElementType::Float32, [2, 3, 4]))
        );
    }

    #[test]
    fn dtype_only_override_keeps_declared_shape() {
        let graph = chain(f32_input([2, 3]));
        let annotated = infer(
            graph,
            &[InputOverride::with_elem_type(ElementType::Int32).named("x")],
        )
        .unwrap();

        assert_eq!(
            annotated.parameters[0].1,
            TensorType::new(ElementType::Int32, [2, 3])
        );
    }

    #[test]
    fn rank_fixed_input_rejects_other_rank() {
        let graph = chain(f32_input([1, 2]).rank_fixed());
        let err = infer(graph, &[InputOverride::with_shape([2, 3, 4])]).unwrap_err();

        assert!(matches!(err, ConversionError::ShapeConflict { ref input, .. } if input == "x"));
        assert_eq!(err.stage(), Stage::Infer);
    }

    #[test]
    fn rank_fixed_input_accepts_same_rank() {
        let graph = chain(f32_input([1, 2]).rank_fixed());
        let annotated = infer(graph, &[InputOverride::with_shape([5, 6])]).unwrap();
        assert_eq!(annotated.parameters[0].1.shape, Shape::fixed([5, 6]));
    }

    #[test]
    fn unknown_dtype_defaults_to_f32_with_diagnostic() {
        let graph = chain(DeclaredTensor::new("x", None, Some(Shape::fixed([4]))));
        let annotated = infer(graph, &[]).unwrap();

        assert_eq!(
            annotated.ty("r").unwrap().elem_type,
            ElementType::Float32
        );
        assert_eq!(
            annotated.diagnostics,
            vec![Diagnostic::new(
                "x",
                DiagnosticKind::DefaultedElementType(ElementType::Float32)
            )]
        );
    }

    #[test]
    fn unknown_shape_is_unranked() {
        let graph = chain(DeclaredTensor::new("x", Some(ElementType::Float32), None));
        let annotated = infer(graph, &[]).unwrap();

        assert_eq!(annotated.ty("r").unwrap().shape, Shape::Unranked);
        assert_eq!(annotated.diagnostics[0].kind, DiagnosticKind::UnknownShape);
    }

    #[test]
    fn declared_output_refines_dynamic_dims() {
        let mut graph = chain(f32_input(Shape::Ranked(vec![Dim::Dynamic, Dim::Static(3)])));
        graph.outputs[0].shape = Some(Shape::fixed([8, 3]));

        let annotated = infer(graph, &[]).unwrap();
        assert_eq!(annotated.ty("r").unwrap().shape, Shape::fixed([8, 3]));
    }

    #[test]
    fn mixed_overrides_are_rejected() {
        let graph = chain(f32_input([2]));
        let err = infer(
            graph,
            &[
                InputOverride::with_shape([2]).named("x"),
                InputOverride::with_shape([2]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidRequest { .. }));
    }

    #[test]
    fn unknown_override_name_is_rejected() {
        let graph = chain(f32_input([2]));
        let err = infer(graph, &[InputOverride::with_shape([2]).named("y")]).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidRequest { .. }));
    }

    #[test]
    fn broadcast_and_cast() {
        let mut graph = ForeignGraph::new(Framework::Onnx, "bc");
        graph.inputs.push(DeclaredTensor::new(
            "a",
            Some(ElementType::Float32),
            Some(Shape::fixed([2, 1, 4])),
        ));
        graph.inputs.push(DeclaredTensor::new(
            "b",
            Some(ElementType::Float32),
            Some(Shape::fixed([3, 1])),
        ));
        // Declared out of order on purpose.
        graph.nodes.push(
            ForeignNode::new("cast", "Cast", vec!["s".into()], vec!["c".into()]).with_attrs(
                Attributes::from([("to".to_string(), AttributeValue::Int64(7))]),
            ),
        );
        graph.nodes.push(ForeignNode::new(
            "add",
            "Add",
            vec!["a".into(), "b".into()],
            vec!["s".into()],
        ));
        graph.outputs.push(DeclaredTensor::new("c", None, None));

        let annotated = infer(graph, &[]).unwrap();
        assert_eq!(
            annotated.ty("s"),
            Some(&TensorType::new(ElementType::Float32, [2, 3, 4]))
        );
        assert_eq!(
            annotated.ty("c"),
            Some(&TensorType::new(ElementType::Int64, [2, 3, 4]))
        );
    }

    #[test]
    fn incompatible_broadcast_is_malformed() {
        let mut graph = ForeignGraph::new(Framework::Onnx, "bad");
        for (name, dims) in [("a", [2, 3]), ("b", [4, 3])] {
            graph.inputs.push(DeclaredTensor::new(
                name,
                Some(ElementType::Float32),
                Some(Shape::fixed(dims)),
            ));
        }
        graph.nodes.push(ForeignNode::new(
            "add",
            "Add",
            vec!["a".into(), "b".into()],
            vec!["s".into()],
        ));

        let err = infer(graph, &[]).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::MalformedModel { stage: Stage::Infer, ref location, .. } if location == "add"
        ));
    }
}
