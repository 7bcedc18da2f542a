//! PaddlePaddle reader.
//!
//! Serialized programs, static programs, dynamic layers and high-level models
//! all end up as a [`Program`] before they become a foreign graph, so the
//! same logical computation reads the same way from each of them.

mod hapi;
mod layer;
mod program;

pub use hapi::*;
pub use layer::*;
pub use program::*;

use derive_new::new;
use graphconv_ir::{Diagnostic, DiagnosticKind, ElementType, Shape};
use protobuf::Message;

use crate::protos::paddle::{ProgramDesc, var_type::Type as VarTypeCode};
use crate::{
    ConversionError, ConversionRequest, DeclaredTensor, ExampleInput, ForeignGraph, Framework,
    ModelSource, ShapeBinding, Stage,
};

use super::FrontEnd;

/// Shape and element type of one traced input. Negative dimensions are dynamic.
#[derive(Debug, Clone, PartialEq, new)]
pub struct InputSpec {
    pub shape: Vec<i64>,
    pub dtype: ElementType,
    #[new(value = "None")]
    pub name: Option<String>,
}

impl InputSpec {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Paddle variable type code of an element type.
pub fn dtype_code(elem_type: ElementType) -> Option<VarTypeCode> {
    let code = match elem_type {
        ElementType::Bool => VarTypeCode::BOOL,
        ElementType::Int16 => VarTypeCode::INT16,
        ElementType::Int32 => VarTypeCode::INT32,
        ElementType::Int64 => VarTypeCode::INT64,
        ElementType::Float16 => VarTypeCode::FP16,
        ElementType::Float32 => VarTypeCode::FP32,
        ElementType::Float64 => VarTypeCode::FP64,
        ElementType::Uint8 => VarTypeCode::UINT8,
        ElementType::Int8 => VarTypeCode::INT8,
        ElementType::BFloat16 => VarTypeCode::BF16,
        ElementType::Uint16 | ElementType::Uint32 | ElementType::Uint64 => return None,
    };
    Some(code)
}

/// Element type of a Paddle variable type code, for tensor element codes only.
pub fn element_type_from_code(code: VarTypeCode) -> Option<ElementType> {
    let elem_type = match code {
        VarTypeCode::BOOL => ElementType::Bool,
        VarTypeCode::INT16 => ElementType::Int16,
        VarTypeCode::INT32 => ElementType::Int32,
        VarTypeCode::INT64 => ElementType::Int64,
        VarTypeCode::FP16 => ElementType::Float16,
        VarTypeCode::FP32 => ElementType::Float32,
        VarTypeCode::FP64 => ElementType::Float64,
        VarTypeCode::UINT8 => ElementType::Uint8,
        VarTypeCode::INT8 => ElementType::Int8,
        VarTypeCode::BF16 => ElementType::BFloat16,
        _ => return None,
    };
    Some(elem_type)
}

/// Reads Paddle programs in every supported representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaddleFrontEnd;

impl FrontEnd for PaddleFrontEnd {
    fn framework(&self) -> Framework {
        Framework::Paddle
    }

    fn can_read(&self, source: &ModelSource) -> bool {
        match source {
            ModelSource::Bytes(bytes) => ProgramDesc::parse_from_bytes(bytes)
                .is_ok_and(|desc| desc.blocks.first().is_some_and(|block| !block.ops.is_empty())),
            ModelSource::PaddleProgram(_) | ModelSource::PaddleLayer(_) | ModelSource::PaddleHapi(_) => {
                true
            }
            ModelSource::Path(_) => false,
        }
    }

    fn read(&self, request: &ConversionRequest) -> Result<ForeignGraph, ConversionError> {
        let examples = &request.example_inputs;

        let foreign = match &request.source {
            ModelSource::Bytes(bytes) => {
                let program = Program::from_bytes(bytes)?;
                let mut foreign = program.to_foreign()?;
                select_inputs(&mut foreign, examples)?;
                foreign
            }
            ModelSource::PaddleProgram(program) => {
                let mut foreign = program.to_foreign()?;
                select_inputs(&mut foreign, examples)?;
                foreign
            }
            ModelSource::PaddleLayer(layer) => {
                if examples.is_empty() {
                    return Err(ConversionError::invalid_request(
                        Stage::Read,
                        "tracing a dynamic layer needs at least one example input",
                    ));
                }
                let specs: Vec<InputSpec> = examples.iter().map(ExampleInput::to_spec).collect();
                trace(layer.as_ref(), &specs, "layer")?.to_foreign()?
            }
            ModelSource::PaddleHapi(model) => {
                let mut foreign = model.to_program()?.to_foreign()?;
                for (idx, example) in examples.iter().enumerate() {
                    let tensor = example
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("#{idx}"));
                    log::warn!("Ignoring example input {tensor}: the model declares its inputs");
                    foreign
                        .diagnostics
                        .push(Diagnostic::new(tensor, DiagnosticKind::IgnoredExampleInput));
                }
                foreign
            }
            ModelSource::Path(_) => {
                return Err(ConversionError::UnsupportedFormat(
                    "paths must be loaded before reading".to_string(),
                ));
            }
        };

        log::debug!(
            "Read Paddle graph {} ({} ops, {} inputs, {} outputs)",
            foreign.name,
            foreign.nodes.len(),
            foreign.inputs.len(),
            foreign.outputs.len()
        );
        Ok(foreign)
    }
}

/// Picks and orders the static program inputs named by the example inputs.
///
/// Unnamed examples match the declared inputs by position. Declared inputs no
/// example selects are dropped unless a node consumes them. Rank-fixed inputs
/// must keep their rank.
fn select_inputs(
    foreign: &mut ForeignGraph,
    examples: &[ExampleInput],
) -> Result<(), ConversionError> {
    if examples.is_empty() {
        return Ok(());
    }
    if examples.len() > foreign.inputs.len() {
        return Err(ConversionError::invalid_request(
            Stage::Read,
            format!(
                "{} example inputs given for {} program inputs",
                examples.len(),
                foreign.inputs.len()
            ),
        ));
    }

    let named = examples.iter().filter(|e| e.name().is_some()).count();
    if named != 0 && named != examples.len() {
        return Err(ConversionError::invalid_request(
            Stage::Read,
            "example inputs must be either all named or all positional",
        ));
    }

    let mut selected: Vec<DeclaredTensor> = Vec::with_capacity(examples.len());
    for (idx, example) in examples.iter().enumerate() {
        let declared = match example.name() {
            Some(name) => foreign.input(name).cloned().ok_or_else(|| {
                ConversionError::invalid_request(
                    Stage::Read,
                    format!("example input `{name}` is not a program input"),
                )
            })?,
            None => foreign.inputs[idx].clone(),
        };
        if selected.iter().any(|input| input.name == declared.name) {
            return Err(ConversionError::invalid_request(
                Stage::Read,
                format!("input `{}` has more than one example input", declared.name),
            ));
        }

        let requested = Shape::from_signed(&example.to_spec().shape);
        if declared.binding == ShapeBinding::RankFixed
            && let Some(shape) = &declared.shape
            && shape.rank() != requested.rank()
        {
            return Err(ConversionError::ShapeConflict {
                input: declared.name.clone(),
                declared: shape.clone(),
                requested,
            });
        }
        selected.push(declared);
    }

    for dropped in &foreign.inputs {
        if selected.iter().any(|input| input.name == dropped.name) {
            continue;
        }
        let consumed = foreign
            .nodes
            .iter()
            .any(|node| node.present_inputs().any(|(_, input)| input == dropped.name));
        if consumed {
            return Err(ConversionError::invalid_request(
                Stage::Read,
                format!("input `{}` is consumed but has no example input", dropped.name),
            ));
        }
        log::debug!("Dropping program input {} without an example", dropped.name);
    }

    foreign.inputs = selected;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_codes_round_trip() {
        for elem_type in [
            ElementType::Bool,
            ElementType::Float16,
            ElementType::Float32,
            ElementType::Int64,
            ElementType::BFloat16,
        ] {
            let code = dtype_code(elem_type).unwrap();
            assert_eq!(element_type_from_code(code), Some(elem_type));
        }
        assert_eq!(dtype_code(ElementType::Uint32), None);
        assert_eq!(element_type_from_code(VarTypeCode::LOD_TENSOR), None);
    }

    fn relu_program() -> Program {
        let mut program = Program::new("relu");
        let x = program.data("x", &[1, 2], ElementType::Float32);
        let y = program.unary("relu", &x, Default::default());
        program.fetch(&y, 0);
        program
    }

    #[test]
    fn example_input_with_other_rank_conflicts() {
        let mut foreign = relu_program().to_foreign().unwrap();
        let examples = [ExampleInput::Spec(InputSpec::new(
            vec![2, 3, 4],
            ElementType::Float32,
        ))];

        assert!(matches!(
            select_inputs(&mut foreign, &examples),
            Err(ConversionError::ShapeConflict { input, .. }) if input == "x"
        ));
    }

    #[test]
    fn more_examples_than_inputs_are_rejected() {
        let mut foreign = relu_program().to_foreign().unwrap();
        let spec = InputSpec::new(vec![1, 2], ElementType::Float32);
        let examples = [ExampleInput::Spec(spec.clone()), ExampleInput::Spec(spec)];

        assert!(matches!(
            select_inputs(&mut foreign, &examples),
            Err(ConversionError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn named_example_input_must_exist() {
        let mut foreign = relu_program().to_foreign().unwrap();
        let examples = [ExampleInput::Spec(
            InputSpec::new(vec![1, 2], ElementType::Float32).named("y"),
        )];

        assert!(matches!(
            select_inputs(&mut foreign, &examples),
            Err(ConversionError::InvalidRequest { .. })
        ));
    }

    fn add_program() -> Program {
        let mut program = Program::new("add");
        let x = program.data("x", &[2], ElementType::Float32);
        let y = program.data("y", &[2], ElementType::Float32);
        program.data("unused", &[3], ElementType::Float32);
        let sum = program.binary("elementwise_add", &x, &y, Default::default());
        program.fetch(&sum, 0);
        program
    }

    #[test]
    fn examples_select_and_order_inputs() {
        let mut foreign = add_program().to_foreign().unwrap();
        let spec = InputSpec::new(vec![2], ElementType::Float32);
        let examples = [
            ExampleInput::Spec(spec.clone().named("y")),
            ExampleInput::Spec(spec.named("x")),
        ];

        select_inputs(&mut foreign, &examples).unwrap();
        let names: Vec<&str> = foreign.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["y", "x"]);
    }

    #[test]
    fn consumed_input_without_example_is_rejected() {
        let mut foreign = add_program().to_foreign().unwrap();
        let examples = [ExampleInput::Spec(
            InputSpec::new(vec![2], ElementType::Float32).named("x"),
        )];

        assert!(matches!(
            select_inputs(&mut foreign, &examples),
            Err(ConversionError::InvalidRequest { ref reason, .. }) if reason.contains("`y`")
        ));
    }
}
