use core::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

use graphconv_ir::{Dim, ElementType, Shape, TensorData};

use crate::frontend::paddle::{HapiModel, InputSpec, Layer, Program};
use crate::{ConversionError, Stage};

/// The model to convert.
pub enum ModelSource {
    /// A serialized model (ONNX `ModelProto` or Paddle `ProgramDesc`).
    Bytes(Vec<u8>),
    /// A serialized model on disk, read once when the conversion starts.
    Path(PathBuf),
    /// A static-mode Paddle program.
    PaddleProgram(Program),
    /// A dynamic-mode Paddle layer, traced against the request's example inputs.
    PaddleLayer(Box<dyn Layer>),
    /// A high-level Paddle model carrying its own input specs.
    PaddleHapi(HapiModel),
}

impl ModelSource {
    /// Drains `reader` into an in-memory source.
    pub fn from_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(ModelSource::Bytes(bytes))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ModelSource::Bytes(_) => "bytes",
            ModelSource::Path(_) => "path",
            ModelSource::PaddleProgram(_) => "paddle program",
            ModelSource::PaddleLayer(_) => "paddle layer",
            ModelSource::PaddleHapi(_) => "paddle hapi model",
        }
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            ModelSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ModelSource::PaddleProgram(program) => {
                f.debug_tuple("PaddleProgram").field(&program.name()).finish()
            }
            ModelSource::PaddleLayer(_) => f.write_str("PaddleLayer(..)"),
            ModelSource::PaddleHapi(model) => f
                .debug_struct("PaddleHapi")
                .field("inputs", &model.inputs)
                .finish_non_exhaustive(),
        }
    }
}

impl From<Vec<u8>> for ModelSource {
    fn from(bytes: Vec<u8>) -> Self {
        ModelSource::Bytes(bytes)
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        ModelSource::Path(path)
    }
}

impl From<&std::path::Path> for ModelSource {
    fn from(path: &std::path::Path) -> Self {
        ModelSource::Path(path.to_path_buf())
    }
}

impl From<Program> for ModelSource {
    fn from(program: Program) -> Self {
        ModelSource::PaddleProgram(program)
    }
}

impl From<HapiModel> for ModelSource {
    fn from(model: HapiModel) -> Self {
        ModelSource::PaddleHapi(model)
    }
}

impl<L: Layer + 'static> From<Box<L>> for ModelSource {
    fn from(layer: Box<L>) -> Self {
        ModelSource::PaddleLayer(layer)
    }
}

/// Caller-supplied override of one declared input.
///
/// Overrides are applied by name when `name` is set, otherwise by position.
/// A request may not mix both forms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputOverride {
    pub name: Option<String>,
    pub shape: Option<Shape>,
    pub elem_type: Option<ElementType>,
}

impl InputOverride {
    pub fn with_shape(shape: impl Into<Shape>) -> Self {
        Self {
            shape: Some(shape.into()),
            ..Default::default()
        }
    }

    pub fn with_elem_type(elem_type: ElementType) -> Self {
        Self {
            elem_type: Some(elem_type),
            ..Default::default()
        }
    }

    pub fn typed(shape: impl Into<Shape>, elem_type: ElementType) -> Self {
        Self {
            name: None,
            shape: Some(shape.into()),
            elem_type: Some(elem_type),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl FromStr for InputOverride {
    type Err = ConversionError;

    /// Parses `NAME[2,?,4]:f32`; every part is optional but one must be present.
    /// Dynamic dimensions are written `?` or `-1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            |reason: String| ConversionError::invalid_request(Stage::Infer, format!("`{s}`: {reason}"));

        // Names may contain `:` themselves, so the suffix is an element type only
        // when it parses as one or follows a shape.
        let (head, elem_type) = match s.rsplit_once(':') {
            Some((head, dtype)) => match ElementType::from_str(dtype.trim()) {
                Ok(elem_type) => (head, Some(elem_type)),
                Err(_) if head.trim_end().ends_with(']') => {
                    return Err(invalid(format!("unknown element type `{dtype}`")));
                }
                Err(_) => (s, None),
            },
            None => (s, None),
        };

        let (name, shape) = match head.find('[') {
            Some(open) => {
                let dims = head[open + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| invalid("shape is missing its closing `]`".into()))?;
                let dims = dims
                    .split(',')
                    .map(str::trim)
                    .filter(|dim| !dim.is_empty())
                    .map(|dim| match dim {
                        "?" | "-1" => Ok(Dim::Dynamic),
                        _ => dim
                            .parse::<usize>()
                            .map(Dim::Static)
                            .map_err(|_| invalid(format!("invalid dimension `{dim}`"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (&head[..open], Some(Shape::Ranked(dims)))
            }
            None => (head, None),
        };

        let name = Some(name.trim()).filter(|name| !name.is_empty()).map(String::from);
        if name.is_none() && shape.is_none() && elem_type.is_none() {
            return Err(invalid("empty input override".into()));
        }

        Ok(Self {
            name,
            shape,
            elem_type,
        })
    }
}

/// Sample input used to trace a dynamic computation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExampleInput {
    /// Shape and element type only.
    Spec(InputSpec),
    /// A concrete tensor; only its shape and element type are used.
    Tensor { name: Option<String>, data: TensorData },
}

impl ExampleInput {
    pub fn name(&self) -> Option<&str> {
        match self {
            ExampleInput::Spec(spec) => spec.name.as_deref(),
            ExampleInput::Tensor { name, .. } => name.as_deref(),
        }
    }

    /// The example expressed as an input spec.
    pub fn to_spec(&self) -> InputSpec {
        match self {
            ExampleInput::Spec(spec) => spec.clone(),
            ExampleInput::Tensor { name, data } => InputSpec {
                shape: data.shape().iter().map(|&d| d as i64).collect(),
                dtype: data.elem_type(),
                name: name.clone(),
            },
        }
    }
}

impl From<InputSpec> for ExampleInput {
    fn from(spec: InputSpec) -> Self {
        ExampleInput::Spec(spec)
    }
}

impl From<TensorData> for ExampleInput {
    fn from(data: TensorData) -> Self {
        ExampleInput::Tensor { name: None, data }
    }
}

/// One conversion call: the model plus the options that steer it.
#[derive(Debug)]
pub struct ConversionRequest {
    pub source: ModelSource,
    pub inputs: Vec<InputOverride>,
    pub example_inputs: Vec<ExampleInput>,
    /// Result tensors to emit, in order. Empty keeps the source's outputs.
    pub outputs: Vec<String>,
}

impl ConversionRequest {
    pub fn new(source: impl Into<ModelSource>) -> Self {
        Self {
            source: source.into(),
            inputs: Vec::new(),
            example_inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, input: InputOverride) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn example_input(mut self, example: impl Into<ExampleInput>) -> Self {
        self.example_inputs.push(example.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("x[2,3,4]:f32", Some("x"), Some(Shape::fixed([2, 3, 4])), Some(ElementType::Float32))]
    #[case("x[?,3]", Some("x"), Some(Shape::Ranked(vec![Dim::Dynamic, Dim::Static(3)])), None)]
    #[case("[1,-1]", None, Some(Shape::Ranked(vec![Dim::Static(1), Dim::Dynamic])), None)]
    #[case(":int32", None, None, Some(ElementType::Int32))]
    #[case("input_ids", Some("input_ids"), None, None)]
    #[case("s[]", Some("s"), Some(Shape::Ranked(vec![])), None)]
    #[case("input:0", Some("input:0"), None, None)]
    #[case("input:0[1,2]", Some("input:0"), Some(Shape::fixed([1, 2])), None)]
    #[case("input:0[1,2]:f16", Some("input:0"), Some(Shape::fixed([1, 2])), Some(ElementType::Float16))]
    fn parses_override(
        #[case] text: &str,
        #[case] name: Option<&str>,
        #[case] shape: Option<Shape>,
        #[case] elem_type: Option<ElementType>,
    ) {
        let parsed: InputOverride = text.parse().unwrap();
        assert_eq!(parsed.name.as_deref(), name);
        assert_eq!(parsed.shape, shape);
        assert_eq!(parsed.elem_type, elem_type);
    }

    #[rstest]
    #[case("x[2,3")]
    #[case("x[2,a]")]
    #[case("x[2]:complex")]
    #[case("")]
    fn rejects_malformed_override(#[case] text: &str) {
        assert!(matches!(
            text.parse::<InputOverride>(),
            Err(ConversionError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn tensor_example_becomes_spec() {
        let example = ExampleInput::from(TensorData::new(vec![0i32; 6], vec![2, 3]));
        let spec = example.to_spec();
        assert_eq!(spec.shape, vec![2, 3]);
        assert_eq!(spec.dtype, ElementType::Int32);
        assert_eq!(spec.name, None);
    }

    #[test]
    fn reader_source_is_drained() {
        let source = ModelSource::from_reader(&[1u8, 2, 3][..]).unwrap();
        assert!(matches!(source, ModelSource::Bytes(bytes) if bytes == vec![1, 2, 3]));
    }
}
