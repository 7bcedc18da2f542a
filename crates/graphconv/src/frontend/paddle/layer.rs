//! Dynamic-mode layers and the tracer that records them into a program.

use graphconv_ir::{AttributeValue, Attributes, TensorData};

use super::{InputSpec, Program, Var};
use crate::{ConversionError, Stage};

/// A dynamic-mode callable module.
///
/// `forward` runs once per conversion against symbolic inputs and records
/// every operator it applies through the tracer.
pub trait Layer: Send + Sync {
    fn forward(&self, tracer: &mut Tracer, inputs: &[Var]) -> Result<Vec<Var>, ConversionError>;
}

/// Records the operators a layer applies.
#[derive(Debug)]
pub struct Tracer {
    program: Program,
}

impl Tracer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            program: Program::new(name),
        }
    }

    pub fn unary(&mut self, op_type: &str, x: &Var, attrs: Attributes) -> Var {
        self.program.unary(op_type, x, attrs)
    }

    pub fn binary(&mut self, op_type: &str, x: &Var, y: &Var, attrs: Attributes) -> Var {
        self.program.binary(op_type, x, y, attrs)
    }

    pub fn prelu(&mut self, x: &Var, alpha: &Var, mode: &str) -> Var {
        self.program.prelu(x, alpha, mode)
    }

    /// Registers a weight owned by the layer.
    pub fn parameter(&mut self, name: &str, value: TensorData) -> Var {
        self.program.parameter(name, value)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }
}

/// Traces `layer` into a static program fed by `specs`.
///
/// Inputs keep the spec names, falling back to `input_{i}`. Traced inputs are
/// not rank-checked at feed time.
pub fn trace(layer: &dyn Layer, specs: &[InputSpec], name: &str) -> Result<Program, ConversionError> {
    let mut tracer = Tracer::new(name);

    let mut inputs = Vec::with_capacity(specs.len());
    for (idx, spec) in specs.iter().enumerate() {
        let input_name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("input_{idx}"));
        let var = tracer
            .program
            .unchecked_data(&input_name, &spec.shape, spec.dtype);
        tracer.program.feed(&var, idx);
        inputs.push(var);
    }

    let outputs = layer.forward(&mut tracer, &inputs)?;
    if outputs.is_empty() {
        return Err(ConversionError::malformed(
            Stage::Read,
            name,
            "traced layer returned no outputs",
        ));
    }
    log::debug!("Traced {name}: {} ops", tracer.program.ops().len());

    let mut program = tracer.into_program();
    for (idx, output) in outputs.iter().enumerate() {
        program.fetch(output, idx);
    }
    Ok(program)
}

fn single_input<'a>(inputs: &'a [Var], layer: &str) -> Result<&'a Var, ConversionError> {
    match inputs {
        [x] => Ok(x),
        _ => Err(ConversionError::invalid_request(
            Stage::Read,
            format!("{layer} takes one input, got {}", inputs.len()),
        )),
    }
}

/// Common activation layers.
pub mod nn {
    use super::*;

    macro_rules! activation {
        ($name:ident, $op:literal) => {
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $name;

            impl Layer for $name {
                fn forward(
                    &self,
                    tracer: &mut Tracer,
                    inputs: &[Var],
                ) -> Result<Vec<Var>, ConversionError> {
                    let x = single_input(inputs, stringify!($name))?;
                    Ok(vec![tracer.unary($op, x, Attributes::new())])
                }
            }
        };
    }

    activation!(ReLU, "relu");
    activation!(Sigmoid, "sigmoid");
    activation!(Tanh, "tanh");

    #[derive(Debug, Clone, Copy)]
    pub struct LeakyReLU {
        pub negative_slope: f32,
    }

    impl Default for LeakyReLU {
        fn default() -> Self {
            Self {
                negative_slope: 0.01,
            }
        }
    }

    impl Layer for LeakyReLU {
        fn forward(&self, tracer: &mut Tracer, inputs: &[Var]) -> Result<Vec<Var>, ConversionError> {
            let x = single_input(inputs, "LeakyReLU")?;
            let attrs = Attributes::from([(
                "alpha".to_string(),
                AttributeValue::Float32(self.negative_slope),
            )]);
            Ok(vec![tracer.unary("leaky_relu", x, attrs)])
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub struct ELU {
        pub alpha: f32,
    }

    impl Default for ELU {
        fn default() -> Self {
            Self { alpha: 1.0 }
        }
    }

    impl Layer for ELU {
        fn forward(&self, tracer: &mut Tracer, inputs: &[Var]) -> Result<Vec<Var>, ConversionError> {
            let x = single_input(inputs, "ELU")?;
            let attrs = Attributes::from([("alpha".to_string(), AttributeValue::Float32(self.alpha))]);
            Ok(vec![tracer.unary("elu", x, attrs)])
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub struct Softmax {
        pub axis: i64,
    }

    impl Default for Softmax {
        fn default() -> Self {
            Self { axis: -1 }
        }
    }

    impl Layer for Softmax {
        fn forward(&self, tracer: &mut Tracer, inputs: &[Var]) -> Result<Vec<Var>, ConversionError> {
            let x = single_input(inputs, "Softmax")?;
            let attrs = Attributes::from([("axis".to_string(), AttributeValue::Int64(self.axis))]);
            Ok(vec![tracer.unary("softmax", x, attrs)])
        }
    }

    /// Runs its layers one after another.
    #[derive(Default)]
    pub struct Sequential {
        layers: Vec<Box<dyn Layer>>,
    }

    impl Sequential {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add<L: Layer + 'static>(mut self, layer: L) -> Self {
            self.layers.push(Box::new(layer));
            self
        }
    }

    impl Layer for Sequential {
        fn forward(&self, tracer: &mut Tracer, inputs: &[Var]) -> Result<Vec<Var>, ConversionError> {
            let mut values = inputs.to_vec();
            for layer in &self.layers {
                values = layer.forward(tracer, &values)?;
            }
            Ok(values)
        }
    }
}
