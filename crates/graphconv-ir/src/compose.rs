//! Handle-based graph construction.
//!
//! ```
//! use graphconv_ir::{Composer, ElementType, OpKind};
//!
//! let mut c = Composer::new("relu_sigmoid");
//! let x = c.parameter(ElementType::Float32, [2, 3, 4]);
//! let relu = c.unary(OpKind::Relu, x);
//! let sigmoid = c.unary(OpKind::Sigmoid, relu);
//! c.result(sigmoid);
//! let graph = c.finish().unwrap();
//! assert_eq!(graph.nodes().len(), 4);
//! ```

use crate::{
    AttributeValue, Attributes, BuildError, ElementType, GraphBuilder, IrGraph, NodeDraft, OpKind,
    Shape, TensorData, TensorType,
};

/// Handle to a tensor produced inside a [`Composer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output(usize);

/// Builds graphs by chaining operator calls instead of naming tensors.
#[derive(Debug)]
pub struct Composer {
    builder: GraphBuilder,
    tensors: Vec<(String, TensorType)>,
}

impl Composer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            builder: GraphBuilder::new(name),
            tensors: Vec::new(),
        }
    }

    pub fn parameter(&mut self, elem_type: ElementType, shape: impl Into<Shape>) -> Output {
        let ty = TensorType::new(elem_type, shape);
        let output = self.register("parameter", ty.clone());
        let name = self.tensors[output.0].0.clone();
        self.builder.parameter(name, ty);
        output
    }

    pub fn constant(&mut self, data: TensorData) -> Output {
        let ty = data.tensor_type();
        self.op(
            OpKind::Constant,
            &[],
            Attributes::from([("value".to_string(), AttributeValue::Tensor(data))]),
            ty,
        )
    }

    pub fn convert(&mut self, input: Output, destination: ElementType) -> Output {
        let shape = self.output_type(input).shape.clone();
        self.op(
            OpKind::Convert,
            &[input],
            Attributes::from([(
                "destination_type".to_string(),
                AttributeValue::ElementType(destination),
            )]),
            TensorType::new(destination, shape),
        )
    }

    /// Single-input op whose output type matches its input.
    pub fn unary(&mut self, op: OpKind, input: Output) -> Output {
        self.unary_with(op, input, Attributes::new())
    }

    pub fn unary_with(&mut self, op: OpKind, input: Output, attrs: Attributes) -> Output {
        let ty = self.output_type(input).clone();
        self.op(op, &[input], attrs, ty)
    }

    /// Op whose output broadcasts its inputs and keeps the first input's element type.
    pub fn elementwise(&mut self, op: OpKind, inputs: &[Output], attrs: Attributes) -> Output {
        let first = self.output_type(inputs[0]).clone();
        let shape = inputs[1..]
            .iter()
            .try_fold(first.shape.clone(), |shape, input| {
                shape.broadcast(&self.output_type(*input).shape)
            })
            .unwrap_or(Shape::Unranked);
        self.op(op, inputs, attrs, TensorType::new(first.elem_type, shape))
    }

    pub fn op(&mut self, op: OpKind, inputs: &[Output], attrs: Attributes, ty: TensorType) -> Output {
        let output = self.register(&op.to_string().to_lowercase(), ty.clone());
        let name = self.tensors[output.0].0.clone();

        let mut draft = NodeDraft::new(name.clone(), op).output(name, ty);
        draft.attrs = attrs;
        for input in inputs {
            draft = draft.input(self.tensors[input.0].0.clone());
        }
        self.builder.node(draft);

        output
    }

    pub fn result(&mut self, output: Output) {
        self.builder.result(self.tensors[output.0].0.clone());
    }

    pub fn output_type(&self, output: Output) -> &TensorType {
        &self.tensors[output.0].1
    }

    pub fn finish(self) -> Result<IrGraph, BuildError> {
        self.builder.build()
    }

    fn register(&mut self, prefix: &str, ty: TensorType) -> Output {
        let output = Output(self.tensors.len());
        self.tensors.push((format!("{prefix}{}", output.0), ty));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn constant_convert_keeps_shape() {
        let mut c = Composer::new("slope");
        let constant = c.constant(TensorData::new(vec![f16::from_f32(0.1)], vec![1]));
        let converted = c.convert(constant, ElementType::Float32);

        assert_eq!(
            c.output_type(converted),
            &TensorType::new(ElementType::Float32, [1])
        );
    }

    #[test]
    fn elementwise_broadcasts_inputs() {
        let mut c = Composer::new("prelu");
        let x = c.parameter(ElementType::Float32, [2, 3, 4]);
        let slope = c.constant(TensorData::new(vec![0.1f32], vec![1]));
        let prelu = c.elementwise(OpKind::PRelu, &[x, slope], Attributes::new());
        c.result(prelu);

        assert_eq!(
            c.output_type(prelu),
            &TensorType::new(ElementType::Float32, [2, 3, 4])
        );
        let graph = c.finish().unwrap();
        assert_eq!(graph.nodes_of(OpKind::PRelu).count(), 1);
    }
}
