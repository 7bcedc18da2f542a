//! Framework-neutral form of a source model, produced by the front-ends.

use std::collections::{HashMap, HashSet};

use derive_new::new;
use graphconv_ir::{Attributes, Diagnostic, ElementType, Shape, TensorData};
use strum::Display;

use crate::{ConversionError, Stage};

/// Source framework a foreign graph was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Framework {
    Onnx,
    Paddle,
}

/// How strictly a declared input shape binds overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapeBinding {
    /// Any override replaces the declared shape.
    #[default]
    Overridable,
    /// The rank is fixed by the source format; overrides may only change dimensions.
    RankFixed,
}

/// Tensor spec declared by the source model for a graph input or output.
#[derive(Debug, Clone, PartialEq, new)]
pub struct DeclaredTensor {
    #[new(into)]
    pub name: String,
    pub elem_type: Option<ElementType>,
    pub shape: Option<Shape>,
    #[new(default)]
    pub binding: ShapeBinding,
}

impl DeclaredTensor {
    pub fn rank_fixed(mut self) -> Self {
        self.binding = ShapeBinding::RankFixed;
        self
    }
}

/// One operator record of the source model.
#[derive(Debug, Clone, PartialEq, new)]
pub struct ForeignNode {
    #[new(into)]
    pub name: String,
    #[new(into)]
    pub op_type: String,
    /// Input tensor names; an empty name marks an omitted optional input.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[new(default)]
    pub attrs: Attributes,
}

impl ForeignNode {
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    /// Present input names with their slot index.
    pub fn present_inputs(&self) -> impl Iterator<Item = (usize, &str)> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(idx, name)| (idx, name.as_str()))
    }
}

/// Normalized source graph, immutable once a front-end returns it.
#[derive(Debug, Clone, new)]
pub struct ForeignGraph {
    pub framework: Framework,
    #[new(into)]
    pub name: String,
    /// Operator-set version of the source, when the format carries one.
    #[new(default)]
    pub opset: Option<i64>,
    #[new(default)]
    pub nodes: Vec<ForeignNode>,
    #[new(default)]
    pub inputs: Vec<DeclaredTensor>,
    #[new(default)]
    pub outputs: Vec<DeclaredTensor>,
    /// Weights and other tensors whose value is known at conversion time.
    #[new(default)]
    pub constants: HashMap<String, TensorData>,
    #[new(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl ForeignGraph {
    /// Checks the structural fields every later stage relies on.
    ///
    /// Every tensor name must be produced once, by an input, a constant or a node,
    /// and every consumed or declared output name must have such a producer.
    pub fn check(&self) -> Result<(), ConversionError> {
        let malformed = |location: &str, reason: String| {
            ConversionError::malformed(Stage::Read, location, reason)
        };

        let mut produced: HashSet<&str> = HashSet::new();
        for input in &self.inputs {
            if input.name.is_empty() {
                return Err(malformed(&self.name, "graph input without a name".into()));
            }
            if !produced.insert(input.name.as_str()) {
                return Err(malformed(&input.name, "input declared twice".into()));
            }
        }
        for name in self.constants.keys() {
            if !produced.insert(name.as_str()) {
                return Err(malformed(name, "constant shadows a graph input".into()));
            }
        }

        for node in &self.nodes {
            if node.op_type.is_empty() {
                return Err(malformed(&node.name, "node without an operator type".into()));
            }
            for output in &node.outputs {
                if output.is_empty() {
                    return Err(malformed(&node.name, "output without a name".into()));
                }
                if !produced.insert(output.as_str()) {
                    return Err(malformed(
                        output,
                        format!("tensor is produced again by `{}`", node.name),
                    ));
                }
            }
        }

        for node in &self.nodes {
            for (_, input) in node.present_inputs() {
                if !produced.contains(input) {
                    return Err(ConversionError::DanglingReference {
                        tensor: input.to_string(),
                        node: node.name.clone(),
                    });
                }
            }
        }

        if self.outputs.is_empty() {
            return Err(malformed(&self.name, "graph declares no outputs".into()));
        }
        for output in &self.outputs {
            if !produced.contains(output.name.as_str()) {
                return Err(ConversionError::DanglingReference {
                    tensor: output.name.clone(),
                    node: format!("{}/result", output.name),
                });
            }
        }

        Ok(())
    }

    pub fn input(&self, name: &str) -> Option<&DeclaredTensor> {
        self.inputs.iter().find(|input| input.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relu_graph() -> ForeignGraph {
        let mut graph = ForeignGraph::new(Framework::Onnx, "relu");
        graph.inputs.push(DeclaredTensor::new(
            "x",
            Some(ElementType::Float32),
            Some(Shape::fixed([2, 3])),
        ));
        graph.nodes.push(ForeignNode::new(
            "relu",
            "Relu",
            vec!["x".into()],
            vec!["y".into()],
        ));
        graph.outputs.push(DeclaredTensor::new("y", None, None));
        graph
    }

    #[test]
    fn well_formed_graph_passes() {
        relu_graph().check().unwrap();
    }

    #[test]
    fn unknown_input_is_dangling() {
        let mut graph = relu_graph();
        graph.nodes[0].inputs[0] = "z".into();

        assert!(matches!(
            graph.check(),
            Err(ConversionError::DanglingReference { tensor, node }) if tensor == "z" && node == "relu"
        ));
    }

    #[test]
    fn missing_optional_input_is_allowed() {
        let mut graph = relu_graph();
        graph.nodes[0].inputs.push(String::new());
        graph.check().unwrap();
    }

    #[test]
    fn duplicate_output_is_malformed() {
        let mut graph = relu_graph();
        graph.nodes.push(ForeignNode::new(
            "relu2",
            "Relu",
            vec!["x".into()],
            vec!["y".into()],
        ));

        let err = graph.check().unwrap_err();
        assert_eq!(err.stage(), Stage::Read);
        assert!(matches!(err, ConversionError::MalformedModel { location, .. } if location == "y"));
    }

    #[test]
    fn graph_without_outputs_is_malformed() {
        let mut graph = relu_graph();
        graph.outputs.clear();
        assert!(matches!(
            graph.check(),
            Err(ConversionError::MalformedModel { .. })
        ));
    }
}
