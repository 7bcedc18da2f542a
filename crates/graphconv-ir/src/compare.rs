//! Structural equivalence of two graphs.
//!
//! Two graphs are equivalent when their ordered parameter types and ordered result
//! types agree and their node/edge structures are isomorphic, pairing nodes by
//! walking both graphs backwards from the results. Internal node and tensor names
//! are ignored unless [`CompareOptions::tensor_names`] is set.

use std::collections::HashMap;

use crate::{AttributeValue, IrGraph, Node, NodeId, OpKind, TensorType};

/// Knobs for [`compare`].
#[derive(Debug, Clone, Copy)]
pub struct CompareOptions {
    /// Also require the same tensor names on every paired edge.
    pub tensor_names: bool,
    /// Compare the payload of constant nodes.
    pub constant_values: bool,
    /// Relative tolerance for floating point attributes and constants.
    pub tolerance: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            tensor_names: false,
            constant_values: true,
            tolerance: 1e-6,
        }
    }
}

/// First difference found between two graphs.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Mismatch {
    #[error("graph has {actual} parameters, expected {expected}")]
    ParameterCount { actual: usize, expected: usize },

    #[error("graph has {actual} results, expected {expected}")]
    ResultCount { actual: usize, expected: usize },

    #[error("graph has {actual} nodes, expected {expected}")]
    NodeCount { actual: usize, expected: usize },

    #[error("`{actual}` is {actual_op}, expected {expected_op} (`{expected}`)")]
    OpKind {
        actual: String,
        actual_op: OpKind,
        expected: String,
        expected_op: OpKind,
    },

    #[error("`{node}` has {actual} inputs, expected {expected}")]
    InputCount {
        node: String,
        actual: usize,
        expected: usize,
    },

    #[error("`{node}` input {port} comes from output {actual}, expected output {expected}")]
    InputPort {
        node: String,
        port: usize,
        actual: usize,
        expected: usize,
    },

    #[error("`{node}` output {port} is {actual}, expected {expected}")]
    OutputType {
        node: String,
        port: usize,
        actual: TensorType,
        expected: TensorType,
    },

    #[error("`{node}` output {port} is named {actual:?}, expected {expected:?}")]
    TensorNames {
        node: String,
        port: usize,
        actual: Vec<String>,
        expected: Vec<String>,
    },

    #[error("`{node}` attribute `{key}` is {actual:?}, expected {expected:?}")]
    Attribute {
        node: String,
        key: String,
        actual: Option<AttributeValue>,
        expected: Option<AttributeValue>,
    },

    #[error("`{node}` pairs with both `{first}` and `{second}`")]
    Structure {
        node: String,
        first: String,
        second: String,
    },
}

/// Checks that `actual` is structurally equivalent to `expected`.
pub fn compare(actual: &IrGraph, expected: &IrGraph, options: CompareOptions) -> Result<(), Mismatch> {
    GraphComparator::new(actual, expected, options).run()
}

/// Shorthand for [`compare`] with default options.
pub fn equivalent(actual: &IrGraph, expected: &IrGraph) -> bool {
    compare(actual, expected, CompareOptions::default()).is_ok()
}

struct GraphComparator<'a> {
    actual: &'a IrGraph,
    expected: &'a IrGraph,
    options: CompareOptions,
    forward: HashMap<NodeId, NodeId>,
    backward: HashMap<NodeId, NodeId>,
}

impl<'a> GraphComparator<'a> {
    fn new(actual: &'a IrGraph, expected: &'a IrGraph, options: CompareOptions) -> Self {
        Self {
            actual,
            expected,
            options,
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<(), Mismatch> {
        if self.actual.parameters.len() != self.expected.parameters.len() {
            return Err(Mismatch::ParameterCount {
                actual: self.actual.parameters.len(),
                expected: self.expected.parameters.len(),
            });
        }
        if self.actual.results.len() != self.expected.results.len() {
            return Err(Mismatch::ResultCount {
                actual: self.actual.results.len(),
                expected: self.expected.results.len(),
            });
        }

        // Parameters pair by position, results pair by position.
        let mut pending: Vec<(NodeId, NodeId)> = self
            .actual
            .parameters
            .iter()
            .copied()
            .zip(self.expected.parameters.iter().copied())
            .chain(
                self.actual
                    .results
                    .iter()
                    .copied()
                    .zip(self.expected.results.iter().copied()),
            )
            .rev()
            .collect();

        while let Some((a, b)) = pending.pop() {
            if !self.pair(a, b)? {
                continue;
            }

            let node_a = self.actual.node(a);
            let node_b = self.expected.node(b);
            self.compare_nodes(node_a, node_b)?;

            for (port, (edge_a, edge_b)) in node_a.inputs.iter().zip(&node_b.inputs).enumerate() {
                let producer_a = self.actual.edge(*edge_a).producer;
                let producer_b = self.expected.edge(*edge_b).producer;
                if producer_a.index != producer_b.index {
                    return Err(Mismatch::InputPort {
                        node: node_a.name.clone(),
                        port,
                        actual: producer_a.index,
                        expected: producer_b.index,
                    });
                }
                pending.push((producer_a.node, producer_b.node));
            }
        }

        if self.actual.nodes.len() != self.expected.nodes.len() {
            return Err(Mismatch::NodeCount {
                actual: self.actual.nodes.len(),
                expected: self.expected.nodes.len(),
            });
        }

        Ok(())
    }

    /// Records `a <-> b`. Returns `false` when the pair was already recorded.
    fn pair(&mut self, a: NodeId, b: NodeId) -> Result<bool, Mismatch> {
        match (self.forward.get(&a), self.backward.get(&b)) {
            (Some(known), _) if *known == b => Ok(false),
            (Some(known), _) => Err(Mismatch::Structure {
                node: self.actual.node(a).name.clone(),
                first: self.expected.node(*known).name.clone(),
                second: self.expected.node(b).name.clone(),
            }),
            (None, Some(known)) => Err(Mismatch::Structure {
                node: self.expected.node(b).name.clone(),
                first: self.actual.node(*known).name.clone(),
                second: self.actual.node(a).name.clone(),
            }),
            (None, None) => {
                self.forward.insert(a, b);
                self.backward.insert(b, a);
                Ok(true)
            }
        }
    }

    fn compare_nodes(&self, a: &Node, b: &Node) -> Result<(), Mismatch> {
        if a.op != b.op {
            return Err(Mismatch::OpKind {
                actual: a.name.clone(),
                actual_op: a.op,
                expected: b.name.clone(),
                expected_op: b.op,
            });
        }
        if a.inputs.len() != b.inputs.len() {
            return Err(Mismatch::InputCount {
                node: a.name.clone(),
                actual: a.inputs.len(),
                expected: b.inputs.len(),
            });
        }

        // Results own no output edge, so their type is checked on the input.
        let edges = if a.op == OpKind::Result {
            a.inputs.iter().zip(&b.inputs)
        } else {
            a.outputs.iter().zip(&b.outputs)
        };
        for (port, (edge_a, edge_b)) in edges.enumerate() {
            let edge_a = self.actual.edge(*edge_a);
            let edge_b = self.expected.edge(*edge_b);
            if edge_a.ty != edge_b.ty {
                return Err(Mismatch::OutputType {
                    node: a.name.clone(),
                    port,
                    actual: edge_a.ty.clone(),
                    expected: edge_b.ty.clone(),
                });
            }
            if self.options.tensor_names && edge_a.names != edge_b.names {
                return Err(Mismatch::TensorNames {
                    node: a.name.clone(),
                    port,
                    actual: edge_a.names.clone(),
                    expected: edge_b.names.clone(),
                });
            }
        }

        for key in a.attrs.keys().chain(b.attrs.keys()) {
            if a.op == OpKind::Constant && key == "value" && !self.options.constant_values {
                continue;
            }
            let lhs = a.attrs.get(key);
            let rhs = b.attrs.get(key);
            let same = match (lhs, rhs) {
                (Some(lhs), Some(rhs)) => lhs.approx_eq(rhs, self.options.tolerance),
                _ => false,
            };
            if !same {
                return Err(Mismatch::Attribute {
                    node: a.name.clone(),
                    key: key.clone(),
                    actual: lhs.cloned(),
                    expected: rhs.cloned(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attributes, Composer, ElementType, TensorData};
    use half::f16;

    fn relu_sigmoid(name: &str, first: OpKind) -> IrGraph {
        let mut c = Composer::new(name);
        let x = c.parameter(ElementType::Float32, [2, 3, 4]);
        let a = c.unary(first, x);
        let b = c.unary(OpKind::Sigmoid, a);
        c.result(b);
        c.finish().unwrap()
    }

    fn prelu_with_slope(slope: f32) -> IrGraph {
        let mut c = Composer::new("prelu");
        let x = c.parameter(ElementType::Float32, [2, 3, 4]);
        let s = c.constant(TensorData::new(vec![f16::from_f32(slope)], vec![1]));
        let s = c.convert(s, ElementType::Float32);
        let y = c.elementwise(OpKind::PRelu, &[x, s], Attributes::new());
        c.result(y);
        c.finish().unwrap()
    }

    #[test]
    fn identical_structure_with_different_names_is_equivalent() {
        let a = relu_sigmoid("a", OpKind::Relu);
        let b = relu_sigmoid("b", OpKind::Relu);
        compare(&a, &b, CompareOptions::default()).unwrap();
    }

    #[test]
    fn op_kind_difference_is_reported() {
        let a = relu_sigmoid("a", OpKind::Relu);
        let b = relu_sigmoid("b", OpKind::Tanh);
        assert!(matches!(
            compare(&a, &b, CompareOptions::default()),
            Err(Mismatch::OpKind {
                actual_op: OpKind::Relu,
                expected_op: OpKind::Tanh,
                ..
            })
        ));
    }

    #[test]
    fn constant_values_are_compared_unless_disabled() {
        let a = prelu_with_slope(0.1);
        let b = prelu_with_slope(0.2);
        assert!(matches!(
            compare(&a, &b, CompareOptions::default()),
            Err(Mismatch::Attribute { key, .. }) if key == "value"
        ));

        let options = CompareOptions {
            constant_values: false,
            ..Default::default()
        };
        compare(&a, &b, options).unwrap();
    }

    #[test]
    fn tensor_names_only_matter_when_requested() {
        let mut builder = crate::GraphBuilder::new("named");
        builder
            .parameter("input", TensorType::new(ElementType::Float32, [2]))
            .node(
                crate::NodeDraft::new("relu", OpKind::Relu)
                    .input("input")
                    .output("output", TensorType::new(ElementType::Float32, [2])),
            )
            .result("output");
        let named = builder.build().unwrap();

        let mut c = Composer::new("anonymous");
        let x = c.parameter(ElementType::Float32, [2]);
        let y = c.unary(OpKind::Relu, x);
        c.result(y);
        let anonymous = c.finish().unwrap();

        assert!(equivalent(&named, &anonymous));
        let options = CompareOptions {
            tensor_names: true,
            ..Default::default()
        };
        assert!(matches!(
            compare(&named, &anonymous, options),
            Err(Mismatch::TensorNames { .. })
        ));
    }

    #[test]
    fn parameter_shape_difference_is_reported() {
        let mut c = Composer::new("wide");
        let x = c.parameter(ElementType::Float32, [2, 3]);
        c.result(x);
        let wide = c.finish().unwrap();

        let mut c = Composer::new("narrow");
        let x = c.parameter(ElementType::Float32, [2]);
        c.result(x);
        let narrow = c.finish().unwrap();

        assert!(matches!(
            compare(&wide, &narrow, CompareOptions::default()),
            Err(Mismatch::OutputType { .. })
        ));
    }

    #[test]
    fn shared_versus_duplicated_subgraph_is_not_equivalent() {
        // add(relu(x), relu(x)) with one relu against two relus.
        let mut c = Composer::new("shared");
        let x = c.parameter(ElementType::Float32, [2]);
        let r = c.unary(OpKind::Relu, x);
        let y = c.elementwise(OpKind::Add, &[r, r], Attributes::new());
        c.result(y);
        let shared = c.finish().unwrap();

        let mut c = Composer::new("duplicated");
        let x = c.parameter(ElementType::Float32, [2]);
        let r1 = c.unary(OpKind::Relu, x);
        let r2 = c.unary(OpKind::Relu, x);
        let y = c.elementwise(OpKind::Add, &[r1, r2], Attributes::new());
        c.result(y);
        let duplicated = c.finish().unwrap();

        assert!(!equivalent(&shared, &duplicated));
        assert!(!equivalent(&duplicated, &shared));
    }
}
