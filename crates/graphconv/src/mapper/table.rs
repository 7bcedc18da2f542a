//! Operator table: every supported foreign operator and how it becomes IR.

use std::collections::HashMap;

use graphconv_ir::OpKind;
use lazy_static::lazy_static;

use super::MapContext;
use super::rules;
use crate::{ConversionError, ForeignNode, Framework};

/// How the output type of a node follows from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferRule {
    /// Element type and shape of the given input.
    SameAsInput(usize),
    /// Numpy-style broadcast of all inputs, element type of the first.
    Broadcast,
    /// Shape of the first input, element type decoded from the named attribute.
    Convert(&'static str),
    /// Type of the value carried by the node's attributes.
    FromValue,
}

/// Attribute encoding produced by an [`AttrMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Float32,
    Float64,
    Int64,
}

/// Copies one foreign attribute onto the canonical node.
#[derive(Debug, Clone, Copy)]
pub struct AttrMap {
    pub from: &'static str,
    pub to: &'static str,
    /// Used when the foreign node omits the attribute; `None` leaves it out.
    pub default: Option<f64>,
    pub kind: AttrKind,
}

/// Emits the canonical nodes for one foreign node.
pub type SubgraphFn = fn(&mut MapContext<'_>, &ForeignNode) -> Result<(), ConversionError>;

/// Construction strategy of a rule.
#[derive(Clone, Copy)]
pub enum Construct {
    /// One canonical node, inputs in order, attributes renamed.
    Direct {
        op: OpKind,
        attrs: &'static [AttrMap],
    },
    /// One canonical node whose numeric attributes become scalar operands of the
    /// input element type, appended after the first input in the given order.
    Parametrized {
        op: OpKind,
        operands: &'static [(&'static str, f64)],
    },
    /// A short fixed subgraph.
    Subgraph(SubgraphFn),
    /// No node; the output names the first input.
    Alias,
}

impl core::fmt::Debug for Construct {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Construct::Direct { op, .. } => write!(f, "Direct({op})"),
            Construct::Parametrized { op, .. } => write!(f, "Parametrized({op})"),
            Construct::Subgraph(_) => f.write_str("Subgraph"),
            Construct::Alias => f.write_str("Alias"),
        }
    }
}

/// One entry of the operator table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub framework: Framework,
    pub op_type: &'static str,
    /// Attributes the foreign node must carry for this rule to apply.
    pub requires: &'static [&'static str],
    /// Accepted number of inputs, omitted optional inputs included.
    pub inputs: (usize, usize),
    pub infer: InferRule,
    pub construct: Construct,
}

impl Rule {
    fn applies_to(&self, node: &ForeignNode) -> bool {
        self.requires.iter().all(|attr| node.attrs.contains_key(*attr))
    }
}

const fn attr(from: &'static str, to: &'static str, default: Option<f64>, kind: AttrKind) -> AttrMap {
    AttrMap {
        from,
        to,
        default,
        kind,
    }
}

const fn rule(
    framework: Framework,
    op_type: &'static str,
    inputs: (usize, usize),
    infer: InferRule,
    construct: Construct,
) -> Rule {
    Rule {
        framework,
        op_type,
        requires: &[],
        inputs,
        infer,
        construct,
    }
}

const fn unary(framework: Framework, op_type: &'static str, op: OpKind) -> Rule {
    rule(
        framework,
        op_type,
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Direct { op, attrs: &[] },
    )
}

const fn binary(framework: Framework, op_type: &'static str, op: OpKind) -> Rule {
    rule(
        framework,
        op_type,
        (2, 2),
        InferRule::Broadcast,
        Construct::Direct { op, attrs: &[] },
    )
}

use AttrKind::{Float32, Float64, Int64};
use Framework::{Onnx, Paddle};

const ELU_ALPHA: &[AttrMap] = &[attr("alpha", "alpha", Some(1.0), Float32)];
const SOFTMAX_AXIS: &[AttrMap] = &[attr("axis", "axis", Some(-1.0), Int64)];
const CLIP_BOUNDS: &[AttrMap] = &[
    attr("min", "min", None, Float64),
    attr("max", "max", None, Float64),
];

/// The operator table, in declaration order.
pub static RULES: &[Rule] = &[
    // ONNX
    unary(Onnx, "Relu", OpKind::Relu),
    unary(Onnx, "Sigmoid", OpKind::Sigmoid),
    unary(Onnx, "Tanh", OpKind::Tanh),
    unary(Onnx, "Abs", OpKind::Abs),
    unary(Onnx, "Exp", OpKind::Exp),
    unary(Onnx, "Log", OpKind::Log),
    unary(Onnx, "Sqrt", OpKind::Sqrt),
    unary(Onnx, "Neg", OpKind::Negative),
    unary(Onnx, "Floor", OpKind::Floor),
    unary(Onnx, "Ceil", OpKind::Ceiling),
    unary(Onnx, "Erf", OpKind::Erf),
    unary(Onnx, "Sin", OpKind::Sin),
    unary(Onnx, "Cos", OpKind::Cos),
    unary(Onnx, "Softplus", OpKind::SoftPlus),
    unary(Onnx, "HardSwish", OpKind::HSwish),
    rule(
        Onnx,
        "Elu",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Direct {
            op: OpKind::Elu,
            attrs: ELU_ALPHA,
        },
    ),
    rule(
        Onnx,
        "Selu",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Parametrized {
            op: OpKind::Selu,
            operands: &[
                ("alpha", 1.673_263_192_176_818_8),
                ("gamma", 1.050_701_022_148_132_3),
            ],
        },
    ),
    rule(
        Onnx,
        "HardSigmoid",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Parametrized {
            op: OpKind::HardSigmoid,
            operands: &[("alpha", 0.2), ("beta", 0.5)],
        },
    ),
    rule(
        Onnx,
        "LeakyRelu",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Subgraph(rules::onnx_leaky_relu),
    ),
    rule(
        Onnx,
        "PRelu",
        (2, 2),
        InferRule::SameAsInput(0),
        Construct::Direct {
            op: OpKind::PRelu,
            attrs: &[],
        },
    ),
    binary(Onnx, "Add", OpKind::Add),
    binary(Onnx, "Sub", OpKind::Subtract),
    binary(Onnx, "Mul", OpKind::Multiply),
    binary(Onnx, "Div", OpKind::Divide),
    binary(Onnx, "Pow", OpKind::Power),
    binary(Onnx, "Max", OpKind::Maximum),
    binary(Onnx, "Min", OpKind::Minimum),
    rule(
        Onnx,
        "Softmax",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Direct {
            op: OpKind::Softmax,
            attrs: SOFTMAX_AXIS,
        },
    ),
    rule(
        Onnx,
        "Cast",
        (1, 1),
        InferRule::Convert("to"),
        Construct::Subgraph(rules::cast),
    ),
    rule(
        Onnx,
        "Identity",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Alias,
    ),
    rule(
        Onnx,
        "Constant",
        (0, 0),
        InferRule::FromValue,
        Construct::Subgraph(rules::onnx_constant),
    ),
    // Clip before opset 11 carries its bounds as attributes.
    Rule {
        framework: Onnx,
        op_type: "Clip",
        requires: &["min", "max"],
        inputs: (1, 1),
        infer: InferRule::SameAsInput(0),
        construct: Construct::Direct {
            op: OpKind::Clamp,
            attrs: CLIP_BOUNDS,
        },
    },
    rule(
        Onnx,
        "Clip",
        (1, 3),
        InferRule::SameAsInput(0),
        Construct::Subgraph(rules::onnx_clip),
    ),
    // Paddle
    unary(Paddle, "relu", OpKind::Relu),
    unary(Paddle, "sigmoid", OpKind::Sigmoid),
    unary(Paddle, "tanh", OpKind::Tanh),
    unary(Paddle, "abs", OpKind::Abs),
    unary(Paddle, "exp", OpKind::Exp),
    unary(Paddle, "log", OpKind::Log),
    unary(Paddle, "sqrt", OpKind::Sqrt),
    rule(
        Paddle,
        "elu",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Direct {
            op: OpKind::Elu,
            attrs: ELU_ALPHA,
        },
    ),
    rule(
        Paddle,
        "selu",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Parametrized {
            op: OpKind::Selu,
            operands: &[
                ("alpha", 1.673_263_242_354_377_3),
                ("scale", 1.050_700_987_355_480_5),
            ],
        },
    ),
    rule(
        Paddle,
        "hard_sigmoid",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Parametrized {
            op: OpKind::HardSigmoid,
            operands: &[("slope", 0.166_666_7), ("offset", 0.5)],
        },
    ),
    rule(
        Paddle,
        "leaky_relu",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Subgraph(rules::paddle_leaky_relu),
    ),
    rule(
        Paddle,
        "prelu",
        (2, 2),
        InferRule::SameAsInput(0),
        Construct::Direct {
            op: OpKind::PRelu,
            attrs: &[],
        },
    ),
    binary(Paddle, "elementwise_add", OpKind::Add),
    binary(Paddle, "elementwise_sub", OpKind::Subtract),
    binary(Paddle, "elementwise_mul", OpKind::Multiply),
    binary(Paddle, "elementwise_div", OpKind::Divide),
    rule(
        Paddle,
        "softmax",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Direct {
            op: OpKind::Softmax,
            attrs: SOFTMAX_AXIS,
        },
    ),
    rule(
        Paddle,
        "cast",
        (1, 1),
        InferRule::Convert("out_dtype"),
        Construct::Subgraph(rules::cast),
    ),
    rule(
        Paddle,
        "assign",
        (1, 1),
        InferRule::SameAsInput(0),
        Construct::Alias,
    ),
    rule(
        Paddle,
        "scale",
        (1, 2),
        InferRule::SameAsInput(0),
        Construct::Subgraph(rules::paddle_scale),
    ),
];

lazy_static! {
    /// Rules grouped by framework and operator type, in table order.
    static ref INDEX: HashMap<Framework, HashMap<&'static str, Vec<&'static Rule>>> = {
        let mut index: HashMap<Framework, HashMap<&'static str, Vec<&'static Rule>>> =
            HashMap::new();
        for rule in RULES {
            index
                .entry(rule.framework)
                .or_default()
                .entry(rule.op_type)
                .or_default()
                .push(rule);
        }
        index
    };
}

fn candidates(framework: Framework, op_type: &str) -> Option<&'static [&'static Rule]> {
    INDEX
        .get(&framework)
        .and_then(|rules| rules.get(op_type))
        .map(Vec::as_slice)
}

/// Whether any rule handles `op_type`.
pub fn is_supported(framework: Framework, op_type: &str) -> bool {
    candidates(framework, op_type).is_some()
}

/// Picks the rule for `node`.
///
/// Among the rules whose required attributes are all present, the one requiring
/// the most attributes wins; ties go to the rule declared first.
pub fn select(framework: Framework, node: &ForeignNode) -> Option<&'static Rule> {
    candidates(framework, &node.op_type)?
        .iter()
        .copied()
        .filter(|rule| rule.applies_to(node))
        .fold(None, |best: Option<&'static Rule>, rule| match best {
            Some(best) if best.requires.len() >= rule.requires.len() => Some(best),
            _ => Some(rule),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphconv_ir::{AttributeValue, Attributes};

    fn clip(attrs: &[&str]) -> ForeignNode {
        let attrs: Attributes = attrs
            .iter()
            .map(|name| (name.to_string(), AttributeValue::Float32(0.0)))
            .collect();
        ForeignNode::new("clip", "Clip", vec!["x".into()], vec!["y".into()]).with_attrs(attrs)
    }

    #[test]
    fn most_specific_rule_wins() {
        let rule = select(Onnx, &clip(&["min", "max"])).unwrap();
        assert_eq!(rule.requires, &["min", "max"]);
    }

    #[test]
    fn partial_attributes_fall_back_to_the_general_rule() {
        let rule = select(Onnx, &clip(&["min"])).unwrap();
        assert!(rule.requires.is_empty());
        assert!(matches!(rule.construct, Construct::Subgraph(_)));
    }

    #[test]
    fn lookup_is_per_framework() {
        let relu = ForeignNode::new("r", "relu", vec!["x".into()], vec!["y".into()]);
        assert!(select(Paddle, &relu).is_some());
        assert!(select(Onnx, &relu).is_none());
        assert!(is_supported(Onnx, "Relu"));
        assert!(!is_supported(Onnx, "Gelu"));
    }

    #[test]
    fn table_has_no_duplicate_signatures() {
        let mut seen = std::collections::HashSet::new();
        for rule in RULES {
            assert!(
                seen.insert((rule.framework, rule.op_type, rule.requires)),
                "duplicate rule for {} {}",
                rule.framework,
                rule.op_type
            );
        }
    }
}
