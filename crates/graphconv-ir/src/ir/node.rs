use core::fmt;

use serde::Serialize;
use strum::{Display, EnumString};

use super::{Attributes, TensorType};

/// Canonical operator kinds.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, Display, EnumString, Serialize)]
pub enum OpKind {
    Parameter,
    Constant,
    Convert,
    Result,
    // Unary activations and math
    Abs,
    Ceiling,
    Cos,
    Elu,
    Erf,
    Exp,
    Floor,
    HSwish,
    Log,
    Negative,
    Relu,
    Sigmoid,
    Sin,
    SoftPlus,
    Sqrt,
    Tanh,
    Clamp,
    Softmax,
    // Activations with tensor operands
    HardSigmoid,
    PRelu,
    Selu,
    // Binary elementwise with broadcast
    Add,
    Divide,
    Maximum,
    Minimum,
    Multiply,
    Power,
    Subtract,
}

impl OpKind {
    /// Number of inputs a node of this kind consumes.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Parameter | OpKind::Constant => 0,
            OpKind::HardSigmoid | OpKind::Selu => 3,
            OpKind::PRelu
            | OpKind::Add
            | OpKind::Divide
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::Multiply
            | OpKind::Power
            | OpKind::Subtract => 2,
            _ => 1,
        }
    }

    /// Number of outputs a node of this kind produces.
    pub fn num_outputs(&self) -> usize {
        match self {
            OpKind::Result => 0,
            _ => 1,
        }
    }
}

/// Index of a node inside its [`IrGraph`](crate::IrGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

/// Index of an edge inside its [`IrGraph`](crate::IrGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeId(pub usize);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A node input or output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Port {
    pub node: NodeId,
    pub index: usize,
}

/// A canonical operator instance.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: OpKind,
    pub attrs: Attributes,
    pub inputs: Vec<EdgeId>,
    pub outputs: Vec<EdgeId>,
}

/// Directed link from one producer output to its consumer inputs.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: EdgeId,
    pub ty: TensorType,
    /// Tensor names carried over from the source model.
    pub names: Vec<String>,
    pub producer: Port,
    pub consumers: Vec<Port>,
}
