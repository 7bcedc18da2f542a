use core::fmt;

use serde::Serialize;

use crate::{BuildError, Edge, EdgeId, ElementType, Node, NodeId, OpKind, TensorType};

/// Informational note recorded while converting a model.
///
/// Diagnostics never abort a conversion; they travel with the resulting graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Tensor the note is about.
    pub tensor: String,
    pub kind: DiagnosticKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DiagnosticKind {
    /// No element type was declared or inferable, so a default was used.
    DefaultedElementType(ElementType),
    /// No shape was declared or inferable; the tensor is unranked.
    UnknownShape,
    /// An example input was supplied but the source does not need one.
    IgnoredExampleInput,
}

impl Diagnostic {
    pub fn new(tensor: impl Into<String>, kind: DiagnosticKind) -> Self {
        Self {
            tensor: tensor.into(),
            kind,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::DefaultedElementType(elem_type) => write!(
                f,
                "element type of `{}` is unknown, defaulted to {elem_type}",
                self.tensor
            ),
            DiagnosticKind::UnknownShape => {
                write!(f, "shape of `{}` is unknown, left dynamic", self.tensor)
            }
            DiagnosticKind::IgnoredExampleInput => {
                write!(f, "example input `{}` is not used by this source", self.tensor)
            }
        }
    }
}

/// Converted computation graph.
///
/// Nodes are stored in topological order: every edge is produced by a node with a
/// smaller id than each of its consumers.
#[derive(Debug, Clone, Serialize)]
pub struct IrGraph {
    pub(crate) name: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) parameters: Vec<NodeId>,
    pub(crate) results: Vec<NodeId>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl IrGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    /// Parameter nodes in signature order.
    pub fn parameters(&self) -> impl Iterator<Item = &Node> {
        self.parameters.iter().map(|id| self.node(*id))
    }

    /// Result nodes in output order.
    pub fn results(&self) -> impl Iterator<Item = &Node> {
        self.results.iter().map(|id| self.node(*id))
    }

    /// Types of the parameters in signature order.
    pub fn parameter_types(&self) -> Vec<&TensorType> {
        self.parameters()
            .map(|node| &self.edge(node.outputs[0]).ty)
            .collect()
    }

    /// Types of the results in output order.
    pub fn result_types(&self) -> Vec<&TensorType> {
        self.results()
            .map(|node| &self.edge(node.inputs[0]).ty)
            .collect()
    }

    /// Type of the `index`-th output of `node`.
    pub fn output_type(&self, node: &Node, index: usize) -> Option<&TensorType> {
        node.outputs.get(index).map(|edge| &self.edge(*edge).ty)
    }

    /// The node producing the `index`-th input of `node`.
    pub fn producer(&self, node: &Node, index: usize) -> Option<&Node> {
        node.inputs
            .get(index)
            .map(|edge| self.node(self.edge(*edge).producer.node))
    }

    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Nodes of the given kind, in topological order.
    pub fn nodes_of(&self, op: OpKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |node| node.op == op)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Attaches conversion diagnostics to the graph.
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    /// Checks the structural invariants every built graph upholds.
    pub fn validate(&self) -> Result<(), BuildError> {
        let invalid = |node: &Node, reason: String| BuildError::InvalidGraph {
            node: node.name.clone(),
            reason,
        };

        for (idx, node) in self.nodes.iter().enumerate() {
            if node.id.0 != idx {
                return Err(invalid(node, format!("stored at {idx} with id {}", node.id.0)));
            }
            if node.inputs.len() != node.op.arity() {
                return Err(invalid(
                    node,
                    format!(
                        "{} expects {} inputs, found {}",
                        node.op,
                        node.op.arity(),
                        node.inputs.len()
                    ),
                ));
            }
            if node.outputs.len() != node.op.num_outputs() {
                return Err(invalid(
                    node,
                    format!(
                        "{} expects {} outputs, found {}",
                        node.op,
                        node.op.num_outputs(),
                        node.outputs.len()
                    ),
                ));
            }

            for (port, edge_id) in node.inputs.iter().enumerate() {
                let edge = self
                    .edges
                    .get(edge_id.0)
                    .ok_or_else(|| invalid(node, format!("input {port} refers to a missing edge")))?;
                if !edge
                    .consumers
                    .iter()
                    .any(|c| c.node == node.id && c.index == port)
                {
                    return Err(invalid(node, format!("input {port} is not listed on {edge_id}")));
                }
                if edge.producer.node >= node.id {
                    return Err(BuildError::CycleDetected {
                        nodes: vec![self.node(edge.producer.node).name.clone(), node.name.clone()],
                    });
                }
            }

            for (port, edge_id) in node.outputs.iter().enumerate() {
                let edge = self
                    .edges
                    .get(edge_id.0)
                    .ok_or_else(|| invalid(node, format!("output {port} refers to a missing edge")))?;
                if edge.producer.node != node.id || edge.producer.index != port {
                    return Err(invalid(node, format!("output {port} is not produced by it")));
                }
            }
        }

        for edge in &self.edges {
            let producer = self.nodes.get(edge.producer.node.0).ok_or_else(|| {
                BuildError::InvalidGraph {
                    node: format!("{}", edge.id),
                    reason: "producer is outside the graph".to_string(),
                }
            })?;
            for consumer in &edge.consumers {
                let owner = self.nodes.get(consumer.node.0).ok_or_else(|| {
                    BuildError::InvalidGraph {
                        node: producer.name.clone(),
                        reason: format!("{} feeds a node outside the graph", edge.id),
                    }
                })?;
                if owner.inputs.get(consumer.index) != Some(&edge.id) {
                    return Err(invalid(owner, format!("{} lists a stale consumer", edge.id)));
                }
            }
        }

        for node in &self.nodes {
            let listed = match node.op {
                OpKind::Parameter => self.parameters.contains(&node.id),
                OpKind::Result => self.results.contains(&node.id),
                _ => true,
            };
            if !listed {
                return Err(invalid(node, format!("{} is not registered on the graph", node.op)));
            }
        }
        for id in self.parameters.iter().chain(&self.results) {
            let node = self.nodes.get(id.0).ok_or_else(|| BuildError::InvalidGraph {
                node: format!("#{}", id.0),
                reason: "registered node is outside the graph".to_string(),
            })?;
            if !matches!(node.op, OpKind::Parameter | OpKind::Result) {
                return Err(invalid(node, "registered as parameter or result".to_string()));
            }
        }

        Ok(())
    }
}

impl fmt::Display for IrGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {} {{", self.name)?;
        for node in &self.nodes {
            f.write_str("  ")?;
            if !node.outputs.is_empty() {
                let outputs: Vec<String> = node.outputs.iter().map(|e| e.to_string()).collect();
                write!(f, "{} = ", outputs.join(", "))?;
            }
            let inputs: Vec<String> = node.inputs.iter().map(|e| e.to_string()).collect();
            write!(f, "{}({})", node.op, inputs.join(", "))?;
            if !node.attrs.is_empty() {
                let attrs: Vec<String> = node
                    .attrs
                    .iter()
                    .map(|(key, value)| format!("{key}: {value}"))
                    .collect();
                write!(f, " {{{}}}", attrs.join(", "))?;
            }
            if let Some(ty) = self.output_type(node, 0) {
                write!(f, " : {ty}")?;
            }
            writeln!(f)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeValue, Attributes, Composer, TensorData};
    use insta::assert_snapshot;

    fn prelu_elu() -> IrGraph {
        let mut c = Composer::new("snapshot");
        let x = c.parameter(ElementType::Float32, [2, 3, 4]);
        let slope = c.constant(TensorData::new(vec![0.5f32], vec![1]));
        let prelu = c.elementwise(OpKind::PRelu, &[x, slope], Attributes::new());
        let elu = c.unary_with(
            OpKind::Elu,
            prelu,
            Attributes::from([("alpha".to_string(), AttributeValue::Float32(0.1))]),
        );
        c.result(elu);
        c.finish().unwrap()
    }

    #[test]
    fn display_lists_nodes_in_topological_order() {
        assert_snapshot!(prelu_elu().to_string(), @r"
        graph snapshot {
          %0 = Parameter() : f32[2,3,4]
          %1 = Constant() {value: f32[1] [0.5]} : f32[1]
          %2 = PRelu(%0, %1) : f32[2,3,4]
          %3 = Elu(%2) {alpha: 0.1} : f32[2,3,4]
          Result(%3)
        }
        ");
    }

    #[test]
    fn accessors_follow_edges() {
        let graph = prelu_elu();
        let elu = graph.nodes_of(OpKind::Elu).next().unwrap();
        assert_eq!(graph.producer(elu, 0).unwrap().op, OpKind::PRelu);
        assert_eq!(
            graph.output_type(elu, 0),
            Some(&TensorType::new(ElementType::Float32, [2, 3, 4]))
        );
        assert!(graph.diagnostics().is_empty());
    }

    #[test]
    fn validate_rejects_stale_consumer_lists() {
        let mut graph = prelu_elu();
        graph.edges[0].consumers.clear();

        assert!(matches!(
            graph.validate(),
            Err(BuildError::InvalidGraph { node, .. }) if node.starts_with("prelu")
        ));
    }

    #[test]
    fn validate_rejects_backward_edges() {
        let mut graph = prelu_elu();
        // Make the constant consume the Elu output.
        let elu_edge = graph.nodes_of(OpKind::Elu).next().unwrap().outputs[0];
        let constant = graph.nodes_of(OpKind::Constant).next().unwrap().id;
        graph.nodes[constant.0].op = OpKind::Relu;
        graph.nodes[constant.0].inputs.push(elu_edge);
        graph.edges[elu_edge.0].consumers.push(crate::Port {
            node: constant,
            index: 0,
        });

        assert!(matches!(
            graph.validate(),
            Err(BuildError::CycleDetected { .. })
        ));
    }

    #[test]
    fn diagnostics_render_the_tensor_name() {
        let diagnostic = Diagnostic::new(
            "x",
            DiagnosticKind::DefaultedElementType(ElementType::Float32),
        );
        assert_eq!(
            diagnostic.to_string(),
            "element type of `x` is unknown, defaulted to f32"
        );
    }
}
