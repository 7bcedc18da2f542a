//! Assembly of an [`IrGraph`] from name-based node drafts.
//!
//! Drafts may arrive in any order. The builder resolves every input name to a
//! single producer, orders the nodes topologically, drops nodes that no result
//! depends on and wires parameters, internal edges and results.

use std::collections::{BTreeSet, HashMap};

use crate::{
    AttributeValue, Attributes, Diagnostic, Edge, EdgeId, IrGraph, Node, NodeId, OpKind, Port,
    TensorType,
};

/// Error raised while assembling a graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("tensor `{tensor}` consumed by `{node}` has no producer")]
    DanglingReference { tensor: String, node: String },

    #[error("tensor `{tensor}` is produced by both `{first}` and `{second}`")]
    DuplicateProducer {
        tensor: String,
        first: String,
        second: String,
    },

    #[error("cycle detected through: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("invalid graph at `{node}`: {reason}")]
    InvalidGraph { node: String, reason: String },
}

/// A named, typed output slot of a draft node or parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDraft {
    pub name: String,
    pub ty: TensorType,
}

/// A canonical node whose inputs are still referenced by tensor name.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub name: String,
    pub op: OpKind,
    pub attrs: Attributes,
    pub inputs: Vec<String>,
    pub outputs: Vec<OutputDraft>,
}

impl NodeDraft {
    pub fn new(name: impl Into<String>, op: OpKind) -> Self {
        Self {
            name: name.into(),
            op,
            attrs: Attributes::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: TensorType) -> Self {
        self.outputs.push(OutputDraft {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Parameter(usize),
    Node { draft: usize, port: usize },
}

/// Collects parameters, node drafts and result names, then emits a validated graph.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: String,
    parameters: Vec<OutputDraft>,
    nodes: Vec<NodeDraft>,
    results: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Declares the next parameter in signature order.
    pub fn parameter(&mut self, name: impl Into<String>, ty: TensorType) -> &mut Self {
        self.parameters.push(OutputDraft {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn node(&mut self, draft: NodeDraft) -> &mut Self {
        self.nodes.push(draft);
        self
    }

    pub fn nodes<I: IntoIterator<Item = NodeDraft>>(&mut self, drafts: I) -> &mut Self {
        self.nodes.extend(drafts);
        self
    }

    /// Declares the next result in output order.
    pub fn result(&mut self, tensor: impl Into<String>) -> &mut Self {
        self.results.push(tensor.into());
        self
    }

    pub fn diagnostic(&mut self, diagnostic: Diagnostic) -> &mut Self {
        self.diagnostics.push(diagnostic);
        self
    }

    pub fn build(self) -> Result<IrGraph, BuildError> {
        let (sources, result_sources) = {
            let producers = self.index_producers()?;

            let resolve = |tensor: &str, consumer: &str| {
                producers
                    .get(tensor)
                    .copied()
                    .ok_or_else(|| BuildError::DanglingReference {
                        tensor: tensor.to_string(),
                        node: consumer.to_string(),
                    })
            };

            let sources = self
                .nodes
                .iter()
                .map(|draft| {
                    draft
                        .inputs
                        .iter()
                        .map(|input| resolve(input.as_str(), draft.name.as_str()))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;

            let result_sources = self
                .results
                .iter()
                .map(|tensor| resolve(tensor.as_str(), format!("{tensor}/result").as_str()))
                .collect::<Result<Vec<_>, _>>()?;

            (sources, result_sources)
        };

        let order = topological_order(&self.nodes, &sources)?;
        let live = live_nodes(self.nodes.len(), &sources, &result_sources);

        let GraphBuilder {
            name,
            parameters,
            nodes,
            results,
            diagnostics,
        } = self;

        let mut graph = IrGraph {
            name,
            nodes: Vec::new(),
            edges: Vec::new(),
            parameters: Vec::new(),
            results: Vec::new(),
            diagnostics,
        };

        let mut param_edges = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let id = NodeId(graph.nodes.len());
            let outputs = push_outputs(&mut graph, id, vec![parameter.clone()]);
            param_edges.push(outputs[0]);
            graph.nodes.push(Node {
                id,
                name: parameter.name,
                op: OpKind::Parameter,
                attrs: Attributes::new(),
                inputs: Vec::new(),
                outputs,
            });
            graph.parameters.push(id);
        }

        let mut drafts: Vec<Option<NodeDraft>> = nodes.into_iter().map(Some).collect();
        let mut node_edges: Vec<Vec<EdgeId>> = vec![Vec::new(); drafts.len()];

        for idx in order {
            let Some(draft) = drafts[idx].take() else {
                continue;
            };
            if !live[idx] {
                log::debug!("Dropping node {} ({}): no result depends on it", draft.name, draft.op);
                continue;
            }

            let id = NodeId(graph.nodes.len());
            let inputs = connect_inputs(&mut graph, id, &sources[idx], &param_edges, &node_edges);
            let outputs = push_outputs(&mut graph, id, draft.outputs);
            node_edges[idx] = outputs.clone();

            graph.nodes.push(Node {
                id,
                name: draft.name,
                op: draft.op,
                attrs: draft.attrs,
                inputs,
                outputs,
            });
        }

        for (tensor, source) in results.iter().zip(&result_sources) {
            let id = NodeId(graph.nodes.len());
            let inputs = connect_inputs(&mut graph, id, &[*source], &param_edges, &node_edges);
            graph.nodes.push(Node {
                id,
                name: format!("{tensor}/result"),
                op: OpKind::Result,
                attrs: Attributes::new(),
                inputs,
                outputs: Vec::new(),
            });
            graph.results.push(id);
        }

        graph.validate()?;
        Ok(graph)
    }

    fn index_producers(&self) -> Result<HashMap<&str, Source>, BuildError> {
        let mut producers: HashMap<&str, (Source, &str)> = HashMap::new();

        let outputs = self
            .parameters
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.name.as_str(), Source::Parameter(idx), p.name.as_str()))
            .chain(self.nodes.iter().enumerate().flat_map(|(draft, node)| {
                node.outputs.iter().enumerate().map(move |(port, output)| {
                    (
                        output.name.as_str(),
                        Source::Node { draft, port },
                        node.name.as_str(),
                    )
                })
            }));

        for (tensor, source, owner) in outputs {
            if let Some((_, first)) = producers.insert(tensor, (source, owner)) {
                return Err(BuildError::DuplicateProducer {
                    tensor: tensor.to_string(),
                    first: first.to_string(),
                    second: owner.to_string(),
                });
            }
        }

        Ok(producers
            .into_iter()
            .map(|(tensor, (source, _))| (tensor, source))
            .collect())
    }
}

/// Kahn's algorithm; ready nodes are taken in declaration order.
fn topological_order(nodes: &[NodeDraft], sources: &[Vec<Source>]) -> Result<Vec<usize>, BuildError> {
    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (idx, inputs) in sources.iter().enumerate() {
        for source in inputs {
            if let Source::Node { draft, .. } = source {
                in_degree[idx] += 1;
                dependents[*draft].push(idx);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let nodes = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].name.clone())
            .collect();
        return Err(BuildError::CycleDetected { nodes });
    }

    Ok(order)
}

/// Marks the drafts some result transitively depends on.
fn live_nodes(count: usize, sources: &[Vec<Source>], results: &[Source]) -> Vec<bool> {
    let mut live = vec![false; count];
    let mut stack: Vec<usize> = results
        .iter()
        .filter_map(|source| match source {
            Source::Node { draft, .. } => Some(*draft),
            Source::Parameter(_) => None,
        })
        .collect();

    while let Some(idx) = stack.pop() {
        if live[idx] {
            continue;
        }
        live[idx] = true;
        stack.extend(sources[idx].iter().filter_map(|source| match source {
            Source::Node { draft, .. } => Some(*draft),
            Source::Parameter(_) => None,
        }));
    }

    live
}

fn push_outputs(graph: &mut IrGraph, node: NodeId, outputs: Vec<OutputDraft>) -> Vec<EdgeId> {
    outputs
        .into_iter()
        .enumerate()
        .map(|(index, output)| {
            let id = EdgeId(graph.edges.len());
            graph.edges.push(Edge {
                id,
                ty: output.ty,
                names: vec![output.name],
                producer: Port { node, index },
                consumers: Vec::new(),
            });
            id
        })
        .collect()
}

fn connect_inputs(
    graph: &mut IrGraph,
    node: NodeId,
    sources: &[Source],
    param_edges: &[EdgeId],
    node_edges: &[Vec<EdgeId>],
) -> Vec<EdgeId> {
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let edge = match source {
                Source::Parameter(idx) => param_edges[*idx],
                Source::Node { draft, port } => node_edges[*draft][*port],
            };
            graph.edges[edge.0].consumers.push(Port { node, index });
            edge
        })
        .collect()
}
