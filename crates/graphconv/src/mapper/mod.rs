//! Operator mapping: rewrites every foreign node into canonical node drafts.

mod names;
mod rules;
mod table;

pub use names::NameAllocator;
pub use rules::{decode_dtype, onnx_constant_value};
pub use table::{AttrKind, AttrMap, Construct, InferRule, RULES, Rule, is_supported};

use std::collections::{HashMap, HashSet};

use graphconv_ir::{
    AttributeValue, Attributes, ElementType, NodeDraft, OpKind, Shape, TensorData, TensorType,
};

use crate::{AnnotatedGraph, ConversionError, ForeignNode, Framework, Stage};

/// Rule the table picks for `node`.
pub fn select_rule(framework: Framework, node: &ForeignNode) -> Option<&'static Rule> {
    table::select(framework, node)
}

/// Canonical drafts plus the parameter and result order of the graph to build.
#[derive(Debug, Clone)]
pub struct MappedGraph {
    pub name: String,
    pub parameters: Vec<(String, TensorType)>,
    pub nodes: Vec<NodeDraft>,
    pub results: Vec<String>,
}

/// Per-conversion mapping state.
#[derive(Debug)]
pub struct MapContext<'a> {
    graph: &'a AnnotatedGraph,
    names: NameAllocator,
    drafts: Vec<NodeDraft>,
    /// Foreign tensor names bound to another tensor without a node.
    aliases: HashMap<String, String>,
    materialized: HashSet<String>,
    /// Values known at conversion time, by canonical tensor name.
    values: HashMap<String, TensorData>,
}

impl<'a> MapContext<'a> {
    fn new(graph: &'a AnnotatedGraph) -> Self {
        let foreign = &graph.graph;
        let reserved = foreign
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .chain(foreign.constants.keys().cloned())
            .chain(foreign.nodes.iter().flat_map(|node| {
                node.outputs
                    .iter()
                    .cloned()
                    .chain(std::iter::once(node.name.clone()))
            }));

        Self {
            graph,
            names: NameAllocator::new(reserved),
            drafts: Vec::new(),
            aliases: HashMap::new(),
            materialized: HashSet::new(),
            values: foreign.constants.clone(),
        }
    }

    pub fn framework(&self) -> Framework {
        self.graph.graph.framework
    }

    /// Canonical tensor for a foreign name, materializing constants on first use.
    pub fn resolve(&mut self, tensor: &str) -> String {
        let mut name = tensor;
        while let Some(target) = self.aliases.get(name) {
            name = target;
        }
        let name = name.to_string();

        if let Some(data) = self.graph.graph.constants.get(&name)
            && self.materialized.insert(name.clone())
        {
            log::debug!("Materializing constant {name} : {}", data.tensor_type());
            self.drafts.push(
                NodeDraft::new(name.as_str(), OpKind::Constant)
                    .attr("value", AttributeValue::Tensor(data.clone()))
                    .output(name.as_str(), data.tensor_type()),
            );
        }
        name
    }

    /// Canonical tensor feeding input `idx` of `node`, if present.
    pub fn input(&mut self, node: &ForeignNode, idx: usize) -> Option<String> {
        node.inputs
            .get(idx)
            .filter(|name| !name.is_empty())
            .map(|name| self.resolve(name))
    }

    /// Like [`input`](Self::input), for inputs the operator cannot do without.
    pub fn required_input(&mut self, node: &ForeignNode, idx: usize) -> Result<String, ConversionError> {
        self.input(node, idx).ok_or_else(|| {
            ConversionError::malformed(Stage::Map, &node.name, format!("input {idx} is missing"))
        })
    }

    /// Inferred type of a foreign or canonical tensor.
    pub fn ty(&self, tensor: &str) -> TensorType {
        self.graph
            .ty(tensor)
            .cloned()
            .or_else(|| {
                self.drafts
                    .iter()
                    .flat_map(|draft| &draft.outputs)
                    .find(|output| output.name == tensor)
                    .map(|output| output.ty.clone())
            })
            .unwrap_or_else(|| TensorType::new(crate::DEFAULT_ELEMENT_TYPE, Shape::Unranked))
    }

    /// Known value of a tensor, following aliases.
    pub fn value(&self, tensor: &str) -> Option<&TensorData> {
        let mut name = tensor;
        while let Some(target) = self.aliases.get(name) {
            name = target;
        }
        self.values.get(name)
    }

    pub fn record_value(&mut self, tensor: &str, data: TensorData) {
        self.values.insert(tensor.to_string(), data);
    }

    /// A fresh internal name derived from `base`.
    pub fn fresh(&mut self, base: &str) -> String {
        self.names.fresh(base)
    }

    pub fn alias(&mut self, tensor: &str, target: &str) {
        self.aliases.insert(tensor.to_string(), target.to_string());
    }

    pub fn emit(&mut self, draft: NodeDraft) {
        self.drafts.push(draft);
    }

    /// Emits a constant under a fresh name and returns that name.
    pub fn constant(&mut self, base: &str, data: TensorData) -> String {
        let name = self.fresh(base);
        self.record_value(&name, data.clone());
        let ty = data.tensor_type();
        self.emit(
            NodeDraft::new(name.as_str(), OpKind::Constant)
                .attr("value", AttributeValue::Tensor(data))
                .output(name.as_str(), ty),
        );
        name
    }

    /// Emits a conversion of `input` to `destination` under a fresh name.
    pub fn convert(&mut self, base: &str, input: &str, destination: ElementType) -> String {
        let name = self.fresh(base);
        let shape = self.ty(input).shape;
        self.emit(
            NodeDraft::new(name.as_str(), OpKind::Convert)
                .input(input)
                .attr("destination_type", AttributeValue::ElementType(destination))
                .output(name.as_str(), TensorType::new(destination, shape)),
        );
        name
    }

    /// Type of the `idx`-th output of `node`.
    pub fn output_type(&self, node: &ForeignNode, idx: usize) -> TensorType {
        node.outputs
            .get(idx)
            .map(|name| self.ty(name))
            .unwrap_or_else(|| TensorType::new(crate::DEFAULT_ELEMENT_TYPE, Shape::Unranked))
    }

    /// Emits a single node named after `node` producing its first output.
    pub fn emit_node(
        &mut self,
        node: &ForeignNode,
        op: OpKind,
        inputs: Vec<String>,
        attrs: Attributes,
    ) -> Result<(), ConversionError> {
        let output = node.outputs.first().ok_or_else(|| {
            ConversionError::malformed(Stage::Map, &node.name, "node has no outputs")
        })?;
        let mut draft = NodeDraft::new(node.name.as_str(), op).output(output.as_str(), self.output_type(node, 0));
        draft.inputs = inputs;
        draft.attrs = attrs;
        self.emit(draft);
        Ok(())
    }
}

/// Maps every node of `graph` and picks the results.
///
/// `outputs` selects and orders results by tensor name; when empty, the source's
/// declared outputs are used.
pub fn map(graph: &AnnotatedGraph, outputs: &[String]) -> Result<MappedGraph, ConversionError> {
    let framework = graph.graph.framework;
    let mut ctx = MapContext::new(graph);

    for node in &graph.graph.nodes {
        let rule = table::select(framework, node).ok_or_else(|| {
            ConversionError::UnsupportedOperator {
                op_type: node.op_type.clone(),
                node: node.name.clone(),
            }
        })?;

        let (min, max) = rule.inputs;
        if node.inputs.len() < min || node.inputs.len() > max {
            return Err(ConversionError::malformed(
                Stage::Map,
                &node.name,
                format!(
                    "{} takes {min} to {max} inputs, got {}",
                    node.op_type,
                    node.inputs.len()
                ),
            ));
        }

        log::debug!("Mapping {} ({}) with {:?}", node.name, node.op_type, rule.construct);
        apply(&mut ctx, node, rule)?;
    }

    let selected: Vec<String> = if outputs.is_empty() {
        graph.graph.outputs.iter().map(|o| o.name.clone()).collect()
    } else {
        for name in outputs {
            if graph.ty(name).is_none() {
                return Err(ConversionError::invalid_request(
                    Stage::Map,
                    format!("requested output `{name}` is not a tensor of the model"),
                ));
            }
        }
        outputs.to_vec()
    };
    let results = selected.iter().map(|name| ctx.resolve(name)).collect();

    Ok(MappedGraph {
        name: graph.graph.name.clone(),
        parameters: graph.parameters.clone(),
        nodes: ctx.drafts,
        results,
    })
}

fn apply(ctx: &mut MapContext<'_>, node: &ForeignNode, rule: &Rule) -> Result<(), ConversionError> {
    match rule.construct {
        Construct::Direct { op, attrs } => {
            let inputs: Vec<String> = node
                .present_inputs()
                .map(|(_, name)| ctx.resolve(name))
                .collect();
            let attrs = map_attributes(node, attrs)?;
            ctx.emit_node(node, op, inputs, attrs)
        }
        Construct::Parametrized { op, operands } => {
            let x = ctx.required_input(node, 0)?;
            let elem_type = ctx.ty(&x).elem_type;

            let mut inputs = vec![x];
            for (attr, default) in operands {
                let value = numeric_attribute(node, attr)?.unwrap_or(*default);
                inputs.push(ctx.constant(
                    &format!("{}/{attr}", node.name),
                    TensorData::scalar(elem_type, value),
                ));
            }
            ctx.emit_node(node, op, inputs, Attributes::new())
        }
        Construct::Subgraph(build) => build(ctx, node),
        Construct::Alias => {
            let source = ctx.required_input(node, 0)?;
            for output in &node.outputs {
                ctx.alias(output, &source);
            }
            Ok(())
        }
    }
}

fn numeric_attribute(node: &ForeignNode, attr: &str) -> Result<Option<f64>, ConversionError> {
    match node.attrs.get(attr) {
        None => Ok(None),
        Some(AttributeValue::Float32(v)) => Ok(Some(*v as f64)),
        Some(AttributeValue::Float64(v)) => Ok(Some(*v)),
        Some(AttributeValue::Int64(v)) => Ok(Some(*v as f64)),
        Some(other) => Err(ConversionError::malformed(
            Stage::Map,
            &node.name,
            format!("attribute `{attr}` must be numeric, got {other}"),
        )),
    }
}

fn map_attributes(node: &ForeignNode, maps: &[AttrMap]) -> Result<Attributes, ConversionError> {
    let mut attrs = Attributes::new();
    for map in maps {
        let Some(value) = numeric_attribute(node, map.from)?.or(map.default) else {
            continue;
        };
        let value = match map.kind {
            AttrKind::Float32 => AttributeValue::Float32(value as f32),
            AttrKind::Float64 => AttributeValue::Float64(value),
            AttrKind::Int64 => AttributeValue::Int64(value as i64),
        };
        attrs.insert(map.to.to_string(), value);
    }
    Ok(attrs)
}
