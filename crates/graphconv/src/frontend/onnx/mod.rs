//! ONNX `ModelProto` reader.

mod proto_conversion;

pub use proto_conversion::{declared_tensor, element_type_from_proto};

use std::collections::HashSet;

use graphconv_ir::{Diagnostic, DiagnosticKind, TensorData};
use protobuf::Message;

use crate::protos::onnx::ModelProto;
use crate::{
    ConversionError, ConversionRequest, ForeignGraph, ForeignNode, Framework, ModelSource, Stage,
};

use super::FrontEnd;

/// Minimum supported version of the default operator set.
pub const MIN_OPSET_VERSION: i64 = 7;

const DEFAULT_DOMAINS: [&str; 2] = ["", "ai.onnx"];

/// Reads serialized ONNX models.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxFrontEnd;

impl OnnxFrontEnd {
    /// Parses `bytes` as a `ModelProto` carrying a graph.
    pub fn parse(bytes: &[u8]) -> Result<ModelProto, ConversionError> {
        let model = ModelProto::parse_from_bytes(bytes).map_err(|err| {
            ConversionError::malformed(Stage::Read, "model", format!("invalid ONNX protobuf: {err}"))
        })?;
        if model.ir_version <= 0 || model.graph.is_none() {
            return Err(ConversionError::malformed(
                Stage::Read,
                "model",
                "missing IR version or graph",
            ));
        }
        Ok(model)
    }

    /// Converts a parsed model into a foreign graph.
    pub fn from_proto(model: &ModelProto) -> Result<ForeignGraph, ConversionError> {
        let opset = default_opset(model)?;
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| ConversionError::malformed(Stage::Read, "model", "missing graph"))?;

        let name = if graph.name.is_empty() {
            "onnx_model"
        } else {
            graph.name.as_str()
        };
        let mut foreign = ForeignGraph::new(Framework::Onnx, name);
        foreign.opset = Some(opset);

        for initializer in &graph.initializer {
            if initializer.name.is_empty() {
                return Err(ConversionError::malformed(
                    Stage::Read,
                    name,
                    "initializer without a name",
                ));
            }
            let data = TensorData::try_from(initializer)?;
            foreign.constants.insert(initializer.name.clone(), data);
        }

        // Inputs that are also initializers are weights with a default value.
        for input in &graph.input {
            if foreign.constants.contains_key(&input.name) {
                log::debug!("Input {} has an initializer, treating it as a constant", input.name);
                continue;
            }
            foreign.inputs.push(declared_tensor(input)?);
        }

        for output in &graph.output {
            foreign.outputs.push(declared_tensor(output)?);
        }

        let mut names = HashSet::new();
        for (idx, node) in graph.node.iter().enumerate() {
            if !DEFAULT_DOMAINS.contains(&node.domain.as_str()) {
                return Err(ConversionError::UnsupportedFormat(format!(
                    "operator domain `{}` used by node `{}` is not supported",
                    node.domain, node.name
                )));
            }

            let base = if node.name.is_empty() {
                format!("{}_{idx}", node.op_type.to_lowercase())
            } else {
                node.name.clone()
            };
            let mut node_name = base.clone();
            let mut suffix = idx;
            while !names.insert(node_name.clone()) {
                node_name = format!("{base}_{suffix}");
                suffix += 1;
            }

            let attrs = proto_conversion::convert_attributes(&node.attribute, &node_name)?;
            foreign.nodes.push(
                ForeignNode::new(
                    node_name,
                    node.op_type.as_str(),
                    node.input.clone(),
                    node.output.clone(),
                )
                .with_attrs(attrs),
            );
        }

        Ok(foreign)
    }
}

fn default_opset(model: &ModelProto) -> Result<i64, ConversionError> {
    let version = model
        .opset_import
        .iter()
        .find(|opset| DEFAULT_DOMAINS.contains(&opset.domain.as_str()))
        .map(|opset| opset.version)
        .ok_or_else(|| {
            ConversionError::malformed(Stage::Read, "model", "no default operator set is imported")
        })?;

    if version < MIN_OPSET_VERSION {
        return Err(ConversionError::malformed(
            Stage::Read,
            "model",
            format!("operator set {version} is older than the minimum {MIN_OPSET_VERSION}"),
        ));
    }
    Ok(version)
}

impl FrontEnd for OnnxFrontEnd {
    fn framework(&self) -> Framework {
        Framework::Onnx
    }

    fn can_read(&self, source: &ModelSource) -> bool {
        match source {
            // Unknown fields are skipped while parsing, so check the structure too.
            ModelSource::Bytes(bytes) => ModelProto::parse_from_bytes(bytes)
                .is_ok_and(|model| model.ir_version > 0 && model.graph.is_some()),
            _ => false,
        }
    }

    fn read(&self, request: &ConversionRequest) -> Result<ForeignGraph, ConversionError> {
        let ModelSource::Bytes(bytes) = &request.source else {
            return Err(ConversionError::UnsupportedFormat(format!(
                "ONNX models are read from bytes, got a {} source",
                request.source.kind()
            )));
        };

        let model = Self::parse(bytes)?;
        let mut foreign = Self::from_proto(&model)?;
        log::debug!(
            "Read ONNX graph {} (opset {:?}, {} nodes, {} constants)",
            foreign.name,
            foreign.opset,
            foreign.nodes.len(),
            foreign.constants.len()
        );

        for (idx, example) in request.example_inputs.iter().enumerate() {
            let tensor = example
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{idx}"));
            log::warn!("Ignoring example input {tensor}: ONNX graphs are static");
            foreign
                .diagnostics
                .push(Diagnostic::new(tensor, DiagnosticKind::IgnoredExampleInput));
        }

        Ok(foreign)
    }
}
