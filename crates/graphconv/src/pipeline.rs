//! The conversion pipeline: read, infer, map, build.

use std::fs;

use graphconv_ir::{GraphBuilder, IrGraph};

use crate::frontend::{FrontEnd, FrontEndRegistry};
use crate::mapper::map;
use crate::{ConversionError, ConversionRequest, ModelSource, infer};

/// Converts foreign models into [`IrGraph`]s.
///
/// Holds no per-conversion state, so one converter can serve any number of
/// requests, also concurrently.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    registry: FrontEndRegistry,
}

impl Converter {
    /// A converter with no front-ends registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A converter reading ONNX and PaddlePaddle models.
    pub fn with_defaults() -> Self {
        Self {
            registry: FrontEndRegistry::with_defaults(),
        }
    }

    pub fn register<F: FrontEnd + 'static>(&mut self, frontend: F) -> &mut Self {
        self.registry.register(frontend);
        self
    }

    pub fn registry(&self) -> &FrontEndRegistry {
        &self.registry
    }

    /// Runs the whole pipeline on `request`.
    pub fn convert(&self, mut request: ConversionRequest) -> Result<IrGraph, ConversionError> {
        if let ModelSource::Path(path) = &request.source {
            log::info!("Reading model from {}", path.display());
            let bytes = fs::read(path).map_err(|source| ConversionError::Io {
                path: path.clone(),
                source,
            })?;
            request.source = ModelSource::Bytes(bytes);
        }

        let frontend = self.registry.select(&request.source)?;
        log::info!("Reading {} model", frontend.framework());
        let foreign = frontend.read(&request)?;
        foreign.check()?;
        log::debug!(
            "Read {}: {} nodes, {} inputs, {} outputs",
            foreign.name,
            foreign.nodes.len(),
            foreign.inputs.len(),
            foreign.outputs.len()
        );

        log::info!("Inferring types of {}", foreign.name);
        let annotated = infer(foreign, &request.inputs)?;

        log::info!("Mapping operators of {}", annotated.graph.name);
        let mapped = map(&annotated, &request.outputs)?;

        let mut builder = GraphBuilder::new(mapped.name);
        for (name, ty) in mapped.parameters {
            builder.parameter(name, ty);
        }
        builder.nodes(mapped.nodes);
        for result in mapped.results {
            builder.result(result);
        }
        let graph = builder.build()?.with_diagnostics(annotated.diagnostics);

        log::info!(
            "Converted {} into {} nodes with {} diagnostics",
            graph.name(),
            graph.nodes().len(),
            graph.diagnostics().len()
        );
        Ok(graph)
    }
}

/// Converts `request` with the default front-ends.
pub fn convert(request: ConversionRequest) -> Result<IrGraph, ConversionError> {
    Converter::with_defaults().convert(request)
}
