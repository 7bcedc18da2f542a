use super::{InputSpec, Layer, Program, trace};
use crate::ConversionError;

/// High-level model: a network bundled with its input and label specs.
pub struct HapiModel {
    pub network: Box<dyn Layer>,
    pub inputs: Vec<InputSpec>,
    /// Training labels; not part of the inference graph.
    pub labels: Vec<InputSpec>,
}

impl HapiModel {
    pub fn new<L: Layer + 'static>(network: L, inputs: Vec<InputSpec>) -> Self {
        Self {
            network: Box::new(network),
            inputs,
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: Vec<InputSpec>) -> Self {
        self.labels = labels;
        self
    }

    /// Traces the network against the declared input specs.
    pub fn to_program(&self) -> Result<Program, ConversionError> {
        if !self.labels.is_empty() {
            log::debug!("Ignoring {} label specs", self.labels.len());
        }
        trace(self.network.as_ref(), &self.inputs, "hapi_model")
    }
}
