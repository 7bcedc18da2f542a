//! Source format readers.
//!
//! Each front-end turns one family of [`ModelSource`]s into a [`ForeignGraph`].
//! The registry tries them in registration order and uses the first one that
//! accepts the source.

pub mod onnx;
pub mod paddle;

use std::sync::Arc;

use crate::{ConversionError, ConversionRequest, ForeignGraph, Framework, ModelSource};

/// A reader for one foreign model format.
pub trait FrontEnd: Send + Sync {
    fn framework(&self) -> Framework;

    /// Cheap check whether this front-end understands `source`.
    fn can_read(&self, source: &ModelSource) -> bool;

    /// Parses the request's source into a foreign graph.
    fn read(&self, request: &ConversionRequest) -> Result<ForeignGraph, ConversionError>;
}

/// Ordered set of front-ends.
#[derive(Clone, Default)]
pub struct FrontEndRegistry {
    frontends: Vec<Arc<dyn FrontEnd>>,
}

impl FrontEndRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ONNX first, then Paddle.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(onnx::OnnxFrontEnd);
        registry.register(paddle::PaddleFrontEnd);
        registry
    }

    pub fn register<F: FrontEnd + 'static>(&mut self, frontend: F) -> &mut Self {
        self.frontends.push(Arc::new(frontend));
        self
    }

    pub fn frameworks(&self) -> Vec<Framework> {
        self.frontends.iter().map(|f| f.framework()).collect()
    }

    /// First front-end that accepts `source`.
    pub fn select(&self, source: &ModelSource) -> Result<&dyn FrontEnd, ConversionError> {
        self.frontends
            .iter()
            .find(|frontend| frontend.can_read(source))
            .map(|frontend| frontend.as_ref())
            .ok_or_else(|| {
                ConversionError::UnsupportedFormat(format!(
                    "no front-end accepts the {} source",
                    source.kind()
                ))
            })
    }
}

impl core::fmt::Debug for FrontEndRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrontEndRegistry")
            .field("frontends", &self.frameworks())
            .finish()
    }
}
