use std::path::PathBuf;

use graphconv_ir::{BuildError, Shape};
use strum::Display;

/// Pipeline stage that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Read,
    Infer,
    Map,
    Build,
}

/// Error type for a model conversion.
///
/// Every error aborts the whole conversion; no partial graph is returned.
#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed model at `{location}` ({stage}): {reason}")]
    MalformedModel {
        stage: Stage,
        location: String,
        reason: String,
    },

    #[error("input `{input}` is declared as {declared}, which conflicts with the requested {requested}")]
    ShapeConflict {
        input: String,
        declared: Shape,
        requested: Shape,
    },

    #[error("unsupported operator `{op_type}` in node `{node}`")]
    UnsupportedOperator { op_type: String, node: String },

    #[error("tensor `{tensor}` consumed by `{node}` has no producer")]
    DanglingReference { tensor: String, node: String },

    #[error("cycle detected through: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("invalid conversion request ({stage}): {reason}")]
    InvalidRequest { stage: Stage, reason: String },

    #[error("failed to read model file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConversionError {
    /// The stage that detected the fault.
    pub fn stage(&self) -> Stage {
        match self {
            ConversionError::UnsupportedFormat(_) | ConversionError::Io { .. } => Stage::Read,
            ConversionError::MalformedModel { stage, .. }
            | ConversionError::InvalidRequest { stage, .. } => *stage,
            ConversionError::ShapeConflict { .. } => Stage::Infer,
            ConversionError::UnsupportedOperator { .. } => Stage::Map,
            ConversionError::DanglingReference { .. } | ConversionError::CycleDetected { .. } => {
                Stage::Build
            }
        }
    }

    pub(crate) fn malformed(
        stage: Stage,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConversionError::MalformedModel {
            stage,
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_request(stage: Stage, reason: impl Into<String>) -> Self {
        ConversionError::InvalidRequest {
            stage,
            reason: reason.into(),
        }
    }
}

impl From<BuildError> for ConversionError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::DanglingReference { tensor, node } => {
                ConversionError::DanglingReference { tensor, node }
            }
            BuildError::CycleDetected { nodes } => ConversionError::CycleDetected { nodes },
            BuildError::DuplicateProducer { ref tensor, .. } => {
                ConversionError::malformed(Stage::Build, tensor.clone(), err.to_string())
            }
            BuildError::InvalidGraph { ref node, .. } => {
                ConversionError::malformed(Stage::Build, node.clone(), err.to_string())
            }
        }
    }
}
