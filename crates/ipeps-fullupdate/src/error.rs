//! Error types for the full-update engine.

use ipeps_core::{TagSetError, TensorError};
use thiserror::Error;

/// Result type for full-update operations.
pub type Result<T> = std::result::Result<T, FullUpdateError>;

/// Errors raised while validating configuration.
///
/// These are always reported before any tensor work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown normalization policy '{0}'")]
    UnknownNormalization(String),

    #[error("unknown optimization strategy '{0}'")]
    UnknownStrategy(String),

    #[error("unknown {kind} '{value}'")]
    UnknownChoice { kind: &'static str, value: String },

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("unsupported cluster topology: {0}")]
    UnsupportedTopology(String),
}

/// Errors that can occur during a full-update call.
#[derive(Debug, Error)]
pub enum FullUpdateError {
    /// Leg pairing, dimension or scalar-ness failures in the tensor layer.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tag(#[from] TagSetError),

    /// A contraction that must be scalar (or have a fixed leg set) did not.
    #[error("contract violation in {context}: {message}")]
    ContractViolation {
        context: &'static str,
        message: String,
    },

    /// The cluster, plaquette or environment is inconsistent.
    #[error("geometry error: {0}")]
    Geometry(String),
}

impl FullUpdateError {
    pub(crate) fn contract(context: &'static str, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            context,
            message: message.into(),
        }
    }
}
