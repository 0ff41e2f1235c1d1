//! Error types for tensor operations.

use thiserror::Error;

use crate::index::Index;
use crate::tagset::TagSetError;

/// Result type for tensor operations.
pub type Result<T> = std::result::Result<T, TensorError>;

/// Errors that can occur in tensor operations.
#[derive(Debug, Error)]
pub enum TensorError {
    /// Data length does not match the product of leg dimensions.
    #[error("data length {len} does not match leg dimensions (expected {expected})")]
    DataLength { len: usize, expected: usize },

    /// The same leg appears twice on one tensor.
    #[error("duplicate leg {0:?}")]
    DuplicateLeg(Index),

    /// Two legs that pair up disagree on their dimension.
    #[error("dimension mismatch on leg {leg:?}: {left} vs {right}")]
    DimensionMismatch { leg: Index, left: usize, right: usize },

    /// A leg that an operation needs is not present.
    #[error("leg {0:?} not found on tensor")]
    LegNotFound(Index),

    /// Two tensors were expected to carry the same set of legs.
    #[error("leg sets differ: {left:?} vs {right:?}")]
    LegSetMismatch { left: Vec<Index>, right: Vec<Index> },

    /// A contraction that must produce a scalar left open legs.
    #[error("expected a scalar, but {rank} open leg(s) remain: {legs:?}")]
    NotAScalar { rank: usize, legs: Vec<Index> },

    /// Invalid argument for an operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Tag(#[from] TagSetError),

    /// Numerical backend failure.
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
