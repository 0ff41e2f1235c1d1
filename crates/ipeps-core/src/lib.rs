#![warn(missing_debug_implementations)]
//! Dense real tensor algebra for double-layer (ket/bra) tensor networks.
//!
//! This crate provides:
//! - [`Index`]: legs identified by a random id and a ket/bra [`Layer`]
//! - [`TagSet`]: descriptive tags on legs
//! - [`Tensor`]: dense row-major tensors contracted by leg identity
//! - [`factorize`]: SVD splitting with optional truncation
//! - [`backend`]: GEMM, SVD and symmetric eigendecomposition kernels

pub mod backend;
pub mod error;
pub mod factorize;
pub mod index;
pub mod tagset;
pub mod tensor;

pub use error::{Result, TensorError};
pub use factorize::{factorize, Canonical, Factorization, FactorizeOptions};
pub use index::{generate_id, DynId, Index, Layer};
pub use tagset::{TagSet, TagSetError};
pub use tensor::{contract_all, Tensor};
