#![warn(missing_debug_implementations)]
//! Local variational optimization for the full update of iPEPS.
//!
//! After a Trotter gate is applied to three or four sites of a 2×2 plaquette,
//! the on-site tensors are re-fitted against the gated state in the metric of
//! a fixed CTM environment:
//!
//! 1. [`environment`] assembles the reduced environment `N` and the gated
//!    target `K` from corner/transfer tensors and the site tensors
//! 2. [`regularize`] symmetrizes `N`, clips negative eigenvalues and builds
//!    pseudo-inverses
//! 3. [`cost`] evaluates `f = ⟨ψ'|N|ψ'⟩ − 2⟨ψ'|K⟩ + ⟨Gψ|N|Gψ⟩` and its gradients
//! 4. [`als`], [`bicg`] and [`nlcg`] minimize `f`
//! 5. [`normalize`] rescales the updated tensors
//!
//! [`full_update`] runs the whole step on a [`Cluster`];
//! [`optimize_reduced`] starts from an already reduced problem.
//!
//! # Example
//!
//! ```
//! use ipeps_fullupdate::{
//!     full_update, Cluster, FullUpdateOptions, Gate, Plaquette, PlaquetteEnvironment,
//!     Position, SiteId, SiteTensor,
//! };
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let mut cluster = Cluster::new();
//! for name in ["A", "B", "C", "D"] {
//!     cluster.insert(name, SiteTensor::random(&mut rng, name, 2, 2).unwrap());
//! }
//! let plaquette = Plaquette::abcd();
//! let env = PlaquetteEnvironment::random(&mut rng, &plaquette, &cluster, 3).unwrap();
//! let active = [Position::UpperLeft, Position::UpperRight, Position::LowerRight];
//! let phys: Vec<_> = active
//!     .iter()
//!     .map(|&p| cluster.site(plaquette.site(p)).unwrap().phys().clone())
//!     .collect();
//! let gate = Gate::identity(phys).unwrap();
//!
//! let diag = full_update(
//!     &mut cluster,
//!     &plaquette,
//!     &env,
//!     &gate,
//!     &active,
//!     &FullUpdateOptions::default(),
//! )
//! .unwrap();
//! assert!(diag.relative_cost() < 1e-10);
//! assert!(cluster.site(&SiteId::new("A")).is_ok());
//! ```

pub mod als;
pub mod bicg;
pub mod cluster;
pub mod cost;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod gate;
pub mod nlcg;
pub mod normalize;
pub mod options;
pub mod plaquette;
pub mod regularize;
pub mod topology;
pub mod update;

#[cfg(test)]
mod testutil;

pub use als::{AlsController, AlsReport, BicgSolver, LocalSolution, LocalSolver, PseudoInverseSolver};
pub use bicg::{bicg, solve_operator, BicgResult, LinearOperator, OperatorTensor, Preconditioner};
pub use cluster::{Cluster, Direction, SiteId, SiteTensor};
pub use cost::{CostFunctional, LocalSystem};
pub use diagnostics::Diagnostics;
pub use environment::{assemble, ActiveSite, CornerBlock, GatedState, PlaquetteEnvironment, ReducedEnvironment};
pub use error::{ConfigError, FullUpdateError, Result};
pub use gate::Gate;
pub use nlcg::{
    polak_ribiere, CgResult, CgVector, FlattenedObjective, LineSearch, Objective, ParameterBlock,
    TensorSet,
};
pub use normalize::normalize;
pub use options::{
    BicgOptions, CgOptions, CgRepresentation, FullUpdateOptions, NormalizationPolicy,
    PreconditionerKind, RegularizationOptions, ResidualNorm, SingularPolicy, Strategy,
};
pub use plaquette::{GluedPlaquette, GluedSite, Plaquette, Position};
pub use regularize::{apply_operator, Regularized, Regularizer, SpectrumDiagnostics};
pub use topology::ActiveTopology;
pub use update::{full_update, optimize_reduced, ReducedProblem};
