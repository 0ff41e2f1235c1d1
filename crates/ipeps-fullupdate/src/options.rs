//! Options for the full-update optimization.

use std::str::FromStr;

use crate::error::ConfigError;

/// How the active tensors are optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Alternating least squares, each local system solved by pseudo-inverse.
    #[default]
    AlsPseudoInverse,
    /// Alternating least squares, each local system solved by BiCG.
    AlsBicg,
    /// Polak–Ribière conjugate gradient on all active tensors jointly.
    JointConjugateGradient,
    /// `ψ = N⁺ K` followed by sequential SVD splitting (chain clusters only).
    DirectPseudoInverse,
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "als" | "als-pinv" | "als-pseudo-inverse" => Ok(Self::AlsPseudoInverse),
            "als-bicg" | "als-linsolve" => Ok(Self::AlsBicg),
            "cg" | "joint-cg" | "conjugate-gradient" => Ok(Self::JointConjugateGradient),
            "pinv" | "direct-pinv" | "direct" => Ok(Self::DirectPseudoInverse),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Rescaling applied to the updated tensors after optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationPolicy {
    None,
    /// `T ← T / sqrt(max|T|)` for each updated tensor.
    #[default]
    SqrtMaxElement,
    /// `T ← T / ⟨ψ'|N|ψ'⟩^(1/2n)` for each of the `n` updated tensors.
    CostPower,
    /// All cluster tensors rescaled to the geometric mean of their max elements.
    GlobalBalance,
}

impl FromStr for NormalizationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "NONE" => Ok(Self::None),
            "sqrt-max-element" | "BLE" => Ok(Self::SqrtMaxElement),
            "cost-power" | "PTN3" => Ok(Self::CostPower),
            "global-balance" | "BALANCE" => Ok(Self::GlobalBalance),
            _ => Err(ConfigError::UnknownNormalization(s.to_string())),
        }
    }
}

/// What to put in place of `1/λ` for eigenvalues flagged below the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingularPolicy {
    /// Moore–Penrose: flagged directions are dropped.
    #[default]
    Zero,
    /// Flagged directions are kept with weight one.
    Unit,
}

impl FromStr for SingularPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "unit" | "one" => Ok(Self::Unit),
            _ => Err(ConfigError::UnknownChoice {
                kind: "singular policy",
                value: s.to_string(),
            }),
        }
    }
}

/// Norm used for BiCG residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualNorm {
    #[default]
    Euclidean,
    MaxAbs,
}

impl FromStr for ResidualNorm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "max" | "max-abs" | "linf" => Ok(Self::MaxAbs),
            _ => Err(ConfigError::UnknownChoice {
                kind: "residual norm",
                value: s.to_string(),
            }),
        }
    }
}

/// Preconditioner for the BiCG solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreconditionerKind {
    Identity,
    /// Inverse of the operator diagonal.
    #[default]
    Diagonal,
    /// Regularized pseudo-inverse of the operator.
    PseudoInverse,
}

impl FromStr for PreconditionerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Self::Identity),
            "diagonal" | "jacobi" => Ok(Self::Diagonal),
            "pinv" | "pseudo-inverse" => Ok(Self::PseudoInverse),
            _ => Err(ConfigError::UnknownChoice {
                kind: "preconditioner",
                value: s.to_string(),
            }),
        }
    }
}

/// Vector representation used by the nonlinear CG driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CgRepresentation {
    /// Tensors are updated in place; doubling/backtracking line search.
    #[default]
    TensorNative,
    /// Tensors are flattened into one parameter vector; bracketing + Brent line search.
    Flattened,
}

/// Options for environment regularization.
#[derive(Debug, Clone)]
pub struct RegularizationOptions {
    /// Replace the operator by its Hermitian part.
    pub symmetrize: bool,
    /// Clip negative eigenvalues to zero.
    pub positive_definite: bool,
    /// Relative eigenvalue cutoff `λ/λ_max` below which directions are flagged.
    pub eigen_cutoff: f64,
    pub singular_policy: SingularPolicy,
}

impl Default for RegularizationOptions {
    fn default() -> Self {
        Self {
            symmetrize: true,
            positive_definite: true,
            eigen_cutoff: 1e-10,
            singular_policy: SingularPolicy::Zero,
        }
    }
}

impl RegularizationOptions {
    pub fn with_symmetrize(mut self, symmetrize: bool) -> Self {
        self.symmetrize = symmetrize;
        self
    }

    pub fn with_positive_definite(mut self, positive_definite: bool) -> Self {
        self.positive_definite = positive_definite;
        self
    }

    pub fn with_eigen_cutoff(mut self, cutoff: f64) -> Self {
        self.eigen_cutoff = cutoff;
        self
    }

    pub fn with_singular_policy(mut self, policy: SingularPolicy) -> Self {
        self.singular_policy = policy;
        self
    }
}

/// Options for the BiCG local solver.
#[derive(Debug, Clone)]
pub struct BicgOptions {
    /// Residual tolerance.
    pub tol: f64,
    pub max_iter: usize,
    pub norm: ResidualNorm,
    pub preconditioner: PreconditionerKind,
    /// Rescale operator and right-hand side to unit max-element before iterating.
    pub unit_scale: bool,
}

impl Default for BicgOptions {
    fn default() -> Self {
        Self {
            tol: 1e-10,
            max_iter: 500,
            norm: ResidualNorm::Euclidean,
            preconditioner: PreconditionerKind::Diagonal,
            unit_scale: true,
        }
    }
}

impl BicgOptions {
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_norm(mut self, norm: ResidualNorm) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_preconditioner(mut self, preconditioner: PreconditionerKind) -> Self {
        self.preconditioner = preconditioner;
        self
    }

    pub fn with_unit_scale(mut self, unit_scale: bool) -> Self {
        self.unit_scale = unit_scale;
        self
    }
}

/// Options for the nonlinear conjugate-gradient driver.
#[derive(Debug, Clone)]
pub struct CgOptions {
    pub max_iter: usize,
    /// Stop when `‖g‖ ≤ gradient_tol · max(1, ‖g₀‖)`.
    pub gradient_tol: f64,
    /// Stop when one iteration lowers the cost by less than this fraction of
    /// the initial cost.
    pub improvement_tol: f64,
    /// Tolerance of the one-dimensional minimization.
    pub line_search_tol: f64,
    /// First trial step of the line search.
    pub initial_step: f64,
    pub representation: CgRepresentation,
}

impl Default for CgOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            gradient_tol: 1e-10,
            improvement_tol: 1e-12,
            line_search_tol: 1e-8,
            initial_step: 1.0,
            representation: CgRepresentation::TensorNative,
        }
    }
}

impl CgOptions {
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_gradient_tol(mut self, tol: f64) -> Self {
        self.gradient_tol = tol;
        self
    }

    pub fn with_improvement_tol(mut self, tol: f64) -> Self {
        self.improvement_tol = tol;
        self
    }

    pub fn with_line_search_tol(mut self, tol: f64) -> Self {
        self.line_search_tol = tol;
        self
    }

    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
        self
    }

    pub fn with_representation(mut self, representation: CgRepresentation) -> Self {
        self.representation = representation;
        self
    }
}

/// Options for a full-update call.
#[derive(Debug, Clone)]
pub struct FullUpdateOptions {
    pub strategy: Strategy,
    /// ALS convergence threshold on the relative change of the cost between sweeps.
    pub fdistance_eps: f64,
    pub max_sweeps: usize,
    /// Symmetrize each local operator `M_j` before solving (ALS).
    pub symmetrize_local: bool,
    /// Raise solver tolerances to `cond(N)·ε` when the environment is ill-conditioned.
    pub scale_tolerances: bool,
    pub regularization: RegularizationOptions,
    pub bicg: BicgOptions,
    pub cg: CgOptions,
    pub normalization: NormalizationPolicy,
    /// Truncation of the direct pseudo-inverse split. Defaults to the
    /// original bond dimension.
    pub max_bond_dim: Option<usize>,
}

impl Default for FullUpdateOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::AlsPseudoInverse,
            fdistance_eps: 1e-12,
            max_sweeps: 50,
            symmetrize_local: true,
            scale_tolerances: true,
            regularization: RegularizationOptions::default(),
            bicg: BicgOptions::default(),
            cg: CgOptions::default(),
            normalization: NormalizationPolicy::SqrtMaxElement,
            max_bond_dim: None,
        }
    }
}

impl FullUpdateOptions {
    /// Create options for the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_fdistance_eps(mut self, eps: f64) -> Self {
        self.fdistance_eps = eps;
        self
    }

    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    pub fn with_symmetrize_local(mut self, symmetrize: bool) -> Self {
        self.symmetrize_local = symmetrize;
        self
    }

    pub fn with_scale_tolerances(mut self, scale: bool) -> Self {
        self.scale_tolerances = scale;
        self
    }

    pub fn with_regularization(mut self, regularization: RegularizationOptions) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn with_bicg(mut self, bicg: BicgOptions) -> Self {
        self.bicg = bicg;
        self
    }

    pub fn with_cg(mut self, cg: CgOptions) -> Self {
        self.cg = cg;
        self
    }

    pub fn with_normalization(mut self, normalization: NormalizationPolicy) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_max_bond_dim(mut self, dim: usize) -> Self {
        self.max_bond_dim = Some(dim);
        self
    }

    /// Check numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &'static str, v: f64) -> Result<(), ConfigError> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    name,
                    reason: format!("must be a positive finite number, got {v}"),
                })
            }
        }
        fn nonzero(name: &'static str, v: usize) -> Result<(), ConfigError> {
            if v > 0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be at least 1".to_string(),
                })
            }
        }

        positive("fdistance_eps", self.fdistance_eps)?;
        nonzero("max_sweeps", self.max_sweeps)?;
        positive("bicg.tol", self.bicg.tol)?;
        nonzero("bicg.max_iter", self.bicg.max_iter)?;
        nonzero("cg.max_iter", self.cg.max_iter)?;
        positive("cg.improvement_tol", self.cg.improvement_tol)?;
        positive("cg.line_search_tol", self.cg.line_search_tol)?;
        positive("cg.initial_step", self.cg.initial_step)?;
        if !(self.cg.gradient_tol >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "cg.gradient_tol",
                reason: format!("must be non-negative, got {}", self.cg.gradient_tol),
            });
        }
        let cutoff = self.regularization.eigen_cutoff;
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "regularization.eigen_cutoff",
                reason: format!("must lie in (0, 1), got {cutoff}"),
            });
        }
        if let Some(0) = self.max_bond_dim {
            return Err(ConfigError::InvalidValue {
                name: "max_bond_dim",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
