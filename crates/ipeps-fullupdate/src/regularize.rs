//! Hermitization, positive projection and pseudo-inversion of ket/bra operators.
//!
//! An operator here is a tensor whose legs come in pairs `{a, a.bra()}`. It is
//! viewed as the matrix with the ket legs as rows and the bra legs as columns.
//! The same regularizer is applied to the reduced environment `N` and to the
//! local operators `M_j` of the ALS sweep.

use ipeps_core::backend;
use ipeps_core::{Index, Tensor};
use log::{debug, warn};

use crate::error::{FullUpdateError, Result};
use crate::options::{RegularizationOptions, SingularPolicy};

/// Eigenvalue statistics of a regularized operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumDiagnostics {
    /// Matrix dimension.
    pub dim: usize,
    /// Largest eigenvalue after sign normalization.
    pub max_eigenvalue: f64,
    /// Smallest eigenvalue after sign normalization, before clipping.
    pub min_eigenvalue: f64,
    /// `λ_max / λ_min` over retained eigenvalues, or `1/cutoff` when some are flagged.
    pub condition_number: f64,
    pub negative_count: usize,
    pub clipped_count: usize,
    pub below_cutoff_count: usize,
    /// Frobenius norm of the anti-Hermitian part.
    pub asymmetry_norm: f64,
    /// `‖(A - Aᵀ)/2‖ / ‖(A + Aᵀ)/2‖`.
    pub asymmetry_ratio: f64,
    /// The operator was multiplied by −1 to make its dominant eigenvalue positive.
    pub sign_flipped: bool,
}

/// Output of [`Regularizer::regularize`].
#[derive(Debug, Clone)]
pub struct Regularized {
    pub operator: Tensor,
    pub pseudo_inverse: Option<Tensor>,
    pub spectrum: SpectrumDiagnostics,
}

/// Ket legs of an operator; every leg must have its partner in the other layer.
pub fn operator_legs(op: &Tensor) -> Result<Vec<Index>> {
    let mut kets = Vec::new();
    for leg in op.indices() {
        if !op.has_index(&leg.flipped()) {
            return Err(FullUpdateError::contract(
                "operator",
                format!("leg {leg:?} has no partner in the opposite layer"),
            ));
        }
        if !leg.is_bra() {
            kets.push(leg.clone());
        }
    }
    Ok(kets)
}

/// Apply an operator with legs `{a, a.bra()}` to `x`.
///
/// Legs of `x` whose bra copy appears on `op` are summed over; all other legs
/// of `x` (e.g. physical legs) are spectators. The result is in the ket layer.
pub fn apply_operator(op: &Tensor, x: &Tensor) -> Result<Tensor> {
    let summed: Vec<Index> = x
        .indices()
        .iter()
        .filter(|i| !i.is_bra() && op.has_index(&i.bra()))
        .cloned()
        .collect();
    let xb = x.flip_legs(&summed)?;
    Ok(op.contract(&xb)?)
}

/// Symmetric eigen-regularizer.
#[derive(Debug, Clone, Default)]
pub struct Regularizer {
    options: RegularizationOptions,
}

impl Regularizer {
    pub fn new(options: RegularizationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RegularizationOptions {
        &self.options
    }

    /// Regularize `op`, optionally also building its pseudo-inverse.
    ///
    /// # Errors
    ///
    /// Fails if the legs of `op` are not paired or the eigensolver fails.
    pub fn regularize(&self, op: &Tensor, with_pseudo_inverse: bool) -> Result<Regularized> {
        let kets = operator_legs(op)?;
        let bras: Vec<Index> = kets.iter().map(Index::bra).collect();
        let (mut mat, n, _) = op.to_matrix(&kets, &bras)?;

        let mut spectrum = SpectrumDiagnostics {
            dim: n,
            ..Default::default()
        };

        // Hermitian and anti-Hermitian parts.
        let mut herm_sq = 0.0;
        let mut anti_sq = 0.0;
        for i in 0..n {
            for j in 0..n {
                let a = mat[i * n + j];
                let b = mat[j * n + i];
                herm_sq += (0.5 * (a + b)).powi(2);
                anti_sq += (0.5 * (a - b)).powi(2);
            }
        }
        spectrum.asymmetry_norm = anti_sq.sqrt();
        spectrum.asymmetry_ratio = if herm_sq > 0.0 {
            (anti_sq / herm_sq).sqrt()
        } else {
            0.0
        };
        if self.options.symmetrize {
            for i in 0..n {
                for j in (i + 1)..n {
                    let s = 0.5 * (mat[i * n + j] + mat[j * n + i]);
                    mat[i * n + j] = s;
                    mat[j * n + i] = s;
                }
            }
        }

        let eig = backend::eigh(&mat, n).map_err(ipeps_core::TensorError::from)?;
        let mut lambda = eig.eigenvalues;

        // Dominant eigenvalue must be positive.
        let dominant = lambda.iter().copied().fold(0.0_f64, |m, x| {
            if x.abs() > m.abs() {
                x
            } else {
                m
            }
        });
        if dominant < 0.0 {
            spectrum.sign_flipped = true;
            for l in lambda.iter_mut() {
                *l = -*l;
            }
        }

        spectrum.max_eigenvalue = lambda.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        spectrum.min_eigenvalue = lambda.iter().copied().fold(f64::INFINITY, f64::min);
        if n == 0 {
            spectrum.max_eigenvalue = 0.0;
            spectrum.min_eigenvalue = 0.0;
        }

        spectrum.negative_count = lambda.iter().filter(|&&l| l < 0.0).count();
        if self.options.positive_definite {
            for l in lambda.iter_mut() {
                if *l < 0.0 {
                    *l = 0.0;
                    spectrum.clipped_count += 1;
                }
            }
        }

        let lmax = spectrum.max_eigenvalue.max(0.0);
        let cutoff = self.options.eigen_cutoff;
        let flagged: Vec<bool> = lambda
            .iter()
            .map(|&l| lmax <= 0.0 || l / lmax < cutoff)
            .collect();
        spectrum.below_cutoff_count = flagged.iter().filter(|&&f| f).count();
        spectrum.condition_number = if spectrum.below_cutoff_count > 0 {
            1.0 / cutoff
        } else {
            let lmin = lambda.iter().copied().fold(f64::INFINITY, f64::min);
            lmax / lmin
        };

        if spectrum.clipped_count > 0 {
            warn!(
                "regularize: clipped {} negative eigenvalue(s) of {} (min {:.3e}, max {:.3e})",
                spectrum.clipped_count, n, spectrum.min_eigenvalue, spectrum.max_eigenvalue
            );
        }
        debug!(
            "regularize: dim={} asym_ratio={:.3e} cond={:.3e} flagged={}",
            n, spectrum.asymmetry_ratio, spectrum.condition_number, spectrum.below_cutoff_count
        );

        let v = &eig.eigenvectors;
        let rebuild = |weights: &[f64]| -> Vec<f64> {
            let mut out = vec![0.0; n * n];
            for (k, &w) in weights.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                for i in 0..n {
                    let vi = w * v[i * n + k];
                    if vi == 0.0 {
                        continue;
                    }
                    for j in 0..n {
                        out[i * n + j] += vi * v[j * n + k];
                    }
                }
            }
            out
        };

        let operator =
            if self.options.symmetrize || self.options.positive_definite || spectrum.sign_flipped {
                Tensor::from_matrix(&kets, &bras, rebuild(&lambda))?
            } else {
                Tensor::from_matrix(&kets, &bras, mat)?
            };

        let pseudo_inverse = if with_pseudo_inverse {
            let inv: Vec<f64> = lambda
                .iter()
                .zip(&flagged)
                .map(|(&l, &f)| match (f, self.options.singular_policy) {
                    (false, _) => 1.0 / l,
                    (true, SingularPolicy::Zero) => 0.0,
                    (true, SingularPolicy::Unit) => 1.0,
                })
                .collect();
            Some(Tensor::from_matrix(&kets, &bras, rebuild(&inv))?)
        } else {
            None
        };

        Ok(Regularized {
            operator,
            pseudo_inverse,
            spectrum,
        })
    }
}
