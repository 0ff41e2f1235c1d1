//! Preconditioned biconjugate-gradient solver on tensors.
//!
//! Solves `M x = b` where `M` is an operator tensor with legs `{a, a.bra()}`
//! and `x`, `b` carry the ket legs `a` plus any spectator legs. The iteration
//! follows the classic `linbcg` scheme (residual measured relative to `‖b‖`)
//! and never flattens tensors.
//!
//! `M` and `b` are rescaled to unit max-element once, before iterating; in
//! `f64` the iterates then stay far from overflow, so no per-step rescale is done.

use ipeps_core::Tensor;
use log::{debug, warn};

use crate::error::{FullUpdateError, Result};
use crate::options::{BicgOptions, PreconditionerKind, ResidualNorm};
use crate::regularize::{apply_operator, operator_legs, Regularizer};

/// A linear map on tensors together with its transpose.
pub trait LinearOperator {
    fn apply(&self, x: &Tensor) -> Result<Tensor>;
    fn apply_transpose(&self, x: &Tensor) -> Result<Tensor>;
}

/// Approximate inverse used to precondition BiCG.
pub trait Preconditioner {
    fn solve(&self, r: &Tensor) -> Result<Tensor>;
    fn solve_transpose(&self, r: &Tensor) -> Result<Tensor>;
}

/// Operator given as a tensor with paired ket/bra legs.
#[derive(Debug, Clone)]
pub struct OperatorTensor {
    op: Tensor,
}

impl OperatorTensor {
    pub fn new(op: Tensor) -> Result<Self> {
        operator_legs(&op)?;
        Ok(Self { op })
    }

    pub fn tensor(&self) -> &Tensor {
        &self.op
    }
}

impl LinearOperator for OperatorTensor {
    fn apply(&self, x: &Tensor) -> Result<Tensor> {
        apply_operator(&self.op, x)
    }

    fn apply_transpose(&self, x: &Tensor) -> Result<Tensor> {
        apply_operator(&self.op.swap_layers(), x)
    }
}

impl Preconditioner for OperatorTensor {
    fn solve(&self, r: &Tensor) -> Result<Tensor> {
        self.apply(r)
    }

    fn solve_transpose(&self, r: &Tensor) -> Result<Tensor> {
        self.apply_transpose(r)
    }
}

/// No preconditioning.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn solve(&self, r: &Tensor) -> Result<Tensor> {
        Ok(r.clone())
    }

    fn solve_transpose(&self, r: &Tensor) -> Result<Tensor> {
        Ok(r.clone())
    }
}

/// Build the preconditioner selected in `options` for operator `m`.
pub fn make_preconditioner(
    kind: PreconditionerKind,
    m: &Tensor,
    regularizer: &Regularizer,
) -> Result<Box<dyn Preconditioner>> {
    match kind {
        PreconditionerKind::Identity => Ok(Box::new(IdentityPreconditioner)),
        PreconditionerKind::Diagonal => {
            let kets = operator_legs(m)?;
            let bras: Vec<_> = kets.iter().map(|k| k.bra()).collect();
            let (mat, n, _) = m.to_matrix(&kets, &bras)?;
            let mut diag = vec![0.0; n * n];
            for i in 0..n {
                let d = mat[i * n + i];
                diag[i * n + i] = if d != 0.0 { 1.0 / d } else { 1.0 };
            }
            let op = Tensor::from_matrix(&kets, &bras, diag)?;
            Ok(Box::new(OperatorTensor { op }))
        }
        PreconditionerKind::PseudoInverse => {
            let reg = regularizer.regularize(m, true)?;
            let op = reg.pseudo_inverse.ok_or_else(|| {
                FullUpdateError::contract("preconditioner", "pseudo-inverse was not produced")
            })?;
            Ok(Box::new(OperatorTensor { op }))
        }
    }
}

/// Result of [`bicg`].
#[derive(Debug, Clone)]
pub struct BicgResult {
    /// Best available solution (also when not converged).
    pub solution: Tensor,
    pub iterations: usize,
    /// Final residual norm relative to `‖b‖`.
    pub error: f64,
    pub converged: bool,
}

fn residual_norm(t: &Tensor, norm: ResidualNorm) -> f64 {
    match norm {
        ResidualNorm::Euclidean => t.norm(),
        ResidualNorm::MaxAbs => t.max_abs(),
    }
}

/// Solve `A x = b` by preconditioned BiCG starting from `x0`.
///
/// Non-convergence within `options.max_iter` is not an error: the last
/// iterate is returned with `converged = false`.
///
/// # Errors
///
/// Fails when operator applications fail or an inner product does not reduce
/// to a scalar (mismatched leg sets).
pub fn bicg<A, P>(a: &A, b: &Tensor, x0: &Tensor, precond: &P, options: &BicgOptions) -> Result<BicgResult>
where
    A: LinearOperator + ?Sized,
    P: Preconditioner + ?Sized,
{
    let bnrm = residual_norm(b, options.norm);
    if bnrm < 1e-300 {
        return Ok(BicgResult {
            solution: x0.scale(0.0),
            iterations: 0,
            error: 0.0,
            converged: true,
        });
    }

    let mut x = x0.clone();
    let mut r = b.sub(&a.apply(&x)?)?;
    let mut rr = r.clone();
    let mut z = precond.solve(&r)?;

    let mut err = residual_norm(&r, options.norm) / bnrm;
    if err <= options.tol {
        return Ok(BicgResult {
            solution: x,
            iterations: 0,
            error: err,
            converged: true,
        });
    }

    let mut p: Option<Tensor> = None;
    let mut pp: Option<Tensor> = None;
    let mut bkden = 1.0;
    let mut iter = 0;

    while iter < options.max_iter {
        iter += 1;
        let zz = precond.solve_transpose(&rr)?;
        let bknum = z.inner_product(&rr)?;
        let (p_next, pp_next) = match (p.take(), pp.take()) {
            (Some(p_old), Some(pp_old)) => {
                if bkden == 0.0 {
                    warn!("bicg: breakdown (bkden = 0) at iteration {iter}");
                    break;
                }
                let bk = bknum / bkden;
                (z.axpby(1.0, &p_old, bk)?, zz.axpby(1.0, &pp_old, bk)?)
            }
            _ => (z.clone(), zz),
        };
        bkden = bknum;

        let ap = a.apply(&p_next)?;
        let akden = ap.inner_product(&pp_next)?;
        if akden == 0.0 {
            warn!("bicg: breakdown (akden = 0) at iteration {iter}");
            break;
        }
        let ak = bknum / akden;
        let atpp = a.apply_transpose(&pp_next)?;

        x = x.axpby(1.0, &p_next, ak)?;
        r = r.axpby(1.0, &ap, -ak)?;
        rr = rr.axpby(1.0, &atpp, -ak)?;
        z = precond.solve(&r)?;
        p = Some(p_next);
        pp = Some(pp_next);

        err = residual_norm(&r, options.norm) / bnrm;
        debug!("bicg: iter {iter} err {err:.3e}");
        if err <= options.tol {
            return Ok(BicgResult {
                solution: x,
                iterations: iter,
                error: err,
                converged: true,
            });
        }
    }

    warn!(
        "bicg: not converged after {iter} iteration(s), err {err:.3e} > tol {:.3e}",
        options.tol
    );
    Ok(BicgResult {
        solution: x,
        iterations: iter,
        error: err,
        converged: false,
    })
}

/// Solve `M x = rhs` for an operator tensor `m`, applying the configured
/// preconditioner and unit rescaling.
pub fn solve_operator(
    m: &Tensor,
    rhs: &Tensor,
    x0: &Tensor,
    options: &BicgOptions,
    regularizer: &Regularizer,
) -> Result<BicgResult> {
    let (m_scale, rhs_scale) = if options.unit_scale {
        let ms = m.max_abs();
        let rs = rhs.max_abs();
        (
            if ms > 0.0 { ms } else { 1.0 },
            if rs > 0.0 { rs } else { 1.0 },
        )
    } else {
        (1.0, 1.0)
    };

    // M x = b  <=>  (M/s_m) (x s_m/s_b) = b/s_b
    let m_unit = m.scale(1.0 / m_scale);
    let rhs_unit = rhs.scale(1.0 / rhs_scale);
    let x0_unit = x0.scale(m_scale / rhs_scale);

    let op = OperatorTensor::new(m_unit)?;
    let precond = make_preconditioner(options.preconditioner, op.tensor(), regularizer)?;
    let mut result = bicg(&op, &rhs_unit, &x0_unit, precond.as_ref(), options)?;
    result.solution = result.solution.scale(rhs_scale / m_scale);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spd_operator;
    use ipeps_core::Index;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_bicg_solves_spd_system() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let a = Index::new_dyn(3);
        let b = Index::new_dyn(2);
        let p = Index::new_dyn(2);
        let m = spd_operator(&mut rng, &[a.clone(), b.clone()], 1.0);
        let x_true = Tensor::random(&mut rng, vec![a.clone(), p.clone(), b.clone()]).unwrap();
        let rhs = apply_operator(&m, &x_true).unwrap();
        let x0 = Tensor::zeros(x_true.indices().to_vec()).unwrap();

        for kind in [
            PreconditionerKind::Identity,
            PreconditionerKind::Diagonal,
            PreconditionerKind::PseudoInverse,
        ] {
            let opts = BicgOptions::default().with_tol(1e-12).with_preconditioner(kind);
            let res = solve_operator(&m, &rhs, &x0, &opts, &Regularizer::default()).unwrap();
            assert!(res.converged, "{kind:?} did not converge");
            let err = res.solution.max_abs_diff(&x_true).unwrap() / x_true.max_abs();
            assert!(err < 1e-8, "{kind:?}: relative error {err}");
        }
    }

    #[test]
    fn test_bicg_soft_failure_returns_iterate() {
        let mut rng = ChaCha8Rng::seed_from_u64(22);
        let a = Index::new_dyn(6);
        let m = spd_operator(&mut rng, &[a.clone()], 1.0);
        let x_true = Tensor::random(&mut rng, vec![a.clone()]).unwrap();
        let rhs = apply_operator(&m, &x_true).unwrap();
        let x0 = Tensor::zeros(vec![a.clone()]).unwrap();
        let opts = BicgOptions::default()
            .with_tol(1e-14)
            .with_max_iter(1)
            .with_preconditioner(PreconditionerKind::Identity);
        let res = solve_operator(&m, &rhs, &x0, &opts, &Regularizer::default()).unwrap();
        assert!(!res.converged);
        assert_eq!(res.iterations, 1);
        assert!(res.error > 1e-14);
        assert!(res.solution.norm() > 0.0);
    }

    #[test]
    fn test_max_abs_norm_converges() {
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let a = Index::new_dyn(4);
        let m = spd_operator(&mut rng, &[a.clone()], 1.0);
        let rhs = Tensor::random(&mut rng, vec![a.clone()]).unwrap();
        let x0 = Tensor::zeros(vec![a.clone()]).unwrap();
        let opts = BicgOptions::default().with_norm(ResidualNorm::MaxAbs).with_tol(1e-12);
        let res = solve_operator(&m, &rhs, &x0, &opts, &Regularizer::default()).unwrap();
        assert!(res.converged);
        let back = apply_operator(&m, &res.solution).unwrap();
        assert!(back.max_abs_diff(&rhs).unwrap() < 1e-9 * rhs.max_abs().max(1.0));
    }

    #[test]
    fn test_mismatched_legs_are_a_contract_violation() {
        let a = Index::new_dyn(2);
        let c = Index::new_dyn(2);
        let m = Tensor::identity_operator(&[a.clone()]).unwrap();
        let rhs = Tensor::from_fn(vec![a.clone()], |_| 1.0).unwrap();
        let x0 = Tensor::zeros(vec![c]).unwrap();
        let opts = BicgOptions::default().with_preconditioner(PreconditionerKind::Identity);
        assert!(solve_operator(&m, &rhs, &x0, &opts, &Regularizer::default()).is_err());
    }
}
