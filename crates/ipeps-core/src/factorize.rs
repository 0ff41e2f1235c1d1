//! SVD-based splitting of a tensor into two factors joined by a new bond.

use crate::backend;
use crate::error::{Result, TensorError};
use crate::index::Index;
use crate::tagset::TagSet;
use crate::tensor::Tensor;

/// Which factor is the isometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Canonical {
    /// `left` is an isometry, `right` carries the singular values.
    #[default]
    Left,
    /// `right` is an isometry, `left` carries the singular values.
    Right,
}

/// Options for [`factorize`].
#[derive(Debug, Clone, Default)]
pub struct FactorizeOptions {
    /// Maximum retained rank.
    pub max_rank: Option<usize>,
    /// Relative truncation tolerance on the discarded weight,
    /// `sum_{i>r} σ_i² <= rtol² sum_i σ_i²`.
    pub rtol: Option<f64>,
    pub canonical: Canonical,
    /// Tags of the new bond leg. Defaults to `Link`.
    pub bond_tags: Option<TagSet>,
}

impl FactorizeOptions {
    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = Some(max_rank);
        self
    }

    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = Some(rtol);
        self
    }

    pub fn with_canonical(mut self, canonical: Canonical) -> Self {
        self.canonical = canonical;
        self
    }

    pub fn with_bond_tags(mut self, tags: TagSet) -> Self {
        self.bond_tags = Some(tags);
        self
    }
}

/// Result of [`factorize`]: `tensor ≈ left * right`.
#[derive(Debug, Clone)]
pub struct Factorization {
    pub left: Tensor,
    pub right: Tensor,
    /// The new bond shared by `left` and `right`.
    pub bond: Index,
    /// Retained singular values, descending.
    pub singular_values: Vec<f64>,
    /// Sum of squares of the discarded singular values.
    pub discarded_weight: f64,
}

/// Number of singular values to keep for a relative discarded-weight tolerance.
fn compute_retained_rank(s: &[f64], rtol: f64) -> usize {
    if s.is_empty() {
        return 1;
    }
    let total: f64 = s.iter().map(|x| x * x).sum();
    if total == 0.0 {
        return 1;
    }
    let threshold = rtol * rtol * total;
    let mut discarded = 0.0;
    let mut r = s.len();
    for i in (0..s.len()).rev() {
        let w = s[i] * s[i];
        if discarded + w > threshold {
            break;
        }
        discarded += w;
        r = i;
    }
    r.max(1)
}

/// Split `tensor` into a factor carrying `left_legs` and one carrying the rest.
///
/// # Errors
///
/// Fails if a leg in `left_legs` is missing or if the SVD backend fails.
pub fn factorize(
    tensor: &Tensor,
    left_legs: &[Index],
    options: &FactorizeOptions,
) -> Result<Factorization> {
    for leg in left_legs {
        if !tensor.has_index(leg) {
            return Err(TensorError::LegNotFound(leg.clone()));
        }
    }
    let right_legs: Vec<Index> = tensor
        .indices()
        .iter()
        .filter(|i| !left_legs.contains(i))
        .cloned()
        .collect();

    let (mat, m, n) = tensor.to_matrix(left_legs, &right_legs)?;
    let svd = backend::svd(&mat, m, n)?;

    let mut rank = match options.rtol {
        Some(rtol) => compute_retained_rank(&svd.s, rtol),
        None => svd.k.max(1),
    };
    if let Some(max_rank) = options.max_rank {
        rank = rank.min(max_rank.max(1));
    }
    let rank = rank.min(svd.k.max(1));

    let discarded_weight: f64 = svd.s.iter().skip(rank).map(|x| x * x).sum();
    let singular_values: Vec<f64> = svd.s.iter().take(rank).copied().collect();

    let bond = match &options.bond_tags {
        Some(tags) => Index::new_dyn_with_tagset(rank, tags.clone()),
        None => Index::new_link(rank),
    };

    // Degenerate empty matrices keep a single zero singular direction.
    let sigma: Vec<f64> = (0..rank)
        .map(|l| singular_values.get(l).copied().unwrap_or(0.0))
        .collect();
    let ones = vec![1.0; rank];
    let (left_scale, right_scale) = match options.canonical {
        Canonical::Left => (&ones, &sigma),
        Canonical::Right => (&sigma, &ones),
    };
    let u_at = |i: usize, l: usize| if l < svd.k { svd.u[i * svd.k + l] } else { 0.0 };
    let vt_at = |l: usize, j: usize| if l < svd.k { svd.vt[l * n + j] } else { 0.0 };

    let mut left_data = Vec::with_capacity(m * rank);
    for i in 0..m {
        for l in 0..rank {
            left_data.push(u_at(i, l) * left_scale[l]);
        }
    }
    let mut right_data = Vec::with_capacity(rank * n);
    for l in 0..rank {
        for j in 0..n {
            right_data.push(right_scale[l] * vt_at(l, j));
        }
    }

    let left = Tensor::from_matrix(left_legs, std::slice::from_ref(&bond), left_data)?;
    let right = Tensor::from_matrix(std::slice::from_ref(&bond), &right_legs, right_data)?;

    Ok(Factorization {
        left,
        right,
        bond,
        singular_values,
        discarded_weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_factorize_reconstructs_exactly() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(3);
        let k = Index::new_dyn(4);
        let t = Tensor::random(&mut rng, vec![i.clone(), j.clone(), k.clone()]).unwrap();
        let f = factorize(&t, &[k.clone(), i.clone()], &FactorizeOptions::default()).unwrap();
        assert_eq!(f.bond.dim(), 3);
        let back = f.left.contract(&f.right).unwrap();
        assert_abs_diff_eq!(back.max_abs_diff(&t).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_left_factor_is_isometry() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let i = Index::new_dyn(6);
        let j = Index::new_dyn(2);
        let t = Tensor::random(&mut rng, vec![i.clone(), j.clone()]).unwrap();
        let f = factorize(&t, &[i.clone()], &FactorizeOptions::default()).unwrap();
        let q = &f.left;
        let qq = q
            .contract(&q.replaceind(&f.bond, &f.bond.bra()).unwrap())
            .unwrap();
        let id = Tensor::delta(&f.bond, &f.bond.bra()).unwrap();
        assert_abs_diff_eq!(qq.max_abs_diff(&id).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_truncation_respects_max_rank() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let i = Index::new_dyn(5);
        let j = Index::new_dyn(5);
        let t = Tensor::random(&mut rng, vec![i.clone(), j.clone()]).unwrap();
        let opts = FactorizeOptions::default()
            .with_max_rank(2)
            .with_canonical(Canonical::Right);
        let f = factorize(&t, &[i], &opts).unwrap();
        assert_eq!(f.bond.dim(), 2);
        assert_eq!(f.singular_values.len(), 2);
        assert!(f.discarded_weight > 0.0);
        let approx = f.left.contract(&f.right).unwrap();
        let err2 = approx.sub(&t).unwrap().norm_squared();
        assert_abs_diff_eq!(err2, f.discarded_weight, epsilon = 1e-10);
    }

    #[test]
    fn test_retained_rank_rtol() {
        assert_eq!(compute_retained_rank(&[1.0, 1e-8, 1e-9], 1e-6), 1);
        assert_eq!(compute_retained_rank(&[1.0, 0.5], 1e-6), 2);
        assert_eq!(compute_retained_rank(&[0.0, 0.0], 1e-6), 1);
    }
}
