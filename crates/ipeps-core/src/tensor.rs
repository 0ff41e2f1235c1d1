//! Dense real tensors with named legs.
//!
//! A [`Tensor`] is a row-major `f64` buffer plus the list of legs labelling its
//! axes. Axis order is an implementation detail: every operation that combines
//! two tensors matches legs by identity and layer, never by position.
//!
//! # Example
//!
//! ```
//! use ipeps_core::{Index, Tensor};
//!
//! let i = Index::new_dyn(2);
//! let j = Index::new_dyn(3);
//! let a = Tensor::from_fn(vec![i.clone(), j.clone()], |x| (x[0] + x[1]) as f64).unwrap();
//! let b = Tensor::from_fn(vec![j.clone()], |_| 1.0).unwrap();
//! let c = a.contract(&b).unwrap();
//! assert_eq!(c.indices(), &[i]);
//! assert_eq!(c.data(), &[3.0, 6.0]);
//! ```

use std::collections::HashSet;
use std::fmt;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::backend;
use crate::error::{Result, TensorError};
use crate::index::{Index, Layer};

/// Dense real tensor.
#[derive(Clone)]
pub struct Tensor {
    indices: Vec<Index>,
    data: Vec<f64>,
}

fn check_unique(indices: &[Index]) -> Result<()> {
    let mut seen = HashSet::with_capacity(indices.len());
    for idx in indices {
        if !seen.insert(idx) {
            return Err(TensorError::DuplicateLeg(idx.clone()));
        }
    }
    Ok(())
}

fn volume(indices: &[Index]) -> usize {
    indices.iter().map(Index::dim).product()
}

impl Tensor {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a tensor from legs and row-major data.
    pub fn new(indices: Vec<Index>, data: Vec<f64>) -> Result<Self> {
        check_unique(&indices)?;
        let expected = volume(&indices);
        if data.len() != expected {
            return Err(TensorError::DataLength {
                len: data.len(),
                expected,
            });
        }
        Ok(Self { indices, data })
    }

    pub fn zeros(indices: Vec<Index>) -> Result<Self> {
        let n = volume(&indices);
        Self::new(indices, vec![0.0; n])
    }

    /// Create a tensor by evaluating `f` at every multi-index.
    pub fn from_fn<F>(indices: Vec<Index>, mut f: F) -> Result<Self>
    where
        F: FnMut(&[usize]) -> f64,
    {
        check_unique(&indices)?;
        let dims: Vec<usize> = indices.iter().map(Index::dim).collect();
        let total: usize = dims.iter().product();
        let mut data = Vec::with_capacity(total);
        let mut counter = vec![0usize; dims.len()];
        for _ in 0..total {
            data.push(f(&counter));
            for axis in (0..dims.len()).rev() {
                counter[axis] += 1;
                if counter[axis] < dims[axis] {
                    break;
                }
                counter[axis] = 0;
            }
        }
        Ok(Self { indices, data })
    }

    /// Tensor with standard-normal entries.
    pub fn random<R: Rng>(rng: &mut R, indices: Vec<Index>) -> Result<Self> {
        let n = volume(&indices);
        let data: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();
        Self::new(indices, data)
    }

    /// Rank-0 tensor.
    pub fn scalar(value: f64) -> Self {
        Self {
            indices: Vec::new(),
            data: vec![value],
        }
    }

    /// Identity between two legs of equal dimension.
    pub fn delta(i: &Index, j: &Index) -> Result<Self> {
        if i.dim() != j.dim() {
            return Err(TensorError::DimensionMismatch {
                leg: j.clone(),
                left: i.dim(),
                right: j.dim(),
            });
        }
        Self::from_fn(vec![i.clone(), j.clone()], |x| {
            if x[0] == x[1] {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Identity operator from `legs` to `legs` in the opposite layer.
    pub fn identity_operator(legs: &[Index]) -> Result<Self> {
        let mut t = Self::scalar(1.0);
        for leg in legs {
            t = t.contract(&Self::delta(leg, &leg.flipped())?)?;
        }
        Ok(t)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn dims(&self) -> Vec<usize> {
        self.indices.iter().map(Index::dim).collect()
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_index(&self, index: &Index) -> bool {
        self.indices.contains(index)
    }

    pub fn position(&self, index: &Index) -> Option<usize> {
        self.indices.iter().position(|i| i == index)
    }

    /// Legs present on both tensors.
    pub fn common_indices(&self, other: &Tensor) -> Vec<Index> {
        self.indices
            .iter()
            .filter(|i| other.has_index(i))
            .cloned()
            .collect()
    }

    /// Whether both tensors carry the same leg set (in any order).
    pub fn same_legs(&self, other: &Tensor) -> bool {
        self.rank() == other.rank() && self.indices.iter().all(|i| other.has_index(i))
    }

    /// Element at a multi-index given in this tensor's axis order.
    pub fn get(&self, pos: &[usize]) -> f64 {
        let strides = backend::strides(&self.dims());
        let offset: usize = pos.iter().zip(strides.iter()).map(|(p, s)| p * s).sum();
        self.data[offset]
    }

    /// The value of a rank-0 tensor.
    pub fn only(&self) -> Result<f64> {
        if self.rank() != 0 {
            return Err(TensorError::NotAScalar {
                rank: self.rank(),
                legs: self.indices.clone(),
            });
        }
        Ok(self.data[0])
    }

    // ========================================================================
    // Leg manipulation
    // ========================================================================

    /// Reorder axes so that they follow `order`.
    pub fn permute_indices(&self, order: &[Index]) -> Result<Self> {
        if order.len() != self.rank() {
            return Err(TensorError::LegSetMismatch {
                left: self.indices.clone(),
                right: order.to_vec(),
            });
        }
        let mut perm = Vec::with_capacity(order.len());
        for idx in order {
            let p = self
                .position(idx)
                .ok_or_else(|| TensorError::LegNotFound(idx.clone()))?;
            perm.push(p);
        }
        let data = backend::permute(&self.data, &self.dims(), &perm);
        Ok(Self {
            indices: perm.iter().map(|&p| self.indices[p].clone()).collect(),
            data,
        })
    }

    /// Replace leg `old` by `new` (same dimension required).
    pub fn replaceind(&self, old: &Index, new: &Index) -> Result<Self> {
        self.replaceinds(std::slice::from_ref(old), std::slice::from_ref(new))
    }

    /// Replace several legs at once.
    pub fn replaceinds(&self, old: &[Index], new: &[Index]) -> Result<Self> {
        if old.len() != new.len() {
            return Err(TensorError::InvalidArgument(format!(
                "replaceinds: {} old legs but {} new legs",
                old.len(),
                new.len()
            )));
        }
        let mut indices = self.indices.clone();
        for (o, n) in old.iter().zip(new) {
            let p = self
                .position(o)
                .ok_or_else(|| TensorError::LegNotFound(o.clone()))?;
            if o.dim() != n.dim() {
                return Err(TensorError::DimensionMismatch {
                    leg: n.clone(),
                    left: o.dim(),
                    right: n.dim(),
                });
            }
            indices[p] = n.clone();
        }
        check_unique(&indices)?;
        Ok(Self {
            indices,
            data: self.data.clone(),
        })
    }

    /// Move every leg into `layer`.
    pub fn to_layer(&self, layer: Layer) -> Result<Self> {
        let indices: Vec<Index> = self.indices.iter().map(|i| i.with_layer(layer)).collect();
        check_unique(&indices)?;
        Ok(Self {
            indices,
            data: self.data.clone(),
        })
    }

    /// Copy with every leg moved to the bra layer (the `X̄` of a ket tensor).
    pub fn to_bra_layer(&self) -> Result<Self> {
        self.to_layer(Layer::Bra)
    }

    pub fn to_ket_layer(&self) -> Result<Self> {
        self.to_layer(Layer::Ket)
    }

    /// Move only the given legs into the opposite layer.
    pub fn flip_legs(&self, legs: &[Index]) -> Result<Self> {
        let new: Vec<Index> = legs.iter().map(Index::flipped).collect();
        self.replaceinds(legs, &new)
    }

    /// Exchange the layers of all legs (operator transpose for ket/bra operators).
    pub fn swap_layers(&self) -> Self {
        Self {
            indices: self.indices.iter().map(Index::flipped).collect(),
            data: self.data.clone(),
        }
    }

    // ========================================================================
    // Contraction
    // ========================================================================

    /// Contract all common legs.
    ///
    /// The result carries the free legs of `self` followed by the free legs of
    /// `other`. Without common legs this is the outer product.
    pub fn contract(&self, other: &Tensor) -> Result<Tensor> {
        let common = self.common_indices(other);
        for c in &common {
            let (Some(pa), Some(pb)) = (self.position(c), other.position(c)) else {
                return Err(TensorError::LegNotFound(c.clone()));
            };
            let (da, db) = (self.indices[pa].dim(), other.indices[pb].dim());
            if da != db {
                return Err(TensorError::DimensionMismatch {
                    leg: c.clone(),
                    left: da,
                    right: db,
                });
            }
        }

        let free_a: Vec<Index> = self
            .indices
            .iter()
            .filter(|i| !common.contains(i))
            .cloned()
            .collect();
        let free_b: Vec<Index> = other
            .indices
            .iter()
            .filter(|i| !common.contains(i))
            .cloned()
            .collect();

        let order_a: Vec<Index> = free_a.iter().chain(common.iter()).cloned().collect();
        let order_b: Vec<Index> = common.iter().chain(free_b.iter()).cloned().collect();
        let a = self.permute_indices(&order_a)?;
        let b = other.permute_indices(&order_b)?;

        let m = volume(&free_a);
        let k = volume(&common);
        let n = volume(&free_b);
        let data = backend::gemm(&a.data, m, k, &b.data, n);

        let mut indices = free_a;
        indices.extend(free_b);
        Tensor::new(indices, data)
    }

    /// Full contraction that must leave a scalar.
    pub fn inner_product(&self, other: &Tensor) -> Result<f64> {
        self.contract(other)?.only()
    }

    // ========================================================================
    // Vector-space operations
    // ========================================================================

    /// Align `other` to the axis order of `self`; both must carry the same legs.
    fn aligned(&self, other: &Tensor) -> Result<Tensor> {
        if !self.same_legs(other) {
            return Err(TensorError::LegSetMismatch {
                left: self.indices.clone(),
                right: other.indices.clone(),
            });
        }
        let o = other.permute_indices(&self.indices)?;
        for (a, b) in self.indices.iter().zip(o.indices()) {
            if a.dim() != b.dim() {
                return Err(TensorError::DimensionMismatch {
                    leg: a.clone(),
                    left: a.dim(),
                    right: b.dim(),
                });
            }
        }
        Ok(o)
    }

    /// `a * self + b * other`.
    pub fn axpby(&self, a: f64, other: &Tensor, b: f64) -> Result<Tensor> {
        let o = self.aligned(other)?;
        let data = self
            .data
            .iter()
            .zip(o.data.iter())
            .map(|(x, y)| a * x + b * y)
            .collect();
        Ok(Tensor {
            indices: self.indices.clone(),
            data,
        })
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.axpby(1.0, other, 1.0)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.axpby(1.0, other, -1.0)
    }

    pub fn scale(&self, a: f64) -> Tensor {
        Tensor {
            indices: self.indices.clone(),
            data: self.data.iter().map(|x| a * x).collect(),
        }
    }

    /// Elementwise map.
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Tensor {
        Tensor {
            indices: self.indices.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Elementwise product with a tensor carrying the same legs.
    pub fn hadamard(&self, other: &Tensor) -> Result<Tensor> {
        let o = self.aligned(other)?;
        Ok(Tensor {
            indices: self.indices.clone(),
            data: self.data.iter().zip(&o.data).map(|(x, y)| x * y).collect(),
        })
    }

    pub fn norm_squared(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum()
    }

    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Largest absolute element.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
    }

    /// Maximum absolute elementwise difference to a tensor with the same legs.
    pub fn max_abs_diff(&self, other: &Tensor) -> Result<f64> {
        Ok(self.sub(other)?.max_abs())
    }

    // ========================================================================
    // Matrix views
    // ========================================================================

    /// Flatten into a row-major matrix with `rows` as the row legs and `cols`
    /// as the column legs. Together they must cover every leg exactly once.
    pub fn to_matrix(&self, rows: &[Index], cols: &[Index]) -> Result<(Vec<f64>, usize, usize)> {
        let order: Vec<Index> = rows.iter().chain(cols.iter()).cloned().collect();
        let t = self.permute_indices(&order)?;
        Ok((t.data, volume(rows), volume(cols)))
    }

    /// Inverse of [`Tensor::to_matrix`].
    pub fn from_matrix(rows: &[Index], cols: &[Index], data: Vec<f64>) -> Result<Self> {
        let indices: Vec<Index> = rows.iter().chain(cols.iter()).cloned().collect();
        Self::new(indices, data)
    }
}

/// Contract a list of tensors from left to right.
pub fn contract_all<'a, I>(tensors: I) -> Result<Tensor>
where
    I: IntoIterator<Item = &'a Tensor>,
{
    let mut iter = tensors.into_iter();
    let Some(first) = iter.next() else {
        return Ok(Tensor::scalar(1.0));
    };
    let mut acc = first.clone();
    for t in iter {
        acc = acc.contract(t)?;
    }
    Ok(acc)
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("indices", &self.indices)
            .field("norm", &self.norm())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_contract_matches_manual_sum() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(3);
        let k = Index::new_dyn(4);
        let a = Tensor::random(&mut rng, vec![i.clone(), j.clone()]).unwrap();
        let b = Tensor::random(&mut rng, vec![k.clone(), j.clone()]).unwrap();
        let c = a.contract(&b).unwrap();
        assert_eq!(c.indices(), &[i.clone(), k.clone()]);
        for x in 0..2 {
            for z in 0..4 {
                let expected: f64 = (0..3).map(|y| a.get(&[x, y]) * b.get(&[z, y])).sum();
                assert_abs_diff_eq!(c.get(&[x, z]), expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_ket_and_bra_do_not_pair() {
        let i = Index::new_dyn(2);
        let a = Tensor::from_fn(vec![i.clone()], |_| 1.0).unwrap();
        let b = a.to_bra_layer().unwrap();
        let outer = a.contract(&b).unwrap();
        assert_eq!(outer.rank(), 2);
        assert!(a.inner_product(&b).is_err());
        assert_abs_diff_eq!(a.inner_product(&a).unwrap(), 2.0);
    }

    #[test]
    fn test_inner_product_rejects_open_legs() {
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(2);
        let a = Tensor::zeros(vec![i.clone(), j]).unwrap();
        let b = Tensor::zeros(vec![i]).unwrap();
        match a.inner_product(&b) {
            Err(TensorError::NotAScalar { rank, .. }) => assert_eq!(rank, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_add_aligns_leg_order() {
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(3);
        let a = Tensor::from_fn(vec![i.clone(), j.clone()], |x| (x[0] * 3 + x[1]) as f64).unwrap();
        let b = a.permute_indices(&[j.clone(), i.clone()]).unwrap();
        let d = a.sub(&b).unwrap();
        assert_abs_diff_eq!(d.norm(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch_detected() {
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(3);
        let a = Tensor::zeros(vec![i.clone()]).unwrap();
        assert!(matches!(
            a.replaceind(&i, &j),
            Err(TensorError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_legs_rejected() {
        let i = Index::new_dyn(2);
        assert!(matches!(
            Tensor::zeros(vec![i.clone(), i.clone()]),
            Err(TensorError::DuplicateLeg(_))
        ));
        let t = Tensor::zeros(vec![i.clone(), i.bra()]).unwrap();
        assert!(t.to_bra_layer().is_err());
        assert_eq!(t.swap_layers().rank(), 2);
    }

    #[test]
    fn test_identity_operator_acts_as_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(3);
        let x = Tensor::random(&mut rng, vec![i.clone(), j.clone()]).unwrap();
        let id = Tensor::identity_operator(&[i.bra(), j.bra()]).unwrap();
        let y = id.contract(&x.to_bra_layer().unwrap()).unwrap();
        assert_abs_diff_eq!(y.max_abs_diff(&x).unwrap(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_matrix_round_trip_preserves_layout() {
        let i = Index::new_dyn(2);
        let j = Index::new_dyn(3);
        let a = Tensor::from_fn(vec![i.clone(), j.clone()], |x| (x[0] * 3 + x[1]) as f64).unwrap();
        let (m, r, c) = a.to_matrix(&[j.clone()], &[i.clone()]).unwrap();
        assert_eq!((r, c), (3, 2));
        assert_eq!(m[1], 3.0);
        let back = Tensor::from_matrix(&[j], &[i], m).unwrap();
        assert_abs_diff_eq!(back.max_abs_diff(&a).unwrap(), 0.0);
    }
}
