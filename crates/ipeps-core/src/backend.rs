//! Dense linear algebra kernels over row-major `f64` buffers.
//!
//! All faer types are kept inside this module so that upstream API changes
//! only touch this file.

use anyhow::{anyhow, Result};
use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Mat, Par, Side};

/// Hermitian (real symmetric) eigendecomposition.
#[derive(Debug, Clone)]
pub struct EighResult {
    /// Eigenvalues in ascending order.
    pub eigenvalues: Vec<f64>,
    /// Row-major `n x n` matrix whose columns are the eigenvectors.
    pub eigenvectors: Vec<f64>,
    pub n: usize,
}

/// Thin SVD `A = U diag(s) Vt` with `k = min(m, n)`.
#[derive(Debug, Clone)]
pub struct SvdResult {
    /// Row-major `m x k`.
    pub u: Vec<f64>,
    /// Singular values in descending order.
    pub s: Vec<f64>,
    /// Row-major `k x n`.
    pub vt: Vec<f64>,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// `C[m, n] = A[m, k] @ B[k, n]` for row-major buffers.
pub fn gemm(a: &[f64], m: usize, k: usize, b: &[f64], n: usize) -> Vec<f64> {
    assert_eq!(a.len(), m * k, "lhs buffer has wrong length");
    assert_eq!(b.len(), k * n, "rhs buffer has wrong length");
    let mut c = vec![0.0; m * n];
    if m == 0 || n == 0 {
        return c;
    }
    if k == 0 {
        return c;
    }

    // Row-major views: row stride = number of columns, column stride = 1.
    let a_mat = unsafe { faer::MatRef::from_raw_parts(a.as_ptr(), m, k, k as isize, 1) };
    let b_mat = unsafe { faer::MatRef::from_raw_parts(b.as_ptr(), k, n, n as isize, 1) };
    let mut c_mat =
        unsafe { faer::MatMut::from_raw_parts_mut(c.as_mut_ptr(), m, n, n as isize, 1) };

    faer_matmul(&mut c_mat, Accum::Replace, a_mat, b_mat, 1.0, Par::Seq);
    c
}

/// Permute the axes of a row-major array.
///
/// `perm[i]` is the source axis that becomes axis `i` of the result.
pub fn permute(data: &[f64], dims: &[usize], perm: &[usize]) -> Vec<f64> {
    let rank = dims.len();
    assert_eq!(perm.len(), rank, "permutation length must match rank");
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return data.to_vec();
    }

    let src_strides = strides(dims);
    let new_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let moved_strides: Vec<usize> = perm.iter().map(|&p| src_strides[p]).collect();

    let total: usize = dims.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut counter = vec![0usize; rank];
    let mut offset = 0usize;
    for _ in 0..total {
        out.push(data[offset]);
        // Odometer increment over the destination layout.
        for axis in (0..rank).rev() {
            counter[axis] += 1;
            offset += moved_strides[axis];
            if counter[axis] < new_dims[axis] {
                break;
            }
            offset -= moved_strides[axis] * new_dims[axis];
            counter[axis] = 0;
        }
    }
    out
}

/// Row-major strides for the given dimensions.
pub fn strides(dims: &[usize]) -> Vec<usize> {
    let mut s = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        s[i] = s[i + 1] * dims[i + 1];
    }
    s
}

/// Eigendecomposition of a symmetric `n x n` row-major matrix.
///
/// Only the lower triangle is read.
pub fn eigh(a: &[f64], n: usize) -> Result<EighResult> {
    if a.len() != n * n {
        return Err(anyhow!(
            "eigh: buffer of length {} is not a {n}x{n} matrix",
            a.len()
        ));
    }
    if n == 0 {
        return Ok(EighResult {
            eigenvalues: Vec::new(),
            eigenvectors: Vec::new(),
            n,
        });
    }
    let mat = Mat::<f64>::from_fn(n, n, |i, j| a[i * n + j]);
    let evd = mat
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow!("eigh: eigendecomposition failed: {e:?}"))?;

    let u = evd.U();
    let s = evd.S().column_vector();
    let eigenvalues: Vec<f64> = (0..n).map(|i| s[i]).collect();
    let mut eigenvectors = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            eigenvectors[i * n + j] = u[(i, j)];
        }
    }
    Ok(EighResult {
        eigenvalues,
        eigenvectors,
        n,
    })
}

/// Thin SVD of an `m x n` row-major matrix.
pub fn svd(a: &[f64], m: usize, n: usize) -> Result<SvdResult> {
    if a.len() != m * n {
        return Err(anyhow!(
            "svd: buffer of length {} is not a {m}x{n} matrix",
            a.len()
        ));
    }
    let k = m.min(n);
    if k == 0 {
        return Ok(SvdResult {
            u: Vec::new(),
            s: Vec::new(),
            vt: Vec::new(),
            m,
            n,
            k,
        });
    }
    let mat = Mat::<f64>::from_fn(m, n, |i, j| a[i * n + j]);
    let decomp = mat
        .as_ref()
        .thin_svd()
        .map_err(|e| anyhow!("svd: decomposition failed: {e:?}"))?;

    let u_mat = decomp.U();
    let v_mat = decomp.V();
    let s_col = decomp.S().column_vector();

    let mut u = vec![0.0; m * k];
    for i in 0..m {
        for j in 0..k {
            u[i * k + j] = u_mat[(i, j)];
        }
    }
    let s: Vec<f64> = (0..k).map(|i| s_col[i]).collect();
    let mut vt = vec![0.0; k * n];
    for i in 0..k {
        for j in 0..n {
            vt[i * n + j] = v_mat[(j, i)];
        }
    }
    Ok(SvdResult { u, s, vt, m, n, k })
}
