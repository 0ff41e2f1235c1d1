//! Quadratic cost `f(ψ') = ⟨ψ'|N|ψ'⟩ − 2⟨ψ'|K⟩ + ⟨Gψ|N|Gψ⟩` and its gradients.
//!
//! With all active tensors but `e_j` fixed, the cost reads
//! `f = e_jᵀ M_j e_j − 2 e_jᵀ b_j + const` with
//!
//! - `M_j = N · Π_{i≠j} (e_i ē_i)` (physical legs of `e_i` summed), and
//! - `b_j = K · Π_{i≠j} e_iᴮ`, moved back to the ket layer,
//!
//! where `ē_i` is the bra copy with the physical leg kept in the ket layer and
//! `e_iᴮ` the full bra copy. The pair tensors `e_i ē_i` are cached.

use ipeps_core::{Index, Tensor};

use crate::error::{FullUpdateError, Result};
use crate::regularize::apply_operator;

/// Local quadratic problem for one active tensor.
#[derive(Debug, Clone)]
pub struct LocalSystem {
    /// Site this system belongs to.
    pub site: usize,
    /// Operator with legs `{a, a.bra()}` for every non-physical leg `a` of `e_j`.
    pub m: Tensor,
    /// Right-hand side with the legs of `e_j`.
    pub rhs: Tensor,
    /// Constant term `⟨Gψ|N|Gψ⟩`.
    pub constant: f64,
}

impl LocalSystem {
    /// `xᵀ M x − 2 xᵀ b + const`.
    pub fn value(&self, x: &Tensor) -> Result<f64> {
        let mx = apply_operator(&self.m, x)?;
        Ok(x.inner_product(&mx)? - 2.0 * x.inner_product(&self.rhs)? + self.constant)
    }

    /// `2 (M x − b)`.
    pub fn gradient(&self, x: &Tensor) -> Result<Tensor> {
        let mx = apply_operator(&self.m, x)?;
        Ok(mx.axpby(2.0, &self.rhs, -2.0)?)
    }

    /// Replace `M` by its symmetric part; returns `‖M − Mᵀ‖ / ‖M‖`.
    pub fn symmetrize(&mut self) -> Result<f64> {
        let mt = self.m.swap_layers();
        let diff = self.m.sub(&mt)?.norm();
        let scale = self.m.norm();
        self.m = self.m.add(&mt)?.scale(0.5);
        Ok(if scale > 0.0 { diff / scale } else { 0.0 })
    }
}

/// Cost functional over the active tensors.
#[derive(Debug, Clone)]
pub struct CostFunctional<'a> {
    n: &'a Tensor,
    k: &'a Tensor,
    norm_upsi: f64,
    sites: Vec<Tensor>,
    phys: Vec<Index>,
    pairs: Vec<Tensor>,
}

/// `e ē` with the physical leg summed.
fn pair(e: &Tensor, phys: &Index) -> Result<Tensor> {
    Ok(e.contract(&half_bra(e, phys)?)?)
}

/// Bra copy of `e` whose physical leg stays in the ket layer.
fn half_bra(e: &Tensor, phys: &Index) -> Result<Tensor> {
    Ok(e.to_bra_layer()?.replaceind(&phys.bra(), phys)?)
}

impl<'a> CostFunctional<'a> {
    /// # Errors
    ///
    /// Fails if `sites` and `phys` differ in length or a site lacks its physical leg.
    pub fn new(
        n: &'a Tensor,
        k: &'a Tensor,
        norm_upsi: f64,
        sites: Vec<Tensor>,
        phys: Vec<Index>,
    ) -> Result<Self> {
        if sites.len() != phys.len() {
            return Err(FullUpdateError::contract(
                "cost",
                format!("{} tensors but {} physical legs", sites.len(), phys.len()),
            ));
        }
        let mut pairs = Vec::with_capacity(sites.len());
        for (e, p) in sites.iter().zip(&phys) {
            if !e.has_index(p) {
                return Err(FullUpdateError::contract(
                    "cost",
                    format!("tensor {:?} lacks physical leg {p:?}", e.indices()),
                ));
            }
            pairs.push(pair(e, p)?);
        }
        Ok(Self {
            n,
            k,
            norm_upsi,
            sites,
            phys,
            pairs,
        })
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.sites
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.sites
    }

    pub fn phys(&self) -> &[Index] {
        &self.phys
    }

    pub fn norm_upsi(&self) -> f64 {
        self.norm_upsi
    }

    /// Replace active tensor `j` and refresh its cached pair.
    pub fn set_tensor(&mut self, j: usize, e: Tensor) -> Result<()> {
        if !e.same_legs(&self.sites[j]) {
            return Err(FullUpdateError::contract(
                "cost",
                format!(
                    "new tensor legs {:?} differ from {:?}",
                    e.indices(),
                    self.sites[j].indices()
                ),
            ));
        }
        self.pairs[j] = pair(&e, &self.phys[j])?;
        self.sites[j] = e;
        Ok(())
    }

    /// Replace all active tensors.
    pub fn set_tensors(&mut self, tensors: Vec<Tensor>) -> Result<()> {
        for (j, e) in tensors.into_iter().enumerate() {
            self.set_tensor(j, e)?;
        }
        Ok(())
    }

    /// Build `(M_j, b_j)`.
    ///
    /// # Errors
    ///
    /// `ContractViolation` if the contracted operator or right-hand side does
    /// not carry the legs of `e_j`.
    pub fn local_system(&self, j: usize) -> Result<LocalSystem> {
        let mut m = self.n.clone();
        let mut rhs = self.k.clone();
        for i in (0..self.len()).filter(|&i| i != j) {
            m = m.contract(&self.pairs[i])?;
            rhs = rhs.contract(&self.sites[i].to_bra_layer()?)?;
        }
        let rhs = rhs.to_ket_layer()?;

        let e = &self.sites[j];
        if !rhs.same_legs(e) {
            return Err(FullUpdateError::contract(
                "local right-hand side",
                format!("expected legs {:?}, found {:?}", e.indices(), rhs.indices()),
            ));
        }
        let expected = 2 * (e.rank() - 1);
        let ok = m.rank() == expected
            && e
                .indices()
                .iter()
                .filter(|l| *l != &self.phys[j])
                .all(|l| m.has_index(l) && m.has_index(&l.bra()));
        if !ok {
            return Err(FullUpdateError::contract(
                "local operator",
                format!(
                    "expected ket/bra copies of {:?} without {:?}, found {:?}",
                    e.indices(),
                    self.phys[j],
                    m.indices()
                ),
            ));
        }
        Ok(LocalSystem {
            site: j,
            m,
            rhs,
            constant: self.norm_upsi,
        })
    }

    /// Cost through the cached local system of site 0.
    pub fn value(&self) -> Result<f64> {
        if self.is_empty() {
            return Ok(self.norm_upsi);
        }
        let sys = self.local_system(0)?;
        sys.value(&self.sites[0])
    }

    /// Cost recomputed from the full state `ψ' = Π e_i`.
    pub fn value_full(&self) -> Result<f64> {
        let psi = ipeps_core::contract_all(&self.sites)?;
        let overlap_n = self.overlap_with(&psi)?;
        let overlap_k = self.k.inner_product(&psi.to_bra_layer()?)?;
        Ok(overlap_n - 2.0 * overlap_k + self.norm_upsi)
    }

    /// `⟨ψ'|N|ψ'⟩` for the current tensors.
    pub fn overlap(&self) -> Result<f64> {
        let psi = ipeps_core::contract_all(&self.sites)?;
        self.overlap_with(&psi)
    }

    fn overlap_with(&self, psi: &Tensor) -> Result<f64> {
        let mut psi_bar = psi.to_bra_layer()?;
        for p in &self.phys {
            psi_bar = psi_bar.replaceind(&p.bra(), p)?;
        }
        Ok(self.n.contract(psi)?.inner_product(&psi_bar)?)
    }

    /// `∂f/∂e_j = 2 (M_j e_j − b_j)`.
    pub fn gradient(&self, j: usize) -> Result<Tensor> {
        self.local_system(j)?.gradient(&self.sites[j])
    }

    /// Block gradients for all active tensors.
    pub fn gradients(&self) -> Result<Vec<Tensor>> {
        (0..self.len()).map(|j| self.gradient(j)).collect()
    }
}
