use ipeps_core::{Index, Tensor};

use crate::error::{FullUpdateError, Result};
use crate::gate::Gate;

/// The gated target `K = N · G · Π e_i` and the constant `⟨Gψ|N|Gψ⟩`.
///
/// `K` carries the bra copies of the reduced and physical legs, so that
/// `⟨ψ'|K⟩` is the full contraction of `K` with the bra copy of `ψ'`.
#[derive(Debug, Clone)]
pub struct GatedState {
    pub k: Tensor,
    pub norm_upsi: f64,
}

impl GatedState {
    /// Compute `K` from the (regularized) reduced environment and the
    /// initial active tensors.
    pub fn compute(n: &Tensor, gate: &Gate, sites: &[Tensor]) -> Result<Self> {
        let psi = ipeps_core::contract_all(sites)?;
        let g_psi = gate.tensor().contract(&psi)?;
        let k = n.contract(&g_psi)?;

        let expected: Vec<Index> = psi.indices().iter().map(Index::bra).collect();
        if k.rank() != expected.len() || expected.iter().any(|l| !k.has_index(l)) {
            return Err(FullUpdateError::contract(
                "gated state",
                format!(
                    "K carries {:?}, expected bra copies of {:?}",
                    k.indices(),
                    psi.indices()
                ),
            ));
        }

        let norm_upsi = k.inner_product(&g_psi.to_bra_layer()?)?;
        Ok(Self { k, norm_upsi })
    }
}
