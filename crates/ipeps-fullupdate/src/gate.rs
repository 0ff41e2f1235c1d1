//! Trotter gates acting on the physical legs of the active sites.
//!
//! A gate carries each physical leg twice: the ket copy is the input and the
//! bra copy is the output.

use ipeps_core::{Index, Tensor};

use crate::error::{FullUpdateError, Result};

/// Read-only gate operator.
#[derive(Debug, Clone)]
pub struct Gate {
    tensor: Tensor,
    phys: Vec<Index>,
}

impl Gate {
    /// Wrap a tensor with legs `{p, p.bra()}` for every `p` in `phys`.
    pub fn from_tensor(tensor: Tensor, phys: Vec<Index>) -> Result<Self> {
        let expected = 2 * phys.len();
        let ok = tensor.rank() == expected
            && phys
                .iter()
                .all(|p| tensor.has_index(&p.ket()) && tensor.has_index(&p.bra()));
        if !ok {
            return Err(FullUpdateError::contract(
                "gate",
                format!(
                    "gate legs {:?} are not input/output copies of {:?}",
                    tensor.indices(),
                    phys
                ),
            ));
        }
        let phys = phys.iter().map(Index::ket).collect();
        Ok(Self { tensor, phys })
    }

    /// Product of factor tensors joined by internal links (an MPO-style gate).
    ///
    /// All links between factors are summed over; what remains must be the
    /// input and output copies of `phys`.
    pub fn from_factors(factors: &[Tensor], phys: Vec<Index>) -> Result<Self> {
        let tensor = ipeps_core::contract_all(factors)?;
        Self::from_tensor(tensor, phys)
    }

    /// The identity gate.
    pub fn identity(phys: Vec<Index>) -> Result<Self> {
        let tensor = Tensor::identity_operator(&phys)?;
        Self::from_tensor(tensor, phys)
    }

    /// Gate from a single dense matrix in the product basis of `phys`
    /// (row = output, column = input, first leg slowest).
    pub fn from_matrix(phys: Vec<Index>, matrix: Vec<f64>) -> Result<Self> {
        let outputs: Vec<Index> = phys.iter().map(Index::bra).collect();
        let inputs: Vec<Index> = phys.iter().map(Index::ket).collect();
        let tensor = Tensor::from_matrix(&outputs, &inputs, matrix)?;
        Self::from_tensor(tensor, phys)
    }

    /// The same gate acting as the identity on the legs of `phys` it does not touch.
    ///
    /// Fails if the gate acts on a leg outside `phys`.
    pub fn extended_to(&self, phys: &[Index]) -> Result<Self> {
        let wanted: Vec<Index> = phys.iter().map(Index::ket).collect();
        if let Some(p) = self.phys.iter().find(|p| !wanted.contains(p)) {
            return Err(FullUpdateError::contract(
                "gate",
                format!("gate acts on {p:?}, which is not an active physical leg"),
            ));
        }
        let missing: Vec<Index> = wanted
            .iter()
            .filter(|p| !self.phys.contains(p))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(self.clone());
        }
        let tensor = self.tensor.contract(&Tensor::identity_operator(&missing)?)?;
        let mut all = self.phys.clone();
        all.extend(missing);
        Self::from_tensor(tensor, all)
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn phys(&self) -> &[Index] {
        &self.phys
    }

    /// `G |ψ⟩` with the output legs renamed back to the ket layer.
    pub fn apply(&self, psi: &Tensor) -> Result<Tensor> {
        let out = self.tensor.contract(psi)?;
        let outputs: Vec<Index> = self.phys.iter().map(Index::bra).collect();
        Ok(out.flip_legs(&outputs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_identity_gate_leaves_state_unchanged() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let p1 = Index::new_dyn(2);
        let p2 = Index::new_dyn(2);
        let r = Index::new_dyn(3);
        let psi = Tensor::random(&mut rng, vec![p1.clone(), r, p2.clone()]).unwrap();
        let g = Gate::identity(vec![p1, p2]).unwrap();
        let out = g.apply(&psi).unwrap();
        assert_abs_diff_eq!(out.max_abs_diff(&psi).unwrap(), 0.0);
    }

    #[test]
    fn test_mpo_factors_contract_to_gate() {
        // exp(-i t Sz Sz)-like diagonal gate split into two factors with a link of dim 2.
        let p1 = Index::new_dyn(2);
        let p2 = Index::new_dyn(2);
        let link = Index::new_link(2);
        let sign = |s: usize| -> f64 { if s == 0 { 1.0 } else { -1.0 } };
        let f1 = Tensor::from_fn(vec![p1.bra(), p1.clone(), link.clone()], |x| {
            if x[0] == x[1] && x[1] == x[2] {
                1.0
            } else {
                0.0
            }
        })
        .unwrap();
        let f2 = Tensor::from_fn(vec![link.clone(), p2.bra(), p2.clone()], |x| {
            if x[1] == x[2] {
                (0.1 * sign(x[0]) * sign(x[1])).exp()
            } else {
                0.0
            }
        })
        .unwrap();
        let g = Gate::from_factors(&[f1, f2], vec![p1.clone(), p2.clone()]).unwrap();
        assert_eq!(g.tensor().rank(), 4);
        let v = g
            .tensor()
            .permute_indices(&[p1.bra(), p2.bra(), p1.clone(), p2.clone()])
            .unwrap();
        assert_abs_diff_eq!(v.get(&[0, 1, 0, 1]), (-0.1f64).exp(), epsilon = 1e-14);
        assert_abs_diff_eq!(v.get(&[1, 1, 1, 1]), (0.1f64).exp(), epsilon = 1e-14);
        assert_abs_diff_eq!(v.get(&[0, 1, 1, 1]), 0.0);
    }

    #[test]
    fn test_extended_gate_is_identity_on_new_legs() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let p1 = Index::new_dyn(2);
        let p2 = Index::new_dyn(3);
        let swap = Gate::from_matrix(vec![p1.clone()], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let g = swap.extended_to(&[p1.clone(), p2.clone()]).unwrap();
        assert_eq!(g.phys().len(), 2);
        let psi = Tensor::random(&mut rng, vec![p1.clone(), p2.clone()]).unwrap();
        let out = g.apply(&psi).unwrap().permute_indices(&[p1.clone(), p2.clone()]).unwrap();
        assert_abs_diff_eq!(out.get(&[0, 2]), psi.get(&[1, 2]));
        assert!(swap.extended_to(&[p2]).is_err());
    }

    #[test]
    fn test_dangling_link_rejected() {
        let p = Index::new_dyn(2);
        let link = Index::new_link(2);
        let f = Tensor::zeros(vec![p.bra(), p.clone(), link]).unwrap();
        assert!(matches!(
            Gate::from_factors(&[f], vec![p]),
            Err(FullUpdateError::ContractViolation { .. })
        ));
    }
}
