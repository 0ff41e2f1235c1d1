//! Shared fixtures for unit tests.

use ipeps_core::{Index, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::gate::Gate;

/// Random `GᵀG + shift·I` on `legs`.
pub(crate) fn spd_operator(rng: &mut ChaCha8Rng, legs: &[Index], shift: f64) -> Tensor {
    let aux = Index::new_dyn(legs.iter().map(Index::dim).product());
    let mut cols = vec![aux.clone()];
    cols.extend(legs.iter().cloned());
    let g = Tensor::random(rng, cols).unwrap();
    let g_bar = g.to_bra_layer().unwrap().replaceind(&aux.bra(), &aux).unwrap();
    let gtg = g.contract(&g_bar).unwrap();
    let id = Tensor::identity_operator(legs).unwrap().scale(shift);
    gtg.add(&id).unwrap()
}

/// Near-identity gate on `phys` (dense, not symmetric).
pub(crate) fn dense_gate(phys: &[Index]) -> Gate {
    let dim: usize = phys.iter().map(Index::dim).product();
    let mut g = vec![0.0; dim * dim];
    for (i, v) in g.iter_mut().enumerate() {
        let (r, c) = (i / dim, i % dim);
        *v = if r == c {
            1.0
        } else {
            0.05 * ((r + 2 * c) % 5) as f64
        };
    }
    Gate::from_matrix(phys.to_vec(), g).unwrap()
}

/// Three tensors in a chain `e0 - e1 - e2` with a positive-definite environment.
pub(crate) fn chain_problem(seed: u64) -> (Tensor, Vec<Tensor>, Vec<Index>, Gate) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let phys: Vec<Index> = (0..3).map(|_| Index::new_dyn(2)).collect();
    let red: Vec<Index> = (0..3).map(|_| Index::new_dyn(3)).collect();
    let b01 = Index::new_link(2);
    let b12 = Index::new_link(2);
    let sites = vec![
        Tensor::random(&mut rng, vec![red[0].clone(), phys[0].clone(), b01.clone()]).unwrap(),
        Tensor::random(
            &mut rng,
            vec![b01.clone(), red[1].clone(), phys[1].clone(), b12.clone()],
        )
        .unwrap(),
        Tensor::random(&mut rng, vec![b12, phys[2].clone(), red[2].clone()]).unwrap(),
    ];
    let n = spd_operator(&mut rng, &red, 0.1);
    let gate = dense_gate(&phys);
    (n, sites, phys, gate)
}
