//! Double-layer contractions built from ket tensors and their bra copies.

use approx::assert_relative_eq;
use ipeps_core::{contract_all, factorize, FactorizeOptions, Index, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn test_two_site_norm_matches_dense_norm() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let p1 = Index::new_dyn_with_tags(2, "phys,site=A").unwrap();
    let p2 = Index::new_dyn_with_tags(2, "phys,site=B").unwrap();
    let bond = Index::new_link(3);
    let a = Tensor::random(&mut rng, vec![p1.clone(), bond.clone()]).unwrap();
    let b = Tensor::random(&mut rng, vec![bond.clone(), p2.clone()]).unwrap();

    let psi = a.contract(&b).unwrap();

    // <psi|psi> with physical legs traced: bra copies keep the physical legs in the ket layer.
    let a_bar = a.to_bra_layer().unwrap().replaceind(&p1.bra(), &p1).unwrap();
    let b_bar = b.to_bra_layer().unwrap().replaceind(&p2.bra(), &p2).unwrap();
    let norm = contract_all([&a, &a_bar, &b, &b_bar]).unwrap().only().unwrap();

    assert_relative_eq!(norm, psi.norm_squared(), max_relative = 1e-12);
}

#[test]
fn test_contraction_is_associative() {
    let mut rng = ChaCha8Rng::seed_from_u64(12);
    let i = Index::new_dyn(2);
    let j = Index::new_dyn(3);
    let k = Index::new_dyn(4);
    let l = Index::new_dyn(2);
    let a = Tensor::random(&mut rng, vec![i.clone(), j.clone()]).unwrap();
    let b = Tensor::random(&mut rng, vec![j.clone(), k.clone()]).unwrap();
    let c = Tensor::random(&mut rng, vec![k.clone(), l.clone()]).unwrap();

    let left = a.contract(&b).unwrap().contract(&c).unwrap();
    let right = a.contract(&b.contract(&c).unwrap()).unwrap();
    assert!(left.max_abs_diff(&right).unwrap() < 1e-12);
}

#[test]
fn test_factorize_then_swap_layers_gives_transpose() {
    let mut rng = ChaCha8Rng::seed_from_u64(13);
    let r = Index::new_dyn(3);
    let m = Tensor::random(&mut rng, vec![r.clone(), r.bra()]).unwrap();
    let mt = m.swap_layers();
    for x in 0..3 {
        for y in 0..3 {
            let a = m.permute_indices(&[r.clone(), r.bra()]).unwrap().get(&[x, y]);
            let b = mt.permute_indices(&[r.clone(), r.bra()]).unwrap().get(&[y, x]);
            assert_relative_eq!(a, b);
        }
    }

    let f = factorize(&m, &[r.clone()], &FactorizeOptions::default()).unwrap();
    let back = f.left.contract(&f.right).unwrap();
    assert!(back.max_abs_diff(&m).unwrap() < 1e-12);
}
