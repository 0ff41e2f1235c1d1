use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ipeps_core::{Index, Tensor};
use ipeps_fullupdate::{
    apply_operator, solve_operator, BicgOptions, PreconditionerKind, Regularizer,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// SPD operator `GᵀG + I` on one leg of dimension `dim`, with a
/// right-hand side carrying an extra physical leg.
fn random_system(dim: usize, seed: u64) -> (Tensor, Tensor, Tensor) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let a = Index::new_dyn(dim);
    let p = Index::new_dyn(2);
    let aux = Index::new_dyn(dim);
    let g = Tensor::random(&mut rng, vec![aux.clone(), a.clone()]).unwrap();
    let g_bar = g.to_bra_layer().unwrap().replaceind(&aux.bra(), &aux).unwrap();
    let m = g
        .contract(&g_bar)
        .unwrap()
        .add(&Tensor::identity_operator(&[a.clone()]).unwrap())
        .unwrap();
    let x = Tensor::random(&mut rng, vec![a.clone(), p.clone()]).unwrap();
    let rhs = apply_operator(&m, &x).unwrap();
    let x0 = Tensor::zeros(vec![a, p]).unwrap();
    (m, rhs, x0)
}

fn bench_bicg(c: &mut Criterion) {
    let mut group = c.benchmark_group("bicg_spd");
    let regularizer = Regularizer::default();

    for &dim in &[16, 64, 128] {
        let (m, rhs, x0) = random_system(dim, 42);
        for kind in [PreconditionerKind::Identity, PreconditionerKind::Diagonal] {
            let options = BicgOptions::default()
                .with_tol(1e-10)
                .with_preconditioner(kind);
            group.bench_with_input(
                BenchmarkId::new(format!("{kind:?}"), dim),
                &dim,
                |b, _| {
                    b.iter(|| solve_operator(&m, &rhs, &x0, &options, &regularizer).unwrap());
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_bicg);
criterion_main!(benches);
