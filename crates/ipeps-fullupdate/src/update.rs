//! Entry points: one full-update step on a plaquette, or the optimization of
//! an already reduced problem.

use std::collections::BTreeMap;
use std::time::Instant;

use ipeps_core::{factorize, Canonical, FactorizeOptions, Index, Tensor};
use log::{debug, info};

use crate::als::{AlsController, AlsReport, BicgSolver, LocalSolver, PseudoInverseSolver};
use crate::cluster::{Cluster, SiteId};
use crate::cost::CostFunctional;
use crate::diagnostics::Diagnostics;
use crate::environment::{assemble, GatedState, PlaquetteEnvironment};
use crate::error::{ConfigError, FullUpdateError, Result};
use crate::gate::Gate;
use crate::nlcg::{polak_ribiere, CgResult, FlattenedObjective, LineSearch, TensorSet};
use crate::normalize::normalize;
use crate::options::{CgRepresentation, FullUpdateOptions, Strategy};
use crate::plaquette::{Plaquette, Position};
use crate::regularize::{apply_operator, Regularized, Regularizer};
use crate::topology::ActiveTopology;

/// A problem already expressed on reduced tensors.
#[derive(Debug, Clone)]
pub struct ReducedProblem {
    /// Reduced environment with legs `{a, a.bra()}` (not yet regularized).
    pub n: Tensor,
    /// Gate on (a subset of) `phys`.
    pub gate: Gate,
    /// Initial active tensors.
    pub tensors: Vec<Tensor>,
    /// Physical leg of each active tensor.
    pub phys: Vec<Index>,
}

impl ReducedProblem {
    pub fn new(n: Tensor, gate: Gate, tensors: Vec<Tensor>, phys: Vec<Index>) -> Self {
        Self {
            n,
            gate,
            tensors,
            phys,
        }
    }
}

fn check_topology(strategy: Strategy, topology: &ActiveTopology) -> Result<()> {
    if strategy == Strategy::DirectPseudoInverse && topology.chain_order().is_none() {
        return Err(ConfigError::UnsupportedTopology(format!(
            "direct pseudo-inverse needs the active sites to form a chain; got {} sites{}",
            topology.len(),
            if topology.is_cyclic() { " with a loop" } else { "" }
        ))
        .into());
    }
    Ok(())
}

/// Optimize the active tensors of `problem`.
///
/// Returns the new tensors (same legs as the input tensors) and the
/// diagnostics of the run.
///
/// # Errors
///
/// - [`ConfigError`] for invalid options or a strategy that does not support
///   the bond graph of the tensors (checked before any tensor work)
/// - [`FullUpdateError::ContractViolation`] or a tensor error when legs do
///   not pair up
pub fn optimize_reduced(
    problem: ReducedProblem,
    options: &FullUpdateOptions,
) -> Result<(Vec<Tensor>, Diagnostics)> {
    options.validate()?;
    check_topology(options.strategy, &ActiveTopology::from_tensors(&problem.tensors))?;
    let start = Instant::now();

    let regularizer = Regularizer::new(options.regularization.clone());
    let direct = options.strategy == Strategy::DirectPseudoInverse;
    let reg = regularizer.regularize(&problem.n, direct)?;

    let tol_floor = if options.scale_tolerances {
        reg.spectrum.condition_number * f64::EPSILON
    } else {
        0.0
    };
    let mut bicg_options = options.bicg.clone();
    bicg_options.tol = bicg_options.tol.max(tol_floor);
    let mut cg_options = options.cg.clone();
    cg_options.gradient_tol = cg_options.gradient_tol.max(tol_floor);

    let gate = problem.gate.extended_to(&problem.phys)?;
    let gs = GatedState::compute(&reg.operator, &gate, &problem.tensors)?;
    let mut cost = CostFunctional::new(
        &reg.operator,
        &gs.k,
        gs.norm_upsi,
        problem.tensors,
        problem.phys,
    )?;

    let mut diag = Diagnostics {
        strategy: options.strategy,
        norm_upsi: gs.norm_upsi,
        spectrum: reg.spectrum.clone(),
        ..Default::default()
    };

    match options.strategy {
        Strategy::AlsPseudoInverse => {
            diag.effective_tolerance = options.fdistance_eps;
            let mut solver = PseudoInverseSolver::new(regularizer.clone());
            let report = run_als(&mut cost, &mut solver, options)?;
            record_als(&mut diag, report);
        }
        Strategy::AlsBicg => {
            diag.effective_tolerance = bicg_options.tol;
            let mut solver = BicgSolver::new(bicg_options, regularizer.clone());
            let report = run_als(&mut cost, &mut solver, options)?;
            record_als(&mut diag, report);
        }
        Strategy::JointConjugateGradient => {
            diag.effective_tolerance = cg_options.gradient_tol;
            diag.initial_cost = cost.value_full()?;
            let x0 = cost.tensors().to_vec();
            let tensors = match cg_options.representation {
                CgRepresentation::TensorNative => {
                    let res = polak_ribiere(
                        &mut cost,
                        TensorSet(x0),
                        &cg_options,
                        LineSearch::Backtracking,
                    )?;
                    record_cg(&mut diag, &res);
                    res.solution.into_inner()
                }
                CgRepresentation::Flattened => {
                    let mut objective = FlattenedObjective::new(&mut cost);
                    let block = objective.block().clone();
                    let flat = block.flatten(&x0)?;
                    let res = polak_ribiere(&mut objective, flat, &cg_options, LineSearch::Brent)?;
                    record_cg(&mut diag, &res);
                    block.unflatten(&res.solution)?
                }
            };
            cost.set_tensors(tensors)?;
        }
        Strategy::DirectPseudoInverse => {
            diag.initial_cost = cost.value_full()?;
            let (tensors, discarded) = direct_reconstruction(&reg, &gs, cost.tensors(), options)?;
            cost.set_tensors(tensors)?;
            diag.iterations = 1;
            diag.converged = true;
            diag.discarded_weight = discarded;
        }
    }

    diag.final_cost = cost.value_full()?;
    diag.overlap = cost.overlap()?;
    if diag.cost_history.is_empty() {
        diag.cost_history = vec![diag.initial_cost, diag.final_cost];
    }
    diag.elapsed = start.elapsed();
    info!(
        "{:?}: cost {:.6e} -> {:.6e} (relative {:.3e}) in {} iteration(s), converged = {}",
        diag.strategy,
        diag.initial_cost,
        diag.final_cost,
        diag.relative_cost(),
        diag.iterations,
        diag.converged
    );
    Ok((cost.into_tensors(), diag))
}

fn record_cg<V>(diag: &mut Diagnostics, res: &CgResult<V>) {
    diag.iterations = res.iterations;
    diag.converged = res.converged;
    diag.function_calls = res.function_calls;
    diag.gradient_calls = res.gradient_calls;
    diag.gradient_norm = res.gradient_norm;
}

fn run_als<S: LocalSolver>(
    cost: &mut CostFunctional<'_>,
    solver: &mut S,
    options: &FullUpdateOptions,
) -> Result<AlsReport> {
    AlsController::new(options.fdistance_eps, options.max_sweeps)
        .with_symmetrize_local(options.symmetrize_local)
        .run(cost, solver)
}

fn record_als(diag: &mut Diagnostics, report: AlsReport) {
    diag.iterations = report.sweeps;
    diag.converged = report.converged;
    diag.initial_cost = report.initial_cost;
    diag.cost_increases = report.cost_increases;
    diag.max_local_asymmetry = report.max_local_asymmetry;
    diag.solver_iterations = report.solver_iterations;
    diag.solver_failures = report.solver_failures;
    diag.cost_history = report.cost_history;
}

/// `ψ = N⁺ K`, split back into the active tensors by sequential SVDs along
/// the chain of active sites. Each new bond is truncated to the dimension of
/// the bond it replaces (or `max_bond_dim`) and zero-padded when the rank is
/// smaller. Returns the tensors and the total discarded weight.
fn direct_reconstruction(
    reg: &Regularized,
    gs: &GatedState,
    tensors: &[Tensor],
    options: &FullUpdateOptions,
) -> Result<(Vec<Tensor>, f64)> {
    let pinv = reg.pseudo_inverse.as_ref().ok_or_else(|| {
        FullUpdateError::contract("direct reconstruction", "pseudo-inverse was not produced")
    })?;
    let topology = ActiveTopology::from_tensors(tensors);
    let order = topology.chain_order().ok_or_else(|| {
        FullUpdateError::from(ConfigError::UnsupportedTopology(
            "direct pseudo-inverse needs a chain of active sites".to_string(),
        ))
    })?;

    let mut rest = apply_operator(pinv, &gs.k.to_ket_layer()?)?;
    let mut out: Vec<Option<Tensor>> = vec![None; tensors.len()];
    let mut incoming: Option<Index> = None;
    let mut discarded = 0.0;

    for (step, pair) in order.windows(2).enumerate() {
        let (here, next) = (pair[0], pair[1]);
        let bond = single_bond(&topology, here, next)?;
        let own: Vec<Index> = tensors[here]
            .indices()
            .iter()
            .filter(|l| **l != bond && Some(*l) != incoming.as_ref())
            .cloned()
            .collect();
        let mut left_legs = own;
        if let Some(b) = &incoming {
            left_legs.push(b.clone());
        }
        let max_rank = options.max_bond_dim.unwrap_or(bond.dim()).min(bond.dim());
        let f = factorize(
            &rest,
            &left_legs,
            &FactorizeOptions::default()
                .with_max_rank(max_rank)
                .with_canonical(Canonical::Left),
        )?;
        discarded += f.discarded_weight;
        debug!(
            "direct split step {step}: kept rank {} of bond dim {}, discarded {:.3e}",
            f.bond.dim(),
            bond.dim(),
            f.discarded_weight
        );
        out[here] = Some(pad_leg(&f.left, &f.bond, &bond)?);
        rest = pad_leg(&f.right, &f.bond, &bond)?;
        incoming = Some(bond);
    }
    if let Some(&last) = order.last() {
        out[last] = Some(rest);
    }

    let mut result = Vec::with_capacity(tensors.len());
    for (t, original) in out.into_iter().zip(tensors) {
        let t = t.ok_or_else(|| {
            FullUpdateError::contract("direct reconstruction", "active tensor not reconstructed")
        })?;
        result.push(t.permute_indices(original.indices())?);
    }
    Ok((result, discarded))
}

fn single_bond(topology: &ActiveTopology, i: usize, j: usize) -> Result<Index> {
    let bonds = topology.bonds_between(i, j);
    match bonds.as_slice() {
        [b] => Ok(b.clone()),
        _ => Err(FullUpdateError::Geometry(format!(
            "expected one bond between active tensors {i} and {j}, found {}",
            bonds.len()
        ))),
    }
}

/// Rename `old` to `new`, zero-padding when `new` is larger.
fn pad_leg(t: &Tensor, old: &Index, new: &Index) -> Result<Tensor> {
    if old.dim() == new.dim() {
        return Ok(t.replaceind(old, new)?);
    }
    let pos = t.position(old).ok_or_else(|| {
        FullUpdateError::contract("pad", format!("tensor lacks leg {old:?}"))
    })?;
    let mut legs = t.indices().to_vec();
    legs[pos] = new.clone();
    let limit = old.dim();
    Ok(Tensor::from_fn(legs, |x| {
        if x[pos] < limit {
            t.get(x)
        } else {
            0.0
        }
    })?)
}

/// One full-update step: assemble the reduced environment of the `active`
/// positions, optimize, write the tensors back into `cluster` and normalize.
///
/// On error the cluster is left unchanged.
pub fn full_update(
    cluster: &mut Cluster,
    plaquette: &Plaquette,
    env: &PlaquetteEnvironment,
    gate: &Gate,
    active: &[Position],
    options: &FullUpdateOptions,
) -> Result<Diagnostics> {
    options.validate()?;
    check_topology(options.strategy, &ActiveTopology::from_positions(active))?;
    let start = Instant::now();

    let glued = plaquette.glue(cluster)?;
    let reduced = assemble(&glued, env, active)?;
    let problem = ReducedProblem::new(
        reduced.n.clone(),
        gate.clone(),
        reduced.tensors(),
        reduced.phys(),
    );
    let (tensors, mut diag) = optimize_reduced(problem, options)?;

    let mut updated: Vec<(SiteId, Tensor)> = Vec::with_capacity(tensors.len());
    for (a, e) in reduced.actives.iter().zip(&tensors) {
        let x = a.recombine(e)?;
        let own = glued.site(a.position).unglue(&x)?;
        updated.push((a.site.clone(), own));
    }
    for (id, t) in &updated {
        if !cluster.site(id)?.tensor().same_legs(t) {
            return Err(FullUpdateError::contract(
                "write back",
                format!("legs of site {id} changed"),
            ));
        }
    }
    let ids: Vec<SiteId> = updated.iter().map(|(id, _)| id.clone()).collect();
    for (id, t) in updated {
        cluster.site_mut(&id)?.set_tensor(t)?;
    }

    diag.normalization_factors = normalize(cluster, &ids, options.normalization, diag.overlap)?;
    diag.max_elements = ids
        .iter()
        .map(|id| Ok((id.clone(), cluster.site(id)?.tensor().max_abs())))
        .collect::<Result<BTreeMap<_, _>>>()?;
    diag.elapsed = start.elapsed();
    Ok(diag)
}
