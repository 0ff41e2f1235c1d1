//! Typed record of one optimization call.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::cluster::SiteId;
use crate::options::Strategy;
use crate::regularize::SpectrumDiagnostics;

/// Diagnostics returned by value from every optimization call.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub strategy: Strategy,
    /// ALS sweeps or CG iterations.
    pub iterations: usize,
    pub converged: bool,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Constant `⟨Gψ|N|Gψ⟩`.
    pub norm_upsi: f64,
    /// `⟨ψ'|N|ψ'⟩` of the optimized tensors.
    pub overlap: f64,
    /// Cost after every local solve (ALS) or iteration (CG).
    pub cost_history: Vec<f64>,
    pub cost_increases: usize,
    pub max_local_asymmetry: f64,
    pub solver_iterations: usize,
    pub solver_failures: usize,
    pub function_calls: usize,
    pub gradient_calls: usize,
    pub gradient_norm: f64,
    /// Tolerance after scaling by the condition number of `N`.
    pub effective_tolerance: f64,
    /// Weight dropped when splitting a directly reconstructed state.
    pub discarded_weight: f64,
    pub spectrum: SpectrumDiagnostics,
    /// Max-magnitude element of each active site tensor after normalization.
    pub max_elements: BTreeMap<SiteId, f64>,
    pub normalization_factors: BTreeMap<SiteId, f64>,
    pub elapsed: Duration,
}

impl Diagnostics {
    /// `final_cost / ⟨Gψ|N|Gψ⟩`, or the raw cost when the reference vanishes.
    pub fn relative_cost(&self) -> f64 {
        if self.norm_upsi.abs() > 0.0 {
            self.final_cost / self.norm_upsi
        } else {
            self.final_cost
        }
    }

    /// Flatten into `key → value` pairs for logging or serialization.
    pub fn to_flat_map(&self) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        let mut put = |k: &str, v: f64| {
            m.insert(k.to_string(), v);
        };
        put("iterations", self.iterations as f64);
        put("converged", if self.converged { 1.0 } else { 0.0 });
        put("cost.initial", self.initial_cost);
        put("cost.final", self.final_cost);
        put("cost.relative", self.relative_cost());
        put("cost.increases", self.cost_increases as f64);
        put("norm_upsi", self.norm_upsi);
        put("overlap", self.overlap);
        put("local_asymmetry.max", self.max_local_asymmetry);
        put("solver.iterations", self.solver_iterations as f64);
        put("solver.failures", self.solver_failures as f64);
        put("calls.function", self.function_calls as f64);
        put("calls.gradient", self.gradient_calls as f64);
        put("gradient_norm", self.gradient_norm);
        put("tolerance.effective", self.effective_tolerance);
        put("discarded_weight", self.discarded_weight);
        put("spectrum.dim", self.spectrum.dim as f64);
        put("spectrum.max", self.spectrum.max_eigenvalue);
        put("spectrum.min", self.spectrum.min_eigenvalue);
        put("spectrum.condition_number", self.spectrum.condition_number);
        put("spectrum.negative", self.spectrum.negative_count as f64);
        put("spectrum.clipped", self.spectrum.clipped_count as f64);
        put("spectrum.below_cutoff", self.spectrum.below_cutoff_count as f64);
        put("spectrum.asymmetry_norm", self.spectrum.asymmetry_norm);
        put("spectrum.asymmetry_ratio", self.spectrum.asymmetry_ratio);
        put(
            "spectrum.sign_flipped",
            if self.spectrum.sign_flipped { 1.0 } else { 0.0 },
        );
        put("elapsed_seconds", self.elapsed.as_secs_f64());
        for (id, v) in &self.max_elements {
            m.insert(format!("max_element.{id}"), *v);
        }
        for (id, v) in &self.normalization_factors {
            m.insert(format!("normalization.{id}"), *v);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_map_keys() {
        let mut d = Diagnostics {
            iterations: 3,
            converged: true,
            final_cost: 0.5,
            norm_upsi: 2.0,
            elapsed: Duration::from_millis(250),
            ..Default::default()
        };
        d.max_elements.insert(SiteId::new("A"), 1.5);
        let m = d.to_flat_map();
        assert_eq!(m["iterations"], 3.0);
        assert_eq!(m["converged"], 1.0);
        assert_eq!(m["cost.relative"], 0.25);
        assert_eq!(m["max_element.A"], 1.5);
        assert_eq!(m["elapsed_seconds"], 0.25);
    }
}
