//! Rescaling of site tensors after an update.

use std::collections::BTreeMap;

use log::warn;

use crate::cluster::{Cluster, SiteId};
use crate::error::Result;
use crate::options::NormalizationPolicy;

/// Rescale the tensors of `cluster` according to `policy`.
///
/// `updated` lists the sites touched by the update; `overlap` is
/// `⟨ψ'|N|ψ'⟩` of the new tensors (used by [`NormalizationPolicy::CostPower`]).
/// Returns the factor each site tensor was multiplied by.
pub fn normalize(
    cluster: &mut Cluster,
    updated: &[SiteId],
    policy: NormalizationPolicy,
    overlap: f64,
) -> Result<BTreeMap<SiteId, f64>> {
    let mut factors = BTreeMap::new();
    match policy {
        NormalizationPolicy::None => {}
        NormalizationPolicy::SqrtMaxElement => {
            for id in updated {
                let m = cluster.site(id)?.tensor().max_abs();
                if m > 0.0 {
                    factors.insert(id.clone(), 1.0 / m.sqrt());
                } else {
                    warn!("site {id} is zero; not normalized");
                }
            }
        }
        NormalizationPolicy::CostPower => {
            if overlap > 0.0 && !updated.is_empty() {
                let f = overlap.powf(-1.0 / (2.0 * updated.len() as f64));
                for id in updated {
                    factors.insert(id.clone(), f);
                }
            } else {
                warn!("overlap {overlap:.3e} is not positive; not normalized");
            }
        }
        NormalizationPolicy::GlobalBalance => {
            let maxima: Vec<(SiteId, f64)> = cluster
                .iter()
                .map(|(id, s)| (id.clone(), s.tensor().max_abs()))
                .collect();
            if maxima.iter().any(|(_, m)| *m <= 0.0) {
                warn!("cluster contains a zero tensor; not balanced");
            } else if !maxima.is_empty() {
                let log_mean =
                    maxima.iter().map(|(_, m)| m.ln()).sum::<f64>() / maxima.len() as f64;
                let target = log_mean.exp();
                for (id, m) in maxima {
                    factors.insert(id, target / m);
                }
            }
        }
    }

    for (id, f) in &factors {
        let site = cluster.site_mut(id)?;
        let scaled = site.tensor().scale(*f);
        site.set_tensor(scaled)?;
    }
    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SiteTensor;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn cluster() -> Cluster {
        let mut rng = ChaCha8Rng::seed_from_u64(71);
        let mut c = Cluster::new();
        for (i, name) in ["A", "B", "C", "D"].iter().enumerate() {
            let mut s = SiteTensor::random(&mut rng, name, 2, 2).unwrap();
            let t = s.tensor().scale(10f64.powi(i as i32));
            s.set_tensor(t).unwrap();
            c.insert(*name, s);
        }
        c
    }

    fn max_of(c: &Cluster, id: &str) -> f64 {
        c.site(&SiteId::new(id)).unwrap().tensor().max_abs()
    }

    #[test]
    fn test_sqrt_max_element() {
        let mut c = cluster();
        let before = max_of(&c, "B");
        let ids = vec![SiteId::new("B")];
        normalize(&mut c, &ids, NormalizationPolicy::SqrtMaxElement, 1.0).unwrap();
        assert_relative_eq!(max_of(&c, "B"), before.sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn test_cost_power_scales_overlap_to_one() {
        let mut c = cluster();
        let ids: Vec<SiteId> = ["A", "B", "C"].iter().map(|s| SiteId::new(*s)).collect();
        let a = max_of(&c, "A");
        let overlap = 64.0;
        let f = normalize(&mut c, &ids, NormalizationPolicy::CostPower, overlap).unwrap();
        // three tensors each scaled by overlap^(-1/6): the overlap (quadratic) drops to 1
        let factor = f[&ids[0]];
        assert_relative_eq!(overlap * factor.powi(6), 1.0, max_relative = 1e-12);
        assert_relative_eq!(max_of(&c, "A"), a * factor, max_relative = 1e-12);
        assert!(!f.contains_key(&SiteId::new("D")));
    }

    #[test]
    fn test_global_balance_equalizes_max_elements() {
        let mut c = cluster();
        normalize(&mut c, &[], NormalizationPolicy::GlobalBalance, 1.0).unwrap();
        let m = max_of(&c, "A");
        for id in ["B", "C", "D"] {
            assert_relative_eq!(max_of(&c, id), m, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_none_leaves_tensors() {
        let mut c = cluster();
        let before = max_of(&c, "C");
        let f = normalize(&mut c, &[SiteId::new("C")], NormalizationPolicy::None, 1.0).unwrap();
        assert!(f.is_empty());
        assert_eq!(max_of(&c, "C"), before);
    }
}
