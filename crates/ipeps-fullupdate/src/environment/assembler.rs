use std::collections::HashSet;

use ipeps_core::{factorize, Canonical, FactorizeOptions, Index, TagSet, Tensor};
use log::debug;

use super::{proto_corner, PlaquetteEnvironment};
use crate::cluster::SiteId;
use crate::error::{FullUpdateError, Result};
use crate::plaquette::{GluedPlaquette, GluedSite, Position};
use crate::topology::ActiveTopology;

/// An active site split as `X = Q · e`.
///
/// `Q` is an isometry holding every auxiliary leg that does not connect to
/// another active site; `e` holds the reduced leg, the physical leg and the
/// bonds to the other active sites. Only `e` is optimized.
#[derive(Debug, Clone)]
pub struct ActiveSite {
    pub position: Position,
    pub site: SiteId,
    pub phys: Index,
    pub isometry: Tensor,
    pub reduced: Index,
    pub tensor: Tensor,
}

impl ActiveSite {
    /// Split a glued site; `active_legs` are its bonds to other active sites.
    pub fn split(site: &GluedSite, active_legs: &[Index]) -> Result<Self> {
        let outer: Vec<Index> = site
            .legs()
            .iter()
            .filter(|l| !active_legs.contains(l))
            .cloned()
            .collect();
        let tags = TagSet::from_tags(&["red".to_string(), format!("site={}", site.site)])?;
        let opts = FactorizeOptions::default()
            .with_canonical(Canonical::Left)
            .with_bond_tags(tags);
        let f = factorize(&site.tensor, &outer, &opts)?;
        debug!(
            "split {}: reduced dim {} (discarded {:.3e})",
            site.position,
            f.bond.dim(),
            f.discarded_weight
        );
        Ok(Self {
            position: site.position,
            site: site.site.clone(),
            phys: site.phys.clone(),
            isometry: f.left,
            reduced: f.bond,
            tensor: f.right,
        })
    }

    /// `Q · e` with the glued legs of the site.
    pub fn recombine(&self, tensor: &Tensor) -> Result<Tensor> {
        if !tensor.has_index(&self.reduced) {
            return Err(FullUpdateError::contract(
                "recombine",
                format!("tensor lacks reduced leg {:?}", self.reduced),
            ));
        }
        Ok(self.isometry.contract(tensor)?)
    }
}

/// Reduced environment `N` with the split active sites it refers to.
#[derive(Debug, Clone)]
pub struct ReducedEnvironment {
    /// Operator with legs `{r_i, r_i.bra()}`.
    pub n: Tensor,
    pub actives: Vec<ActiveSite>,
}

impl ReducedEnvironment {
    pub fn tensors(&self) -> Vec<Tensor> {
        self.actives.iter().map(|a| a.tensor.clone()).collect()
    }

    pub fn phys(&self) -> Vec<Index> {
        self.actives.iter().map(|a| a.phys.clone()).collect()
    }

    pub fn reduced_legs(&self) -> Vec<Index> {
        self.actives.iter().map(|a| a.reduced.clone()).collect()
    }
}

/// Bra copy of a spectator site with the physical leg left in the ket layer.
fn spectator_bra(site: &GluedSite) -> Result<Tensor> {
    Ok(site
        .tensor
        .to_bra_layer()?
        .replaceind(&site.phys.bra(), &site.phys)?)
}

/// Assemble the reduced environment of `active` positions.
///
/// # Errors
///
/// - `Geometry` if fewer than two or repeated positions are given, or the
///   active sites are not connected
/// - `ContractViolation` if the assembled `N` does not carry exactly the
///   reduced legs and their bra copies
pub fn assemble(
    glued: &GluedPlaquette,
    env: &PlaquetteEnvironment,
    active: &[Position],
) -> Result<ReducedEnvironment> {
    let unique: HashSet<Position> = active.iter().copied().collect();
    if active.len() < 2 || unique.len() != active.len() {
        return Err(FullUpdateError::Geometry(format!(
            "need at least two distinct active positions, got {active:?}"
        )));
    }
    if !ActiveTopology::from_positions(active).is_connected() {
        return Err(FullUpdateError::Geometry(format!(
            "active positions {active:?} are not connected"
        )));
    }

    let mut actives = Vec::with_capacity(active.len());
    for &pos in active {
        let site = glued.site(pos);
        let bonds: Vec<Index> = site
            .legs()
            .iter()
            .filter(|leg| {
                active
                    .iter()
                    .any(|&other| other != pos && glued.site(other).legs().contains(leg))
            })
            .cloned()
            .collect();
        actives.push(ActiveSite::split(site, &bonds)?);
    }

    let mut pieces = Vec::with_capacity(4);
    for pos in Position::ALL {
        let site = glued.site(pos);
        let pc = proto_corner(env.block(pos), site)?;
        let piece = match actives.iter().find(|a| a.position == pos) {
            Some(a) => pc
                .contract(&a.isometry)?
                .contract(&a.isometry.to_bra_layer()?)?,
            None => pc.contract(&site.tensor)?.contract(&spectator_bra(site)?)?,
        };
        pieces.push(piece);
    }
    let n = ipeps_core::contract_all(&pieces)?;

    let reduced: Vec<Index> = actives.iter().map(|a| a.reduced.clone()).collect();
    let ok = n.rank() == 2 * reduced.len()
        && reduced
            .iter()
            .all(|r| n.has_index(r) && n.has_index(&r.bra()));
    if !ok {
        return Err(FullUpdateError::contract(
            "reduced environment",
            format!(
                "expected legs {:?} and their bra copies, found {:?}",
                reduced,
                n.indices()
            ),
        ));
    }
    Ok(ReducedEnvironment { n, actives })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, SiteTensor};
    use crate::plaquette::Plaquette;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(seed: u64) -> (Cluster, Plaquette) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut c = Cluster::new();
        for name in ["A", "B", "C", "D"] {
            c.insert(name, SiteTensor::random(&mut rng, name, 2, 2).unwrap());
        }
        (c, Plaquette::abcd())
    }

    /// With a trivial environment, `⟨ψ|N|ψ⟩` is the squared norm of the plaquette state.
    #[test]
    fn test_reduced_norm_matches_plaquette_norm() {
        for active in [
            vec![Position::UpperLeft, Position::UpperRight, Position::LowerRight],
            Position::ALL.to_vec(),
        ] {
            let (c, p) = setup(31);
            let glued = p.glue(&c).unwrap();
            let env = PlaquetteEnvironment::trivial(&p, &c).unwrap();
            let red = assemble(&glued, &env, &active).unwrap();

            let psi = ipeps_core::contract_all(&red.tensors()).unwrap();
            let psi_bar = psi
                .to_bra_layer()
                .unwrap()
                .replaceinds(
                    &red.phys().iter().map(Index::bra).collect::<Vec<_>>(),
                    &red.phys(),
                )
                .unwrap();
            let value = red.n.contract(&psi).unwrap().inner_product(&psi_bar).unwrap();

            let direct = glued.contract().unwrap().norm_squared();
            assert_relative_eq!(value, direct, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_recombine_restores_site() {
        let (c, p) = setup(32);
        let glued = p.glue(&c).unwrap();
        let site = glued.site(Position::UpperRight);
        let bonds = vec![
            site.leg(crate::cluster::Direction::Left).clone(),
            site.leg(crate::cluster::Direction::Down).clone(),
        ];
        let a = ActiveSite::split(site, &bonds).unwrap();
        assert!(a.tensor.has_index(&a.phys));
        assert!(a.tensor.has_index(&bonds[0]));
        let back = a.recombine(&a.tensor).unwrap();
        assert!(back.max_abs_diff(&site.tensor).unwrap() < 1e-12);
    }

    #[test]
    fn test_disconnected_actives_rejected() {
        let (c, p) = setup(33);
        let glued = p.glue(&c).unwrap();
        let env = PlaquetteEnvironment::trivial(&p, &c).unwrap();
        let r = assemble(&glued, &env, &[Position::UpperLeft, Position::LowerRight]);
        assert!(matches!(r, Err(FullUpdateError::Geometry(_))));
    }
}
