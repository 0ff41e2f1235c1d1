//! 2×2 plaquette of the unit cell and gluing of its internal bonds.
//!
//! Every site tensor owns four distinct auxiliary legs. Inside a plaquette
//! the four internal bonds are glued by renaming the inward leg of one site to
//! the outward leg of its neighbour:
//!
//! ```text
//!   UL --right/left-- UR
//!    |                 |
//!  down/up          down/up
//!    |                 |
//!   LL --right/left-- LR
//! ```

use std::fmt;

use ipeps_core::{Index, Tensor};

use crate::cluster::{Cluster, Direction, SiteId};
use crate::error::{FullUpdateError, Result};

/// Position inside the plaquette, clockwise from the upper-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Position {
    UpperLeft,
    UpperRight,
    LowerRight,
    LowerLeft,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::UpperLeft,
        Position::UpperRight,
        Position::LowerRight,
        Position::LowerLeft,
    ];

    pub fn slot(self) -> usize {
        match self {
            Position::UpperLeft => 0,
            Position::UpperRight => 1,
            Position::LowerRight => 2,
            Position::LowerLeft => 3,
        }
    }

    /// Directions of the two bonds leaving the plaquette at this position,
    /// as `(horizontal edge, vertical edge)`.
    pub fn outward(self) -> (Direction, Direction) {
        match self {
            Position::UpperLeft => (Direction::Up, Direction::Left),
            Position::UpperRight => (Direction::Up, Direction::Right),
            Position::LowerRight => (Direction::Down, Direction::Right),
            Position::LowerLeft => (Direction::Down, Direction::Left),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Position::UpperLeft => "UL",
            Position::UpperRight => "UR",
            Position::LowerRight => "LR",
            Position::LowerLeft => "LL",
        };
        f.write_str(s)
    }
}

/// Internal bonds as `(owner, owner direction, renamed, renamed direction)`:
/// the leg of `renamed` in `renamed direction` takes the identity of the leg of
/// `owner` in `owner direction`.
pub const INTERNAL_BONDS: [(Position, Direction, Position, Direction); 4] = [
    (Position::UpperLeft, Direction::Right, Position::UpperRight, Direction::Left),
    (Position::UpperRight, Direction::Down, Position::LowerRight, Direction::Up),
    (Position::LowerRight, Direction::Left, Position::LowerLeft, Direction::Right),
    (Position::LowerLeft, Direction::Up, Position::UpperLeft, Direction::Down),
];

/// Assignment of unit-cell sites to plaquette positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plaquette {
    sites: [SiteId; 4],
}

impl Plaquette {
    /// Sites given clockwise: upper-left, upper-right, lower-right, lower-left.
    pub fn new(ul: SiteId, ur: SiteId, lr: SiteId, ll: SiteId) -> Result<Self> {
        let sites = [ul, ur, lr, ll];
        for i in 0..4 {
            for j in (i + 1)..4 {
                if sites[i] == sites[j] {
                    return Err(FullUpdateError::Geometry(format!(
                        "site {} occupies two plaquette positions",
                        sites[i]
                    )));
                }
            }
        }
        Ok(Self { sites })
    }

    /// The usual `A B / C D` unit cell.
    pub fn abcd() -> Self {
        Self {
            sites: [
                SiteId::new("A"),
                SiteId::new("B"),
                SiteId::new("D"),
                SiteId::new("C"),
            ],
        }
    }

    pub fn site(&self, pos: Position) -> &SiteId {
        &self.sites[pos.slot()]
    }

    /// Copy the plaquette tensors out of `cluster` with internal bonds glued.
    pub fn glue(&self, cluster: &Cluster) -> Result<GluedPlaquette> {
        let mut sites: Vec<GluedSite> = Vec::with_capacity(4);
        for pos in Position::ALL {
            let s = cluster.site(self.site(pos))?;
            sites.push(GluedSite {
                position: pos,
                site: self.site(pos).clone(),
                tensor: s.tensor().clone(),
                phys: s.phys().clone(),
                legs: s.aux_legs().clone(),
                original: s.aux_legs().clone(),
            });
        }

        for (owner, owner_dir, renamed, renamed_dir) in INTERNAL_BONDS {
            let target = sites[owner.slot()].leg(owner_dir).clone();
            let site = &mut sites[renamed.slot()];
            let old = site.leg(renamed_dir).clone();
            if old.dim() != target.dim() {
                return Err(FullUpdateError::Geometry(format!(
                    "bond {owner}.{} (dim {}) does not match {renamed}.{} (dim {})",
                    owner_dir.as_str(),
                    target.dim(),
                    renamed_dir.as_str(),
                    old.dim()
                )));
            }
            site.tensor = site.tensor.replaceind(&old, &target)?;
            site.legs[renamed_dir.slot()] = target;
        }

        let sites: [GluedSite; 4] = sites
            .try_into()
            .map_err(|_| FullUpdateError::Geometry("plaquette needs four sites".to_string()))?;
        Ok(GluedPlaquette { sites })
    }
}

/// A site tensor whose internal bonds are glued to its plaquette neighbours.
#[derive(Debug, Clone)]
pub struct GluedSite {
    pub position: Position,
    pub site: SiteId,
    pub tensor: Tensor,
    pub phys: Index,
    /// Glued auxiliary legs, ordered Left, Up, Right, Down.
    legs: [Index; 4],
    original: [Index; 4],
}

impl GluedSite {
    pub fn leg(&self, dir: Direction) -> &Index {
        &self.legs[dir.slot()]
    }

    pub fn legs(&self) -> &[Index; 4] {
        &self.legs
    }

    /// Rename glued legs of `tensor` back to this site's own legs.
    pub fn unglue(&self, tensor: &Tensor) -> Result<Tensor> {
        let (glued, own): (Vec<Index>, Vec<Index>) = self
            .legs
            .iter()
            .zip(self.original.iter())
            .filter(|(g, o)| g != o)
            .map(|(g, o)| (g.clone(), o.clone()))
            .unzip();
        Ok(tensor.replaceinds(&glued, &own)?)
    }
}

/// Four glued site tensors, indexed by [`Position`].
#[derive(Debug, Clone)]
pub struct GluedPlaquette {
    sites: [GluedSite; 4],
}

impl GluedPlaquette {
    pub fn site(&self, pos: Position) -> &GluedSite {
        &self.sites[pos.slot()]
    }

    pub fn sites(&self) -> &[GluedSite; 4] {
        &self.sites
    }

    /// Plaquette wavefunction with the outer legs open.
    pub fn contract(&self) -> Result<Tensor> {
        Ok(ipeps_core::contract_all(self.sites.iter().map(|s| &s.tensor))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SiteTensor;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn cluster(bond: usize) -> Cluster {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut c = Cluster::new();
        for name in ["A", "B", "C", "D"] {
            c.insert(name, SiteTensor::random(&mut rng, name, 2, bond).unwrap());
        }
        c
    }

    #[test]
    fn test_glue_connects_internal_bonds() {
        let c = cluster(2);
        let g = Plaquette::abcd().glue(&c).unwrap();
        let ul = g.site(Position::UpperLeft);
        let ur = g.site(Position::UpperRight);
        let lr = g.site(Position::LowerRight);
        let ll = g.site(Position::LowerLeft);
        assert_eq!(ul.leg(Direction::Right), ur.leg(Direction::Left));
        assert_eq!(ur.leg(Direction::Down), lr.leg(Direction::Up));
        assert_eq!(lr.leg(Direction::Left), ll.leg(Direction::Right));
        assert_eq!(ll.leg(Direction::Up), ul.leg(Direction::Down));
        // 4 physical + 8 outer legs stay open.
        assert_eq!(g.contract().unwrap().rank(), 12);
    }

    #[test]
    fn test_unglue_restores_site_legs() {
        let c = cluster(2);
        let g = Plaquette::abcd().glue(&c).unwrap();
        let ur = g.site(Position::UpperRight);
        let back = ur.unglue(&ur.tensor).unwrap();
        let original = c.site(&SiteId::new("B")).unwrap().tensor();
        assert!(back.max_abs_diff(original).unwrap() < 1e-15);
    }

    #[test]
    fn test_repeated_site_rejected() {
        let r = Plaquette::new("A".into(), "B".into(), "A".into(), "C".into());
        assert!(matches!(r, Err(FullUpdateError::Geometry(_))));
    }
}
