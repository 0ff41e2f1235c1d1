//! Site tensors of an iPEPS unit cell.

use std::collections::BTreeMap;
use std::fmt;

use ipeps_core::{Index, TagSet, Tensor};
use rand::Rng;

use crate::error::{FullUpdateError, Result};

/// Auxiliary bond directions of a square-lattice site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Left,
    Up,
    Right,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Up,
        Direction::Right,
        Direction::Down,
    ];

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Direction::Left => 0,
            Direction::Up => 1,
            Direction::Right => 2,
            Direction::Down => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Up => "up",
            Direction::Right => "right",
            Direction::Down => "down",
        }
    }
}

/// Name of a site in the unit cell (`"A"`, `"B"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(pub String);

impl SiteId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// On-site tensor with one physical and four auxiliary legs.
#[derive(Debug, Clone)]
pub struct SiteTensor {
    tensor: Tensor,
    phys: Index,
    aux: [Index; 4],
}

fn site_tags(site: &str, role: &str) -> TagSet {
    TagSet::from_tags(&[format!("site={site}"), role.to_string()]).unwrap_or_default()
}

impl SiteTensor {
    /// Wrap a tensor whose legs are exactly `phys` and `aux` (ordered Left, Up, Right, Down).
    pub fn new(tensor: Tensor, phys: Index, aux: [Index; 4]) -> Result<Self> {
        let mut legs = vec![phys.clone()];
        legs.extend(aux.iter().cloned());
        if tensor.rank() != 5 || legs.iter().any(|l| !tensor.has_index(l)) {
            return Err(FullUpdateError::Geometry(format!(
                "site tensor legs {:?} do not match physical {:?} and auxiliary {:?}",
                tensor.indices(),
                phys,
                aux
            )));
        }
        Ok(Self { tensor, phys, aux })
    }

    /// Fresh legs with descriptive tags and standard-normal entries.
    pub fn random<R: Rng>(rng: &mut R, site: &str, phys_dim: usize, bond_dim: usize) -> Result<Self> {
        let phys = Index::new_dyn_with_tagset(phys_dim, site_tags(site, "phys"));
        let aux = Direction::ALL.map(|d| {
            Index::new_dyn_with_tagset(bond_dim, site_tags(site, &format!("dir={}", d.as_str())))
        });
        let mut legs = vec![phys.clone()];
        legs.extend(aux.iter().cloned());
        let tensor = Tensor::random(rng, legs)?;
        Ok(Self { tensor, phys, aux })
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn phys(&self) -> &Index {
        &self.phys
    }

    pub fn aux(&self, dir: Direction) -> &Index {
        &self.aux[dir.slot()]
    }

    pub fn aux_legs(&self) -> &[Index; 4] {
        &self.aux
    }

    pub fn phys_dim(&self) -> usize {
        self.phys.dim()
    }

    pub fn bond_dim(&self, dir: Direction) -> usize {
        self.aux(dir).dim()
    }

    /// Replace the tensor; the new tensor must carry the same legs.
    pub fn set_tensor(&mut self, tensor: Tensor) -> Result<()> {
        if !tensor.same_legs(&self.tensor) {
            return Err(FullUpdateError::Geometry(format!(
                "replacement tensor legs {:?} differ from site legs {:?}",
                tensor.indices(),
                self.tensor.indices()
            )));
        }
        self.tensor = tensor;
        Ok(())
    }
}

/// Collection of named site tensors.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    sites: BTreeMap<SiteId, SiteTensor>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<SiteId>, site: SiteTensor) -> Option<SiteTensor> {
        self.sites.insert(id.into(), site)
    }

    pub fn site(&self, id: &SiteId) -> Result<&SiteTensor> {
        self.sites
            .get(id)
            .ok_or_else(|| FullUpdateError::Geometry(format!("unknown site {id}")))
    }

    pub fn site_mut(&mut self, id: &SiteId) -> Result<&mut SiteTensor> {
        self.sites
            .get_mut(id)
            .ok_or_else(|| FullUpdateError::Geometry(format!("unknown site {id}")))
    }

    pub fn ids(&self) -> impl Iterator<Item = &SiteId> {
        self.sites.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SiteId, &SiteTensor)> {
        self.sites.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SiteId, &mut SiteTensor)> {
        self.sites.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_random_site_has_tagged_legs() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let s = SiteTensor::random(&mut rng, "A", 2, 3).unwrap();
        assert_eq!(s.phys_dim(), 2);
        assert_eq!(s.bond_dim(Direction::Up), 3);
        assert_eq!(s.aux(Direction::Right).tags().value_of("dir"), Some("right"));
        assert_eq!(s.phys().tags().value_of("site"), Some("A"));
        assert_eq!(s.tensor().rank(), 5);
    }

    #[test]
    fn test_set_tensor_requires_same_legs() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut a = SiteTensor::random(&mut rng, "A", 2, 2).unwrap();
        let b = SiteTensor::random(&mut rng, "B", 2, 2).unwrap();
        assert!(a.set_tensor(b.tensor().clone()).is_err());
        let scaled = a.tensor().scale(2.0);
        assert!(a.set_tensor(scaled).is_ok());
    }

    #[test]
    fn test_cluster_lookup() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut c = Cluster::new();
        c.insert("A", SiteTensor::random(&mut rng, "A", 2, 2).unwrap());
        assert!(c.site(&SiteId::new("A")).is_ok());
        assert!(matches!(
            c.site(&SiteId::new("Z")),
            Err(FullUpdateError::Geometry(_))
        ));
        assert_eq!(Direction::Left.opposite(), Direction::Right);
    }
}
