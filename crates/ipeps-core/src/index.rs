//! Tensor legs.
//!
//! An [`Index`] is identified by a random 128-bit id plus a [`Layer`]. The bra
//! copy of a leg shares the id of its ket copy and lives in the [`Layer::Bra`]
//! layer, so a double-layer network pairs `X` with `X̄` simply by moving every
//! leg of `X̄` into the bra layer.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::tagset::{TagSet, TagSetError};

/// Runtime identity of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DynId(pub u128);

/// Ket or bra layer of a double-layer network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Ket,
    Bra,
}

impl Layer {
    pub fn flipped(self) -> Self {
        match self {
            Layer::Ket => Layer::Bra,
            Layer::Bra => Layer::Ket,
        }
    }
}

thread_local! {
    /// Thread-local generator for leg ids.
    static ID_RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::thread_rng());
}

/// Generate a fresh random leg id.
pub fn generate_id() -> u128 {
    ID_RNG.with(|rng| rng.borrow_mut().gen())
}

/// A tensor leg: identity, dimension, descriptive tags and layer.
///
/// Equality and hashing use the id and the layer only. Dimensions and tags
/// travel with the leg; a contraction additionally checks that paired legs
/// agree on their dimension.
#[derive(Clone)]
pub struct Index {
    id: DynId,
    dim: usize,
    tags: TagSet,
    layer: Layer,
}

impl Index {
    /// New ket-layer leg with a fresh id and no tags.
    pub fn new_dyn(dim: usize) -> Self {
        Self {
            id: DynId(generate_id()),
            dim,
            tags: TagSet::new(),
            layer: Layer::Ket,
        }
    }

    /// New leg with tags parsed from a comma-separated string.
    pub fn new_dyn_with_tags(dim: usize, tags: &str) -> Result<Self, TagSetError> {
        Ok(Self {
            tags: tags.parse()?,
            ..Self::new_dyn(dim)
        })
    }

    /// New leg with an already built tag set.
    pub fn new_dyn_with_tagset(dim: usize, tags: TagSet) -> Self {
        Self {
            tags,
            ..Self::new_dyn(dim)
        }
    }

    /// New bond leg tagged `Link`.
    pub fn new_link(dim: usize) -> Self {
        let tags = TagSet::from_tags(&["Link"]).unwrap_or_default();
        Self::new_dyn_with_tagset(dim, tags)
    }

    pub fn id(&self) -> DynId {
        self.id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn is_bra(&self) -> bool {
        self.layer == Layer::Bra
    }

    /// Bra copy of this leg.
    pub fn bra(&self) -> Self {
        self.with_layer(Layer::Bra)
    }

    /// Ket copy of this leg.
    pub fn ket(&self) -> Self {
        self.with_layer(Layer::Ket)
    }

    /// Copy of this leg in the opposite layer.
    pub fn flipped(&self) -> Self {
        self.with_layer(self.layer.flipped())
    }

    pub fn with_layer(&self, layer: Layer) -> Self {
        Self {
            layer,
            ..self.clone()
        }
    }

    /// Same dimension, tags and layer, new identity.
    pub fn sim(&self) -> Self {
        Self {
            id: DynId(generate_id()),
            ..self.clone()
        }
    }

    /// Copy with replaced tags.
    pub fn with_tags(&self, tags: TagSet) -> Self {
        Self {
            tags,
            ..self.clone()
        }
    }

    /// Whether `other` is a copy of this leg in any layer.
    pub fn same_leg(&self, other: &Index) -> bool {
        self.id == other.id
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.layer == other.layer
    }
}

impl Eq for Index {}

impl Hash for Index {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.layer.hash(state);
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.layer {
            Layer::Ket => "",
            Layer::Bra => "'",
        };
        write!(
            f,
            "(dim={}|id={:04x}|{}){}",
            self.dim,
            self.id.0 % 0x10000,
            self.tags,
            mark
        )
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_bra_copy_is_distinct_but_same_leg() {
        let i = Index::new_dyn(3);
        let ib = i.bra();
        assert_ne!(i, ib);
        assert!(i.same_leg(&ib));
        assert_eq!(ib.ket(), i);
        assert_eq!(ib.dim(), 3);
        assert!(ib.is_bra());
        assert_eq!(i.flipped(), ib);
    }

    #[test]
    fn test_sim_creates_new_identity() {
        let i = Index::new_dyn_with_tags(2, "phys,site=A").unwrap();
        let j = i.sim();
        assert_ne!(i, j);
        assert_eq!(j.dim(), 2);
        assert_eq!(j.tags(), i.tags());
    }

    #[test]
    fn test_hash_respects_layer() {
        let i = Index::new_link(4);
        let mut set = HashSet::new();
        set.insert(i.clone());
        set.insert(i.bra());
        set.insert(i.clone());
        assert_eq!(set.len(), 2);
        assert!(i.tags().has_tag("Link"));
    }
}
