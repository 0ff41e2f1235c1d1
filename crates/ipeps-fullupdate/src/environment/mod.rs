//! CTM environment of a plaquette and assembly of the reduced environment.
//!
//! The environment of a 2×2 plaquette is given as one [`CornerBlock`] per
//! position: a corner tensor and the two edge (transfer) tensors attached to
//! it. Each transfer tensor carries the ket and bra copies of one auxiliary
//! leg that faces the site; legs between neighbouring blocks are shared by
//! identity.

mod assembler;
mod gated;
mod proto_corner;

pub use assembler::{assemble, ActiveSite, ReducedEnvironment};
pub use gated::GatedState;
pub use proto_corner::proto_corner;

use ipeps_core::{Index, Tensor};
use rand::Rng;

use crate::cluster::Cluster;
use crate::error::{FullUpdateError, Result};
use crate::plaquette::{Plaquette, Position};

/// Corner tensor with its horizontal and vertical transfer tensors.
#[derive(Debug, Clone)]
pub struct CornerBlock {
    pub corner: Tensor,
    /// Transfer tensor on the horizontal edge (top for upper positions, bottom for lower).
    pub horizontal: Tensor,
    /// Transfer tensor on the vertical edge (left for left positions, right for right).
    pub vertical: Tensor,
    /// Site-facing leg of `horizontal`; its bra copy must be present too.
    pub horizontal_aux: Index,
    /// Site-facing leg of `vertical`; its bra copy must be present too.
    pub vertical_aux: Index,
}

impl CornerBlock {
    pub fn new(
        corner: Tensor,
        horizontal: Tensor,
        vertical: Tensor,
        horizontal_aux: Index,
        vertical_aux: Index,
    ) -> Result<Self> {
        for (t, aux, name) in [
            (&horizontal, &horizontal_aux, "horizontal"),
            (&vertical, &vertical_aux, "vertical"),
        ] {
            if !t.has_index(&aux.ket()) || !t.has_index(&aux.bra()) {
                return Err(FullUpdateError::Geometry(format!(
                    "{name} transfer tensor lacks ket/bra copies of {aux:?}"
                )));
            }
        }
        Ok(Self {
            corner,
            horizontal,
            vertical,
            horizontal_aux: horizontal_aux.ket(),
            vertical_aux: vertical_aux.ket(),
        })
    }
}

/// The four corner blocks of a plaquette, indexed by [`Position`].
#[derive(Debug, Clone)]
pub struct PlaquetteEnvironment {
    blocks: [CornerBlock; 4],
}

impl PlaquetteEnvironment {
    /// Blocks given clockwise from the upper-left corner.
    pub fn new(ul: CornerBlock, ur: CornerBlock, lr: CornerBlock, ll: CornerBlock) -> Self {
        Self {
            blocks: [ul, ur, lr, ll],
        }
    }

    pub fn block(&self, pos: Position) -> &CornerBlock {
        &self.blocks[pos.slot()]
    }

    /// Environment that traces every outer bond of the plaquette against its bra copy.
    pub fn trivial(plaquette: &Plaquette, cluster: &Cluster) -> Result<Self> {
        Self::build(plaquette, cluster, 1, |legs, aux_dim| {
            let aux = Index::new_dyn(aux_dim);
            let mut all = legs.to_vec();
            all.push(aux.clone());
            all.push(aux.bra());
            let k = all.len();
            let t = Tensor::from_fn(all, |x| if x[k - 2] == x[k - 1] { 1.0 } else { 0.0 })?;
            Ok((t, aux))
        })
    }

    /// Random environment with bond dimension `chi` whose transfer tensors are
    /// symmetric in their ket/bra pair.
    pub fn random<R: Rng>(
        rng: &mut R,
        plaquette: &Plaquette,
        cluster: &Cluster,
        chi: usize,
    ) -> Result<Self> {
        let env = Self::build(plaquette, cluster, chi, |legs, aux_dim| {
            let aux = Index::new_dyn(aux_dim);
            let mut all = legs.to_vec();
            all.push(aux.clone());
            all.push(aux.bra());
            let t = Tensor::random(&mut *rng, all)?;
            let t = t.add(&t.flip_legs(&[aux.clone(), aux.bra()])?)?.scale(0.5);
            Ok((t, aux))
        })?;
        // Corners: positive random entries.
        let mut blocks = env.blocks;
        for b in blocks.iter_mut() {
            let legs = b.corner.indices().to_vec();
            b.corner = Tensor::random(&mut *rng, legs)?.map(|x| 1.0 + 0.5 * x.abs());
        }
        Ok(Self { blocks })
    }

    /// Shared construction: edge links between blocks, corner links inside
    /// blocks, and a transfer factory `make(legs, aux_dim)`.
    fn build<F>(plaquette: &Plaquette, cluster: &Cluster, chi: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(&[Index], usize) -> Result<(Tensor, Index)>,
    {
        // Links between the transfer tensors of neighbouring blocks.
        let top = Index::new_dyn_with_tags(chi, "env,edge=top")?;
        let right = Index::new_dyn_with_tags(chi, "env,edge=right")?;
        let bottom = Index::new_dyn_with_tags(chi, "env,edge=bottom")?;
        let left = Index::new_dyn_with_tags(chi, "env,edge=left")?;

        let mut blocks = Vec::with_capacity(4);
        for pos in Position::ALL {
            let site = cluster.site(plaquette.site(pos))?;
            let (hdir, vdir) = pos.outward();
            let (h_link, v_link) = match pos {
                Position::UpperLeft => (&top, &left),
                Position::UpperRight => (&top, &right),
                Position::LowerRight => (&bottom, &right),
                Position::LowerLeft => (&bottom, &left),
            };
            let ch = Index::new_dyn_with_tags(chi, "env,corner")?;
            let cv = Index::new_dyn_with_tags(chi, "env,corner")?;
            let corner = Tensor::from_fn(vec![ch.clone(), cv.clone()], |x| {
                if x[0] == x[1] {
                    1.0
                } else {
                    0.0
                }
            })?;
            let (horizontal, haux) = make(&[ch, h_link.clone()], site.bond_dim(hdir))?;
            let (vertical, vaux) = make(&[cv, v_link.clone()], site.bond_dim(vdir))?;
            blocks.push(CornerBlock::new(corner, horizontal, vertical, haux, vaux)?);
        }
        let blocks: [CornerBlock; 4] = blocks
            .try_into()
            .map_err(|_| FullUpdateError::Geometry("environment needs four blocks".to_string()))?;
        Ok(Self { blocks })
    }
}
