use ipeps_core::Tensor;

use super::CornerBlock;
use crate::error::Result;
use crate::plaquette::GluedSite;

/// Contract `vertical · corner · horizontal` for the site at one position.
///
/// The site-facing legs of both transfer tensors are renamed to the outward
/// auxiliary legs of `site` (ket copy) and their bra copies, so the result
/// contracts directly with the site tensor and its bra copy.
pub fn proto_corner(block: &CornerBlock, site: &GluedSite) -> Result<Tensor> {
    let (hdir, vdir) = site.position.outward();
    let h_leg = site.leg(hdir);
    let v_leg = site.leg(vdir);

    let horizontal = block.horizontal.replaceinds(
        &[block.horizontal_aux.clone(), block.horizontal_aux.bra()],
        &[h_leg.clone(), h_leg.bra()],
    )?;
    let vertical = block.vertical.replaceinds(
        &[block.vertical_aux.clone(), block.vertical_aux.bra()],
        &[v_leg.clone(), v_leg.bra()],
    )?;

    Ok(vertical.contract(&block.corner)?.contract(&horizontal)?)
}
