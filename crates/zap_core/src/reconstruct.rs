//! Sky reconstruction and remolding into cube geometry.

use ndarray::{concatenate, s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::decomposition::SegmentBasis;
use crate::error::{Result, ZapError};
use crate::float_trait::ZapFloat;
use crate::stack::SpaxelStack;

/// Residual-sky estimate of one segment from its `n_modes` leading modes,
/// rescaled by the segment's variance profile.
///
/// Returns `[segment length, spaxel count]`.
pub fn reconstruct_segment<F: ZapFloat>(basis: &SegmentBasis<F>, n_modes: usize) -> Array2<F> {
    let seg_len = basis.eigenspectra.nrows();
    let n_spaxels = basis.coefficients.ncols();
    if n_modes == 0 {
        return Array2::zeros((seg_len, n_spaxels));
    }
    let k = n_modes.min(basis.rank());
    let eigen = basis.eigenspectra.slice(s![.., ..k]);
    let coeff = basis.coefficients.slice(s![..k, ..]);
    eigen.dot(&coeff) * &basis.variance
}

/// Reconstruct every segment and stack them along the spectral axis.
///
/// `counts` holds one mode count per basis, in segment order.
pub fn reconstruct<F: ZapFloat>(bases: &[SegmentBasis<F>], counts: &[usize]) -> Result<Array2<F>> {
    if bases.len() != counts.len() {
        return Err(ZapError::Configuration(format!(
            "{} mode counts given for {} segments",
            counts.len(),
            bases.len()
        )));
    }

    let pieces: Vec<Array2<F>> = bases
        .par_iter()
        .zip(counts.par_iter())
        .map(|(basis, &k)| reconstruct_segment(basis, k))
        .collect();

    let views: Vec<ArrayView2<F>> = pieces.iter().map(|p| p.view()).collect();
    Ok(concatenate(Axis(0), &views)?)
}

/// Subtract `reconstruction` from the stack and scatter the cleaned spectra
/// back into a copy of `cube`.
///
/// Spaxels absent from the stack keep their values from `cube`. When `mask`
/// is given every flagged voxel is set to NaN again.
pub fn remold<F: ZapFloat>(
    cube: ArrayView3<F>,
    stack: &SpaxelStack<F>,
    reconstruction: ArrayView2<F>,
    mask: Option<ArrayView3<bool>>,
) -> Result<Array3<F>> {
    if reconstruction.dim() != stack.data.dim() {
        return Err(ZapError::Data(format!(
            "reconstruction shape {:?} does not match stack shape {:?}",
            reconstruction.dim(),
            stack.data.dim()
        )));
    }
    if cube.dim().0 != stack.n_spectral() {
        return Err(ZapError::Data(format!(
            "cube has {} planes but the stack has {}",
            cube.dim().0,
            stack.n_spectral()
        )));
    }

    let cleaned = &stack.data - &reconstruction;
    let mut output = cube.to_owned();
    for (i, y, x) in stack.coordinates() {
        output
            .slice_mut(s![.., y, x])
            .assign(&cleaned.column(i));
    }

    if let Some(mask) = mask {
        if mask.dim() != output.dim() {
            return Err(ZapError::Data(format!(
                "mask shape {:?} does not match cube shape {:?}",
                mask.dim(),
                output.dim()
            )));
        }
        output.zip_mut_with(&mask, |v, &bad| {
            if bad {
                *v = F::nan();
            }
        });
    }

    Ok(output)
}
