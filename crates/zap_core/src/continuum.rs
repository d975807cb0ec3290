//! Continuum removal.
//!
//! Each spectrum is first smoothed with a narrow box filter to tame single
//! pixel outliers, then passed through a wide median filter that follows the
//! slowly varying continuum but not the narrow sky-line residuals. The stack
//! is split into contiguous column chunks that are filtered in parallel and
//! stitched back in partition order.

use std::ops::Range;

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::Result;
use crate::float_trait::ZapFloat;
use crate::utils::{compute_1d_median_filter, uniform_filter_1d};

/// Continuum estimate and the continuum-subtracted stack.
#[derive(Debug, Clone)]
pub struct ContinuumFit<F: ZapFloat> {
    /// Smooth continuum per spaxel, same shape as the stack.
    pub continuum: Array2<F>,
    /// `stack - continuum`
    pub normstack: Array2<F>,
}

/// Split `n_columns` into at most `n_chunks` contiguous ranges of equal size,
/// the last one absorbing the remainder.
pub fn chunk_ranges(n_columns: usize, n_chunks: usize) -> Vec<Range<usize>> {
    let n_chunks = n_chunks.min(n_columns).max(1);
    let size = n_columns / n_chunks;
    (0..n_chunks)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == n_chunks {
                n_columns
            } else {
                start + size
            };
            start..end
        })
        .collect()
}

/// Estimate and subtract the continuum of every stack column.
///
/// # Arguments
///
/// * `stack` - [spectral index, spaxel index]
/// * `width` - median filter width along the spectral axis
/// * `uniform_width` - box filter width applied first
/// * `n_chunks` - number of parallel column chunks
pub fn filter_continuum<F: ZapFloat>(
    stack: ArrayView2<F>,
    width: usize,
    uniform_width: usize,
    n_chunks: usize,
) -> Result<ContinuumFit<F>> {
    let ranges = chunk_ranges(stack.ncols(), n_chunks);
    log::debug!(
        "Continuum filtering {} spaxels in {} chunks (width {})",
        stack.ncols(),
        ranges.len(),
        width
    );

    let pieces: Vec<Array2<F>> = ranges
        .par_iter()
        .map(|range| filter_chunk(stack.slice(s![.., range.clone()]), width, uniform_width))
        .collect();

    let views: Vec<ArrayView2<F>> = pieces.iter().map(|p| p.view()).collect();
    let continuum = concatenate(Axis(1), &views)?;
    let normstack = &stack - &continuum;

    Ok(ContinuumFit {
        continuum,
        normstack,
    })
}

/// Box then median filter each column of a chunk along the spectral axis.
fn filter_chunk<F: ZapFloat>(chunk: ArrayView2<F>, width: usize, uniform_width: usize) -> Array2<F> {
    let (rows, cols) = chunk.dim();
    let mut output = Array2::zeros((rows, cols));
    let mut col_data: Vec<F> = Vec::with_capacity(rows);

    for (c, column) in chunk.axis_iter(Axis(1)).enumerate() {
        col_data.clear();
        col_data.extend(column.iter().copied());

        let smoothed = uniform_filter_1d(&col_data, uniform_width);
        let continuum = compute_1d_median_filter(&smoothed, width);

        for (r, &val) in continuum.iter().enumerate() {
            output[[r, c]] = val;
        }
    }

    output
}
