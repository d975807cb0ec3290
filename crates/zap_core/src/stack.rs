//! 3-D cube to 2-D stack extraction and zero-level removal.
//!
//! The stack holds one column per fully valid spaxel, in row-major spatial
//! order. The `y`/`x` coordinate vectors are co-indexed with the columns and
//! are the only link back to the cube, so nothing here reorders one without
//! the other.

use ndarray::{Array1, Array2, ArrayView3, Axis};

use crate::error::{Result, ZapError};
use crate::float_trait::ZapFloat;
use crate::nan_repair::invalid_count_map;
use crate::utils::median_slice;

/// Spectra of the fully valid spaxels with their spatial coordinates.
#[derive(Debug, Clone)]
pub struct SpaxelStack<F: ZapFloat> {
    /// [spectral index, spaxel index]
    pub data: Array2<F>,
    /// Row of each column in the cube.
    pub y: Vec<usize>,
    /// Column of each column in the cube.
    pub x: Vec<usize>,
    /// Spaxels dropped because they hold at least one invalid voxel.
    pub rejected: usize,
}

impl<F: ZapFloat> SpaxelStack<F> {
    pub fn n_spectral(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_spaxels(&self) -> usize {
        self.data.ncols()
    }

    /// Iterator over `(column, y, x)`.
    pub fn coordinates(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.y
            .iter()
            .zip(self.x.iter())
            .enumerate()
            .map(|(i, (&y, &x))| (i, y, x))
    }
}

/// Flatten a cube into a stack of its fully finite spaxels.
///
/// Fails with [`ZapError::Data`] if no spaxel survives.
pub fn extract_stack<F: ZapFloat>(cube: ArrayView3<F>) -> Result<SpaxelStack<F>> {
    let (nz, ny, nx) = cube.dim();
    let badmap = invalid_count_map(cube);

    let (y, x): (Vec<usize>, Vec<usize>) = badmap
        .indexed_iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(pos, _)| pos)
        .unzip();

    if y.is_empty() {
        return Err(ZapError::Data(format!(
            "no spaxel of the {}x{} field is free of invalid values",
            ny, nx
        )));
    }

    let data = Array2::from_shape_fn((nz, y.len()), |(z, i)| cube[[z, y[i], x[i]]]);
    let rejected = ny * nx - y.len();
    log::info!(
        "Extracted {} spaxels to 2D ({} rejected)",
        y.len(),
        rejected
    );

    Ok(SpaxelStack {
        data,
        y,
        x,
        rejected,
    })
}

/// Median of every spectral plane over the full spatial extent.
///
/// Each row is reduced to the median of its finite voxels, and the plane level
/// is the median of those row medians. Rows without a finite voxel are
/// skipped; a plane without any finite voxel has a zero level of 0.
pub fn zero_level_spectrum<F: ZapFloat>(cube: ArrayView3<F>) -> Array1<F> {
    let mut row_buffer: Vec<F> = Vec::new();
    let mut row_medians: Vec<F> = Vec::new();
    cube.axis_iter(Axis(0))
        .map(|plane| {
            row_medians.clear();
            for row in plane.axis_iter(Axis(0)) {
                row_buffer.clear();
                row_buffer.extend(row.iter().copied().filter(|v| v.is_finite()));
                if !row_buffer.is_empty() {
                    row_medians.push(median_slice(&mut row_buffer));
                }
            }
            median_slice(&mut row_medians)
        })
        .collect()
}

/// Subtract a per-plane baseline from every stack column.
pub fn subtract_zero_level<F: ZapFloat>(stack: &mut SpaxelStack<F>, zero_level: &Array1<F>) {
    for (mut row, &level) in stack.data.axis_iter_mut(Axis(0)).zip(zero_level.iter()) {
        row.mapv_inplace(|v| v - level);
    }
}
