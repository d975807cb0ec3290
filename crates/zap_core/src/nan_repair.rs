//! NaN repair by local neighborhood interpolation.
//!
//! Every non-finite voxel of a spaxel that is mostly valid is replaced by the
//! mean of the finite voxels in a small cube around it. Spaxels with too many
//! invalid voxels are left untouched so that stack extraction drops them. The
//! returned mask records every originally invalid voxel; the interpolated
//! values only feed the decomposition and are masked again in the output.

use ndarray::{Array2, Array3, ArrayView3, Axis};
use rayon::prelude::*;

use crate::float_trait::ZapFloat;

/// Result of [`repair_nans`].
#[derive(Debug, Clone)]
pub struct NanRepair<F: ZapFloat> {
    /// Cube with interpolated values in place of repairable NaNs.
    pub cube: Array3<F>,
    /// True at every voxel that was not finite on input.
    pub mask: Array3<bool>,
    pub report: NanRepairReport,
}

/// Counters describing what [`repair_nans`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NanRepairReport {
    /// Spaxels above the reject ratio, left invalid.
    pub rejected_spaxels: usize,
    /// Voxels given a finite interpolated value.
    pub repaired_voxels: usize,
    /// Voxels without any finite neighbor; they stay NaN.
    pub irreparable_voxels: usize,
}

/// Per-spaxel count of non-finite voxels along the spectral axis.
pub fn invalid_count_map<F: ZapFloat>(cube: ArrayView3<F>) -> Array2<usize> {
    cube.map_axis(Axis(0), |spectrum| {
        spectrum.iter().filter(|v| !v.is_finite()).count()
    })
}

/// Replace NaN voxels with the mean of their finite neighbors.
///
/// * `box_radius` - half-width of the cubic neighborhood (1 gives 3x3x3)
/// * `reject_ratio` - spaxels whose invalid fraction exceeds this are skipped
pub fn repair_nans<F: ZapFloat>(
    cube: ArrayView3<F>,
    box_radius: usize,
    reject_ratio: f64,
) -> NanRepair<F> {
    let (nz, _ny, _nx) = cube.dim();
    let mask = cube.mapv(|v| !v.is_finite());
    let badmap = invalid_count_map(cube);

    let limit = reject_ratio * nz as f64;
    let rejected = badmap.mapv(|count| count as f64 > limit);
    let rejected_spaxels = rejected.iter().filter(|&&r| r).count();
    log::info!(
        "{} spaxels rejected: > {}% NaN pixels",
        rejected_spaxels,
        reject_ratio * 100.0
    );

    let targets: Vec<(usize, usize, usize)> = mask
        .indexed_iter()
        .filter(|&((_, y, x), &bad)| bad && !rejected[[y, x]])
        .map(|(idx, _)| idx)
        .collect();
    log::info!("Fixing {} pixels", targets.len());

    let fixes: Vec<F> = targets
        .par_iter()
        .map(|&(z, y, x)| neighborhood_mean(cube, z, y, x, box_radius))
        .collect();

    let mut repaired = cube.to_owned();
    let mut irreparable_voxels = 0;
    for (&(z, y, x), &value) in targets.iter().zip(fixes.iter()) {
        if !value.is_finite() {
            irreparable_voxels += 1;
        }
        repaired[[z, y, x]] = value;
    }
    if irreparable_voxels > 0 {
        log::warn!(
            "{} voxels have no finite neighbors and remain NaN",
            irreparable_voxels
        );
    }

    NanRepair {
        cube: repaired,
        mask,
        report: NanRepairReport {
            rejected_spaxels,
            repaired_voxels: targets.len() - irreparable_voxels,
            irreparable_voxels,
        },
    }
}

/// Mean of the finite voxels within `radius` of (z, y, x).
/// Out-of-bounds positions are skipped; NaN when nothing finite is found.
fn neighborhood_mean<F: ZapFloat>(
    cube: ArrayView3<F>,
    z: usize,
    y: usize,
    x: usize,
    radius: usize,
) -> F {
    let (nz, ny, nx) = cube.dim();
    let mut sum = F::zero();
    let mut count = 0usize;

    for iz in z.saturating_sub(radius)..=(z + radius).min(nz - 1) {
        for iy in y.saturating_sub(radius)..=(y + radius).min(ny - 1) {
            for ix in x.saturating_sub(radius)..=(x + radius).min(nx - 1) {
                let v = cube[[iz, iy, ix]];
                if v.is_finite() {
                    sum += v;
                    count += 1;
                }
            }
        }
    }

    if count == 0 {
        F::nan()
    } else {
        sum / F::usize_as(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp_cube(nz: usize, ny: usize, nx: usize) -> Array3<f64> {
        Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| (z + 2 * y + 3 * x) as f64)
    }

    #[test]
    fn test_clean_cube_is_unchanged() {
        let cube = ramp_cube(6, 3, 3);
        let result = repair_nans(cube.view(), 1, 0.25);
        assert_eq!(result.cube, cube);
        assert!(result.mask.iter().all(|&m| !m));
        assert_eq!(result.report, NanRepairReport::default());
    }

    #[test]
    fn test_interior_voxel_uses_full_neighborhood() {
        let mut cube = Array3::<f64>::from_elem((5, 5, 5), 2.0);
        cube[[2, 2, 2]] = f64::NAN;
        let result = repair_nans(cube.view(), 1, 0.25);
        assert_eq!(result.cube[[2, 2, 2]], 2.0);
        assert!(result.mask[[2, 2, 2]]);
        assert_eq!(result.report.repaired_voxels, 1);
    }

    #[test]
    fn test_corner_voxel_uses_in_bounds_neighbors_only() {
        let mut cube = Array3::<f64>::zeros((4, 4, 4));
        // in-bounds neighbors of the (0,0,0) corner: 2x2x2 minus itself
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    cube[[z, y, x]] = (z + y + x) as f64;
                }
            }
        }
        cube[[0, 0, 0]] = f64::NAN;
        let result = repair_nans(cube.view(), 1, 0.5);
        // neighbors: three 1s, three 2s, one 3 -> 12 / 7
        assert!((result.cube[[0, 0, 0]] - 12.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_neighbors_ignore_other_nans() {
        let mut cube = Array3::<f64>::from_elem((5, 3, 3), 4.0);
        cube[[2, 1, 1]] = f64::NAN;
        cube[[3, 1, 1]] = f64::NAN;
        cube[[2, 0, 1]] = 10.0;
        let result = repair_nans(cube.view(), 1, 0.5);
        // 27 - 2 NaNs = 25 neighbors for [2,1,1]: 24 fours and one ten
        assert!((result.cube[[2, 1, 1]] - (24.0 * 4.0 + 10.0) / 25.0).abs() < 1e-12);
        assert!(result.cube[[3, 1, 1]].is_finite());
        assert_eq!(result.report.repaired_voxels, 2);
    }

    #[test]
    fn test_heavily_flagged_spaxel_is_rejected() {
        let mut cube = ramp_cube(8, 3, 3);
        for z in 0..3 {
            cube[[z, 1, 2]] = f64::NAN;
        }
        // 3 / 8 > 0.25
        let result = repair_nans(cube.view(), 1, 0.25);
        assert_eq!(result.report.rejected_spaxels, 1);
        assert_eq!(result.report.repaired_voxels, 0);
        for z in 0..3 {
            assert!(result.cube[[z, 1, 2]].is_nan());
            assert!(result.mask[[z, 1, 2]]);
        }
    }

    #[test]
    fn test_isolated_voxel_without_finite_neighbors_stays_nan() {
        let cube = Array3::<f32>::from_elem((3, 1, 1), f32::NAN);
        let result = repair_nans(cube.view(), 1, 1.0);
        assert_eq!(result.report.irreparable_voxels, 3);
        assert_eq!(result.report.repaired_voxels, 0);
        assert!(result.cube.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_infinities_are_treated_as_invalid() {
        let mut cube = Array3::<f64>::from_elem((4, 2, 2), 1.0);
        cube[[1, 0, 0]] = f64::INFINITY;
        let result = repair_nans(cube.view(), 1, 0.5);
        assert!(result.mask[[1, 0, 0]]);
        assert_eq!(result.cube[[1, 0, 0]], 1.0);
    }

    #[test]
    fn test_invalid_count_map() {
        let mut cube = Array3::<f64>::zeros((4, 2, 3));
        cube[[0, 1, 2]] = f64::NAN;
        cube[[3, 1, 2]] = f64::NAN;
        cube[[2, 0, 0]] = f64::NAN;
        let map = invalid_count_map(cube.view());
        assert_eq!(map[[1, 2]], 2);
        assert_eq!(map[[0, 0]], 1);
        assert_eq!(map.sum(), 3);
    }
}
