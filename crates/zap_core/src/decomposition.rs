//! Segmented singular value decomposition.
//!
//! Each wavelength segment of the continuum-subtracted stack is normalized by
//! the per-spaxel variance and decomposed independently. The right singular
//! vectors of the (spaxel x wavelength) matrix are the eigenspectra; the
//! projections of every spaxel onto them are the coefficients.
//!
//! ## Layout
//! - `eigenspectra`: [segment length, rank], columns ordered by descending
//!   singular value
//! - `coefficients`: [rank, spaxel count]
//! - `rank = min(segment length, spaxel count)`

use nalgebra::{DMatrix, SVD};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::{Result, ZapError};
use crate::float_trait::ZapFloat;
use crate::geometry::Segment;

/// Eigenbasis and normalization of one wavelength segment.
#[derive(Debug, Clone)]
pub struct SegmentBasis<F: ZapFloat> {
    pub segment: Segment,
    /// [segment length, rank]
    pub eigenspectra: Array2<F>,
    /// [rank, spaxel count]
    pub coefficients: Array2<F>,
    /// Descending.
    pub singular_values: Array1<F>,
    /// Per-spaxel variance the segment was divided by.
    pub variance: Array1<F>,
}

impl<F: ZapFloat> SegmentBasis<F> {
    pub fn rank(&self) -> usize {
        self.eigenspectra.ncols()
    }
}

/// Decompose every segment of `normstack` in parallel.
///
/// Bases are returned in segment order. The first failing segment aborts the
/// whole stage.
pub fn decompose_segments<F: ZapFloat>(
    normstack: ArrayView2<F>,
    segments: &[Segment],
    max_iterations: usize,
) -> Result<Vec<SegmentBasis<F>>> {
    log::info!("Beginning SVD on {} segments", segments.len());
    segments
        .par_iter()
        .enumerate()
        .map(|(index, &segment)| {
            let slice = normstack.slice(s![segment.range(), ..]);
            let basis = decompose_segment(index, slice, segment, max_iterations)?;
            log::debug!(
                "Finished SVD segment {} ({} pixels, rank {})",
                index,
                segment.len(),
                basis.rank()
            );
            Ok(basis)
        })
        .collect()
}

/// Per-column variance of a segment and the segment divided by it.
///
/// Columns with zero or non-finite variance (flat spectra) are left unscaled:
/// their divisor is 1 so that the rescaled reconstruction stays consistent.
pub fn normalize_by_variance<F: ZapFloat>(slice: ArrayView2<F>) -> (Array2<F>, Array1<F>) {
    let mut variance = slice.var_axis(Axis(0), F::zero());
    let mut flat = 0usize;
    variance.mapv_inplace(|v| {
        if v > F::zero() && v.is_finite() {
            v
        } else {
            flat += 1;
            F::one()
        }
    });
    if flat > 0 {
        log::warn!("{} spaxels have zero variance in a segment", flat);
    }
    let normalized = &slice / &variance;
    (normalized, variance)
}

fn decompose_segment<F: ZapFloat>(
    index: usize,
    slice: ArrayView2<F>,
    segment: Segment,
    max_iterations: usize,
) -> Result<SegmentBasis<F>> {
    let (normalized, variance) = normalize_by_variance(slice);
    if normalized.iter().any(|v| !v.is_finite()) {
        return Err(ZapError::Numerical {
            segment: index,
            message: "normalized segment contains non-finite values".into(),
        });
    }

    let (seg_len, n_spaxels) = normalized.dim();

    // Spaxels as rows, wavelengths as columns
    let matrix = DMatrix::<f64>::from_fn(n_spaxels, seg_len, |r, c| normalized[[c, r]].as_f64());
    let svd = SVD::try_new(matrix, false, true, f64::EPSILON, max_iterations).ok_or_else(|| {
        ZapError::Numerical {
            segment: index,
            message: "SVD did not converge".into(),
        }
    })?;
    let v_t = svd.v_t.ok_or_else(|| ZapError::Numerical {
        segment: index,
        message: "SVD produced no right singular vectors".into(),
    })?;

    let sv = &svd.singular_values;
    let rank = sv.len();
    let mut order: Vec<usize> = (0..rank).collect();
    order.sort_by(|&a, &b| {
        sv[b]
            .partial_cmp(&sv[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let eigenspectra =
        Array2::from_shape_fn((seg_len, rank), |(l, k)| F::from_f64_c(v_t[(order[k], l)]));
    let singular_values = order.iter().map(|&k| F::from_f64_c(sv[k])).collect();
    let coefficients = eigenspectra.t().dot(&normalized);

    Ok(SegmentBasis {
        segment,
        eigenspectra,
        coefficients,
        singular_values,
        variance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_distr::{Distribution, Normal};

    fn random_stack(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng))
    }

    fn segments(bounds: &[(usize, usize)]) -> Vec<Segment> {
        bounds
            .iter()
            .map(|&(start, end)| Segment { start, end })
            .collect()
    }

    #[test]
    fn test_rank_is_min_of_dimensions() {
        let stack = random_stack(60, 12, 1);
        let bases = decompose_segments(stack.view(), &segments(&[(0, 40), (40, 48)]), 0).unwrap();

        assert_eq!(bases[0].rank(), 12);
        assert_eq!(bases[0].eigenspectra.dim(), (40, 12));
        assert_eq!(bases[0].coefficients.dim(), (12, 12));

        assert_eq!(bases[1].rank(), 8);
        assert_eq!(bases[1].eigenspectra.dim(), (8, 8));
        assert_eq!(bases[1].coefficients.dim(), (8, 12));
        assert_eq!(bases[1].variance.len(), 12);
    }

    #[test]
    fn test_singular_values_descending() {
        let stack = random_stack(30, 10, 2);
        let bases = decompose_segments(stack.view(), &segments(&[(0, 30)]), 0).unwrap();
        let sv = &bases[0].singular_values;
        for k in 1..sv.len() {
            assert!(sv[k - 1] >= sv[k]);
        }
    }

    #[test]
    fn test_eigenspectra_are_orthonormal() {
        let stack = random_stack(25, 9, 3);
        let bases = decompose_segments(stack.view(), &segments(&[(0, 25)]), 0).unwrap();
        let e = &bases[0].eigenspectra;
        let gram = e.t().dot(e);
        for i in 0..gram.nrows() {
            for j in 0..gram.ncols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_full_rank_basis_reproduces_normalized_slice() {
        let stack = random_stack(20, 6, 4);
        let bases = decompose_segments(stack.view(), &segments(&[(5, 15)]), 0).unwrap();
        let basis = &bases[0];

        let (normalized, variance) = normalize_by_variance(stack.slice(s![5..15, ..]));
        assert_eq!(variance, basis.variance);

        let rebuilt = basis.eigenspectra.dot(&basis.coefficients);
        for (a, b) in rebuilt.iter().zip(normalized.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_variance_normalization() {
        let slice = Array2::from_shape_vec((4, 2), vec![1.0, 5.0, 3.0, 5.0, 1.0, 5.0, 3.0, 5.0])
            .unwrap();
        let (normalized, variance) = normalize_by_variance(slice.view());
        // column 0: [1, 3, 1, 3] has population variance 1
        assert_eq!(variance[0], 1.0);
        // column 1 is flat and left unscaled
        assert_eq!(variance[1], 1.0);
        assert_eq!(normalized, slice);
    }

    #[test]
    fn test_f32_stack_decomposes() {
        let stack = random_stack(16, 5, 5).mapv(|v| v as f32);
        let bases = decompose_segments(stack.view(), &segments(&[(0, 16)]), 0).unwrap();
        assert_eq!(bases[0].rank(), 5);
    }

    #[test]
    fn test_non_finite_input_is_numerical_error() {
        let mut stack = random_stack(10, 4, 6);
        stack[[3, 1]] = f64::NAN;
        let result = decompose_segments(stack.view(), &segments(&[(0, 5), (5, 10)]), 0);
        assert!(matches!(
            result,
            Err(ZapError::Numerical { segment: 0, .. })
        ));
    }
}
