//! Automatic mode-count selection.
//!
//! For each segment the cleaned stack is evaluated with 1, 2, ... leading
//! modes removed, up to a fraction of the segment's rank. The variance of the
//! cleaned slice drops steeply while modes still carry sky residuals and then
//! flattens. The count is chosen where the first or second difference of that
//! curve first falls within the noise of its trailing baseline.

use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::OptimizeConfig;
use crate::decomposition::SegmentBasis;
use crate::error::{Result, ZapError};
use crate::float_trait::ZapFloat;
use crate::utils::mean_std;

/// Variance-versus-mode-count diagnostics of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceCurve {
    pub segment: usize,
    /// `variance[i]`: variance of the cleaned slice with `i + 1` modes.
    pub variance: Vec<f64>,
    /// First difference of `variance`.
    pub diff1: Vec<f64>,
    /// Second difference of `variance`.
    pub diff2: Vec<f64>,
    /// Mean and standard deviation of the trailing part of `diff1`.
    pub baseline1: (f64, f64),
    /// Mean and standard deviation of the trailing part of `diff2`.
    pub baseline2: (f64, f64),
    /// Chosen number of modes.
    pub selected: usize,
}

/// Variance of `stack_slice` after removing the 1..=`max_modes` leading
/// modes of `basis`.
///
/// Modes are subtracted incrementally so each step costs one outer product.
pub fn variance_curve<F: ZapFloat>(
    stack_slice: ArrayView2<F>,
    basis: &SegmentBasis<F>,
    max_modes: usize,
) -> Vec<f64> {
    let mut residual: Array2<F> = stack_slice.to_owned();
    let n_modes = max_modes.min(basis.rank());

    (0..n_modes)
        .map(|k| {
            let eigen = basis.eigenspectra.column(k);
            let coeff = basis.coefficients.row(k);
            for ((l, j), v) in residual.indexed_iter_mut() {
                *v -= eigen[l] * coeff[j] * basis.variance[j];
            }
            residual.var(F::zero()).as_f64()
        })
        .collect()
}

impl VarianceCurve {
    /// Analyse a variance curve and pick the mode count.
    ///
    /// Curves shorter than three points have no second difference; they
    /// select their full length.
    pub fn from_curve(segment: usize, variance: Vec<f64>, config: &OptimizeConfig) -> Self {
        let n = variance.len();
        let diff1: Vec<f64> = variance.windows(2).map(|w| w[1] - w[0]).collect();
        let diff2: Vec<f64> = diff1.windows(2).map(|w| w[1] - w[0]).collect();

        if n < 3 {
            return Self {
                segment,
                variance,
                diff1,
                diff2,
                baseline1: (0.0, 0.0),
                baseline2: (0.0, 0.0),
                selected: n,
            };
        }

        let start = ((1.0 - config.baseline_fraction) * (n - 2) as f64).floor() as usize;
        let baseline1 = mean_std(&diff1[start..]);
        let baseline2 = mean_std(&diff2[start..]);

        let sigma = config.sigma_threshold;
        let lower1 = baseline1.0 - sigma * baseline1.1;
        let upper2 = baseline2.0 + sigma * baseline2.1;

        let crossing = (0..n).find(|&i| {
            let cross1 = i >= 1 && diff1[i - 1] >= lower1;
            let cross2 = i >= 2 && diff2[i - 2] <= upper2;
            cross1 || cross2
        });

        let selected = match crossing {
            Some(i) => i + 1,
            None => {
                log::debug!(
                    "Segment {}: variance curve never settles, keeping all {} searched modes",
                    segment,
                    n
                );
                n
            }
        };

        Self {
            segment,
            variance,
            diff1,
            diff2,
            baseline1,
            baseline2,
            selected,
        }
    }
}

/// Choose a mode count for every segment.
///
/// `stack` is the (zero-level subtracted) stack the reconstruction is removed
/// from. Fails with [`ZapError::Configuration`] if any segment has rank 0.
pub fn optimize_mode_counts<F: ZapFloat>(
    stack: ArrayView2<F>,
    bases: &[SegmentBasis<F>],
    config: &OptimizeConfig,
) -> Result<Vec<VarianceCurve>> {
    bases
        .par_iter()
        .enumerate()
        .map(|(index, basis)| {
            let rank = basis.rank();
            if rank == 0 {
                return Err(ZapError::Configuration(format!(
                    "segment {} has rank 0 and cannot be optimized",
                    index
                )));
            }
            let max_modes = ((config.search_fraction * rank as f64).ceil() as usize).clamp(1, rank);
            let slice = stack.slice(s![basis.segment.range(), ..]);
            let curve = variance_curve(slice, basis, max_modes);
            let result = VarianceCurve::from_curve(index, curve, config);
            log::debug!(
                "Segment {}: searched {} of {} modes, selected {}",
                index,
                max_modes,
                rank,
                result.selected
            );
            Ok(result)
        })
        .collect()
}
