//! Pipeline configuration.
//!
//! [`ZapConfig`] holds the instrument-level constants (wavelength window,
//! segment table, NaN repair and filter parameters, optimizer thresholds).
//! [`RunOptions`] holds the per-run switches handed to
//! [`PreparedCube::run`](crate::pipeline::PreparedCube::run).

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZapError};
use crate::modes::{ModePolicy, ModeSelection};

// =============================================================================
// Constants
// =============================================================================

/// Blue limit of the well-calibrated MUSE band (Angstrom).
const DEFAULT_WAVELENGTH_MIN: f64 = 4800.0;

/// Red limit of the well-calibrated MUSE band (Angstrom).
const DEFAULT_WAVELENGTH_MAX: f64 = 9300.0;

/// Segment boundaries (low, high] in Angstrom, chosen around the main
/// OH/O2 sky-line groups.
const DEFAULT_SEGMENT_BOUNDS: [(f64, f64); 9] = [
    (0.0, 5400.0),
    (5400.0, 5850.0),
    (5850.0, 6400.0),
    (6400.0, 6700.0),
    (6700.0, 7150.0),
    (7150.0, 7700.0),
    (7700.0, 8200.0),
    (8200.0, 8700.0),
    (8700.0, 10000.0),
];

/// Half-width of the cubic neighborhood used to interpolate NaN voxels.
const DEFAULT_NAN_BOX_RADIUS: usize = 1;

/// Spaxels with a larger fraction of NaN voxels are not repaired.
const DEFAULT_NAN_REJECT_RATIO: f64 = 0.25;

/// Number of column chunks the continuum filter is split into.
const DEFAULT_CONTINUUM_CHUNKS: usize = 16;

/// Width of the box filter applied before the continuum median filter.
const DEFAULT_UNIFORM_FILTER_WIDTH: usize = 3;

/// Width of the continuum median filter (spectral pixels).
pub const DEFAULT_CONTINUUM_WIDTH: usize = 100;

/// SVD iteration cap; 0 iterates until convergence.
const DEFAULT_SVD_MAX_ITERATIONS: usize = 0;

/// Fraction of a segment's modes searched by the optimizer.
const DEFAULT_SEARCH_FRACTION: f64 = 0.20;

/// Trailing fraction of the difference curves used as the settled baseline.
const DEFAULT_BASELINE_FRACTION: f64 = 0.25;

/// Crossing threshold in baseline standard deviations.
const DEFAULT_SIGMA_THRESHOLD: f64 = 2.0;

// =============================================================================
// Types
// =============================================================================

/// Parameters of the automatic mode-count optimizer.
///
/// These are empirical values tuned on MUSE data; revalidate them before
/// using the optimizer on another instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeConfig {
    /// Fraction of each segment's rank to search (ceil). Default: 0.20
    pub search_fraction: f64,
    /// Trailing fraction of each difference curve taken as baseline. Default: 0.25
    pub baseline_fraction: f64,
    /// Number of baseline standard deviations defining a crossing. Default: 2.0
    pub sigma_threshold: f64,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            search_fraction: DEFAULT_SEARCH_FRACTION,
            baseline_fraction: DEFAULT_BASELINE_FRACTION,
            sigma_threshold: DEFAULT_SIGMA_THRESHOLD,
        }
    }
}

/// Instrument-level configuration of the pipeline.
///
/// `Default::default()` reproduces the reference MUSE setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZapConfig {
    /// Inclusive blue limit of the usable window. Default: 4800
    pub wavelength_min: f64,
    /// Inclusive red limit of the usable window. Default: 9300
    pub wavelength_max: f64,
    /// Ordered (low, high] wavelength bounds of the SVD segments.
    pub segment_bounds: Vec<(f64, f64)>,
    /// NaN interpolation neighborhood radius. Default: 1 (3x3x3)
    pub nan_box_radius: usize,
    /// Maximum NaN fraction for a spaxel to be repaired. Default: 0.25
    pub nan_reject_ratio: f64,
    /// Number of parallel continuum-filter chunks. Default: 16
    pub continuum_chunks: usize,
    /// Box filter width preceding the continuum median. Default: 3
    pub uniform_filter_width: usize,
    /// SVD iteration cap, 0 for no cap. Default: 0
    pub svd_max_iterations: usize,
    /// Automatic mode selection parameters.
    pub optimize: OptimizeConfig,
}

impl Default for ZapConfig {
    fn default() -> Self {
        Self {
            wavelength_min: DEFAULT_WAVELENGTH_MIN,
            wavelength_max: DEFAULT_WAVELENGTH_MAX,
            segment_bounds: DEFAULT_SEGMENT_BOUNDS.to_vec(),
            nan_box_radius: DEFAULT_NAN_BOX_RADIUS,
            nan_reject_ratio: DEFAULT_NAN_REJECT_RATIO,
            continuum_chunks: DEFAULT_CONTINUUM_CHUNKS,
            uniform_filter_width: DEFAULT_UNIFORM_FILTER_WIDTH,
            svd_max_iterations: DEFAULT_SVD_MAX_ITERATIONS,
            optimize: OptimizeConfig::default(),
        }
    }
}

impl ZapConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.wavelength_min < self.wavelength_max) {
            return Err(config_err(format!(
                "wavelength window [{}, {}] is empty",
                self.wavelength_min, self.wavelength_max
            )));
        }
        if self.segment_bounds.is_empty() {
            return Err(config_err("segment_bounds must not be empty"));
        }
        for (i, &(low, high)) in self.segment_bounds.iter().enumerate() {
            if !(low < high) {
                return Err(config_err(format!(
                    "segment bound {} ({}, {}] is empty",
                    i, low, high
                )));
            }
        }
        for (i, pair) in self.segment_bounds.windows(2).enumerate() {
            if pair[1].0 < pair[0].1 {
                return Err(config_err(format!(
                    "segment bound {} starts at {} before bound {} ends at {}",
                    i + 1,
                    pair[1].0,
                    i,
                    pair[0].1
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.nan_reject_ratio) {
            return Err(config_err("nan_reject_ratio must be within [0, 1]"));
        }
        if self.continuum_chunks == 0 {
            return Err(config_err("continuum_chunks must be > 0"));
        }
        if self.uniform_filter_width == 0 {
            return Err(config_err("uniform_filter_width must be > 0"));
        }
        self.optimize.validate()
    }
}

impl OptimizeConfig {
    /// Validate the optimizer parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.search_fraction > 0.0 && self.search_fraction <= 1.0) {
            return Err(config_err("search_fraction must be within (0, 1]"));
        }
        if !(self.baseline_fraction > 0.0 && self.baseline_fraction <= 1.0) {
            return Err(config_err("baseline_fraction must be within (0, 1]"));
        }
        if !(self.sigma_threshold >= 0.0) {
            return Err(config_err("sigma_threshold must be >= 0"));
        }
        Ok(())
    }
}

/// Switches for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Interpolate NaN voxels before extraction. Default: true
    pub clean: bool,
    /// Subtract the per-plane zero level. Default: true
    pub zero_level: bool,
    /// Continuum median filter width. Default: 100
    pub continuum_width: usize,
    /// How the per-segment mode counts are chosen. Default: one mode everywhere
    pub modes: ModePolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            clean: true,
            zero_level: true,
            continuum_width: DEFAULT_CONTINUUM_WIDTH,
            modes: ModePolicy::Explicit(ModeSelection::Count(1)),
        }
    }
}

impl RunOptions {
    /// Validate the run switches.
    pub fn validate(&self) -> Result<()> {
        if self.continuum_width == 0 {
            return Err(config_err("continuum_width must be > 0"));
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> ZapError {
    ZapError::Configuration(msg.into())
}

// =============================================================================
// Tests
// =============================================================================
