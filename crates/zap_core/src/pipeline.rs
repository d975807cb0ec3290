//! End-to-end sky subtraction pipeline.
//!
//! The cube moves through the stages by value:
//!
//! ```text
//! PreparedCube --repair_nans/skip_repair--> RepairedCube --extract--> ExtractedStack
//!   --remove_zero_level/filter_continuum--> FilteredStack --decompose--> SkyModel
//! ```
//!
//! A [`SkyModel`] owns the eigenbases and can be re-parameterized (mode counts,
//! reconstruction, remolding) any number of times without recomputing them.
//!
//! ## Example
//!
//! ```
//! use ndarray::Array3;
//! use zap_core::{ModeSelection, PreparedCube, WavelengthCalibration, ZapConfig};
//!
//! let config = ZapConfig {
//!     wavelength_min: 5000.0,
//!     wavelength_max: 5090.0,
//!     segment_bounds: vec![(0.0, 5040.0), (5040.0, 6000.0)],
//!     ..ZapConfig::default()
//! };
//! let calibration = WavelengthCalibration::new(10, 5000.0, 10.0, 1.0);
//! let cube = Array3::from_shape_fn((10, 3, 3), |(z, y, x)| ((z * 7 + y * 5 + x * 3) % 11) as f64);
//!
//! let mut model = PreparedCube::new(cube, &calibration, config)?
//!     .repair_nans()
//!     .extract()?
//!     .remove_zero_level()
//!     .filter_continuum(5)?
//!     .decompose()?;
//! model.reprocess(&ModeSelection::Count(1))?;
//! assert_eq!(model.output_cube().map(|c| c.dim()), Some((10, 3, 3)));
//! # Ok::<(), zap_core::ZapError>(())
//! ```

use std::path::Path;
use std::time::Instant;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::config::{RunOptions, ZapConfig};
use crate::continuum::{filter_continuum, ContinuumFit};
use crate::decomposition::{decompose_segments, SegmentBasis};
use crate::error::{Result, ZapError};
use crate::float_trait::ZapFloat;
use crate::geometry::{CubeGeometry, SpectralEdges, WavelengthCalibration};
use crate::modes::{ModePolicy, ModeSelection};
use crate::nan_repair::{repair_nans, NanRepairReport};
use crate::optimize::{optimize_mode_counts, VarianceCurve};
use crate::reconstruct;
use crate::stack::{extract_stack, subtract_zero_level, zero_level_spectrum, SpaxelStack};

// =============================================================================
// Stage state
// =============================================================================

/// State shared by every stage after construction.
#[derive(Debug, Clone)]
struct CubeContext<F: ZapFloat> {
    config: ZapConfig,
    geometry: CubeGeometry,
    edges: SpectralEdges<F>,
    /// Trimmed cube, repaired once `repair_nans` ran.
    cube: Array3<F>,
    /// Originally invalid voxels; only present when NaN repair ran.
    mask: Option<Array3<bool>>,
    nan_report: Option<NanRepairReport>,
}

/// Cube trimmed to the usable wavelength window with segments defined.
#[derive(Debug, Clone)]
pub struct PreparedCube<F: ZapFloat> {
    ctx: CubeContext<F>,
}

/// Cube after the (optional) NaN repair.
#[derive(Debug, Clone)]
pub struct RepairedCube<F: ZapFloat> {
    ctx: CubeContext<F>,
}

/// Valid spaxels flattened into a 2-D stack.
#[derive(Debug, Clone)]
pub struct ExtractedStack<F: ZapFloat> {
    ctx: CubeContext<F>,
    stack: SpaxelStack<F>,
    zero_level: Option<Array1<F>>,
}

/// Stack with its continuum estimated and removed.
#[derive(Debug, Clone)]
pub struct FilteredStack<F: ZapFloat> {
    ctx: CubeContext<F>,
    stack: SpaxelStack<F>,
    zero_level: Option<Array1<F>>,
    fit: ContinuumFit<F>,
    continuum_width: usize,
}

/// Decomposed sky model, ready for mode selection and reconstruction.
#[derive(Debug, Clone)]
pub struct SkyModel<F: ZapFloat> {
    ctx: CubeContext<F>,
    stack: SpaxelStack<F>,
    zero_level: Option<Array1<F>>,
    fit: ContinuumFit<F>,
    continuum_width: usize,
    bases: Vec<SegmentBasis<F>>,
    mode_counts: Vec<usize>,
    optimized: bool,
    variance_curves: Vec<VarianceCurve>,
    reconstruction: Option<Array2<F>>,
    output: Option<Array3<F>>,
}

/// Processing record for header writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub clean: bool,
    pub zero_level: bool,
    pub continuum_width: usize,
    /// Mode counts chosen by the optimizer rather than given explicitly.
    pub optimized: bool,
    /// Inclusive plane range of the input cube that was processed.
    pub trim: (usize, usize),
    pub n_segments: usize,
    pub segments: Vec<SegmentRecord>,
}

/// One segment in input-cube plane coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// First plane, inclusive.
    pub first_plane: usize,
    /// Last plane, inclusive.
    pub last_plane: usize,
    pub n_modes: usize,
}

// =============================================================================
// Stages
// =============================================================================

impl<F: ZapFloat> PreparedCube<F> {
    /// Validate `config`, derive the spectral geometry and trim `cube`.
    ///
    /// # Arguments
    ///
    /// * `cube` - Flux cube [wavelength, y, x]; NaN marks invalid voxels
    /// * `calibration` - Linear wavelength solution of the spectral axis
    /// * `config` - Instrument configuration
    pub fn new(cube: Array3<F>, calibration: &WavelengthCalibration, config: ZapConfig) -> Result<Self> {
        config.validate()?;
        let geometry = CubeGeometry::new(calibration, &config)?;
        let (core, edges) = geometry.trim_cube(cube)?;
        log::info!(
            "Prepared cube {:?}, {} segments",
            core.dim(),
            geometry.segments().len()
        );

        Ok(Self {
            ctx: CubeContext {
                config,
                geometry,
                edges,
                cube: core,
                mask: None,
                nan_report: None,
            },
        })
    }

    pub fn geometry(&self) -> &CubeGeometry {
        &self.ctx.geometry
    }

    /// Trimmed cube.
    pub fn cube(&self) -> ArrayView3<'_, F> {
        self.ctx.cube.view()
    }

    /// Interpolate invalid voxels and remember where they were.
    pub fn repair_nans(self) -> RepairedCube<F> {
        let mut ctx = self.ctx;
        let started = Instant::now();
        let repair = repair_nans(
            ctx.cube.view(),
            ctx.config.nan_box_radius,
            ctx.config.nan_reject_ratio,
        );
        log::info!("NaN repair finished in {:.2?}", started.elapsed());

        ctx.cube = repair.cube;
        ctx.mask = Some(repair.mask);
        ctx.nan_report = Some(repair.report);
        RepairedCube { ctx }
    }

    /// Keep invalid voxels as they are; affected spaxels leave the stack.
    pub fn skip_repair(self) -> RepairedCube<F> {
        RepairedCube { ctx: self.ctx }
    }

    /// Run every stage with the given switches.
    pub fn run(self, options: &RunOptions) -> Result<SkyModel<F>> {
        options.validate()?;
        let started = Instant::now();

        let repaired = if options.clean {
            self.repair_nans()
        } else {
            self.skip_repair()
        };
        let mut extracted = repaired.extract()?;
        if options.zero_level {
            extracted = extracted.remove_zero_level();
        }
        let mut model = extracted
            .filter_continuum(options.continuum_width)?
            .decompose()?;

        match &options.modes {
            ModePolicy::Explicit(selection) => {
                model.reprocess(selection)?;
            }
            ModePolicy::Optimize => {
                model.optimize()?;
            }
        }

        log::info!("Sky subtraction finished in {:.2?}", started.elapsed());
        Ok(model)
    }
}

impl<F: ZapFloat> RepairedCube<F> {
    pub fn nan_report(&self) -> Option<NanRepairReport> {
        self.ctx.nan_report
    }

    /// Flatten the cube into a stack of fully valid spaxels.
    pub fn extract(self) -> Result<ExtractedStack<F>> {
        let stack = extract_stack(self.ctx.cube.view())?;
        Ok(ExtractedStack {
            ctx: self.ctx,
            stack,
            zero_level: None,
        })
    }
}

impl<F: ZapFloat> ExtractedStack<F> {
    pub fn stack(&self) -> &SpaxelStack<F> {
        &self.stack
    }

    /// Subtract the per-plane median of the whole field from every spectrum.
    pub fn remove_zero_level(mut self) -> Self {
        let zero_level = zero_level_spectrum(self.ctx.cube.view());
        subtract_zero_level(&mut self.stack, &zero_level);
        log::info!("Subtracted zero level");
        self.zero_level = Some(zero_level);
        self
    }

    /// Estimate the continuum with a median filter of `width` pixels.
    pub fn filter_continuum(self, width: usize) -> Result<FilteredStack<F>> {
        if width == 0 {
            return Err(ZapError::Configuration("continuum width must be > 0".into()));
        }
        let started = Instant::now();
        let fit = filter_continuum(
            self.stack.data.view(),
            width,
            self.ctx.config.uniform_filter_width,
            self.ctx.config.continuum_chunks,
        )?;
        log::info!("Continuum filter finished in {:.2?}", started.elapsed());

        Ok(FilteredStack {
            ctx: self.ctx,
            stack: self.stack,
            zero_level: self.zero_level,
            fit,
            continuum_width: width,
        })
    }
}

impl<F: ZapFloat> FilteredStack<F> {
    pub fn normstack(&self) -> ArrayView2<'_, F> {
        self.fit.normstack.view()
    }

    /// Compute the eigenbasis of every segment.
    pub fn decompose(self) -> Result<SkyModel<F>> {
        let started = Instant::now();
        let bases = decompose_segments(
            self.fit.normstack.view(),
            self.ctx.geometry.segments(),
            self.ctx.config.svd_max_iterations,
        )?;
        log::info!("SVD finished in {:.2?}", started.elapsed());

        Ok(SkyModel {
            ctx: self.ctx,
            stack: self.stack,
            zero_level: self.zero_level,
            fit: self.fit,
            continuum_width: self.continuum_width,
            bases,
            mode_counts: Vec::new(),
            optimized: false,
            variance_curves: Vec::new(),
            reconstruction: None,
            output: None,
        })
    }
}

// =============================================================================
// Sky model
// =============================================================================

impl<F: ZapFloat> SkyModel<F> {
    /// Rank of every segment, in segment order.
    pub fn ranks(&self) -> Vec<usize> {
        self.bases.iter().map(|b| b.rank()).collect()
    }

    /// Resolve an explicit selection into per-segment mode counts.
    ///
    /// Any previous reconstruction and output are discarded.
    pub fn choose_evals(&mut self, selection: &ModeSelection) -> &[usize] {
        self.mode_counts = selection.resolve(&self.ranks());
        self.optimized = false;
        self.reconstruction = None;
        self.output = None;
        log::info!("Mode counts per segment: {:?}", self.mode_counts);
        &self.mode_counts
    }

    /// Rebuild the residual sky from the current mode counts.
    pub fn reconstruct(&mut self) -> Result<ArrayView2<'_, F>> {
        if self.mode_counts.is_empty() {
            return Err(ZapError::Configuration(
                "no mode counts selected; call choose_evals or optimize first".into(),
            ));
        }
        let started = Instant::now();
        let recon = reconstruct::reconstruct(&self.bases, &self.mode_counts)?;
        log::info!("Reconstruction finished in {:.2?}", started.elapsed());
        self.output = None;
        Ok(self.reconstruction.insert(recon).view())
    }

    /// Subtract the reconstruction and rebuild the full-length cube.
    pub fn remold(&mut self) -> Result<ArrayView3<'_, F>> {
        let recon = self.reconstruction.as_ref().ok_or_else(|| {
            ZapError::Configuration("no reconstruction; call reconstruct first".into())
        })?;
        let core = reconstruct::remold(
            self.ctx.cube.view(),
            &self.stack,
            recon.view(),
            self.ctx.mask.as_ref().map(|m| m.view()),
        )?;
        let full = self.ctx.edges.reattach(core.view())?;
        log::info!("Remolded cube {:?}", full.dim());
        Ok(self.output.insert(full).view())
    }

    /// Choose modes, reconstruct and remold in one call.
    pub fn reprocess(&mut self, selection: &ModeSelection) -> Result<ArrayView3<'_, F>> {
        self.choose_evals(selection);
        self.reconstruct()?;
        self.remold()
    }

    /// Select mode counts from the variance curves, then reconstruct and
    /// remold.
    pub fn optimize(&mut self) -> Result<&[usize]> {
        let started = Instant::now();
        let curves = optimize_mode_counts(
            self.stack.data.view(),
            &self.bases,
            &self.ctx.config.optimize,
        )?;
        self.mode_counts = curves.iter().map(|c| c.selected).collect();
        self.variance_curves = curves;
        self.optimized = true;
        log::info!(
            "Optimized mode counts {:?} in {:.2?}",
            self.mode_counts,
            started.elapsed()
        );

        self.reconstruct()?;
        self.remold()?;
        Ok(&self.mode_counts)
    }

    /// Cleaned cube with the spectral edges reattached, once remolded.
    pub fn output_cube(&self) -> Option<ArrayView3<'_, F>> {
        self.output.as_ref().map(|c| c.view())
    }

    /// Take the cleaned cube out of the model.
    pub fn into_output(self) -> Option<Array3<F>> {
        self.output
    }

    pub fn mode_counts(&self) -> &[usize] {
        &self.mode_counts
    }

    /// Diagnostics of the last `optimize` call; empty otherwise.
    pub fn variance_curves(&self) -> &[VarianceCurve] {
        &self.variance_curves
    }

    pub fn provenance(&self) -> Provenance {
        let trim = self.ctx.geometry.trim();
        let segments = self
            .ctx
            .geometry
            .segments()
            .iter()
            .enumerate()
            .map(|(i, seg)| SegmentRecord {
                first_plane: trim.start + seg.start,
                last_plane: trim.start + seg.end - 1,
                n_modes: self.mode_counts.get(i).copied().unwrap_or(0),
            })
            .collect::<Vec<_>>();

        Provenance {
            clean: self.ctx.mask.is_some(),
            zero_level: self.zero_level.is_some(),
            continuum_width: self.continuum_width,
            optimized: self.optimized,
            trim: (trim.start, trim.end - 1),
            n_segments: segments.len(),
            segments,
        }
    }

    pub fn geometry(&self) -> &CubeGeometry {
        &self.ctx.geometry
    }

    pub fn nan_report(&self) -> Option<NanRepairReport> {
        self.ctx.nan_report
    }

    /// Invalid-voxel mask of the trimmed cube, when NaN repair ran.
    pub fn mask(&self) -> Option<ArrayView3<'_, bool>> {
        self.ctx.mask.as_ref().map(|m| m.view())
    }

    pub fn stack(&self) -> &SpaxelStack<F> {
        &self.stack
    }

    pub fn zero_level(&self) -> Option<ArrayView1<'_, F>> {
        self.zero_level.as_ref().map(|z| z.view())
    }

    pub fn continuum(&self) -> ArrayView2<'_, F> {
        self.fit.continuum.view()
    }

    pub fn normstack(&self) -> ArrayView2<'_, F> {
        self.fit.normstack.view()
    }

    pub fn bases(&self) -> &[SegmentBasis<F>] {
        &self.bases
    }

    /// Per-spaxel variance profile of every segment.
    pub fn variance_profiles(&self) -> Vec<ArrayView1<'_, F>> {
        self.bases.iter().map(|b| b.variance.view()).collect()
    }

    pub fn reconstruction(&self) -> Option<ArrayView2<'_, F>> {
        self.reconstruction.as_ref().map(|r| r.view())
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Fail with [`ZapError::Data`] if `path` already exists.
///
/// Call before starting the pipeline so no work is lost on an existing file.
pub fn ensure_output_absent(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(ZapError::Data(format!(
            "output file {} exists",
            path.display()
        )));
    }
    Ok(())
}

/// Clean `cube` in one call.
///
/// Equivalent to `PreparedCube::new(cube, calibration, config.clone())?.run(options)`.
pub fn zap<F: ZapFloat>(
    cube: Array3<F>,
    calibration: &WavelengthCalibration,
    config: &ZapConfig,
    options: &RunOptions,
) -> Result<SkyModel<F>> {
    PreparedCube::new(cube, calibration, config.clone())?.run(options)
}
