//! Spectral geometry of the datacube.
//!
//! Derives the wavelength axis from the calibration keywords, trims the cube
//! to the usable window and maps the wavelength segment table onto pixel
//! ranges of the trimmed axis.

use std::ops::Range;

use ndarray::{concatenate, s, Array1, Array3, ArrayView1, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::config::ZapConfig;
use crate::error::{Result, ZapError};
use crate::float_trait::ZapFloat;

/// Linear wavelength solution of the spectral axis.
///
/// Mirrors the FITS keywords NAXIS3, CRVAL3, CD3_3 and CRPIX3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthCalibration {
    /// Number of spectral planes (NAXIS3).
    pub n_planes: usize,
    /// Wavelength at the reference pixel (CRVAL3).
    pub ref_value: f64,
    /// Wavelength step per plane (CD3_3).
    pub step: f64,
    /// Reference pixel, 1-based (CRPIX3).
    pub ref_pixel: f64,
}

impl WavelengthCalibration {
    pub fn new(n_planes: usize, ref_value: f64, step: f64, ref_pixel: f64) -> Self {
        Self {
            n_planes,
            ref_value,
            step,
            ref_pixel,
        }
    }

    /// Wavelength of every plane: `ref_value + step * (index + ref_pixel - 1)`.
    pub fn axis(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n_planes, |i| {
            self.ref_value + self.step * (i as f64 + self.ref_pixel - 1.0)
        })
    }

    fn validate(&self) -> Result<()> {
        if self.n_planes == 0 {
            return Err(ZapError::Data("calibration describes zero planes".into()));
        }
        if !self.step.is_finite() || self.step == 0.0 {
            return Err(ZapError::Configuration(format!(
                "wavelength step {} is not usable",
                self.step
            )));
        }
        if !self.ref_value.is_finite() || !self.ref_pixel.is_finite() {
            return Err(ZapError::Configuration(
                "wavelength calibration must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// A half-open range `[start, end)` of trimmed spectral pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Trimmed wavelength axis and the segment layout on it.
#[derive(Debug, Clone)]
pub struct CubeGeometry {
    wavelengths: Array1<f64>,
    trim: Range<usize>,
    n_planes: usize,
    segments: Vec<Segment>,
}

impl CubeGeometry {
    /// Derive the trimmed axis and segments for a calibration.
    pub fn new(calibration: &WavelengthCalibration, config: &ZapConfig) -> Result<Self> {
        calibration.validate()?;
        let full_axis = calibration.axis();
        let trim = trim_window(full_axis.view(), config.wavelength_min, config.wavelength_max)?;
        let wavelengths = full_axis.slice(s![trim.clone()]).to_owned();
        let segments = compute_segments(wavelengths.view(), &config.segment_bounds)?;
        check_tiling(&segments, wavelengths.len())?;

        log::debug!(
            "Trimmed spectral axis to planes {}..{} of {} ({} segments)",
            trim.start,
            trim.end,
            calibration.n_planes,
            segments.len()
        );

        Ok(Self {
            wavelengths,
            trim,
            n_planes: calibration.n_planes,
            segments,
        })
    }

    /// Wavelengths of the trimmed planes.
    pub fn wavelengths(&self) -> ArrayView1<'_, f64> {
        self.wavelengths.view()
    }

    /// Plane range of the input cube kept after trimming.
    pub fn trim(&self) -> Range<usize> {
        self.trim.clone()
    }

    /// Number of planes in the untrimmed cube.
    pub fn n_planes(&self) -> usize {
        self.n_planes
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Split a cube into the trimmed core and its blue/red edges.
    pub fn trim_cube<F: ZapFloat>(&self, cube: Array3<F>) -> Result<(Array3<F>, SpectralEdges<F>)> {
        let n_planes = cube.dim().0;
        if n_planes != self.n_planes {
            return Err(ZapError::Data(format!(
                "cube has {} planes but the calibration describes {}",
                n_planes, self.n_planes
            )));
        }
        let edges = SpectralEdges {
            blue: cube.slice(s![..self.trim.start, .., ..]).to_owned(),
            red: cube.slice(s![self.trim.end.., .., ..]).to_owned(),
        };
        let core = cube.slice(s![self.trim.clone(), .., ..]).to_owned();
        Ok((core, edges))
    }
}

/// Planes cut off by the wavelength window, kept verbatim.
#[derive(Debug, Clone)]
pub struct SpectralEdges<F: ZapFloat> {
    pub blue: Array3<F>,
    pub red: Array3<F>,
}

impl<F: ZapFloat> SpectralEdges<F> {
    /// Rebuild a full-length cube around a processed core.
    pub fn reattach<'a>(&'a self, core: ArrayView3<'a, F>) -> Result<Array3<F>> {
        Ok(concatenate(
            Axis(0),
            &[self.blue.view(), core, self.red.view()],
        )?)
    }
}

/// Inclusive index range of the planes whose wavelength lies in `[min, max]`.
pub fn trim_window(axis: ArrayView1<f64>, min: f64, max: f64) -> Result<Range<usize>> {
    let mut inside = axis
        .iter()
        .enumerate()
        .filter(|&(_, &l)| l >= min && l <= max)
        .map(|(i, _)| i);
    let first = inside.next().ok_or_else(|| {
        ZapError::Configuration(format!(
            "no spectral plane falls inside the window [{}, {}]",
            min, max
        ))
    })?;
    let last = inside.last().unwrap_or(first);
    Ok(first..last + 1)
}

/// Pixel ranges of each `(low, high]` wavelength bound, in table order.
pub fn compute_segments(axis: ArrayView1<f64>, bounds: &[(f64, f64)]) -> Result<Vec<Segment>> {
    bounds
        .iter()
        .enumerate()
        .map(|(i, &(low, high))| {
            let mut inside = axis
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l > low && l <= high)
                .map(|(p, _)| p);
            let first = inside.next().ok_or_else(|| {
                ZapError::Configuration(format!(
                    "segment {} ({}, {}] contains no spectral pixel",
                    i, low, high
                ))
            })?;
            let last = inside.last().unwrap_or(first);
            Ok(Segment {
                start: first,
                end: last + 1,
            })
        })
        .collect()
}

/// Check that segments cover `0..len` in ascending order without gaps or
/// overlaps. Reconstruction stacks segments in table order, so an unordered
/// table is rejected rather than sorted.
pub fn check_tiling(segments: &[Segment], len: usize) -> Result<()> {
    let mut cursor = 0;
    for seg in segments {
        if seg.start != cursor {
            return Err(ZapError::Configuration(format!(
                "segments do not tile the spectral axis: expected a segment at pixel {}, found {}..{}",
                cursor, seg.start, seg.end
            )));
        }
        cursor = seg.end;
    }
    if cursor != len {
        return Err(ZapError::Configuration(format!(
            "segments end at pixel {} but the trimmed axis has {} pixels",
            cursor, len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn muse_calibration() -> WavelengthCalibration {
        // 4750 .. 9350 in 1.25 Angstrom steps
        WavelengthCalibration::new(3681, 4750.0, 1.25, 1.0)
    }

    #[test]
    fn test_axis_formula() {
        let calibration = WavelengthCalibration::new(4, 5000.0, 2.0, 3.0);
        let axis = calibration.axis();
        // ref_value + step * (i + ref_pixel - 1)
        assert_eq!(axis.to_vec(), vec![5004.0, 5006.0, 5008.0, 5010.0]);
    }

    #[test]
    fn test_trim_window_inclusive() {
        let axis = Array1::from(vec![4700.0, 4800.0, 5000.0, 9300.0, 9400.0]);
        let trim = trim_window(axis.view(), 4800.0, 9300.0).unwrap();
        assert_eq!(trim, 1..4);
    }

    #[test]
    fn test_trim_window_outside_band() {
        let axis = Array1::from(vec![1000.0, 2000.0]);
        assert!(matches!(
            trim_window(axis.view(), 4800.0, 9300.0),
            Err(ZapError::Configuration(_))
        ));
    }

    #[test]
    fn test_small_scenario_keeps_all_planes() {
        let calibration = WavelengthCalibration::new(10, 4800.0, 500.0, 1.0);
        let axis = calibration.axis();
        let trim = trim_window(axis.view(), 4800.0, 9300.0).unwrap();
        assert_eq!(trim, 0..10);
    }

    #[test]
    fn test_reference_segments_tile_muse_axis() {
        let geometry = CubeGeometry::new(&muse_calibration(), &ZapConfig::default()).unwrap();
        let segments = geometry.segments();
        assert_eq!(segments.len(), 9);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[8].end, geometry.wavelengths().len());
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let total: usize = segments.iter().map(Segment::len).sum();
        assert_eq!(total, geometry.wavelengths().len());
    }

    #[test]
    fn test_segment_boundaries_are_half_open_in_wavelength() {
        let axis = Array1::from(vec![5390.0, 5400.0, 5410.0, 5420.0]);
        let segments =
            compute_segments(axis.view(), &[(0.0, 5400.0), (5400.0, 6000.0)]).unwrap();
        // 5400 belongs to the lower segment
        assert_eq!(segments[0], Segment { start: 0, end: 2 });
        assert_eq!(segments[1], Segment { start: 2, end: 4 });
    }

    #[test]
    fn test_empty_segment_is_configuration_error() {
        // 500 Angstrom sampling leaves (6400, 6700] without pixels
        let calibration = WavelengthCalibration::new(10, 4800.0, 500.0, 1.0);
        let result = CubeGeometry::new(&calibration, &ZapConfig::default());
        assert!(matches!(result, Err(ZapError::Configuration(_))));
    }

    #[test]
    fn test_gap_in_table_is_rejected() {
        let axis = Array1::from_shape_fn(20, |i| 5000.0 + 10.0 * i as f64);
        let segments =
            compute_segments(axis.view(), &[(0.0, 5050.0), (5100.0, 6000.0)]).unwrap();
        assert!(check_tiling(&segments, axis.len()).is_err());
    }

    #[test]
    fn test_out_of_order_table_is_rejected() {
        let segments = [Segment { start: 16, end: 30 }, Segment { start: 0, end: 16 }];
        assert!(matches!(
            check_tiling(&segments, 30),
            Err(ZapError::Configuration(_))
        ));

        let ordered = [Segment { start: 0, end: 16 }, Segment { start: 16, end: 30 }];
        assert!(check_tiling(&ordered, 30).is_ok());
    }

    #[test]
    fn test_trim_and_reattach_roundtrip() {
        let calibration = WavelengthCalibration::new(12, 4600.0, 500.0, 1.0);
        let config = ZapConfig {
            segment_bounds: vec![(0.0, 7000.0), (7000.0, 10000.0)],
            ..ZapConfig::default()
        };
        let geometry = CubeGeometry::new(&calibration, &config).unwrap();
        // 4600 is blue of the window, 9600 and 10100 are red of it
        assert_eq!(geometry.trim(), 1..10);

        let cube = Array3::from_shape_fn((12, 2, 3), |(z, y, x)| (z * 100 + y * 10 + x) as f64);
        let (core, edges) = geometry.trim_cube(cube.clone()).unwrap();
        assert_eq!(core.dim(), (9, 2, 3));
        assert_eq!(edges.blue.dim(), (1, 2, 3));
        assert_eq!(edges.red.dim(), (2, 2, 3));

        let full = edges.reattach(core.view()).unwrap();
        assert_eq!(full, cube);
    }

    #[test]
    fn test_plane_count_mismatch() {
        let calibration = WavelengthCalibration::new(3681, 4750.0, 1.25, 1.0);
        let geometry = CubeGeometry::new(&calibration, &ZapConfig::default()).unwrap();
        let cube = Array3::<f32>::zeros((100, 2, 2));
        assert!(matches!(geometry.trim_cube(cube), Err(ZapError::Data(_))));
    }

    #[test]
    fn test_zero_step_rejected() {
        let calibration = WavelengthCalibration::new(10, 4800.0, 0.0, 1.0);
        assert!(CubeGeometry::new(&calibration, &ZapConfig::default()).is_err());
    }
}
