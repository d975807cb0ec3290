//! ZAP Core Library
//!
//! Removes residual sky emission from integral-field spectroscopy datacubes.
//! The cube is flattened to a stack of spectra, its continuum is filtered out,
//! and each wavelength segment is decomposed with an SVD. The leading
//! eigenmodes model the sky residuals and are subtracted from every spaxel.

pub mod config;
pub mod continuum;
pub mod decomposition;
pub mod error;
pub mod float_trait;
pub mod geometry;
pub mod modes;
pub mod nan_repair;
pub mod optimize;
pub mod pipeline;
pub mod reconstruct;
pub mod stack;
pub mod utils;

// Re-export commonly used types at the crate root
pub use config::{OptimizeConfig, RunOptions, ZapConfig};
pub use decomposition::SegmentBasis;
pub use error::{Result, ZapError};
pub use float_trait::ZapFloat;
pub use geometry::{CubeGeometry, Segment, WavelengthCalibration};
pub use modes::{ModePolicy, ModeSelection};
pub use nan_repair::NanRepairReport;
pub use optimize::VarianceCurve;
pub use pipeline::{
    ensure_output_absent, zap, ExtractedStack, FilteredStack, PreparedCube, Provenance,
    RepairedCube, SegmentRecord, SkyModel,
};
pub use stack::SpaxelStack;
