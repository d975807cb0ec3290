//! Error taxonomy for the ZAP pipeline.

use thiserror::Error;

/// Errors that can occur while cleaning a datacube.
#[derive(Error, Debug)]
pub enum ZapError {
    /// Invalid parameters: empty wavelength segment, zero-rank segment handed
    /// to the optimizer, out-of-range configuration values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The data cannot be processed: no spaxel survives NaN filtering, the
    /// output path already exists, cube and calibration disagree.
    #[error("data error: {0}")]
    Data(String),

    /// The decomposition of a segment failed.
    #[error("numerical error in segment {segment}: {message}")]
    Numerical { segment: usize, message: String },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, ZapError>;
