//! Float trait abstraction for f32/f64 support.
//!
//! Datacubes arrive as either single or double precision flux. Every stage of
//! the pipeline is generic over [`ZapFloat`]; only the SVD itself is carried
//! out in `f64` and converted back.

use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for the floating point types a datacube can hold.
///
/// Combines the bounds the pipeline needs:
/// - Basic float operations (Float, NumAssign)
/// - Conversion from primitive types (FromPrimitive), required by ndarray's
///   `var_axis` / `mean`
/// - Iteration support (Sum)
/// - Thread safety for rayon fan-out (Send + Sync)
pub trait ZapFloat:
    Float + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Widen to f64 for the linear algebra backend.
    fn as_f64(self) -> f64;
}

impl ZapFloat for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl ZapFloat for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}
