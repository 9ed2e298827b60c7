//! Scalar and index type bounds used throughout the engine.

use nalgebra::RealField;
use num::{Float, FromPrimitive, NumCast, ToPrimitive};
use std::fmt::Debug;

/// Marker bound for types that can be shared freely between worker threads.
pub trait ThreadSafe: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> ThreadSafe for T {}

/// Floating point scalar used for all grid and particle arithmetic.
///
/// Implemented for `f32` and `f64`. The engine is written generically over
/// this bound so that a host can trade precision for memory bandwidth, but
/// all of the example scenarios in the spec run on `f32`.
pub trait Real:
    RealField + Float + FromPrimitive + ToPrimitive + NumCast + Copy + Debug + ThreadSafe
{
    /// Attempts to convert a value of this `Real` type into another one,
    /// returning `None` on overflow rather than silently truncating.
    fn try_convert<T: Real>(&self) -> Option<T> {
        T::from_f64(self.to_f64()?)
    }

    /// `1.0` as this scalar type, spelled out for readability at call sites.
    fn one_() -> Self {
        <Self as num::One>::one()
    }
}

impl Real for f32 {}
impl Real for f64 {}

/// Grid index integer type, used for cell coordinates and flat offsets.
pub trait Index: num::PrimInt + num::Signed + FromPrimitive + ToPrimitive + Debug + ThreadSafe {}

impl Index for i32 {}
impl Index for i64 {}
impl Index for isize {}

/// Converts a `usize` into an `Index`, panicking only if the value does not
/// fit — grid dimensions are always validated against `Index::max_value()`
/// at construction time, so this should never trigger in practice.
pub fn index_from_usize<I: Index>(value: usize) -> I {
    I::from_usize(value).expect("grid index out of range for Index type")
}
