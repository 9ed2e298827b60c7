//! Small geometry helpers shared by the grid, level-set and advection code.
//!
//! Vector arithmetic itself is left to `nalgebra::Vector3`; this module only
//! adds the grid-index bookkeeping and interpolation weights the original
//! engine hand-rolled in `vmath.h` and `grid3d.h`.

use crate::numeric_types::{Index, Real};
use nalgebra::Vector3;

/// A 3-D integer cell or node coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridIndex<I: Index> {
    pub i: I,
    pub j: I,
    pub k: I,
}

impl<I: Index> GridIndex<I> {
    pub fn new(i: I, j: I, k: I) -> Self {
        Self { i, j, k }
    }

    pub fn zero() -> Self {
        Self::new(I::zero(), I::zero(), I::zero())
    }

    /// The 6 face-adjacent neighbors, in -x,+x,-y,+y,-z,+z order.
    pub fn neighbors6(&self) -> [Self; 6] {
        let one = I::one();
        [
            Self::new(self.i - one, self.j, self.k),
            Self::new(self.i + one, self.j, self.k),
            Self::new(self.i, self.j - one, self.k),
            Self::new(self.i, self.j + one, self.k),
            Self::new(self.i, self.j, self.k - one),
            Self::new(self.i, self.j, self.k + one),
        ]
    }

    /// All 26 neighbors in a 3x3x3 block centered on this index (self excluded).
    pub fn neighbors26(&self) -> Vec<Self> {
        let one = I::one();
        let mut out = Vec::with_capacity(26);
        for di in [-one, I::zero(), one] {
            for dj in [-one, I::zero(), one] {
                for dk in [-one, I::zero(), one] {
                    if di.is_zero() && dj.is_zero() && dk.is_zero() {
                        continue;
                    }
                    out.push(Self::new(self.i + di, self.j + dj, self.k + dk));
                }
            }
        }
        out
    }
}

/// Clamps `value` into `[lo, hi]`.
pub fn clamp<R: Real>(value: R, lo: R, hi: R) -> R {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Linear interpolation `a + t * (b - a)`.
pub fn lerp<R: Real>(a: R, b: R, t: R) -> R {
    a + (b - a) * t
}

/// Decomposes a world-space coordinate along one axis into a base cell index
/// and an interpolation fraction in `[0, 1)`, given a lattice origin offset
/// and the cell size `dx`. Used to locate the 8 lattice points surrounding a
/// world point for trilinear sampling.
pub fn position_to_cell_index_and_frac<R: Real>(pos: R, origin: R, dx: R) -> (isize, R) {
    let relative = (pos - origin) / dx;
    let base = relative.floor();
    let frac = relative - base;
    (base.to_isize().unwrap_or(0), frac)
}

/// Trilinear interpolation weights for the 8 corners of a unit cube, given
/// fractional offsets `(fx, fy, fz)` each in `[0, 1]`. Returned in the order
/// `(000, 100, 010, 110, 001, 101, 011, 111)`.
pub fn trilinear_weights<R: Real>(fx: R, fy: R, fz: R) -> [R; 8] {
    let one = R::one_();
    let (gx, gy, gz) = (one - fx, one - fy, one - fz);
    [
        gx * gy * gz,
        fx * gy * gz,
        gx * fy * gz,
        fx * fy * gz,
        gx * gy * fz,
        fx * gy * fz,
        gx * fy * fz,
        fx * fy * fz,
    ]
}

/// Returns `true` if `value` is finite (not NaN or infinite), generic over
/// the scalar components of a `Vector3`.
pub fn is_finite_vec3<R: Real>(v: &Vector3<R>) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Replaces any non-finite component of a sampled velocity with zero,
/// implementing the `NumericIssue` recovery policy from spec §4.8/§7.
pub fn sanitize_vec3<R: Real>(v: Vector3<R>) -> Vector3<R> {
    if is_finite_vec3(&v) {
        v
    } else {
        Vector3::zeros()
    }
}
