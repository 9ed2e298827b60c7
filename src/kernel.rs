//! Radial and separable weighting kernels shared by the scatter/gather
//! passes and by additive scalar field sources.

use crate::numeric_types::Real;
use nalgebra::Vector3;

/// Per-axis linear hat function: `1 - |t|/dx` clamped to `[0, 1]`, zero
/// beyond one cell width. The product of three of these over `x, y, z` is
/// the trilinear scatter/gather weight used by the MAC field, written out
/// directly in `vmath::trilinear_weights` for the grid-aligned case; this
/// version takes an arbitrary offset rather than a precomputed fraction, so
/// it's used where the offset isn't already known to lie in `[0, dx)`.
pub fn linear_hat<R: Real>(t: R, dx: R) -> R {
    let x = (t / dx).abs();
    if x >= R::one_() {
        R::zero()
    } else {
        R::one_() - x
    }
}

/// Separable trilinear weight for an arbitrary offset `delta = sample_point -
/// lattice_point`.
pub fn trilinear_weight<R: Real>(delta: Vector3<R>, dx: R) -> R {
    linear_hat(delta.x, dx) * linear_hat(delta.y, dx) * linear_hat(delta.z, dx)
}

/// Smooth radial falloff used by additive scalar sources (wind/attraction
/// fields): `(1 - (r/radius)^2)^3` inside the radius, zero outside,
/// continuous in value and first derivative at `r = radius`. The same
/// "(1 - s^2)^3" shape as the SPH poly6 kernel, used here purely as a smooth
/// falloff rather than as a normalized density estimator.
pub fn smooth_falloff<R: Real>(r: R, radius: R) -> R {
    if r >= radius || radius <= R::zero() {
        return R::zero();
    }
    let s = r / radius;
    let inner = R::one_() - s * s;
    inner * inner * inner
}

/// Compactly-supported cubic scatter kernel (spec §4.6):
///
/// `W(d²) = 1 − (4/9r⁶)·d⁶ + (17/9r⁴)·d⁴ − (22/9r²)·d²` for `d² < r²`, else 0.
///
/// Used by [`crate::velocity_advector`] and [`crate::scalar_field_adder`] to
/// rasterize a particle's contribution onto nearby MAC faces/cell centers;
/// `r` is the particle-to-grid radius (≈ `dx`).
#[numeric_literals::replace_float_literals(R::from_f64(literal).unwrap())]
pub fn scatter_kernel<R: Real>(d2: R, r: R) -> R {
    let r2 = r * r;
    if d2 >= r2 || r <= R::zero() {
        return R::zero();
    }
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let d4 = d2 * d2;
    let d6 = d4 * d2;
    1.0 - (4.0 / (9.0 * r6)) * d6 + (17.0 / (9.0 * r4)) * d4 - (22.0 / (9.0 * r2)) * d2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_kernel_is_one_at_center_and_zero_at_support_radius() {
        let r = 0.1f32;
        assert!((scatter_kernel(0.0, r) - 1.0).abs() < 1e-6);
        assert_eq!(scatter_kernel(r * r, r), 0.0);
        assert_eq!(scatter_kernel(r * r * 1.5, r), 0.0);
    }

    #[test]
    fn scatter_kernel_decreases_with_distance() {
        let r = 0.1f32;
        let near = scatter_kernel(0.01 * r * r, r);
        let far = scatter_kernel(0.8 * r * r, r);
        assert!(near > far);
    }

    #[test]
    fn linear_hat_peaks_at_zero_and_vanishes_at_dx() {
        assert_eq!(linear_hat(0.0_f32, 1.0), 1.0);
        assert_eq!(linear_hat(1.0_f32, 1.0), 0.0);
        assert_eq!(linear_hat(2.0_f32, 1.0), 0.0);
    }

    #[test]
    fn smooth_falloff_is_one_at_center_and_zero_at_radius() {
        assert_eq!(smooth_falloff(0.0_f32, 2.0), 1.0);
        assert_eq!(smooth_falloff(2.0_f32, 2.0), 0.0);
        assert!(smooth_falloff(1.0_f32, 2.0) > 0.0 && smooth_falloff(1.0_f32, 2.0) < 1.0);
    }
}
