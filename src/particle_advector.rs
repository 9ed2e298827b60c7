//! Integrates marker particles through the velocity field with an
//! adjustable-order Runge-Kutta scheme and CFL-bounded adaptive
//! substepping, then projects any particle that ended up inside a solid
//! back out along the solid's distance-field gradient.

use crate::error::{ConfigError, SimError};
use crate::mac_field::MacField;
use crate::mesh_level_set::MeshLevelSet;
use crate::numeric_types::Real;
use crate::vmath::sanitize_vec3;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Trilinearly samples `velocity` at `p` and substitutes the zero vector for
/// any non-finite component (spec §4.8: "any sampled velocity with a
/// non-finite component (NaN or Inf) is replaced by the zero vector before
/// being used in an RK stage").
fn sample_sanitized<R: Real>(velocity: &MacField<R>, p: Vector3<R>) -> Vector3<R> {
    sanitize_vec3(velocity.sample_linear(p))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationScheme {
    Rk1,
    Rk2,
    Rk3,
    Rk4,
}

#[derive(Clone, Copy, Debug)]
pub struct ParticleAdvector<R: Real> {
    pub cfl: R,
    pub min_substeps: usize,
    pub max_substeps: usize,
    pub scheme: IntegrationScheme,
}

impl<R: Real> ParticleAdvector<R> {
    pub fn new(cfl: R, min_substeps: usize, max_substeps: usize, scheme: IntegrationScheme) -> Result<Self, SimError> {
        if cfl <= R::zero() {
            return Err(SimError::Config(ConfigError::CflOutOfRange(cfl.to_f64().unwrap_or(0.0))));
        }
        if min_substeps > max_substeps || max_substeps == 0 {
            return Err(SimError::Config(ConfigError::SubstepBoundsInverted(min_substeps as u32, max_substeps as u32)));
        }
        Ok(Self {
            cfl,
            min_substeps,
            max_substeps,
            scheme,
        })
    }

    /// Number of substeps the given `dt` should be split into, bounded by
    /// `[min_substeps, max_substeps]`, targeting at most `cfl` cells of
    /// travel per substep for the fastest sampled velocity.
    pub fn substep_count(&self, dt: R, dx: R, max_speed: R) -> usize {
        if max_speed <= R::zero() || dt <= R::zero() {
            return self.min_substeps;
        }
        let target = (max_speed * dt / (self.cfl * dx)).ceil();
        let target = target.to_usize().unwrap_or(self.min_substeps);
        target.clamp(self.min_substeps, self.max_substeps)
    }

    /// Advects every particle through `velocity` over `dt`, splitting into
    /// however many substeps the CFL condition demands, and projects any
    /// particle that lands inside `solid` back to the surface along
    /// `solid`'s numerical gradient.
    pub fn advect(&self, positions: &mut [Vector3<R>], velocity: &MacField<R>, solid: &MeshLevelSet<R>, dt: R) -> Result<(), SimError> {
        let dx = velocity.dx();
        let max_speed = positions
            .par_iter()
            .map(|p| sample_sanitized(velocity, *p).norm())
            .reduce(|| R::zero(), |a, b| if a > b { a } else { b });

        let n = self.substep_count(dt, dx, max_speed);
        let sub_dt = dt / R::from_usize(n).unwrap();

        for _ in 0..n {
            positions.par_iter_mut().for_each(|p| {
                *p = self.integrate_one(*p, velocity, sub_dt);
            });
            positions.par_iter_mut().for_each(|p| {
                *p = project_out_of_solid(*p, solid, dx);
            });
        }
        Ok(())
    }

    fn integrate_one(&self, p: Vector3<R>, velocity: &MacField<R>, dt: R) -> Vector3<R> {
        match self.scheme {
            IntegrationScheme::Rk1 => {
                let v0 = sample_sanitized(velocity, p);
                p + v0 * dt
            }
            IntegrationScheme::Rk2 => {
                let v0 = sample_sanitized(velocity, p);
                let mid = p + v0 * (dt * R::from_f64(0.5).unwrap());
                let v1 = sample_sanitized(velocity, mid);
                p + v1 * dt
            }
            IntegrationScheme::Rk3 => {
                // Ralston's third-order method (spec §4.8): intermediates at
                // 0.5dt and 0.75dt, weights 2:3:4 over 9.
                let half = R::from_f64(0.5).unwrap();
                let three_quarters = R::from_f64(0.75).unwrap();
                let two = R::from_f64(2.0).unwrap();
                let three = R::from_f64(3.0).unwrap();
                let four = R::from_f64(4.0).unwrap();
                let nine = R::from_f64(9.0).unwrap();
                let k1 = sample_sanitized(velocity, p);
                let k2 = sample_sanitized(velocity, p + k1 * (dt * half));
                let k3 = sample_sanitized(velocity, p + k2 * (dt * three_quarters));
                p + (k1 * two + k2 * three + k3 * four) * (dt / nine)
            }
            IntegrationScheme::Rk4 => {
                let half = R::from_f64(0.5).unwrap();
                let two = R::from_f64(2.0).unwrap();
                let six = R::from_f64(6.0).unwrap();
                let k1 = sample_sanitized(velocity, p);
                let k2 = sample_sanitized(velocity, p + k1 * (dt * half));
                let k3 = sample_sanitized(velocity, p + k2 * (dt * half));
                let k4 = sample_sanitized(velocity, p + k3 * dt);
                p + (k1 + k2 * two + k3 * two + k4) * (dt / six)
            }
        }
    }
}

/// Pushes `p` out of the solid along the level set's numerically estimated
/// gradient if `solid`'s signed distance at `p` is negative, by at most one
/// `dx` step (particles are expected to already be close to the surface
/// after a normal-sized substep, so a single projection step suffices).
fn project_out_of_solid<R: Real>(p: Vector3<R>, solid: &MeshLevelSet<R>, dx: R) -> Vector3<R> {
    let phi = solid.trilinear_interpolate(p);
    if phi >= R::zero() {
        return p;
    }
    let eps = dx * R::from_f64(0.5).unwrap();
    let gx = (solid.trilinear_interpolate(p + Vector3::new(eps, R::zero(), R::zero()))
        - solid.trilinear_interpolate(p - Vector3::new(eps, R::zero(), R::zero())))
        / (two_eps(eps));
    let gy = (solid.trilinear_interpolate(p + Vector3::new(R::zero(), eps, R::zero()))
        - solid.trilinear_interpolate(p - Vector3::new(R::zero(), eps, R::zero())))
        / (two_eps(eps));
    let gz = (solid.trilinear_interpolate(p + Vector3::new(R::zero(), R::zero(), eps))
        - solid.trilinear_interpolate(p - Vector3::new(R::zero(), R::zero(), eps)))
        / (two_eps(eps));

    let grad = Vector3::new(gx, gy, gz);
    let grad_norm = grad.norm();
    if grad_norm <= R::from_f64(1e-8).unwrap() {
        return p;
    }
    let normal = grad / grad_norm;
    p + normal * (phi.abs() + R::from_f64(1e-4).unwrap() * dx)
}

fn two_eps<R: Real>(eps: R) -> R {
    eps + eps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substep_count_respects_bounds() {
        let adv = ParticleAdvector::<f32>::new(1.0, 1, 8, IntegrationScheme::Rk2).unwrap();
        assert_eq!(adv.substep_count(0.01, 0.1, 0.0), 1);
        assert!(adv.substep_count(1.0, 0.01, 100.0) <= 8);
    }

    #[test]
    fn rk1_moves_particle_along_uniform_velocity() {
        let dx = 0.1f32;
        let mut field = MacField::<f32>::new(8, 8, 8, dx);
        for v in field.u_mut().as_mut_slice() {
            *v = 1.0;
        }
        let solid = MeshLevelSet::<f32>::empty(8, 8, 8, dx);
        let adv = ParticleAdvector::new(10.0, 1, 1, IntegrationScheme::Rk1).unwrap();
        let mut positions = vec![Vector3::new(0.4, 0.4, 0.4)];
        adv.advect(&mut positions, &field, &solid, 0.05).unwrap();
        assert!(positions[0].x > 0.4);
    }

    #[test]
    fn rejects_inverted_substep_bounds() {
        assert!(ParticleAdvector::<f32>::new(1.0, 4, 2, IntegrationScheme::Rk1).is_err());
    }
}
