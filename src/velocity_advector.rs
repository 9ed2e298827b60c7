//! Scatters particle velocities onto a [`MacField`] (particle-to-grid) and
//! gathers grid velocities back onto particles (grid-to-particle), the two
//! halves of every FLIP/PIC substep.

use crate::mac_field::{FaceDir, MacField, ValidMask};
use crate::numeric_types::Real;
use crate::vmath::sanitize_vec3;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Accumulates `(weighted_velocity_sum, weight_sum)` per face, the
/// intermediate state of a scatter before the final divide.
struct ScatterAccumulator<R: Real> {
    sum: crate::grid3d::Grid3D<R>,
    weight: crate::grid3d::Grid3D<R>,
}

impl<R: Real> ScatterAccumulator<R> {
    fn new(isize: usize, jsize: usize, ksize: usize) -> Self {
        Self {
            sum: crate::grid3d::Grid3D::new(isize, jsize, ksize),
            weight: crate::grid3d::Grid3D::new(isize, jsize, ksize),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (d, s) in self.sum.as_mut_slice().iter_mut().zip(other.sum.as_slice()) {
            *d = *d + *s;
        }
        for (d, s) in self.weight.as_mut_slice().iter_mut().zip(other.weight.as_slice()) {
            *d = *d + *s;
        }
        self
    }
}

fn scatter_component<R: Real>(
    particles: &[(Vector3<R>, Vector3<R>)],
    component_of: impl Fn(Vector3<R>) -> R + Sync,
    face_isize: usize,
    face_jsize: usize,
    face_ksize: usize,
    face_index_to_position: impl Fn(isize, isize, isize) -> Vector3<R> + Sync,
    dx: R,
) -> (crate::grid3d::Grid3D<R>, crate::grid3d::Grid3D<bool>) {
    let acc = particles
        .par_iter()
        .fold(
            || ScatterAccumulator::new(face_isize, face_jsize, face_ksize),
            |mut acc, (p, v)| {
                splat_scalar(&mut acc, *p, component_of(*v), face_isize, face_jsize, face_ksize, &face_index_to_position, dx);
                acc
            },
        )
        .reduce(|| ScatterAccumulator::new(face_isize, face_jsize, face_ksize), ScatterAccumulator::merge);

    let mut out = crate::grid3d::Grid3D::<R>::new(face_isize, face_jsize, face_ksize);
    let mut valid = crate::grid3d::Grid3D::<bool>::new(face_isize, face_jsize, face_ksize);
    for k in 0..face_ksize as isize {
        for j in 0..face_jsize as isize {
            for i in 0..face_isize as isize {
                let w = acc.weight.get(i, j, k);
                if w > R::zero() {
                    out.set(i, j, k, acc.sum.get(i, j, k) / w).ok();
                    valid.set(i, j, k, true).ok();
                }
            }
        }
    }
    (out, valid)
}

/// Particle-to-grid support radius used by the scatter kernel (spec §4.6:
/// "`r` is the particle-to-grid radius (≈ `dx`)").
pub fn scatter_radius<R: Real>(dx: R) -> R {
    dx
}

fn splat_scalar<R: Real>(
    acc: &mut ScatterAccumulator<R>,
    p: Vector3<R>,
    value: R,
    face_isize: usize,
    face_jsize: usize,
    face_ksize: usize,
    face_index_to_position: &impl Fn(isize, isize, isize) -> Vector3<R>,
    dx: R,
) {
    let radius = scatter_radius(dx);
    let reach = (radius / dx).to_isize().unwrap_or(1) + 1;
    let (ix0, _) = crate::vmath::position_to_cell_index_and_frac(p.x, R::zero(), dx);
    let (jy0, _) = crate::vmath::position_to_cell_index_and_frac(p.y, R::zero(), dx);
    let (kz0, _) = crate::vmath::position_to_cell_index_and_frac(p.z, R::zero(), dx);

    for dk in -reach..=reach {
        for dj in -reach..=reach {
            for di in -reach..=reach {
                let (i, j, k) = (ix0 + di, jy0 + dj, kz0 + dk);
                if i < 0 || j < 0 || k < 0 || i as usize >= face_isize || j as usize >= face_jsize || k as usize >= face_ksize {
                    continue;
                }
                let face_pos = face_index_to_position(i, j, k);
                let d2 = (p - face_pos).norm_squared();
                let w = crate::kernel::scatter_kernel(d2, radius);
                if w <= R::zero() {
                    continue;
                }
                acc.sum.add(i, j, k, w * value).ok();
                acc.weight.add(i, j, k, w).ok();
            }
        }
    }
}

/// Scatters `particles` (position, velocity) onto a fresh [`MacField`],
/// component by component, each independent of the other two (spec
/// component #3 "per-component-independent scatter").
pub fn scatter_to_grid<R: Real>(particles: &[(Vector3<R>, Vector3<R>)], isize: usize, jsize: usize, ksize: usize, dx: R) -> (MacField<R>, ValidMask) {
    let mut field = MacField::<R>::new(isize, jsize, ksize, dx);
    let mut valid = ValidMask::new(isize, jsize, ksize);

    let (u_isize, u_jsize, u_ksize) = (isize + 1, jsize, ksize);
    let (v_isize, v_jsize, v_ksize) = (isize, jsize + 1, ksize);
    let (w_isize, w_jsize, w_ksize) = (isize, jsize, ksize + 1);

    let (u_sum, u_valid) = scatter_component(
        particles,
        |v| v.x,
        u_isize,
        u_jsize,
        u_ksize,
        |i, j, k| field.face_index_to_position(i, j, k, FaceDir::U),
        dx,
    );
    let (v_sum, v_valid) = scatter_component(
        particles,
        |v| v.y,
        v_isize,
        v_jsize,
        v_ksize,
        |i, j, k| field.face_index_to_position(i, j, k, FaceDir::V),
        dx,
    );
    let (w_sum, w_valid) = scatter_component(
        particles,
        |v| v.z,
        w_isize,
        w_jsize,
        w_ksize,
        |i, j, k| field.face_index_to_position(i, j, k, FaceDir::W),
        dx,
    );

    *field.u_mut() = u_sum;
    *field.v_mut() = v_sum;
    *field.w_mut() = w_sum;
    valid.valid_u = u_valid;
    valid.valid_v = v_valid;
    valid.valid_w = w_valid;

    (field, valid)
}

/// Gathers the blended FLIP/PIC velocity for each particle: `pic = grid
/// velocity at p`, `flip = old velocity + (grid - saved_grid) at p`, result
/// `= ratio * flip + (1 - ratio) * pic`.
pub fn gather_from_grid<R: Real>(
    particles: &[(Vector3<R>, Vector3<R>)],
    grid: &MacField<R>,
    delta: &MacField<R>,
    pic_flip_ratio: R,
) -> Vec<Vector3<R>> {
    particles
        .par_iter()
        .map(|(p, old_v)| {
            let pic = sanitize_vec3(grid.sample_linear(*p));
            let flip = sanitize_vec3(*old_v + delta.sample_linear(*p));
            pic * (R::one_() - pic_flip_ratio) + flip * pic_flip_ratio
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_velocity_scatters_and_gathers_close_to_itself() {
        let dx = 0.1f32;
        let mut particles = Vec::new();
        for k in 0..6 {
            for j in 0..6 {
                for i in 0..6 {
                    let p = Vector3::new((i as f32 + 0.5) * dx, (j as f32 + 0.5) * dx, (k as f32 + 0.5) * dx);
                    particles.push((p, Vector3::new(1.0, -2.0, 0.5)));
                }
            }
        }
        let (grid, mut valid) = scatter_to_grid(&particles, 8, 8, 8, dx);
        let mut grid = grid;
        grid.extrapolate(&mut valid, 2);
        let sample = grid.sample_linear(Vector3::new(0.25, 0.25, 0.25));
        assert!((sample.x - 1.0).abs() < 0.3);
        assert!((sample.y + 2.0).abs() < 0.3);
    }

    #[test]
    fn pic_flip_ratio_one_recovers_flip_delta() {
        let dx = 0.1f32;
        let particles = vec![(Vector3::new(0.25, 0.25, 0.25), Vector3::new(0.0, 0.0, 0.0))];
        let (grid, _valid) = scatter_to_grid(&particles, 8, 8, 8, dx);
        let delta = grid.sub(&MacField::new(8, 8, 8, dx));
        let out = gather_from_grid(&particles, &grid, &delta, 1.0);
        assert_eq!(out.len(), 1);
    }
}
