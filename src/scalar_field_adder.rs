//! `ScalarFieldAdder`: particle→cell-centered scalar splat (spec §4.7), plus
//! smooth radial field sources used for body forces and localized viscosity
//! boosts.
//!
//! The particle splat ([`splat_particle_scalar`]) mirrors
//! [`crate::velocity_advector`]'s scatter structure exactly, as spec §4.7
//! requires ("Same structure as §4.6 ... behind the same interface, an
//! optional accelerator backend may dispatch the per-block compute").

use crate::grid3d::Grid3D;
use crate::kernel::{scatter_kernel, smooth_falloff};
use crate::numeric_types::Real;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Scatters a per-particle scalar attribute onto a cell-centered grid using
/// the same compactly-supported cubic kernel as [`crate::velocity_advector`],
/// normalizing by accumulated weight. Faces (here, cells) with no
/// contributing particle are left at `R::zero()` with `valid = false`, the
/// same convention as the velocity scatter's `ValidMask`.
///
/// `fn splat(points, values, radius, dx, offset, out_grid, out_valid)` from
/// spec §4.7: `offset` is folded into the caller-supplied
/// `cell_center_of(i, j, k)` so this same routine serves cell-centered,
/// node-centered, or face-centered scalar grids.
pub fn splat_particle_scalar<R: Real>(
    points: &[Vector3<R>],
    values: &[R],
    radius: R,
    dx: R,
    isize: usize,
    jsize: usize,
    ksize: usize,
    cell_center_of: impl Fn(isize, isize, isize) -> Vector3<R> + Sync,
) -> (Grid3D<R>, Grid3D<bool>) {
    debug_assert_eq!(points.len(), values.len());

    let (sum, weight) = points
        .par_iter()
        .zip(values.par_iter())
        .fold(
            || (Grid3D::<R>::new(isize, jsize, ksize), Grid3D::<R>::new(isize, jsize, ksize)),
            |(mut sum, mut weight), (p, value)| {
                splat_one(&mut sum, &mut weight, *p, *value, radius, dx, isize, jsize, ksize, &cell_center_of);
                (sum, weight)
            },
        )
        .reduce(
            || (Grid3D::<R>::new(isize, jsize, ksize), Grid3D::<R>::new(isize, jsize, ksize)),
            |mut a, b| {
                for (d, s) in a.0.as_mut_slice().iter_mut().zip(b.0.as_slice()) {
                    *d = *d + *s;
                }
                for (d, s) in a.1.as_mut_slice().iter_mut().zip(b.1.as_slice()) {
                    *d = *d + *s;
                }
                a
            },
        );

    let mut out = Grid3D::<R>::new(isize, jsize, ksize);
    let mut out_valid = Grid3D::<bool>::new(isize, jsize, ksize);
    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                let w = weight.get(i, j, k);
                if w > R::zero() {
                    out.set(i, j, k, sum.get(i, j, k) / w).ok();
                    out_valid.set(i, j, k, true).ok();
                }
            }
        }
    }
    (out, out_valid)
}

#[allow(clippy::too_many_arguments)]
fn splat_one<R: Real>(
    sum: &mut Grid3D<R>,
    weight: &mut Grid3D<R>,
    p: Vector3<R>,
    value: R,
    radius: R,
    dx: R,
    isize: usize,
    jsize: usize,
    ksize: usize,
    cell_center_of: &(impl Fn(isize, isize, isize) -> Vector3<R> + Sync),
) {
    let reach = (radius / dx).to_isize().unwrap_or(1) + 1;
    let (ci, _) = crate::vmath::position_to_cell_index_and_frac(p.x, R::zero(), dx);
    let (cj, _) = crate::vmath::position_to_cell_index_and_frac(p.y, R::zero(), dx);
    let (ck, _) = crate::vmath::position_to_cell_index_and_frac(p.z, R::zero(), dx);

    for dk in -reach..=reach {
        for dj in -reach..=reach {
            for di in -reach..=reach {
                let (i, j, k) = (ci + di, cj + dj, ck + dk);
                if i < 0 || j < 0 || k < 0 || i as usize >= isize || j as usize >= jsize || k as usize >= ksize {
                    continue;
                }
                let center = cell_center_of(i, j, k);
                let d2 = (p - center).norm_squared();
                let w = scatter_kernel(d2, radius);
                if w <= R::zero() {
                    continue;
                }
                sum.add(i, j, k, w * value).ok();
                weight.add(i, j, k, w).ok();
            }
        }
    }
}

/// A single radial source: adds `strength * smooth_falloff(distance, radius)`
/// to every grid node within `radius` of `center`.
#[derive(Clone, Copy, Debug)]
pub struct ScalarFieldSource<R: Real> {
    pub center: Vector3<R>,
    pub radius: R,
    pub strength: R,
}

/// Adds every source's contribution into a cell-centered scalar field.
/// Nodes outside every source's radius are left untouched, so this can be
/// called repeatedly to accumulate several independent source sets into the
/// same field.
pub fn add_scalar_sources<R: Real>(field: &mut Grid3D<R>, dx: R, sources: &[ScalarFieldSource<R>]) {
    if sources.is_empty() {
        return;
    }
    let (isize, jsize, ksize) = field.dims();
    let half = R::from_f64(0.5).unwrap();

    for source in sources {
        let reach = (source.radius / dx).to_isize().unwrap_or(0) + 1;
        let (ci, _) = crate::vmath::position_to_cell_index_and_frac(source.center.x, R::zero(), dx);
        let (cj, _) = crate::vmath::position_to_cell_index_and_frac(source.center.y, R::zero(), dx);
        let (ck, _) = crate::vmath::position_to_cell_index_and_frac(source.center.z, R::zero(), dx);

        for dk in -reach..=reach {
            for dj in -reach..=reach {
                for di in -reach..=reach {
                    let (i, j, k) = (ci + di, cj + dj, ck + dk);
                    if i < 0 || j < 0 || k < 0 || i as usize >= isize || j as usize >= jsize || k as usize >= ksize {
                        continue;
                    }
                    let cell_center = Vector3::new(
                        (R::from_isize(i).unwrap() + half) * dx,
                        (R::from_isize(j).unwrap() + half) * dx,
                        (R::from_isize(k).unwrap() + half) * dx,
                    );
                    let r = (cell_center - source.center).norm();
                    let w = smooth_falloff(r, source.radius);
                    if w > R::zero() {
                        field.add(i, j, k, source.strength * w).ok();
                    }
                }
            }
        }
    }
}

/// Same as [`add_scalar_sources`] but contributes a vector (e.g. a
/// directional force) rather than a scalar magnitude.
pub fn add_vector_sources<R: Real>(field: &mut Grid3D<Vector3<R>>, dx: R, center: Vector3<R>, radius: R, value: Vector3<R>) {
    let (isize, jsize, ksize) = field.dims();
    let half = R::from_f64(0.5).unwrap();
    let reach = (radius / dx).to_isize().unwrap_or(0) + 1;
    let (ci, _) = crate::vmath::position_to_cell_index_and_frac(center.x, R::zero(), dx);
    let (cj, _) = crate::vmath::position_to_cell_index_and_frac(center.y, R::zero(), dx);
    let (ck, _) = crate::vmath::position_to_cell_index_and_frac(center.z, R::zero(), dx);

    for dk in -reach..=reach {
        for dj in -reach..=reach {
            for di in -reach..=reach {
                let (i, j, k) = (ci + di, cj + dj, ck + dk);
                if i < 0 || j < 0 || k < 0 || i as usize >= isize || j as usize >= jsize || k as usize >= ksize {
                    continue;
                }
                let cell_center = Vector3::new(
                    (R::from_isize(i).unwrap() + half) * dx,
                    (R::from_isize(j).unwrap() + half) * dx,
                    (R::from_isize(k).unwrap() + half) * dx,
                );
                let r = (cell_center - center).norm();
                let w = smooth_falloff(r, radius);
                if w > R::zero() {
                    let current = field.get(i, j, k);
                    field.set(i, j, k, current + value * w).ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_contributes_only_within_radius() {
        let mut field = Grid3D::<f32>::new(8, 8, 8);
        let dx = 0.1;
        let sources = vec![ScalarFieldSource {
            center: Vector3::new(0.4, 0.4, 0.4),
            radius: 0.15,
            strength: 2.0,
        }];
        add_scalar_sources(&mut field, dx, &sources);
        assert!(field.get(4, 4, 4) > 0.0);
        assert_eq!(field.get(7, 7, 7), 0.0);
    }

    #[test]
    fn two_overlapping_sources_accumulate() {
        let mut field = Grid3D::<f32>::new(8, 8, 8);
        let dx = 0.1;
        let sources = vec![
            ScalarFieldSource {
                center: Vector3::new(0.4, 0.4, 0.4),
                radius: 0.2,
                strength: 1.0,
            },
            ScalarFieldSource {
                center: Vector3::new(0.4, 0.4, 0.4),
                radius: 0.2,
                strength: 1.0,
            },
        ];
        add_scalar_sources(&mut field, dx, &sources);
        assert!((field.get(4, 4, 4) - 2.0).abs() < 1e-5);
    }
}

#[cfg(test)]
mod splat_tests {
    use super::*;

    #[test]
    fn particle_scalar_splats_to_nearby_cells_and_leaves_far_cells_invalid() {
        let dx = 0.1f32;
        let radius = dx;
        let cell_center_of = |i: isize, j: isize, k: isize| {
            Vector3::new((i as f32 + 0.5) * dx, (j as f32 + 0.5) * dx, (k as f32 + 0.5) * dx)
        };
        let points = vec![Vector3::new(0.45, 0.45, 0.45)];
        let values = vec![2.0f32];
        let (field, valid) = splat_particle_scalar(&points, &values, radius, dx, 8, 8, 8, cell_center_of);
        assert!(valid.get(4, 4, 4));
        assert!(field.get(4, 4, 4) > 0.0);
        assert!(!valid.get(7, 7, 7));
        assert_eq!(field.get(7, 7, 7), 0.0);
    }
}
