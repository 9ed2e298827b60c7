//! `MacField`: the staggered MAC velocity field and its valid-component
//! bookkeeping (spec §3, §4.2).

use crate::grid3d::Grid3D;
use crate::numeric_types::Real;
use crate::vmath::{lerp, position_to_cell_index_and_frac, trilinear_weights};
use nalgebra::Vector3;

/// Which staggered face grid a face index belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceDir {
    U,
    V,
    W,
}

/// Three dense face-velocity grids on a staggered MAC lattice, plus the
/// cell count and cell size needed to map between world space and face
/// indices.
#[derive(Clone)]
pub struct MacField<R: Real> {
    isize: usize,
    jsize: usize,
    ksize: usize,
    dx: R,
    u: Grid3D<R>,
    v: Grid3D<R>,
    w: Grid3D<R>,
    /// Value `sample_linear` returns in place of any trilinear corner that
    /// falls outside a component's own lattice (spec §3: "a `gravity/
    /// out-of-range` default vector is returned when sampling outside the
    /// valid indexing region"). Defaults to zero; the scheduler points this
    /// at the configured gravity vector for the field particles are
    /// advected through, since a sample taken just past the domain edge is
    /// physically in free fall.
    out_of_range_value: Vector3<R>,
}

/// Per-face validity bitmask, matching the dimensions of each component of
/// a [`MacField`]. Reset at the start of every scatter, consumed by
/// extrapolation and by the FLIP gather.
#[derive(Clone)]
pub struct ValidMask {
    pub valid_u: Grid3D<bool>,
    pub valid_v: Grid3D<bool>,
    pub valid_w: Grid3D<bool>,
}

impl ValidMask {
    pub fn new(isize: usize, jsize: usize, ksize: usize) -> Self {
        Self {
            valid_u: Grid3D::new(isize + 1, jsize, ksize),
            valid_v: Grid3D::new(isize, jsize + 1, ksize),
            valid_w: Grid3D::new(isize, jsize, ksize + 1),
        }
    }

    pub fn reset(&mut self) {
        self.valid_u.fill(false);
        self.valid_v.fill(false);
        self.valid_w.fill(false);
    }
}

impl<R: Real> MacField<R> {
    pub fn new(isize: usize, jsize: usize, ksize: usize, dx: R) -> Self {
        Self {
            isize,
            jsize,
            ksize,
            dx,
            u: Grid3D::new(isize + 1, jsize, ksize),
            v: Grid3D::new(isize, jsize + 1, ksize),
            w: Grid3D::new(isize, jsize, ksize + 1),
            out_of_range_value: Vector3::zeros(),
        }
    }

    /// Sets the vector substituted for any out-of-lattice trilinear corner
    /// in `sample_linear` (spec §3's `gravity/out-of-range` default).
    pub fn set_out_of_range_value(&mut self, value: Vector3<R>) {
        self.out_of_range_value = value;
    }

    pub fn out_of_range_value(&self) -> Vector3<R> {
        self.out_of_range_value
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.isize, self.jsize, self.ksize)
    }

    pub fn dx(&self) -> R {
        self.dx
    }

    pub fn u(&self) -> &Grid3D<R> {
        &self.u
    }
    pub fn v(&self) -> &Grid3D<R> {
        &self.v
    }
    pub fn w(&self) -> &Grid3D<R> {
        &self.w
    }
    pub fn u_mut(&mut self) -> &mut Grid3D<R> {
        &mut self.u
    }
    pub fn v_mut(&mut self) -> &mut Grid3D<R> {
        &mut self.v
    }
    pub fn w_mut(&mut self) -> &mut Grid3D<R> {
        &mut self.w
    }

    pub fn component(&self, dir: FaceDir) -> &Grid3D<R> {
        match dir {
            FaceDir::U => &self.u,
            FaceDir::V => &self.v,
            FaceDir::W => &self.w,
        }
    }

    pub fn component_mut(&mut self, dir: FaceDir) -> &mut Grid3D<R> {
        match dir {
            FaceDir::U => &mut self.u,
            FaceDir::V => &mut self.v,
            FaceDir::W => &mut self.w,
        }
    }

    /// World position of face `(i, j, k)` of component `dir` (spec §4.2
    /// `face_index_to_position`). U-faces sit on whole-`i` / half-`j,k`
    /// cell boundaries, symmetrically for V and W.
    pub fn face_index_to_position(&self, i: isize, j: isize, k: isize, dir: FaceDir) -> Vector3<R> {
        let half = R::from_f64(0.5).unwrap();
        let dx = self.dx;
        match dir {
            FaceDir::U => Vector3::new(R::from_isize(i).unwrap() * dx, (R::from_isize(j).unwrap() + half) * dx, (R::from_isize(k).unwrap() + half) * dx),
            FaceDir::V => Vector3::new((R::from_isize(i).unwrap() + half) * dx, R::from_isize(j).unwrap() * dx, (R::from_isize(k).unwrap() + half) * dx),
            FaceDir::W => Vector3::new((R::from_isize(i).unwrap() + half) * dx, (R::from_isize(j).unwrap() + half) * dx, R::from_isize(k).unwrap() * dx),
        }
    }

    /// Trilinearly samples a single staggered component grid at world point
    /// `p`, using the component's own shifted lattice origin. Any corner
    /// that falls outside the lattice contributes `default_value` (weighted
    /// the same as an in-bounds corner would be) instead of being dropped,
    /// so a sample taken just past the domain edge returns a well-defined
    /// blend with the configured out-of-range default rather than silently
    /// losing weight (spec §3).
    fn sample_component(&self, grid: &Grid3D<R>, p: Vector3<R>, origin_offset: Vector3<R>, default_value: R) -> R {
        let origin = -origin_offset;
        let (ix, fx) = position_to_cell_index_and_frac(p.x, origin.x, self.dx);
        let (iy, fy) = position_to_cell_index_and_frac(p.y, origin.y, self.dx);
        let (iz, fz) = position_to_cell_index_and_frac(p.z, origin.z, self.dx);

        let weights = trilinear_weights(fx, fy, fz);
        let corners = [
            (ix, iy, iz),
            (ix + 1, iy, iz),
            (ix, iy + 1, iz),
            (ix + 1, iy + 1, iz),
            (ix, iy, iz + 1),
            (ix + 1, iy, iz + 1),
            (ix, iy + 1, iz + 1),
            (ix + 1, iy + 1, iz + 1),
        ];

        let mut acc = R::zero();
        for (w, (ci, cj, ck)) in weights.iter().zip(corners.iter()) {
            let value = if grid.in_bounds(*ci, *cj, *ck) { grid.get(*ci, *cj, *ck) } else { default_value };
            acc = acc + *w * value;
        }
        acc
    }

    /// Trilinearly interpolated velocity vector at world point `p`.
    pub fn sample_linear(&self, p: Vector3<R>) -> Vector3<R> {
        let half = R::from_f64(0.5).unwrap() * self.dx;
        let default = self.out_of_range_value;
        let ux = self.sample_component(&self.u, p, Vector3::new(R::zero(), half, half), default.x);
        let vy = self.sample_component(&self.v, p, Vector3::new(half, R::zero(), half), default.y);
        let wz = self.sample_component(&self.w, p, Vector3::new(half, half, R::zero()), default.z);
        Vector3::new(ux, vy, wz)
    }

    pub fn set(&mut self, other: &MacField<R>) {
        self.u = other.u.clone();
        self.v = other.v.clone();
        self.w = other.w.clone();
    }

    /// Subtracts `other` from `self`, component-wise. Used to compute the
    /// FLIP delta `MAC_new - MAC_saved`.
    pub fn sub(&self, other: &MacField<R>) -> MacField<R> {
        let mut out = self.clone();
        for (dst, src) in [
            (out.u.as_mut_slice(), other.u.as_slice()),
            (out.v.as_mut_slice(), other.v.as_slice()),
            (out.w.as_mut_slice(), other.w.as_slice()),
        ] {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = *d - *s;
            }
        }
        out
    }

    /// Extends face velocities `layers` cells beyond the currently valid
    /// region using a breadth-first average-of-valid-neighbors sweep (spec
    /// §4.2, §4.11). Faces still invalid after the sweep keep their prior
    /// (typically zero) value.
    pub fn extrapolate(&mut self, valid: &mut ValidMask, layers: usize) {
        extrapolate_component(&mut self.u, &mut valid.valid_u, layers);
        extrapolate_component(&mut self.v, &mut valid.valid_v, layers);
        extrapolate_component(&mut self.w, &mut valid.valid_w, layers);
    }
}

fn extrapolate_component<R>(field: &mut Grid3D<R>, valid: &mut Grid3D<bool>, layers: usize)
where
    R: crate::numeric_types::Real,
{
    let (isize, jsize, ksize) = field.dims();
    for _layer in 0..layers {
        let mut next_valid = valid.clone();
        let mut updates: Vec<(isize, isize, isize, R)> = Vec::new();
        for k in 0..ksize as isize {
            for j in 0..jsize as isize {
                for i in 0..isize as isize {
                    if valid.get(i, j, k) {
                        continue;
                    }
                    let idx = crate::vmath::GridIndex::new(i as i64, j as i64, k as i64);
                    let mut sum = R::zero();
                    let mut count = 0usize;
                    for n in idx.neighbors6() {
                        let (ni, nj, nk) = (n.i as isize, n.j as isize, n.k as isize);
                        if field.in_bounds(ni, nj, nk) && valid.get(ni, nj, nk) {
                            sum = sum + field.get(ni, nj, nk);
                            count += 1;
                        }
                    }
                    if count > 0 {
                        let avg = sum / R::from_usize(count).unwrap();
                        updates.push((i, j, k, avg));
                    }
                }
            }
        }
        for (i, j, k, v) in updates {
            field.set(i, j, k, v).ok();
            next_valid.set(i, j, k, true).ok();
        }
        *valid = next_valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_restore_subtract_yields_zero() {
        let mut field = MacField::<f32>::new(4, 4, 4, 0.1);
        field.u_mut().set(1, 1, 1, 3.0).unwrap();
        field.v_mut().set(1, 1, 1, -2.0).unwrap();
        let saved = field.clone();
        let delta = field.sub(&saved);
        assert!(delta.u().as_slice().iter().all(|v| *v == 0.0));
        assert!(delta.v().as_slice().iter().all(|v| *v == 0.0));
        assert!(delta.w().as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn extrapolate_fills_one_layer_from_valid_neighbor() {
        let mut field = MacField::<f32>::new(4, 4, 4, 0.1);
        let mut valid = ValidMask::new(4, 4, 4);
        field.u_mut().set(2, 2, 2, 5.0).unwrap();
        valid.valid_u.set(2, 2, 2, true).unwrap();
        field.extrapolate(&mut valid, 1);
        assert_eq!(field.u().get(1, 2, 2), 5.0);
        assert!(valid.valid_u.get(1, 2, 2));
    }

    #[test]
    fn out_of_range_sample_blends_toward_configured_default() {
        let mut field = MacField::<f32>::new(4, 4, 4, 1.0);
        field.set_out_of_range_value(Vector3::new(0.0, -9.8, 0.0));
        // Just past the last valid u-face on the +x side: half of the
        // trilinear corners are out of bounds and must contribute the
        // default rather than being silently dropped.
        let p = Vector3::new(3.99, 1.5, 1.5);
        let sampled = field.sample_linear(p);
        assert!(sampled.y < 0.0, "out-of-range corners should pull the sample toward the default vector, got {sampled:?}");
    }

    #[test]
    fn in_bounds_sample_ignores_out_of_range_default() {
        let mut field = MacField::<f32>::new(4, 4, 4, 1.0);
        field.set_out_of_range_value(Vector3::new(0.0, -9.8, 0.0));
        field.u_mut().set(2, 2, 2, 5.0).unwrap();
        let p = field.face_index_to_position(2, 2, 2, FaceDir::U);
        assert_eq!(field.sample_linear(p).x, 5.0);
    }

    #[test]
    fn face_index_to_position_matches_staggering() {
        let field = MacField::<f32>::new(4, 4, 4, 1.0);
        let p = field.face_index_to_position(1, 1, 1, FaceDir::U);
        assert_eq!(p, Vector3::new(1.0, 1.5, 1.5));
        let p = field.face_index_to_position(1, 1, 1, FaceDir::V);
        assert_eq!(p, Vector3::new(1.5, 1.0, 1.5));
    }
}
