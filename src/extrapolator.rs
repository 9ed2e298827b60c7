//! Generic scalar-field extrapolation: extends values outward from a valid
//! region by repeated neighbor averaging.
//!
//! The MAC velocity field has its own copy of this sweep in [`crate::mac_field`]
//! (kept private there since it operates on a `Grid3D` already owned by
//! `MacField`); this module exposes the same technique for standalone scalar
//! fields such as curvature and diffuse-particle lifetimes.

use crate::grid3d::Grid3D;
use crate::numeric_types::Real;
use crate::vmath::GridIndex;

/// Extends `field` outward from cells marked valid in `valid`, `layers` times.
/// Each pass assigns every still-invalid cell the average of its
/// already-valid 6-neighbors, then marks it valid for the next pass. Cells
/// with no valid neighbor after `layers` passes keep their prior value.
pub fn extend_scalar<R: Real>(field: &mut Grid3D<R>, valid: &mut Grid3D<bool>, layers: usize) {
    let (isize, jsize, ksize) = field.dims();
    for _ in 0..layers {
        let mut next_valid = valid.clone();
        let mut updates: Vec<(isize, isize, isize, R)> = Vec::new();
        for k in 0..ksize as isize {
            for j in 0..jsize as isize {
                for i in 0..isize as isize {
                    if valid.get(i, j, k) {
                        continue;
                    }
                    let idx = GridIndex::new(i as i64, j as i64, k as i64);
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
                        updates.push((i, j, k, sum / R::from_usize(count).unwrap()));
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
    fn extends_from_single_valid_cell() {
        let mut field = Grid3D::<f32>::new(5, 5, 5);
        let mut valid = Grid3D::<bool>::new(5, 5, 5);
        field.set(2, 2, 2, 9.0).unwrap();
        valid.set(2, 2, 2, true).unwrap();
        extend_scalar(&mut field, &mut valid, 2);
        assert_eq!(field.get(1, 2, 2), 9.0);
        assert_eq!(field.get(0, 2, 2), 9.0);
        assert!(valid.get(0, 2, 2));
    }

    #[test]
    fn untouched_cells_without_valid_neighbors_keep_prior_value() {
        let mut field = Grid3D::<f32>::filled(5, 5, 5, -1.0);
        let mut valid = Grid3D::<bool>::new(5, 5, 5);
        valid.set(0, 0, 0, true).unwrap();
        field.set(0, 0, 0, 3.0).unwrap();
        extend_scalar(&mut field, &mut valid, 1);
        assert_eq!(field.get(4, 4, 4), -1.0);
    }
}
