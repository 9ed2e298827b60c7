//! Axis-aligned bounding boxes, used for the domain bounds, obstacle islands
//! and particle-containment checks.

use crate::numeric_types::Real;
use nalgebra::Vector3;
use rayon::prelude::*;

/// An axis-aligned bounding box in 3-D world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisAlignedBoundingBox3d<R: Real> {
    min: Vector3<R>,
    max: Vector3<R>,
}

impl<R: Real> AxisAlignedBoundingBox3d<R> {
    pub fn new(min: Vector3<R>, max: Vector3<R>) -> Self {
        Self { min, max }
    }

    /// An AABB that contains nothing; grows correctly when unioned with the
    /// first real point or box.
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(R::max_value()),
            max: Vector3::repeat(-R::max_value()),
        }
    }

    pub fn min(&self) -> Vector3<R> {
        self.min
    }

    pub fn max(&self) -> Vector3<R> {
        self.max
    }

    pub fn extents(&self) -> Vector3<R> {
        self.max - self.min
    }

    pub fn center(&self) -> Vector3<R> {
        self.min + self.extents() * R::from_f64(0.5).unwrap()
    }

    /// Smallest enclosing AABB of a point set, computed serially.
    pub fn from_points(points: &[Vector3<R>]) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.extend_with_point(p);
        }
        aabb
    }

    /// Same as [`Self::from_points`] but using `rayon` to fold over the
    /// point set in parallel, mirroring the teacher's
    /// `enable_multi_threading` option on the equivalent enclosing-AABB
    /// computation.
    pub fn from_points_par(points: &[Vector3<R>]) -> Self
    where
        R: Send + Sync,
    {
        points
            .par_iter()
            .fold(Self::empty, |mut acc, p| {
                acc.extend_with_point(p);
                acc
            })
            .reduce(Self::empty, |a, b| a.union(&b))
    }

    pub fn extend_with_point(&mut self, p: &Vector3<R>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: Vector3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Vector3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// Grows the box uniformly in every direction by `margin`.
    pub fn grow_uniformly(&mut self, margin: R) {
        let m = Vector3::repeat(margin);
        self.min -= m;
        self.max += m;
    }

    /// Shrinks the box uniformly in every direction by `margin`. Used to
    /// express the marker-particle boundary epsilon from spec §3.
    pub fn shrunk(&self, margin: R) -> Self {
        Self {
            min: self.min + Vector3::repeat(margin),
            max: self.max - Vector3::repeat(margin),
        }
    }

    pub fn contains(&self, p: &Vector3<R>) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Clamps a point to lie within the box, component-wise.
    pub fn clamp_point(&self, p: Vector3<R>) -> Vector3<R> {
        Vector3::new(
            crate::vmath::clamp(p.x, self.min.x, self.max.x),
            crate::vmath::clamp(p.y, self.min.y, self.max.y),
            crate::vmath::clamp(p.z, self.min.z, self.max.z),
        )
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_contains() {
        let pts = vec![
            Vector3::new(0.0f32, 0.0, 0.0),
            Vector3::new(1.0, 2.0, -1.0),
            Vector3::new(-1.0, 0.5, 0.5),
        ];
        let aabb = AxisAlignedBoundingBox3d::from_points(&pts);
        assert_eq!(aabb.min(), Vector3::new(-1.0, 0.0, -1.0));
        assert_eq!(aabb.max(), Vector3::new(1.0, 2.0, 0.5));
        assert!(aabb.contains(&Vector3::new(0.0, 1.0, 0.0)));
        assert!(!aabb.contains(&Vector3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn shrunk_moves_bounds_inward() {
        let aabb = AxisAlignedBoundingBox3d::new(Vector3::new(0.0f32, 0.0, 0.0), Vector3::new(10.0, 10.0, 10.0));
        let s = aabb.shrunk(0.1);
        assert!((s.min().x - 0.1).abs() < 1e-6);
        assert!((s.max().x - 9.9).abs() < 1e-6);
    }

    #[test]
    fn from_points_par_matches_serial() {
        let pts: Vec<Vector3<f64>> = (0..1000)
            .map(|i| Vector3::new(i as f64, -(i as f64), (i % 7) as f64))
            .collect();
        let serial = AxisAlignedBoundingBox3d::from_points(&pts);
        let par = AxisAlignedBoundingBox3d::from_points_par(&pts);
        assert_eq!(serial, par);
    }
}
