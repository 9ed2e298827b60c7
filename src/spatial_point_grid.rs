//! `SpatialPointGrid`: a uniform-cell bucket grid over particle positions,
//! used for radius queries and per-cell occupancy counts. The scheduler's
//! per-cell density cap (spec §3: a `MarkerParticle` is "destroyed when
//! entering an outflow or exceeding per-cell density caps") is built on
//! `excess_indices`; `query_nearby`/`count_within_radius` back any other
//! "how many neighbors does this particle have" query over the same index.

use crate::numeric_types::Real;
use dashmap::DashMap;
use itertools::iproduct;
use nalgebra::Vector3;
use rayon::prelude::*;

type CellMap = DashMap<(i64, i64, i64), Vec<u32>, fxhash::FxBuildHasher>;

/// Buckets point indices into cells of size `cell_size`, keyed by integer
/// cell coordinate rather than a dense array, since particle extents can be
/// sparse relative to the containing domain. Backed by `dashmap` (hashed
/// with `fxhash`, as the teacher's own neighborhood maps are) so that
/// concurrent threads can populate buckets for disjoint particle ranges
/// without a single global lock.
pub struct SpatialPointGrid<R: Real> {
    cell_size: R,
    buckets: CellMap,
}

impl<R: Real> SpatialPointGrid<R> {
    pub fn build(points: &[Vector3<R>], cell_size: R) -> Self {
        let buckets: CellMap = DashMap::with_hasher(fxhash::FxBuildHasher::default());
        points.par_iter().enumerate().for_each(|(idx, p)| {
            let cell = Self::cell_of(*p, cell_size);
            buckets.entry(cell).or_default().push(idx as u32);
        });
        Self { cell_size, buckets }
    }

    fn cell_of(p: Vector3<R>, cell_size: R) -> (i64, i64, i64) {
        (
            (p.x / cell_size).floor().to_i64().unwrap_or(0),
            (p.y / cell_size).floor().to_i64().unwrap_or(0),
            (p.z / cell_size).floor().to_i64().unwrap_or(0),
        )
    }

    /// Indices of every point whose cell is within the `3x3x3` neighborhood
    /// of `query`'s cell. Since buckets are sized to `cell_size`, this is a
    /// superset of points within `cell_size` of `query`; callers that need
    /// an exact radius must filter by distance themselves.
    pub fn query_nearby(&self, query: Vector3<R>) -> Vec<u32> {
        let (ci, cj, ck) = Self::cell_of(query, self.cell_size);
        let mut out = Vec::new();
        for (di, dj, dk) in iproduct!(-1..=1, -1..=1, -1..=1) {
            if let Some(bucket) = self.buckets.get(&(ci + di, cj + dj, ck + dk)) {
                out.extend_from_slice(bucket.value());
            }
        }
        out
    }

    /// Counts neighbors (excluding `self_index` if present) within `radius`
    /// of `points[self_index]`.
    pub fn count_within_radius(&self, points: &[Vector3<R>], self_index: usize, radius: R) -> usize {
        let center = points[self_index];
        let radius2 = radius * radius;
        self.query_nearby(center)
            .into_iter()
            .filter(|&idx| idx as usize != self_index)
            .filter(|&idx| (points[idx as usize] - center).norm_squared() <= radius2)
            .count()
    }

    /// Point indices to drop so that no bucket holds more than `max_per_cell`
    /// points, keeping the lowest-indexed points in each over-full bucket
    /// (spec §3's per-cell density cap). Bucket iteration order is
    /// unspecified, but which indices end up "excess" within one bucket is
    /// deterministic since it's decided by sorting that bucket's own indices.
    pub fn excess_indices(&self, max_per_cell: usize) -> Vec<u32> {
        let mut excess = Vec::new();
        for entry in self.buckets.iter() {
            let mut indices = entry.value().clone();
            if indices.len() > max_per_cell {
                indices.sort_unstable();
                excess.extend_from_slice(&indices[max_per_cell..]);
            }
        }
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_points_in_same_and_adjacent_cells() {
        let points = vec![
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(0.2, 0.2, 0.2),
            Vector3::new(5.0, 5.0, 5.0),
        ];
        let grid = SpatialPointGrid::build(&points, 1.0);
        let count = grid.count_within_radius(&points, 0, 0.5);
        assert_eq!(count, 1);
    }

    #[test]
    fn far_points_are_excluded() {
        let points = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(50.0, 50.0, 50.0)];
        let grid = SpatialPointGrid::build(&points, 1.0);
        assert_eq!(grid.count_within_radius(&points, 0, 2.0), 0);
    }

    #[test]
    fn excess_indices_keeps_lowest_indexed_points_per_cell() {
        let points = vec![
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(0.2, 0.2, 0.2),
            Vector3::new(0.3, 0.3, 0.3),
            Vector3::new(5.0, 5.0, 5.0),
        ];
        let grid = SpatialPointGrid::build(&points, 1.0);
        let excess = grid.excess_indices(2);
        assert_eq!(excess, vec![2]);
    }

    #[test]
    fn excess_indices_empty_when_under_cap() {
        let points = vec![Vector3::new(0.1, 0.1, 0.1), Vector3::new(0.2, 0.2, 0.2)];
        let grid = SpatialPointGrid::build(&points, 1.0);
        assert!(grid.excess_indices(8).is_empty());
    }
}
