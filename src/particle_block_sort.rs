//! Bucketing particles by the MAC block they fall in, so that a scatter
//! pass can touch each block from exactly one thread and never race on a
//! shared cell.

use crate::block_grid3d::{block_dims, Dims3d};
use crate::numeric_types::Real;
use arrayvec::ArrayVec;
use itertools::iproduct;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Flat block ids a single particle contributes to. A particle contributes
/// to at most the 8 blocks that meet at a shared corner (one candidate per
/// axis times two, capped at 2), so this never needs to spill to the heap.
type BlockMembership = ArrayVec<usize, 8>;

/// Particle indices grouped by the block of a `block_width`-sized
/// [`crate::block_grid3d::BlockGrid3D`] their position falls into. A
/// particle whose `support_radius` reaches across a block boundary is
/// duplicated into every block it overlaps (up to 8, at a block corner) so
/// that a per-block scatter kernel run from a single thread still sees every
/// particle that could deposit into its block.
pub struct ParticleBlockSort {
    dims: Dims3d,
    block_width: usize,
    /// `offsets[b]..offsets[b+1]` is the slice of `particle_indices` that
    /// belongs to block `b` (flat block index, width-first).
    offsets: Vec<u32>,
    particle_indices: Vec<u32>,
}

impl ParticleBlockSort {
    /// Buckets `positions` into blocks of `block_width` cells on a grid of
    /// `isize x jsize x ksize` cells with spacing `dx`. Particles outside
    /// the grid are dropped from every bucket (callers should have already
    /// clamped or removed them). `support_radius` is the kernel radius used
    /// to decide whether a particle is "simple" (one block) or "spanning"
    /// (duplicated across up to 8 overlapping blocks).
    pub fn build<R: Real>(positions: &[Vector3<R>], isize: usize, jsize: usize, ksize: usize, dx: R, block_width: usize, support_radius: R) -> Self {
        let dims = block_dims(isize, jsize, ksize, block_width);
        let num_blocks = dims.i * dims.j * dims.k;

        let memberships: Vec<BlockMembership> = positions
            .par_iter()
            .map(|p| blocks_for_particle(p, dx, block_width, support_radius, dims))
            .collect();

        let mut counts = vec![0u32; num_blocks + 1];
        for membership in &memberships {
            for &b in membership {
                counts[b + 1] += 1;
            }
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }

        let mut cursor = counts.clone();
        let mut particle_indices = vec![0u32; counts[num_blocks] as usize];
        for (pi, membership) in memberships.iter().enumerate() {
            for &b in membership {
                let slot = cursor[b];
                particle_indices[slot as usize] = pi as u32;
                cursor[b] += 1;
            }
        }

        Self {
            dims,
            block_width,
            offsets: counts,
            particle_indices,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.dims.i * self.dims.j * self.dims.k
    }

    pub fn block_width(&self) -> usize {
        self.block_width
    }

    pub fn dims(&self) -> Dims3d {
        self.dims
    }

    /// Particle indices assigned to flat block `block_id`. A spanning
    /// particle's index appears in every block it overlaps.
    pub fn block(&self, block_id: usize) -> &[u32] {
        let start = self.offsets[block_id] as usize;
        let end = self.offsets[block_id + 1] as usize;
        &self.particle_indices[start..end]
    }

    /// Runs `f` once per non-empty block, in parallel across blocks. Each
    /// invocation only reads the particle slice for its own block, so two
    /// blocks never need synchronization between them.
    pub fn par_for_each_block<F>(&self, f: F)
    where
        F: Fn(usize, &[u32]) + Sync,
    {
        (0..self.num_blocks()).into_par_iter().for_each(|b| {
            let slice = self.block(b);
            if !slice.is_empty() {
                f(b, slice);
            }
        });
    }

    /// Gathers `values` (one per original particle) into block-sorted order,
    /// i.e. `values[particle_indices[k]]` at slot `k` (spec §4.5 step 4,
    /// "scatter particle-position-plus-payload into a single sorted array").
    /// A spanning particle's value is duplicated at every slot its index
    /// occupies, same as its position would be.
    pub fn gather<T: Copy>(&self, values: &[T]) -> Vec<T> {
        self.particle_indices.iter().map(|&idx| values[idx as usize]).collect()
    }

    /// Inverts [`Self::gather`]: scatters a block-sorted array back into
    /// original particle order using the same stored origin indices (spec
    /// §8 "Sort round-trip": "`ParticleBlockSort` then unsort by stored
    /// origin index restores the original position sequence bit-exactly").
    /// For a particle that was duplicated across spanning blocks, the later
    /// slot in `particle_indices` wins; callers with only simple
    /// (non-spanning) particles get an exact one-to-one inverse.
    pub fn unsort<T: Copy>(&self, sorted: &[T], original_len: usize, fill: T) -> Vec<T> {
        let mut out = vec![fill; original_len];
        for (slot, &origin) in self.particle_indices.iter().enumerate() {
            out[origin as usize] = sorted[slot];
        }
        out
    }
}

/// Block-axis candidates a single coordinate contributes along one axis:
/// just its own block index, plus the lower and/or upper neighbor if the
/// particle's support reaches across that boundary.
fn axis_candidates<R: Real>(coord: R, dx: R, block_width: usize, support_radius: R, num_blocks_axis: usize) -> ArrayVec<usize, 2> {
    let cell = (coord / dx).floor();
    let cell_idx = cell.to_isize().unwrap_or(0);
    let block = (cell_idx.max(0) as usize / block_width).min(num_blocks_axis.saturating_sub(1));

    let block_width_r = R::from_usize(block_width).unwrap();
    let lower_boundary = R::from_usize(block).unwrap() * block_width_r * dx;
    let upper_boundary = lower_boundary + block_width_r * dx;

    let dist_to_lower = coord - lower_boundary;
    let dist_to_upper = upper_boundary - coord;
    let near_lower = block > 0 && dist_to_lower < support_radius;
    let near_upper = block + 1 < num_blocks_axis && dist_to_upper < support_radius;

    let mut out = ArrayVec::new();
    out.push(block);
    // A block is normally wider than the kernel support, so at most one
    // neighboring boundary is ever within range; if `support_radius` is
    // large enough that both trigger, keep only the nearer one so a single
    // particle never spans more than 2 blocks per axis (8 total).
    match (near_lower, near_upper) {
        (true, true) => {
            if dist_to_lower <= dist_to_upper {
                out.push(block - 1);
            } else {
                out.push(block + 1);
            }
        }
        (true, false) => out.push(block - 1),
        (false, true) => out.push(block + 1),
        (false, false) => {}
    }
    out
}

/// Every flat block id a particle at `p` contributes to, given its kernel
/// `support_radius`. Returns an empty list for particles outside the grid.
fn blocks_for_particle<R: Real>(p: &Vector3<R>, dx: R, block_width: usize, support_radius: R, dims: Dims3d) -> BlockMembership {
    let isize = dims.i * block_width;
    let jsize = dims.j * block_width;
    let ksize = dims.k * block_width;

    let (Some(i), Some(j), Some(k)) = ((p.x / dx).to_isize(), (p.y / dx).to_isize(), (p.z / dx).to_isize()) else {
        return BlockMembership::new();
    };
    if i < 0 || j < 0 || k < 0 || i as usize >= isize || j as usize >= jsize || k as usize >= ksize {
        return BlockMembership::new();
    }

    let bis = axis_candidates(p.x, dx, block_width, support_radius, dims.i);
    let bjs = axis_candidates(p.y, dx, block_width, support_radius, dims.j);
    let bks = axis_candidates(p.z, dx, block_width, support_radius, dims.k);

    iproduct!(bks.iter(), bjs.iter(), bis.iter()).map(|(&bk, &bj, &bi)| bi + dims.i * (bj + dims.j * bk)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_in_range_particle_is_assigned_at_least_once() {
        let dx = 1.0f32;
        let positions = vec![
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(3.5, 0.5, 0.5),
            Vector3::new(0.6, 0.6, 0.6),
            Vector3::new(100.0, 0.0, 0.0),
        ];
        // a tiny support radius keeps every particle "simple" (one block each)
        let sort = ParticleBlockSort::build(&positions, 8, 8, 8, dx, 4, 0.01);
        let mut total = 0;
        sort.par_for_each_block(|_b, slice| {
            assert!(!slice.is_empty());
        });
        for b in 0..sort.num_blocks() {
            total += sort.block(b).len();
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn particles_in_same_cell_land_in_same_block() {
        let dx = 1.0f32;
        let positions = vec![Vector3::new(0.1, 0.1, 0.1), Vector3::new(0.9, 0.9, 0.9)];
        let sort = ParticleBlockSort::build(&positions, 8, 8, 8, dx, 4, 0.01);
        let nonempty: Vec<usize> = (0..sort.num_blocks()).filter(|&b| !sort.block(b).is_empty()).collect();
        assert_eq!(nonempty.len(), 1);
        assert_eq!(sort.block(nonempty[0]).len(), 2);
    }

    #[test]
    fn particle_near_block_boundary_spans_into_neighbor() {
        // block_width = 4 cells, dx = 1 => block boundary at x = 4.0.
        // a particle at x = 4.1 with a support radius of 0.5 reaches back
        // across the boundary into the lower block.
        let dx = 1.0f32;
        let positions = vec![Vector3::new(4.1, 1.0, 1.0)];
        let sort = ParticleBlockSort::build(&positions, 8, 8, 8, dx, 4, 0.5);
        let nonempty: Vec<usize> = (0..sort.num_blocks()).filter(|&b| !sort.block(b).is_empty()).collect();
        assert_eq!(nonempty.len(), 2, "a spanning particle must appear in both blocks it overlaps");
        for &b in &nonempty {
            assert_eq!(sort.block(b), &[0]);
        }
    }

    #[test]
    fn unsort_restores_original_order_for_simple_particles() {
        let dx = 1.0f32;
        let positions = vec![
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(3.5, 0.5, 0.5),
            Vector3::new(5.5, 5.5, 5.5),
            Vector3::new(1.5, 6.5, 2.5),
            Vector3::new(2.2, 2.2, 2.2),
        ];
        // a tiny support radius keeps every particle "simple" (one block
        // each), so `particle_indices` is a permutation of 0..positions.len().
        let sort = ParticleBlockSort::build(&positions, 8, 8, 8, dx, 4, 0.01);
        let sorted = sort.gather(&positions);
        let restored = sort.unsort(&sorted, positions.len(), Vector3::zeros());
        assert_eq!(restored, positions);
    }

    #[test]
    fn particle_far_from_any_boundary_is_simple() {
        let dx = 1.0f32;
        let positions = vec![Vector3::new(2.0, 2.0, 2.0)];
        let sort = ParticleBlockSort::build(&positions, 8, 8, 8, dx, 4, 0.5);
        let nonempty: Vec<usize> = (0..sort.num_blocks()).filter(|&b| !sort.block(b).is_empty()).collect();
        assert_eq!(nonempty.len(), 1);
    }
}
