//! `BlockGrid3D<T>`: a sparsely-active, block-indexed 3-D array (spec §4.1).
//!
//! Logical dimensions `(isize, jsize, ksize)` are carved into cubic blocks
//! of side `B`. Only blocks listed as active at construction time hold
//! backing storage; every other block shares one immutable background
//! value. This is the precondition for handing disjoint `&mut [T]` slices
//! to worker-pool tasks (spec §4.13, §5): two active blocks never alias.

use crate::vmath::GridIndex;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dims3d {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl Dims3d {
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        Self { i, j, k }
    }
}

/// Computes `(ceil(isize/B), ceil(jsize/B), ceil(ksize/B))`.
pub fn block_dims(isize: usize, jsize: usize, ksize: usize, block_width: usize) -> Dims3d {
    let ceil_div = |a: usize, b: usize| (a + b - 1) / b;
    Dims3d::new(
        ceil_div(isize, block_width),
        ceil_div(jsize, block_width),
        ceil_div(ksize, block_width),
    )
}

pub struct BlockGrid3dParameters {
    pub isize: usize,
    pub jsize: usize,
    pub ksize: usize,
    pub block_width: usize,
    pub active_blocks: Vec<GridIndex<i64>>,
}

/// A handle to one active block's backing storage, as handed out by
/// [`BlockGrid3D::active_blocks_mut`].
pub struct GridBlock<'a, T> {
    pub id: usize,
    pub index: GridIndex<i64>,
    pub data: &'a mut [T],
}

pub struct BlockGrid3D<T> {
    isize: usize,
    jsize: usize,
    ksize: usize,
    block_width: usize,
    block_dims: Dims3d,
    /// Dense side-block index grid: flat-indexed by block coordinate,
    /// value is `-1` for an inactive block or the storage block id otherwise.
    block_id_grid: Vec<i32>,
    block_indices: Vec<GridIndex<i64>>,
    data: Vec<T>,
    background: T,
}

impl<T: Clone> BlockGrid3D<T> {
    pub fn new(params: BlockGrid3dParameters, background: T) -> Self {
        let bdims = block_dims(params.isize, params.jsize, params.ksize, params.block_width);
        let num_blocks_total = bdims.i * bdims.j * bdims.k;
        let mut block_id_grid = vec![-1i32; num_blocks_total];

        let mut block_indices = Vec::with_capacity(params.active_blocks.len());
        for bidx in &params.active_blocks {
            if !Self::block_index_in_range(*bidx, bdims) {
                continue;
            }
            let flat = Self::block_flat_index(*bidx, bdims);
            if block_id_grid[flat] != -1 {
                // duplicate activation request, keep first id
                continue;
            }
            block_id_grid[flat] = block_indices.len() as i32;
            block_indices.push(*bidx);
        }

        let cube = params.block_width * params.block_width * params.block_width;
        let data = vec![background.clone(); block_indices.len() * cube];

        Self {
            isize: params.isize,
            jsize: params.jsize,
            ksize: params.ksize,
            block_width: params.block_width,
            block_dims: bdims,
            block_id_grid,
            block_indices,
            data,
            background,
        }
    }

    fn block_index_in_range(b: GridIndex<i64>, bdims: Dims3d) -> bool {
        b.i >= 0
            && b.j >= 0
            && b.k >= 0
            && (b.i as usize) < bdims.i
            && (b.j as usize) < bdims.j
            && (b.k as usize) < bdims.k
    }

    fn block_flat_index(b: GridIndex<i64>, bdims: Dims3d) -> usize {
        b.i as usize + bdims.i * (b.j as usize + bdims.j * b.k as usize)
    }

    fn cell_to_block_index(&self, i: isize, j: isize, k: isize) -> GridIndex<i64> {
        let bw = self.block_width as isize;
        GridIndex::new(
            i.div_euclid(bw) as i64,
            j.div_euclid(bw) as i64,
            k.div_euclid(bw) as i64,
        )
    }

    fn in_bounds(&self, i: isize, j: isize, k: isize) -> bool {
        i >= 0
            && j >= 0
            && k >= 0
            && (i as usize) < self.isize
            && (j as usize) < self.jsize
            && (k as usize) < self.ksize
    }

    fn in_block_offset(&self, i: isize, j: isize, k: isize) -> usize {
        let bw = self.block_width as isize;
        let bi = i.rem_euclid(bw) as usize;
        let bj = j.rem_euclid(bw) as usize;
        let bk = k.rem_euclid(bw) as usize;
        bi + self.block_width * (bj + self.block_width * bk)
    }

    pub fn background(&self) -> &T {
        &self.background
    }

    pub fn get(&self, i: isize, j: isize, k: isize) -> T {
        if !self.in_bounds(i, j, k) {
            return self.background.clone();
        }
        let bidx = self.cell_to_block_index(i, j, k);
        let flat = Self::block_flat_index(bidx, self.block_dims);
        let id = self.block_id_grid[flat];
        if id == -1 {
            return self.background.clone();
        }
        let cube = self.block_width.pow(3);
        let offset = id as usize * cube + self.in_block_offset(i, j, k);
        self.data[offset].clone()
    }

    pub fn set(&mut self, i: isize, j: isize, k: isize, value: T) {
        if !self.in_bounds(i, j, k) {
            return;
        }
        let bidx = self.cell_to_block_index(i, j, k);
        let flat = Self::block_flat_index(bidx, self.block_dims);
        let id = self.block_id_grid[flat];
        if id == -1 {
            return;
        }
        let cube = self.block_width.pow(3);
        let offset = id as usize * cube + self.in_block_offset(i, j, k);
        self.data[offset] = value;
    }

    pub fn is_block_active(&self, b: GridIndex<i64>) -> bool {
        if !Self::block_index_in_range(b, self.block_dims) {
            return false;
        }
        self.block_id_grid[Self::block_flat_index(b, self.block_dims)] != -1
    }

    pub fn num_active_blocks(&self) -> usize {
        self.block_indices.len()
    }

    pub fn block_width(&self) -> usize {
        self.block_width
    }

    /// Yields `(block_id, block_index, &mut [T; B^3])`-equivalent slices for
    /// every active block. Every returned slice is disjoint by construction
    /// (blocks are laid out contiguously, one `B^3` run per block), so a
    /// worker pool may process the returned iterator's items concurrently.
    pub fn active_blocks_mut(&mut self) -> Vec<GridBlock<'_, T>> {
        let cube = self.block_width.pow(3);
        let mut out = Vec::with_capacity(self.block_indices.len());
        for (id, chunk) in self.data.chunks_mut(cube).enumerate() {
            out.push(GridBlock {
                id,
                index: self.block_indices[id],
                data: chunk,
            });
        }
        out
    }

    pub fn active_block_indices(&self) -> &[GridIndex<i64>] {
        &self.block_indices
    }
}

impl<T: Clone + Send + Sync> BlockGrid3D<T> {
    /// Parallel variant of [`Self::active_blocks_mut`]: runs `f` over every
    /// active block's disjoint data slice using the global rayon pool.
    pub fn par_for_each_active_block<F>(&mut self, f: F)
    where
        F: Fn(usize, GridIndex<i64>, &mut [T]) + Sync,
    {
        let cube = self.block_width.pow(3);
        let indices = self.block_indices.clone();
        self.data
            .par_chunks_mut(cube)
            .enumerate()
            .for_each(|(id, chunk)| f(id, indices[id], chunk));
    }
}

/// Grows a boolean active-mask by one cell in every direction with
/// 26-connectivity (spec §4.1 "feathering"): any voxel adjacent (including
/// diagonally) to a `true` voxel in `input` becomes `true` in the output.
/// Used to make sure splat kernels that reach slightly past a particle's
/// home block still find backing storage in neighboring blocks.
pub fn feather_26(input: &crate::grid3d::Grid3D<bool>) -> crate::grid3d::Grid3D<bool> {
    let (isize, jsize, ksize) = input.dims();
    let mut output = crate::grid3d::Grid3D::<bool>::new(isize, jsize, ksize);
    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                if !input.get(i, j, k) {
                    continue;
                }
                output.set(i, j, k, true).ok();
                let idx = GridIndex::new(i as i64, j as i64, k as i64);
                for n in idx.neighbors26() {
                    if input.in_bounds(n.i as isize, n.j as isize, n.k as isize) {
                        output.set(n.i as isize, n.j as isize, n.k as isize, true).ok();
                    }
                }
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_dims_ceil_divides() {
        let d = block_dims(17, 8, 9, 8);
        assert_eq!(d, Dims3d::new(3, 1, 2));
    }

    #[test]
    fn inactive_block_returns_background() {
        let params = BlockGrid3dParameters {
            isize: 16,
            jsize: 16,
            ksize: 16,
            block_width: 8,
            active_blocks: vec![GridIndex::new(0, 0, 0)],
        };
        let grid = BlockGrid3D::<f32>::new(params, -1.0);
        assert_eq!(grid.get(0, 0, 0), -1.0);
        assert_eq!(grid.get(15, 15, 15), -1.0); // block (1,1,1) inactive
    }

    #[test]
    fn active_block_set_get_round_trips() {
        let params = BlockGrid3dParameters {
            isize: 16,
            jsize: 16,
            ksize: 16,
            block_width: 8,
            active_blocks: vec![GridIndex::new(0, 0, 0), GridIndex::new(1, 1, 1)],
        };
        let mut grid = BlockGrid3D::<f32>::new(params, 0.0);
        grid.set(3, 3, 3, 42.0);
        grid.set(12, 12, 12, 7.0);
        assert_eq!(grid.get(3, 3, 3), 42.0);
        assert_eq!(grid.get(12, 12, 12), 7.0);
        // Untouched active-block cell stays at background.
        assert_eq!(grid.get(0, 0, 0), 0.0);
    }

    #[test]
    fn active_block_slices_are_disjoint() {
        let params = BlockGrid3dParameters {
            isize: 16,
            jsize: 16,
            ksize: 8,
            block_width: 8,
            active_blocks: vec![GridIndex::new(0, 0, 0), GridIndex::new(1, 0, 0)],
        };
        let mut grid = BlockGrid3D::<f32>::new(params, 0.0);
        let blocks = grid.active_blocks_mut();
        let ptrs: Vec<*const f32> = blocks.iter().map(|b| b.data.as_ptr()).collect();
        assert_ne!(ptrs[0], ptrs[1]);
    }
}
