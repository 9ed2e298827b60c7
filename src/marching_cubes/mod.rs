//! Minimal marching cubes polygonizer over a node-centered scalar field,
//! feeding [`crate::domain_state::DomainState`]'s surface reconstruction step
//! (spec §4.12: "after all substeps ... trigger surface reconstruction").
//!
//! The triangulation table itself is out of the engine's scope to redesign
//! (it's a fixed 256-case lookup, copied over unchanged in
//! [`marching_cubes_lut`]); this module only supplies the grid walk, edge
//! interpolation, and vertex welding around that table.

pub mod marching_cubes_lut;

use crate::grid3d::Grid3D;
use crate::mesh::{Triangle, TriangleMesh3d};
use crate::numeric_types::Real;
use crate::particle_level_set::ParticleLevelSet;
use fxhash::FxHashMap;
use nalgebra::Vector3;

/// Cube corner offsets in the standard Lorensen ordering, matching the
/// winding [`marching_cubes_lut::marching_cubes_triangulation_iter`] expects.
const CORNER_OFFSETS: [(isize, isize, isize); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (1, 1, 0),
    (0, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (1, 1, 1),
    (0, 1, 1),
];

/// Endpoints (as corner indices) of each of the 12 cube edges, same ordering.
const EDGE_CORNERS: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Samples a cell-centered liquid level set onto the node-centered lattice
/// marching cubes expects, by trilinear interpolation at each node position
/// (spec §4.3-style sampling, reused here rather than re-derived).
pub fn sample_particle_level_set_to_nodes<R: Real>(level_set: &ParticleLevelSet<R>) -> Grid3D<R> {
    let (isize, jsize, ksize) = {
        let phi = level_set.phi();
        phi.dims()
    };
    let dx = level_set.dx();
    let mut nodes = Grid3D::<R>::new(isize + 1, jsize + 1, ksize + 1);
    for k in 0..=ksize as isize {
        for j in 0..=jsize as isize {
            for i in 0..=isize as isize {
                let p = Vector3::new(
                    R::from_isize(i).unwrap() * dx,
                    R::from_isize(j).unwrap() * dx,
                    R::from_isize(k).unwrap() * dx,
                );
                nodes.set(i, j, k, level_set.trilinear_interpolate(p)).ok();
            }
        }
    }
    nodes
}

/// Polygonizes a node-centered scalar field at `iso_value` into a
/// [`TriangleMesh3d`]: corners with `phi < iso_value` count as inside, edge
/// crossings are linearly interpolated, and coincident edge crossings
/// between adjacent cubes are welded into a single shared vertex.
pub fn polygonize<R: Real>(field: &Grid3D<R>, dx: R, iso_value: R) -> TriangleMesh3d<R> {
    let (nx, ny, nz) = field.dims();
    if nx < 2 || ny < 2 || nz < 2 {
        return TriangleMesh3d::new();
    }

    let mut mesh = TriangleMesh3d::new();
    let mut edge_vertex: FxHashMap<(isize, isize, isize, usize), u32> = FxHashMap::default();

    for k in 0..nz as isize - 1 {
        for j in 0..ny as isize - 1 {
            for i in 0..nx as isize - 1 {
                let mut values = [R::zero(); 8];
                let mut inside = [false; 8];
                for (c, (oi, oj, ok)) in CORNER_OFFSETS.iter().enumerate() {
                    let v = field.get(i + oi, j + oj, k + ok);
                    values[c] = v;
                    inside[c] = v < iso_value;
                }
                if inside.iter().all(|b| *b) || inside.iter().all(|b| !*b) {
                    continue;
                }

                for [e0, e1, e2] in marching_cubes_lut::marching_cubes_triangulation_iter(&inside) {
                    let v0 = edge_vertex_index(&mut mesh, &mut edge_vertex, i, j, k, e0 as usize, &values, dx, iso_value);
                    let v1 = edge_vertex_index(&mut mesh, &mut edge_vertex, i, j, k, e1 as usize, &values, dx, iso_value);
                    let v2 = edge_vertex_index(&mut mesh, &mut edge_vertex, i, j, k, e2 as usize, &values, dx, iso_value);
                    mesh.triangles.push(Triangle { indices: [v0, v1, v2] });
                }
            }
        }
    }

    mesh
}

/// Resolves (creating if necessary) the welded vertex index for cube
/// `(i, j, k)`'s edge `edge`. Edges are canonicalized to the lowest-index
/// cube that owns them so adjacent cubes sharing an edge produce the same
/// map key and therefore the same vertex.
#[allow(clippy::too_many_arguments)]
fn edge_vertex_index<R: Real>(
    mesh: &mut TriangleMesh3d<R>,
    edge_vertex: &mut FxHashMap<(isize, isize, isize, usize), u32>,
    i: isize,
    j: isize,
    k: isize,
    edge: usize,
    values: &[R; 8],
    dx: R,
    iso_value: R,
) -> u32 {
    let (a, b) = EDGE_CORNERS[edge];
    let (ai, aj, ak) = CORNER_OFFSETS[a];
    let (bi, bj, bk) = CORNER_OFFSETS[b];
    let key = canonical_edge_key(i, j, k, ai, aj, ak, bi, bj, bk);

    if let Some(idx) = edge_vertex.get(&key) {
        return *idx;
    }

    let va = values[a];
    let vb = values[b];
    let t = if (vb - va).abs() > R::from_f64(1e-12).unwrap() {
        (iso_value - va) / (vb - va)
    } else {
        R::from_f64(0.5).unwrap()
    };
    let t = t.max(R::zero()).min(R::one_());

    let pa = Vector3::new(
        R::from_isize(i + ai).unwrap() * dx,
        R::from_isize(j + aj).unwrap() * dx,
        R::from_isize(k + ak).unwrap() * dx,
    );
    let pb = Vector3::new(
        R::from_isize(i + bi).unwrap() * dx,
        R::from_isize(j + bj).unwrap() * dx,
        R::from_isize(k + bk).unwrap() * dx,
    );
    let position = pa + (pb - pa) * t;

    let index = mesh.vertices.len() as u32;
    mesh.vertices.push(position);
    edge_vertex.insert(key, index);
    index
}

#[allow(clippy::too_many_arguments)]
fn canonical_edge_key(
    i: isize,
    j: isize,
    k: isize,
    ai: isize,
    aj: isize,
    ak: isize,
    bi: isize,
    bj: isize,
    bk: isize,
) -> (isize, isize, isize, usize) {
    let node_a = (i + ai, j + aj, k + ak);
    let node_b = (i + bi, j + bj, k + bk);
    let (lo, hi) = if node_a <= node_b { (node_a, node_b) } else { (node_b, node_a) };
    let axis = if hi.0 != lo.0 {
        0
    } else if hi.1 != lo.1 {
        1
    } else {
        2
    };
    (lo.0, lo.1, lo.2, axis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_levelset_polygonizes_to_a_closed_mesh() {
        let n = 10usize;
        let dx = 1.0f32;
        let center = Vector3::new(5.0, 5.0, 5.0);
        let radius = 3.0f32;
        let mut field = Grid3D::<f32>::new(n, n, n);
        for k in 0..n as isize {
            for j in 0..n as isize {
                for i in 0..n as isize {
                    let p = Vector3::new(i as f32, j as f32, k as f32);
                    field.set(i, j, k, (p - center).norm() - radius).ok();
                }
            }
        }
        let mesh = polygonize(&field, dx, 0.0);
        assert!(mesh.num_triangles() > 0);
        assert!(mesh.num_vertices() > 0);
        for triangle in &mesh.triangles {
            for idx in triangle.indices {
                assert!((idx as usize) < mesh.vertices.len());
            }
        }
    }

    #[test]
    fn uniformly_inside_field_produces_no_triangles() {
        let field = Grid3D::<f32>::filled(4, 4, 4, -1.0);
        let mesh = polygonize(&field, 1.0, 0.0);
        assert_eq!(mesh.num_triangles(), 0);
    }
}
