//! Basic triangle mesh types, connected-island splitting, and the two
//! surface mesh container formats named in spec §6: ASCII PLY and a compact
//! little-endian binary encoding.

use crate::numeric_types::Real;
use nalgebra::Vector3;
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Triangles touching a single vertex. Most vertices in a well-formed mesh
/// have around six incident triangles, so inline storage for eight covers
/// the common case without a heap allocation per vertex.
type IncidentTriangles = SmallVec<[usize; 8]>;

/// A triangle indexing three vertices by position in a parent
/// [`TriangleMesh3d`]'s vertex array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Triangle {
    pub indices: [u32; 3],
}

/// An in-memory indexed triangle mesh.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh3d<R: Real> {
    pub vertices: Vec<Vector3<R>>,
    pub triangles: Vec<Triangle>,
}

impl<R: Real> TriangleMesh3d<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.triangles.clear();
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Splits the mesh into connected components by shared vertices (spec
    /// §4.3 step 1), returning one mesh per island. Adjacency is built from
    /// shared vertex indices via a simple BFS/union-find style flood fill.
    pub fn connected_islands(&self) -> Vec<TriangleMesh3d<R>> {
        let mut vertex_to_triangles: Vec<IncidentTriangles> = vec![SmallVec::new(); self.vertices.len()];
        for (ti, tri) in self.triangles.iter().enumerate() {
            for &vi in &tri.indices {
                vertex_to_triangles[vi as usize].push(ti);
            }
        }

        let mut visited = vec![false; self.triangles.len()];
        let mut islands = Vec::new();

        for start in 0..self.triangles.len() {
            if visited[start] {
                continue;
            }
            let mut queue = VecDeque::new();
            queue.push_back(start);
            visited[start] = true;
            let mut island_tris = Vec::new();

            while let Some(ti) = queue.pop_front() {
                island_tris.push(ti);
                for &vi in &self.triangles[ti].indices {
                    for &neighbor_tri in &vertex_to_triangles[vi as usize] {
                        if !visited[neighbor_tri] {
                            visited[neighbor_tri] = true;
                            queue.push_back(neighbor_tri);
                        }
                    }
                }
            }

            islands.push(self.extract_submesh(&island_tris));
        }

        islands
    }

    fn extract_submesh(&self, triangle_indices: &[usize]) -> TriangleMesh3d<R> {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut vertices = Vec::new();
        let mut triangles = Vec::with_capacity(triangle_indices.len());

        for &ti in triangle_indices {
            let tri = &self.triangles[ti];
            let mut new_indices = [0u32; 3];
            for (slot, &vi) in new_indices.iter_mut().zip(tri.indices.iter()) {
                if remap[vi as usize] == u32::MAX {
                    remap[vi as usize] = vertices.len() as u32;
                    vertices.push(self.vertices[vi as usize]);
                }
                *slot = remap[vi as usize];
            }
            triangles.push(Triangle { indices: new_indices });
        }

        TriangleMesh3d { vertices, triangles }
    }

    pub fn aabb(&self) -> crate::aabb::AxisAlignedBoundingBox3d<R> {
        crate::aabb::AxisAlignedBoundingBox3d::from_points(&self.vertices)
    }

    /// Ray-parity point-in-mesh test cast along `+z`, the same crossing-count
    /// construction [`crate::mesh_level_set::MeshLevelSet::build`] uses to
    /// sign its distance field, applied directly at a single point instead of
    /// rasterized onto a grid. Cheap enough to call per-particle per-substep,
    /// which is exactly what fluid/inflow/outflow source volumes need (spec
    /// §4.13) without building a full level set for a region that's only
    /// ever queried with "inside or not".
    pub fn contains_point(&self, p: Vector3<R>) -> bool {
        let (x, y, z) = (p.x.to_f64().unwrap(), p.y.to_f64().unwrap(), p.z.to_f64().unwrap());
        let mut crossings = 0u32;
        for tri in &self.triangles {
            let v = |idx: u32| {
                let vert = self.vertices[idx as usize];
                (vert.x.to_f64().unwrap(), vert.y.to_f64().unwrap(), vert.z.to_f64().unwrap())
            };
            let (ax, ay, az) = v(tri.indices[0]);
            let (bx, by, bz) = v(tri.indices[1]);
            let (cx, cy, cz) = v(tri.indices[2]);
            let sign = |px: f64, py: f64, qx: f64, qy: f64, rx: f64, ry: f64| (px - rx) * (qy - ry) - (qx - rx) * (py - ry);
            let d1 = sign(x, y, ax, ay, bx, by);
            let d2 = sign(x, y, bx, by, cx, cy);
            let d3 = sign(x, y, cx, cy, ax, ay);
            let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
            let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
            if has_neg && has_pos {
                continue;
            }
            let area = (bx - ax) * (cy - ay) - (cx - ax) * (by - ay);
            if area.abs() < 1e-12 {
                continue;
            }
            let u = ((by - cy) * (x - cx) + (cx - bx) * (y - cy)) / area;
            let v_ = ((cy - ay) * (x - cx) + (ax - cx) * (y - cy)) / area;
            let w = 1.0 - u - v_;
            let z_at_xy = u * az + v_ * bz + w * cz;
            if z_at_xy > z {
                crossings += 1;
            }
        }
        crossings % 2 == 1
    }

    /// Laplacian-smooths the mesh in place: each vertex moves toward the
    /// average of its triangle-adjacent neighbors by `value` (spec §4.12,
    /// post-reconstruction "smooth" step; `surface_smoothing_value`).
    pub fn smooth(&mut self, value: R, iterations: u32) {
        if self.vertices.is_empty() {
            return;
        }
        let mut vertex_triangles: Vec<IncidentTriangles> = vec![SmallVec::new(); self.vertices.len()];
        for (ti, tri) in self.triangles.iter().enumerate() {
            for &vi in &tri.indices {
                vertex_triangles[vi as usize].push(ti);
            }
        }

        for _ in 0..iterations {
            let mut new_vertices = Vec::with_capacity(self.vertices.len());
            for (i, &v) in self.vertices.iter().enumerate() {
                let mut avg = Vector3::<R>::zeros();
                let mut count = 0usize;
                for &ti in &vertex_triangles[i] {
                    for &vi in &self.triangles[ti].indices {
                        if vi as usize != i {
                            avg += self.vertices[vi as usize];
                            count += 1;
                        }
                    }
                }
                if count == 0 {
                    new_vertices.push(v);
                    continue;
                }
                avg /= R::from_usize(count).unwrap();
                new_vertices.push(v + (avg - v) * value);
            }
            self.vertices = new_vertices;
        }
    }

    /// Drops every connected-component island with fewer than `count`
    /// triangles (spec §3 `min_polyhedron_triangles`, grounded on the
    /// original engine's `removeMinimumTriangleCountPolyhedra`).
    pub fn remove_minimum_triangle_count_polyhedra(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let islands = self.connected_islands();
        let mut vertices = Vec::new();
        let mut triangles = Vec::new();
        for island in islands {
            if island.num_triangles() < count {
                continue;
            }
            let offset = vertices.len() as u32;
            vertices.extend(island.vertices);
            triangles.extend(island.triangles.into_iter().map(|t| Triangle {
                indices: [t.indices[0] + offset, t.indices[1] + offset, t.indices[2] + offset],
            }));
        }
        self.vertices = vertices;
        self.triangles = triangles;
    }

    /// Encodes into ASCII PLY (spec §6's other container format), the
    /// human-readable alternative to [`TriangleMesh3d::<f32>::encode_compact_binary`].
    pub fn to_ply_ascii(&self) -> String {
        let mut out = String::new();
        out.push_str("ply\n");
        out.push_str("format ascii 1.0\n");
        out.push_str(&format!("element vertex {}\n", self.vertices.len()));
        out.push_str("property float x\n");
        out.push_str("property float y\n");
        out.push_str("property float z\n");
        out.push_str(&format!("element face {}\n", self.triangles.len()));
        out.push_str("property list uchar int vertex_indices\n");
        out.push_str("end_header\n");
        for v in &self.vertices {
            let x = v.x.to_f64().unwrap_or(0.0);
            let y = v.y.to_f64().unwrap_or(0.0);
            let z = v.z.to_f64().unwrap_or(0.0);
            out.push_str(&format!("{} {} {}\n", x, y, z));
        }
        for t in &self.triangles {
            out.push_str(&format!("3 {} {} {}\n", t.indices[0], t.indices[1], t.indices[2]));
        }
        out
    }
}

/// On-disk layout of one vertex in the compact binary container. `Pod` lets
/// a whole `Vec<EncodedVertex>` be reinterpreted as a byte slice in one cast
/// rather than copied out field by field.
#[repr(C)]
#[derive(Clone, Copy, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
struct EncodedVertex {
    x: f32,
    y: f32,
    z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
struct EncodedTriangle {
    a: i32,
    b: i32,
    c: i32,
}

impl TriangleMesh3d<f32> {
    /// Encodes into the compact binary container from spec §6:
    /// `[u32 vertex_count][f32x3 * n][u32 triangle_count][i32x3 * m]`,
    /// native-endian throughout (every target this crate ships for is
    /// little-endian, so this matches the format's documented layout).
    pub fn encode_compact_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.vertices.len() * 12 + self.triangles.len() * 12);
        out.extend_from_slice(&(self.vertices.len() as u32).to_le_bytes());
        let encoded_vertices: Vec<EncodedVertex> = self.vertices.iter().map(|v| EncodedVertex { x: v.x, y: v.y, z: v.z }).collect();
        out.extend_from_slice(bytemuck::cast_slice(&encoded_vertices));

        out.extend_from_slice(&(self.triangles.len() as u32).to_le_bytes());
        let encoded_triangles: Vec<EncodedTriangle> = self
            .triangles
            .iter()
            .map(|t| EncodedTriangle {
                a: t.indices[0] as i32,
                b: t.indices[1] as i32,
                c: t.indices[2] as i32,
            })
            .collect();
        out.extend_from_slice(bytemuck::cast_slice(&encoded_triangles));
        out
    }

    /// Decodes a buffer produced by [`Self::encode_compact_binary`]. Returns
    /// `None` if the buffer is truncated or its declared counts overrun its
    /// length.
    pub fn decode_compact_binary(data: &[u8]) -> Option<Self> {
        let mut cursor = 0usize;
        let read_u32 = |cursor: &mut usize, data: &[u8]| -> Option<u32> {
            let bytes: [u8; 4] = data.get(*cursor..*cursor + 4)?.try_into().ok()?;
            *cursor += 4;
            Some(u32::from_le_bytes(bytes))
        };

        let vertex_count = read_u32(&mut cursor, data)? as usize;
        let vertex_bytes = vertex_count.checked_mul(std::mem::size_of::<EncodedVertex>())?;
        let raw_vertices: &[EncodedVertex] = bytemuck::try_cast_slice(data.get(cursor..cursor + vertex_bytes)?).ok()?;
        cursor += vertex_bytes;
        let vertices = raw_vertices.iter().map(|v| Vector3::new(v.x, v.y, v.z)).collect();

        let triangle_count = read_u32(&mut cursor, data)? as usize;
        let triangle_bytes = triangle_count.checked_mul(std::mem::size_of::<EncodedTriangle>())?;
        let raw_triangles: &[EncodedTriangle] = bytemuck::try_cast_slice(data.get(cursor..cursor + triangle_bytes)?).ok()?;
        let triangles = raw_triangles
            .iter()
            .map(|t| Triangle {
                indices: [t.a as u32, t.b as u32, t.c as u32],
            })
            .collect();

        Some(Self { vertices, triangles })
    }
}

/// A static or per-frame-animated solid mesh, owned by [`crate::domain_state::DomainState`]
/// and referenced elsewhere only by an opaque handle (spec §9, avoiding
/// cyclic references from `MeshLevelSet` back to its generating object).
#[derive(Clone, Debug)]
pub struct MeshObject<R: Real> {
    /// One vertex array per keyframe; a static obstacle has exactly one.
    pub frames: Vec<Vec<Vector3<R>>>,
    pub triangles: Vec<Triangle>,
    /// Rigid/animated velocity, used for boundary-friction blending and for
    /// inflow sources that add the object's own velocity to new particles.
    pub velocity: Vector3<R>,
    pub is_animated: bool,
}

impl<R: Real> MeshObject<R> {
    pub fn static_mesh(vertices: Vec<Vector3<R>>, triangles: Vec<Triangle>) -> Self {
        Self {
            frames: vec![vertices],
            triangles,
            velocity: Vector3::zeros(),
            is_animated: false,
        }
    }

    /// Vertex positions for `frame`, clamped to the last keyframe if the
    /// object has fewer frames than the simulation has advanced.
    pub fn vertices_at_frame(&self, frame: usize) -> &[Vector3<R>] {
        let idx = frame.min(self.frames.len().saturating_sub(1));
        &self.frames[idx]
    }

    pub fn as_mesh(&self, frame: usize) -> TriangleMesh3d<R> {
        TriangleMesh3d {
            vertices: self.vertices_at_frame(frame).to_vec(),
            triangles: self.triangles.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> TriangleMesh3d<f32> {
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let triangles = vec![
            Triangle { indices: [0, 1, 2] },
            Triangle { indices: [0, 2, 3] },
        ];
        TriangleMesh3d { vertices, triangles }
    }

    #[test]
    fn binary_round_trip_preserves_vertices_and_triangles() {
        let mesh = unit_cube();
        let encoded = mesh.encode_compact_binary();
        let decoded = TriangleMesh3d::decode_compact_binary(&encoded).unwrap();
        assert_eq!(decoded.vertices, mesh.vertices);
        assert_eq!(decoded.triangles, mesh.triangles);
    }

    #[test]
    fn truncated_buffer_fails_to_decode() {
        let mesh = unit_cube();
        let mut encoded = mesh.encode_compact_binary();
        encoded.truncate(encoded.len() - 4);
        assert!(TriangleMesh3d::decode_compact_binary(&encoded).is_none());
    }

    #[test]
    fn single_quad_is_one_island() {
        let mesh = unit_cube();
        let islands = mesh.connected_islands();
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].num_triangles(), 2);
    }

    #[test]
    fn smoothing_pulls_center_vertex_toward_neighbor_average() {
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(10.0, 10.0, 0.0),
        ];
        let triangles = vec![Triangle { indices: [0, 1, 2] }, Triangle { indices: [3, 1, 2] }];
        let mut mesh = TriangleMesh3d { vertices, triangles };
        let before = mesh.vertices[3];
        mesh.smooth(0.5, 1);
        assert!(mesh.vertices[3] != before);
    }

    #[test]
    fn small_islands_are_removed_by_triangle_count_threshold() {
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(10.0, 10.0, 10.0),
            Vector3::new(11.0, 10.0, 10.0),
            Vector3::new(10.0, 11.0, 10.0),
        ];
        let triangles = vec![
            Triangle { indices: [0, 1, 2] },
            Triangle { indices: [3, 4, 5] },
        ];
        let mut mesh = TriangleMesh3d { vertices, triangles };
        mesh.remove_minimum_triangle_count_polyhedra(2);
        assert_eq!(mesh.num_triangles(), 0);
    }

    #[test]
    fn contains_point_distinguishes_inside_and_outside_of_a_closed_box() {
        let mesh = unit_cube_solid();
        assert!(mesh.contains_point(Vector3::new(0.5, 0.5, 0.5)));
        assert!(!mesh.contains_point(Vector3::new(5.0, 5.0, 5.0)));
    }

    fn unit_cube_solid() -> TriangleMesh3d<f32> {
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
        ];
        let quad = |a: u32, b: u32, c: u32, d: u32| [Triangle { indices: [a, b, c] }, Triangle { indices: [a, c, d] }];
        let mut triangles = Vec::new();
        triangles.extend(quad(0, 1, 2, 3)); // bottom
        triangles.extend(quad(4, 7, 6, 5)); // top
        triangles.extend(quad(0, 4, 5, 1)); // -y
        triangles.extend(quad(3, 2, 6, 7)); // +y
        triangles.extend(quad(0, 3, 7, 4)); // -x
        triangles.extend(quad(1, 5, 6, 2)); // +x
        TriangleMesh3d { vertices, triangles }
    }

    #[test]
    fn disjoint_triangles_are_separate_islands() {
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(10.0, 10.0, 10.0),
            Vector3::new(11.0, 10.0, 10.0),
            Vector3::new(10.0, 11.0, 10.0),
        ];
        let triangles = vec![
            Triangle { indices: [0, 1, 2] },
            Triangle { indices: [3, 4, 5] },
        ];
        let mesh = TriangleMesh3d { vertices, triangles };
        assert_eq!(mesh.connected_islands().len(), 2);
    }
}
