//! `DomainState`: owns every grid, particle, obstacle and source for one
//! simulation (spec §3 "Ownership", §4.14 "external contract"). This is the
//! crate's only public entry point; everything else is a collaborator it
//! drives through `update`.
//!
//! Mirrors the teacher crate's top-level `SurfaceReconstruction<I, R>`: a
//! single owning struct that borrows immutable inputs and hands out owned
//! outputs, rather than a network of back-references between the pieces
//! that feed it.

use crate::accelerator::{Accelerator, CpuAccelerator};
use crate::config::{ScalarOrField, SimulationParameters};
use crate::error::{SimError, SimResult};
use crate::mac_field::{MacField, ValidMask};
use crate::mesh::{MeshObject, Triangle, TriangleMesh3d};
use crate::mesh_level_set::MeshLevelSet;
use crate::numeric_types::Real;
use crate::particle_level_set::ParticleLevelSet;
use nalgebra::Vector3;
use std::thread::JoinHandle;

/// Opaque handle to an obstacle added via [`DomainState::add_mesh_obstacle`]
/// (spec §9: "replace cyclic or back references ... with an integer handle").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObstacleHandle(pub usize);

/// Opaque handle to a source added via [`DomainState::add_mesh_fluid_source`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceHandle(pub usize);

/// Whether a fluid source mesh adds or removes marker particles inside its
/// volume each substep (spec §4.12 step 14).
#[derive(Clone, Debug)]
pub enum SourceKind<R: Real> {
    Inflow { velocity: Vector3<R> },
    Outflow,
}

/// A fluid source: a mesh volume plus the inflow/outflow rule applied to it
/// every substep.
#[derive(Clone, Debug)]
pub struct FluidSource<R: Real> {
    pub mesh: TriangleMesh3d<R>,
    pub kind: SourceKind<R>,
    pub active: bool,
}

/// A body force added via [`DomainState::add_body_force`], on top of the
/// constant `gravity` configured in [`SimulationParameters`] (spec §4.12
/// step 7: "constant and variable body forces").
#[derive(Clone, Copy, Debug)]
pub enum BodyForce<R: Real> {
    Constant(Vector3<R>),
    Radial { center: Vector3<R>, radius: R, value: Vector3<R> },
}

/// Per-frame timing and output-size record (spec §6: "a structured
/// frame-stats record with substep count, per-phase timings, and per-output
/// byte counts").
#[derive(Clone, Debug, Default)]
pub struct FrameStats {
    pub substep_count: usize,
    pub phase_timings: Vec<(&'static str, f64)>,
    pub output_byte_counts: Vec<(&'static str, usize)>,
}

/// Owns every piece of per-simulation state (spec §3 `DomainState`,
/// §4.14 external contract). Fields are `pub(crate)` so [`crate::scheduler`]
/// can drive a substep directly rather than through a narrower accessor
/// surface; external callers only see the methods below.
pub struct DomainState<R: Real> {
    pub(crate) isize: usize,
    pub(crate) jsize: usize,
    pub(crate) ksize: usize,
    pub(crate) dx: R,

    pub(crate) params: SimulationParameters<R>,
    initialized: bool,

    pub(crate) particles: Vec<(Vector3<R>, Vector3<R>)>,
    pub(crate) obstacles: Vec<MeshObject<R>>,
    pub(crate) sources: Vec<FluidSource<R>>,
    pub(crate) body_forces: Vec<BodyForce<R>>,

    pub(crate) mac: MacField<R>,
    pub(crate) mac_saved: MacField<R>,
    pub(crate) valid: ValidMask,
    pub(crate) solid_sdf: MeshLevelSet<R>,
    pub(crate) liquid_sdf: ParticleLevelSet<R>,
    pub(crate) accelerator: Box<dyn Accelerator<R>>,

    pub(crate) frame: u64,

    surface_mesh: TriangleMesh3d<R>,
    preview_mesh: TriangleMesh3d<R>,
    obstacle_snapshot: TriangleMesh3d<R>,
    frame_stats: FrameStats,
    async_mesh_job: Option<JoinHandle<(TriangleMesh3d<R>, TriangleMesh3d<R>)>>,

    /// Diffuse (foam/bubble/spray) particle payload, round-tripped through
    /// `load_diffuse_particle_data` but never populated by this engine: the
    /// secondary-particle behavior model is out of scope (spec §1). The
    /// field exists so the interface named in spec §6 is present even
    /// though nothing here writes to it.
    diffuse_particle_blob: Vec<u8>,
}

impl<R: Real> DomainState<R> {
    /// Zero-initializes a domain of the given grid dimensions and cell size
    /// (spec §4.14: "`DomainState::new` zero-initializes everything").
    /// `initialize()` must still be called before the first `update`.
    pub fn new(isize: usize, jsize: usize, ksize: usize, dx: R) -> Self {
        Self {
            isize,
            jsize,
            ksize,
            dx,
            params: SimulationParameters::new(isize, jsize, ksize, dx),
            initialized: false,
            particles: Vec::new(),
            obstacles: Vec::new(),
            sources: Vec::new(),
            body_forces: Vec::new(),
            mac: MacField::new(isize, jsize, ksize, dx),
            mac_saved: MacField::new(isize, jsize, ksize, dx),
            valid: ValidMask::new(isize, jsize, ksize),
            solid_sdf: MeshLevelSet::empty(isize, jsize, ksize, dx),
            liquid_sdf: ParticleLevelSet::new(isize, jsize, ksize, dx),
            accelerator: Box::new(CpuAccelerator),
            frame: 0,
            surface_mesh: TriangleMesh3d::new(),
            preview_mesh: TriangleMesh3d::new(),
            obstacle_snapshot: TriangleMesh3d::new(),
            frame_stats: FrameStats::default(),
            async_mesh_job: None,
            diffuse_particle_blob: Vec::new(),
        }
    }

    pub fn params(&self) -> &SimulationParameters<R> {
        &self.params
    }

    /// Full read/write access to the configuration record, for the tunables
    /// that don't have their own named setter below.
    pub fn params_mut(&mut self) -> &mut SimulationParameters<R> {
        &mut self.params
    }

    /// Installs a non-default particle-scatter backend (spec §9:
    /// "accelerator backend as compile-time/runtime choice"). Defaults to
    /// [`CpuAccelerator`].
    pub fn set_accelerator(&mut self, accelerator: Box<dyn Accelerator<R>>) {
        self.accelerator = accelerator;
    }

    /// Validates the configuration and finalizes internal grids; must run
    /// before the first `update` (spec §4.14).
    pub fn initialize(&mut self) -> SimResult<()> {
        self.params.validate()?;
        self.mac = MacField::new(self.isize, self.jsize, self.ksize, self.dx);
        self.mac_saved = MacField::new(self.isize, self.jsize, self.ksize, self.dx);
        self.valid = ValidMask::new(self.isize, self.jsize, self.ksize);
        self.liquid_sdf = ParticleLevelSet::new(self.isize, self.jsize, self.ksize, self.dx);
        self.solid_sdf = MeshLevelSet::empty(self.isize, self.jsize, self.ksize, self.dx);
        self.initialized = true;
        Ok(())
    }

    pub fn add_mesh_obstacle(&mut self, obstacle: MeshObject<R>) -> ObstacleHandle {
        self.obstacles.push(obstacle);
        ObstacleHandle(self.obstacles.len() - 1)
    }

    pub fn add_mesh_fluid_source(&mut self, mesh: TriangleMesh3d<R>, kind: SourceKind<R>) -> SourceHandle {
        self.sources.push(FluidSource { mesh, kind, active: true });
        SourceHandle(self.sources.len() - 1)
    }

    /// Enables or disables a previously added source without removing it
    /// (e.g. a host turning an inflow on and off across frames).
    pub fn set_source_active(&mut self, handle: SourceHandle, active: bool) {
        if let Some(source) = self.sources.get_mut(handle.0) {
            source.active = active;
        }
    }

    /// Seeds marker particles at 8 jittered sub-positions per cell whose
    /// center lies inside `mesh` (spec §3: "Created by sources or the
    /// initial fluid-mesh seeding").
    pub fn add_mesh_fluid(&mut self, mesh: &TriangleMesh3d<R>, velocity: Vector3<R>) {
        let dx = self.dx;
        let (i0, j0, k0, i1, j1, k1) = cell_range(&mesh.aabb(), dx, self.isize, self.jsize, self.ksize);
        let jitter = self.params.jitter_factor;
        let frame = self.frame;
        let mut salt = 0u64;
        for k in k0..=k1 {
            for j in j0..=j1 {
                for i in i0..=i1 {
                    if i < 0 || j < 0 || k < 0 || i as usize >= self.isize || j as usize >= self.jsize || k as usize >= self.ksize {
                        continue;
                    }
                    if !mesh.contains_point(cell_center(i, j, k, dx)) {
                        continue;
                    }
                    seed_cell(i, j, k, dx, velocity, jitter, hash_salt(frame, salt), &mut self.particles);
                    salt += 1;
                }
            }
        }
    }

    /// Seeds marker particles directly in the named cells (spec §4.14
    /// `add_fluid_cells(indices, velocity)`).
    pub fn add_fluid_cells(&mut self, indices: &[(usize, usize, usize)], velocity: Vector3<R>) {
        let dx = self.dx;
        let jitter = self.params.jitter_factor;
        let frame = self.frame;
        for (n, &(i, j, k)) in indices.iter().enumerate() {
            seed_cell(i as isize, j as isize, k as isize, dx, velocity, jitter, hash_salt(frame, n as u64), &mut self.particles);
        }
    }

    /// Removes every marker particle currently resident in the named cells.
    pub fn remove_fluid_cells(&mut self, indices: &[(usize, usize, usize)]) {
        let dx = self.dx;
        let set: std::collections::HashSet<(isize, isize, isize)> =
            indices.iter().map(|&(i, j, k)| (i as isize, j as isize, k as isize)).collect();
        self.particles.retain(|(p, _)| {
            let (ci, _) = crate::vmath::position_to_cell_index_and_frac(p.x, R::zero(), dx);
            let (cj, _) = crate::vmath::position_to_cell_index_and_frac(p.y, R::zero(), dx);
            let (ck, _) = crate::vmath::position_to_cell_index_and_frac(p.z, R::zero(), dx);
            !set.contains(&(ci, cj, ck))
        });
    }

    pub fn add_body_force(&mut self, force: BodyForce<R>) {
        self.body_forces.push(force);
    }

    pub fn set_viscosity(&mut self, viscosity: ScalarOrField<R>) {
        self.params.viscosity = viscosity;
    }

    /// Advances the simulation by exactly `frame_dt` seconds (spec §4.14,
    /// §4.12). Commits atomically: on any propagated error nothing written
    /// during the failed frame is kept observable. [`crate::scheduler::step_frame`]
    /// snapshots every grid/particle field a substep can touch before running
    /// any substep of the frame and restores that snapshot if any substep
    /// errors, so a failure partway through substep N never leaves substeps
    /// `1..N-1`'s mutations visible either.
    pub fn update(&mut self, frame_dt: f64) -> SimResult<()> {
        if !self.initialized {
            return Err(SimError::Unknown(anyhow::anyhow!("DomainState::update called before initialize()")));
        }
        let dt = R::from_f64(frame_dt).ok_or_else(|| SimError::Unknown(anyhow::anyhow!("frame_dt {frame_dt} is not representable")))?;

        let stats = crate::scheduler::step_frame(self, dt)?;
        self.frame_stats = stats;

        if self.params.enable_obstacle_snapshot {
            self.obstacle_snapshot = snapshot_obstacles(&self.obstacles, self.frame as usize);
        }

        let liquid_snapshot = self.liquid_sdf.clone();
        let solid_snapshot = self.solid_sdf.clone();
        let params_snapshot = self.params.clone();

        if self.params.async_meshing {
            if let Some(handle) = self.async_mesh_job.take() {
                if let Ok((mesh, preview)) = handle.join() {
                    self.surface_mesh = mesh;
                    self.preview_mesh = preview;
                }
            }
            self.async_mesh_job = Some(std::thread::spawn(move || crate::scheduler::reconstruct_surface(&liquid_snapshot, &solid_snapshot, &params_snapshot)));
        } else {
            let (mesh, preview) = crate::scheduler::reconstruct_surface(&liquid_snapshot, &solid_snapshot, &params_snapshot);
            self.surface_mesh = mesh;
            self.preview_mesh = preview;
        }

        self.frame += 1;
        Ok(())
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// `true` unless `async_meshing` is enabled and the background mesher
    /// from the previous frame hasn't joined yet (spec §4.14).
    pub fn is_frame_finished(&self) -> bool {
        self.async_mesh_job.as_ref().map(|handle| handle.is_finished()).unwrap_or(true)
    }

    pub fn frame_stats(&self) -> &FrameStats {
        &self.frame_stats
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[(Vector3<R>, Vector3<R>)] {
        &self.particles
    }

    /// Marker particle positions as a flat little-endian f32 triplet array
    /// (spec §6).
    pub fn marker_particle_positions(&self) -> Vec<u8> {
        encode_vec3_triplets(self.particles.iter().map(|(p, _)| *p))
    }

    /// Marker particle velocities, same layout as
    /// [`Self::marker_particle_positions`].
    pub fn marker_particle_velocities(&self) -> Vec<u8> {
        encode_vec3_triplets(self.particles.iter().map(|(_, v)| *v))
    }

    /// Diffuse particle positions; always empty, since the secondary-particle
    /// simulation is out of scope (spec §1, §6).
    pub fn diffuse_particle_positions(&self) -> Vec<u8> {
        Vec::new()
    }
    pub fn diffuse_particle_velocities(&self) -> Vec<u8> {
        Vec::new()
    }
    pub fn diffuse_particle_lifetimes(&self) -> Vec<u8> {
        Vec::new()
    }
    pub fn diffuse_particle_types(&self) -> Vec<u8> {
        Vec::new()
    }
    pub fn diffuse_particle_ids(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn surface_mesh_ply(&self) -> String {
        self.surface_mesh.to_ply_ascii()
    }

    pub fn preview_mesh_ply(&self) -> String {
        self.preview_mesh.to_ply_ascii()
    }

    pub fn obstacle_snapshot_ply(&self) -> String {
        self.obstacle_snapshot.to_ply_ascii()
    }

    pub fn surface_mesh(&self) -> &TriangleMesh3d<R> {
        &self.surface_mesh
    }

    pub fn preview_mesh(&self) -> &TriangleMesh3d<R> {
        &self.preview_mesh
    }

    /// Supplies marker particle state a host captured from a previous run
    /// (spec §6: "it supplies them back through `load_marker_particle_data`
    /// ... before the next `update`").
    pub fn load_marker_particle_data(&mut self, positions: &[Vector3<R>], velocities: &[Vector3<R>]) {
        self.particles = positions.iter().copied().zip(velocities.iter().copied()).collect();
    }

    /// Accepts a previously captured diffuse-particle blob; stored but never
    /// interpreted, since this engine doesn't simulate that system.
    pub fn load_diffuse_particle_data(&mut self, blob: &[u8]) {
        self.diffuse_particle_blob = blob.to_vec();
    }
}

/// The compact binary mesh codec only exists for `f32` (spec §6), so the
/// encoders that use it are specialized the same way
/// [`TriangleMesh3d::<f32>::encode_compact_binary`] is.
impl DomainState<f32> {
    pub fn surface_mesh_binary(&self) -> Vec<u8> {
        self.surface_mesh().encode_compact_binary()
    }

    pub fn preview_mesh_binary(&self) -> Vec<u8> {
        self.preview_mesh().encode_compact_binary()
    }

    pub fn obstacle_snapshot_binary(&self) -> Vec<u8> {
        self.obstacle_snapshot.encode_compact_binary()
    }
}

fn snapshot_obstacles<R: Real>(obstacles: &[MeshObject<R>], frame: usize) -> TriangleMesh3d<R> {
    let mut vertices = Vec::new();
    let mut triangles = Vec::new();
    for obstacle in obstacles {
        let offset = vertices.len() as u32;
        vertices.extend_from_slice(obstacle.vertices_at_frame(frame));
        triangles.extend(obstacle.triangles.iter().map(|t| Triangle {
            indices: [t.indices[0] + offset, t.indices[1] + offset, t.indices[2] + offset],
        }));
    }
    TriangleMesh3d { vertices, triangles }
}

fn encode_vec3_triplets<R: Real>(it: impl Iterator<Item = Vector3<R>>) -> Vec<u8> {
    let mut out = Vec::new();
    for v in it {
        out.extend_from_slice(&v.x.to_f32().unwrap_or(0.0).to_le_bytes());
        out.extend_from_slice(&v.y.to_f32().unwrap_or(0.0).to_le_bytes());
        out.extend_from_slice(&v.z.to_f32().unwrap_or(0.0).to_le_bytes());
    }
    out
}

/// Inclusive cell-index range covering `aabb`, clamped to `[0, size)` by the
/// caller (callers iterate `i0..=i1` and skip any index that lands outside
/// the grid).
pub(crate) fn cell_range<R: Real>(aabb: &crate::aabb::AxisAlignedBoundingBox3d<R>, dx: R, isize: usize, jsize: usize, ksize: usize) -> (isize, isize, isize, isize, isize, isize) {
    let (i0, _) = crate::vmath::position_to_cell_index_and_frac(aabb.min().x, R::zero(), dx);
    let (j0, _) = crate::vmath::position_to_cell_index_and_frac(aabb.min().y, R::zero(), dx);
    let (k0, _) = crate::vmath::position_to_cell_index_and_frac(aabb.min().z, R::zero(), dx);
    let (i1, _) = crate::vmath::position_to_cell_index_and_frac(aabb.max().x, R::zero(), dx);
    let (j1, _) = crate::vmath::position_to_cell_index_and_frac(aabb.max().y, R::zero(), dx);
    let (k1, _) = crate::vmath::position_to_cell_index_and_frac(aabb.max().z, R::zero(), dx);
    (
        i0.max(0),
        j0.max(0),
        k0.max(0),
        i1.min(isize as isize - 1),
        j1.min(jsize as isize - 1),
        k1.min(ksize as isize - 1),
    )
}

pub(crate) fn cell_center<R: Real>(i: isize, j: isize, k: isize, dx: R) -> Vector3<R> {
    let half = R::from_f64(0.5).unwrap();
    Vector3::new(
        (R::from_isize(i).unwrap() + half) * dx,
        (R::from_isize(j).unwrap() + half) * dx,
        (R::from_isize(k).unwrap() + half) * dx,
    )
}

/// Deterministic pseudo-random jitter in `[0, 1)`, splitmix64 (Steele,
/// Lea & Flood); avoids pulling in a dependency on `rand` purely for the one
/// place this engine needs non-grid-aligned sub-cell offsets.
fn hash_jitter(seed: u64) -> f64 {
    let mut x = seed.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

pub(crate) fn hash_salt(frame: u64, n: u64) -> u64 {
    frame.wrapping_mul(0x100000001B3).wrapping_add(n)
}

/// Seeds 8 jittered sub-cell particles at cell `(i, j, k)` (spec §3's "8
/// particles/cell nominal" density), each carrying `velocity`.
pub(crate) fn seed_cell<R: Real>(i: isize, j: isize, k: isize, dx: R, velocity: Vector3<R>, jitter: R, salt: u64, out: &mut Vec<(Vector3<R>, Vector3<R>)>) {
    let base = Vector3::new(R::from_isize(i).unwrap() * dx, R::from_isize(j).unwrap() * dx, R::from_isize(k).unwrap() * dx);
    let quarter = dx * R::from_f64(0.25).unwrap();
    let mut sub_index = 0u64;
    for dz in 0..2 {
        for dy in 0..2 {
            for dxi in 0..2 {
                let sub = Vector3::new(
                    quarter * R::from_f64(1.0 + 2.0 * dxi as f64).unwrap(),
                    quarter * R::from_f64(1.0 + 2.0 * dy as f64).unwrap(),
                    quarter * R::from_f64(1.0 + 2.0 * dz as f64).unwrap(),
                );
                let cell_seed = salt ^ ((i as u64) << 42) ^ ((j as u64) << 21) ^ (k as u64) ^ (sub_index << 2);
                sub_index += 1;
                let jx = hash_jitter(cell_seed) * 2.0 - 1.0;
                let jy = hash_jitter(cell_seed ^ 0x1) * 2.0 - 1.0;
                let jz = hash_jitter(cell_seed ^ 0x2) * 2.0 - 1.0;
                let jitter_vec = Vector3::new(
                    R::from_f64(jx).unwrap() * jitter * quarter,
                    R::from_f64(jy).unwrap() * jitter * quarter,
                    R::from_f64(jz).unwrap() * jitter * quarter,
                );
                out.push((base + sub + jitter_vec, velocity));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Triangle;

    fn floor_and_cube() -> (TriangleMesh3d<f32>, TriangleMesh3d<f32>) {
        let floor_vertices = vec![
            Vector3::new(-10.0, 0.0, -10.0),
            Vector3::new(10.0, 0.0, -10.0),
            Vector3::new(10.0, 0.0, 10.0),
            Vector3::new(-10.0, 0.0, 10.0),
        ];
        let floor_triangles = vec![Triangle { indices: [0, 1, 2] }, Triangle { indices: [0, 2, 3] }];
        let floor = TriangleMesh3d {
            vertices: floor_vertices,
            triangles: floor_triangles,
        };

        let v = vec![
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
        triangles.extend(quad(0, 1, 2, 3));
        triangles.extend(quad(4, 7, 6, 5));
        triangles.extend(quad(0, 4, 5, 1));
        triangles.extend(quad(3, 2, 6, 7));
        triangles.extend(quad(0, 3, 7, 4));
        triangles.extend(quad(1, 5, 6, 2));
        let cube = TriangleMesh3d { vertices: v, triangles };
        (floor, cube)
    }

    #[test]
    fn new_then_initialize_succeeds_with_default_params() {
        let mut state = DomainState::<f32>::new(8, 8, 8, 0.1);
        assert!(state.initialize().is_ok());
        assert_eq!(state.current_frame(), 0);
        assert!(state.is_frame_finished());
    }

    #[test]
    fn initialize_rejects_invalid_config() {
        let mut state = DomainState::<f32>::new(8, 8, 8, 0.1);
        state.params_mut().cfl_number = -1.0;
        assert!(state.initialize().is_err());
    }

    #[test]
    fn add_mesh_fluid_seeds_particles_inside_the_mesh() {
        let mut state = DomainState::<f32>::new(10, 10, 10, 0.2);
        state.initialize().unwrap();
        let (_, cube) = floor_and_cube();
        let scaled: Vec<Vector3<f32>> = cube.vertices.iter().map(|v| v * 5.0 + Vector3::new(0.5, 0.5, 0.5)).collect();
        let mut scaled_cube = cube.clone();
        scaled_cube.vertices = scaled;
        state.add_mesh_fluid(&scaled_cube, Vector3::zeros());
        assert!(state.num_particles() > 0);
    }

    #[test]
    fn add_fluid_cells_then_remove_clears_particles() {
        let mut state = DomainState::<f32>::new(10, 10, 10, 0.2);
        state.initialize().unwrap();
        state.add_fluid_cells(&[(4, 4, 4)], Vector3::zeros());
        assert_eq!(state.num_particles(), 8);
        state.remove_fluid_cells(&[(4, 4, 4)]);
        assert_eq!(state.num_particles(), 0);
    }

    #[test]
    fn update_before_initialize_is_an_error() {
        let mut state = DomainState::<f32>::new(4, 4, 4, 0.1);
        assert!(state.update(1.0 / 30.0).is_err());
    }
}
