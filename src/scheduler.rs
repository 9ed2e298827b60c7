//! The substep loop (spec §4.12): CFL-adaptive outer loop over a frame,
//! each substep running the fixed 15-step fluid update in order, and the
//! post-frame surface reconstruction pipeline.
//!
//! Concurrency inside a substep follows spec §5: the obstacle level set and
//! the liquid level set are independent of each other and of the velocity
//! scatter, so all three run on borrowed data inside one `std::thread::scope`
//! rather than being serialized.

use crate::accelerator;
use crate::domain_state::{cell_range, hash_salt, seed_cell, BodyForce, DomainState, FrameStats, SourceKind};
use crate::error::{SimError, SimResult};
use crate::grid3d::Grid3D;
use crate::kernel::smooth_falloff;
use crate::mac_field::{FaceDir, MacField, ValidMask};
use crate::mesh::{MeshObject, TriangleMesh3d};
use crate::mesh_level_set::MeshLevelSet;
use crate::numeric_types::Real;
use crate::particle_advector::{IntegrationScheme, ParticleAdvector};
use crate::particle_level_set::{particle_radius, per_cell_particle_count, ParticleLevelSet};
use crate::pressure_solver::{self, PressureSolverParams};
use crate::viscosity_solver::{self, ViscositySolverParams};
use nalgebra::Vector3;
use rayon::prelude::*;

/// How many micro-steps [`ParticleAdvector`] is allowed to split a single
/// scheduler substep's `dt` into internally; the scheduler's own CFL-bounded
/// `dt` already keeps travel small, so this only needs to cover the rare
/// substep where a particle sampled an unusually fast face velocity.
const ADVECTOR_MIN_SUBSTEPS: usize = 1;
const ADVECTOR_MAX_SUBSTEPS: usize = 4;

/// Advances `state` by exactly `frame_dt`, splitting it into between
/// `min_substeps_per_frame` and `max_substeps_per_frame` CFL-bounded
/// substeps (spec §4.12 "Adaptive substep size").
///
/// Every substep in the frame commits directly into `state` as it runs, so
/// a failure on substep N (or a failure partway through substep 1 of the
/// next frame) would otherwise leave substeps `1..N-1`'s mutations visible
/// even though the frame as a whole errored. Spec §7 requires the opposite:
/// "on any propagated error, update has done nothing observable from
/// earlier substeps of the same frame." We snapshot every field a substep
/// touches before the loop starts and restore the snapshot whenever the
/// loop exits via `?`, so either every substep in the frame lands or none
/// of them do.
pub fn step_frame<R: Real>(state: &mut DomainState<R>, frame_dt: R) -> SimResult<FrameStats> {
    let particles_snapshot = state.particles.clone();
    let mac_snapshot = state.mac.clone();
    let mac_saved_snapshot = state.mac_saved.clone();
    let valid_snapshot = state.valid.clone();
    let solid_sdf_snapshot = state.solid_sdf.clone();
    let liquid_sdf_snapshot = state.liquid_sdf.clone();

    match run_all_substeps(state, frame_dt) {
        Ok(stats) => Ok(stats),
        Err(err) => {
            state.particles = particles_snapshot;
            state.mac = mac_snapshot;
            state.mac_saved = mac_saved_snapshot;
            state.valid = valid_snapshot;
            state.solid_sdf = solid_sdf_snapshot;
            state.liquid_sdf = liquid_sdf_snapshot;
            Err(err)
        }
    }
}

fn run_all_substeps<R: Real>(state: &mut DomainState<R>, frame_dt: R) -> SimResult<FrameStats> {
    let mut remaining = frame_dt;
    let mut substep_count = 0usize;
    let epsilon = R::from_f64(1e-9).unwrap();

    while remaining > epsilon {
        let max_speed = max_particle_speed(&state.particles) + if state.params.adaptive_obstacle_time_stepping { max_obstacle_speed(&state.obstacles, state.frame as usize) } else { R::zero() };

        let cfl_dt = state.params.cfl_number * state.dx / max_speed.max(epsilon);
        let min_dt = frame_dt / R::from_u32(state.params.max_substeps_per_frame).unwrap();
        let max_dt = frame_dt / R::from_u32(state.params.min_substeps_per_frame).unwrap();
        let dt = cfl_dt.max(min_dt).min(max_dt).min(remaining);

        run_substep(state, dt)?;
        remaining = remaining - dt;
        substep_count += 1;

        if substep_count >= state.params.max_substeps_per_frame as usize * 4 {
            break;
        }
    }

    Ok(FrameStats {
        substep_count,
        phase_timings: Vec::new(),
        output_byte_counts: vec![
            ("marker_particle_positions", state.particles.len() * 12),
            ("marker_particle_velocities", state.particles.len() * 12),
        ],
    })
}

fn max_particle_speed<R: Real>(particles: &[(Vector3<R>, Vector3<R>)]) -> R {
    particles.par_iter().map(|(_, v)| v.norm()).reduce(R::zero, |a, b| if a > b { a } else { b })
}

fn max_obstacle_speed<R: Real>(obstacles: &[MeshObject<R>], frame: usize) -> R {
    let _ = frame;
    obstacles.iter().map(|o| o.velocity.norm()).fold(R::zero(), |a, b| if a > b { a } else { b })
}

/// Runs the fixed 15-step per-substep update (spec §4.12).
pub fn run_substep<R: Real>(state: &mut DomainState<R>, dt: R) -> SimResult<()> {
    let (isize_, jsize_, ksize_) = (state.isize, state.jsize, state.ksize);
    let dx = state.dx;
    let frame = state.frame as usize;
    let radius = particle_radius(dx) * state.params.marker_particle_scale;

    let mut solid_sdf: Option<MeshLevelSet<R>> = None;
    let mut liquid_sdf: Option<ParticleLevelSet<R>> = None;
    let mut scattered: Option<(MacField<R>, ValidMask)> = None;

    // Steps 1-4: launch the obstacle and liquid level-set rebuilds
    // concurrently with the velocity scatter, then join both (spec §4.12,
    // §5).
    {
        let particles = &state.particles;
        let obstacles = &state.obstacles;
        let accelerator = state.accelerator.as_ref();

        std::thread::scope(|scope| {
            let island_threshold = state.params.parallel_union_island_threshold;
            let solid_handle = scope.spawn(move || build_solid_level_set(obstacles, frame, isize_, jsize_, ksize_, dx, island_threshold));
            let liquid_handle = scope.spawn(|| {
                let mut ls = ParticleLevelSet::<R>::new(isize_, jsize_, ksize_, dx);
                ls.rebuild(particles, radius);
                ls
            });

            scattered = Some(accelerator::scatter_with_fallback(accelerator, particles, isize_, jsize_, ksize_, dx));
            solid_sdf = solid_handle.join().ok();
            liquid_sdf = liquid_handle.join().ok();
        });
    }

    let solid_sdf = solid_sdf.ok_or(SimError::WorkerPanic)?;
    let mut liquid_sdf = liquid_sdf.ok_or(SimError::WorkerPanic)?;
    let (mut mac, mut valid) = scattered.ok_or(SimError::WorkerPanic)?;

    // Both level sets are ready now; extrapolate the liquid's velocity
    // samples into the solid so the viscosity/pressure solves see a sane
    // velocity on the solid side of the interface (spec §4.7).
    liquid_sdf.extrapolate_into_solids(&solid_sdf);

    // Step 5: save a copy of the MAC field for the FLIP delta. `mac_saved`
    // keeps the zero out-of-range default: it only ever feeds `sub`'s
    // per-substep velocity *difference*, where "no data" should mean no
    // contribution, not an absolute gravity vector.
    let mac_saved = mac.clone();

    // A sample of `mac` taken just past the domain edge (during the FLIP
    // gather or particle advection below) is physically in free fall, so
    // that field's out-of-range default is gravity (spec §3).
    mac.set_out_of_range_value(state.params.gravity);

    // Step 6 (optional curvature thread) is part of the secondary-particle
    // system, out of scope here (spec §1); skipped.

    // Step 7: body forces.
    apply_body_forces(&mut mac, &state.body_forces, state.params.gravity, dx, dt);

    // Step 8: viscosity solve, only if nonzero anywhere.
    if state.params.viscosity.is_nonzero_anywhere() {
        let viscosity = state.params.viscosity.representative();
        let params = ViscositySolverParams {
            max_iterations: 200,
            tolerance: R::from_f64(1e-6).unwrap(),
            acceptable_tolerance: R::from_f64(1e-4).unwrap(),
        };
        viscosity_solver::solve(&mut mac, &solid_sdf, viscosity, dt, state.params.density, &params).map_err(SimError::from)?;
    }

    // Step 9: pressure solve.
    let pressure_params = PressureSolverParams {
        max_iterations: 200,
        tolerance: R::from_f64(1e-6).unwrap(),
        acceptable_tolerance: R::from_f64(1e-4).unwrap(),
    };
    pressure_solver::project(&mut mac, &liquid_sdf, &solid_sdf, dt, state.params.density, &pressure_params).map_err(SimError::from)?;

    // Step 10: constrain velocities at solid boundaries.
    apply_boundary_friction(&mut mac, &solid_sdf, state.params.boundary_friction);

    // Step 11: extrapolate face velocities.
    mac.extrapolate(&mut valid, state.params.effective_extrapolation_layers());

    // Step 12: PIC/FLIP blend onto marker particles. `delta` is a velocity
    // *difference*, so its own out-of-range default is zero regardless of
    // what `mac` (cloned by `sub`) is currently set to.
    let mut delta = mac.sub(&mac_saved);
    delta.set_out_of_range_value(Vector3::zeros());
    let new_velocities = crate::velocity_advector::gather_from_grid(&state.particles, &mac, &delta, state.params.pic_flip_ratio);
    for ((_, v), new_v) in state.particles.iter_mut().zip(new_velocities) {
        *v = new_v;
    }

    // Step 13: advance marker particles, then re-project into the solid
    // buffer (the advector's own pass only guarantees phi >= 0).
    let advector = ParticleAdvector::new(state.params.cfl_number, ADVECTOR_MIN_SUBSTEPS, ADVECTOR_MAX_SUBSTEPS, IntegrationScheme::Rk3)?;
    let mut positions: Vec<Vector3<R>> = state.particles.iter().map(|(p, _)| *p).collect();
    advector.advect(&mut positions, &mac, &solid_sdf, dt)?;

    let buffer = state.params.solid_buffer_width * dx;
    let domain_aabb = crate::aabb::AxisAlignedBoundingBox3d::new(Vector3::zeros(), Vector3::new(R::from_usize(isize_).unwrap() * dx, R::from_usize(jsize_).unwrap() * dx, R::from_usize(ksize_).unwrap() * dx));
    let boundary_eps = R::from_f64(1e-5).unwrap() * dx;
    let clamped_aabb = domain_aabb.shrunk(boundary_eps);

    for (position, (p, _)) in positions.iter().zip(state.particles.iter_mut()) {
        let projected = project_to_buffer(*position, &solid_sdf, buffer);
        *p = clamped_aabb.clamp_point(projected);
    }

    // Step 14: apply fluid sources.
    apply_sources(state, dt);

    // Step 15: extreme velocity removal.
    if state.params.extreme_velocity_removal.enabled {
        apply_extreme_velocity_removal(&mut state.particles, state.params.extreme_velocity_removal.max_pct, state.params.extreme_velocity_removal.max_abs);
    }

    // Per-cell density cap (spec §3: a MarkerParticle is "destroyed when
    // entering an outflow or exceeding per-cell density caps").
    if let Some(max_density) = state.params.max_particles_per_cell {
        enforce_density_cap(&mut state.particles, dx, max_density as usize);
    }

    state.mac = mac;
    state.mac_saved = mac_saved;
    state.valid = valid;
    state.solid_sdf = solid_sdf;
    state.liquid_sdf = liquid_sdf;

    Ok(())
}

/// Unions every obstacle's animated mesh level set for the current frame
/// (spec §4.12 step 1, §4.3). Obstacles are unioned across a rayon
/// fold/reduce (each obstacle's mesh is independent, so this is the coarser,
/// outer layer of parallelism); within a single obstacle's mesh,
/// `MeshLevelSet::build` itself switches to the bounded-queue worker pool
/// once its island count passes `island_threshold` (see `DESIGN.md`).
fn build_solid_level_set<R: Real>(obstacles: &[MeshObject<R>], frame: usize, isize: usize, jsize: usize, ksize: usize, dx: R, island_threshold: usize) -> MeshLevelSet<R> {
    obstacles
        .par_iter()
        .map(|obstacle| {
            let mesh = obstacle.as_mesh(frame);
            let mut level_set = MeshLevelSet::build(&mesh, isize, jsize, ksize, dx, 2, island_threshold);
            level_set.set_uniform_velocity(obstacle.velocity);
            level_set
        })
        .reduce(
            || MeshLevelSet::empty(isize, jsize, ksize, dx),
            |mut acc, next| {
                acc.union(&next);
                acc
            },
        )
}

fn apply_body_forces<R: Real>(mac: &mut MacField<R>, body_forces: &[BodyForce<R>], gravity: Vector3<R>, dx: R, dt: R) {
    add_constant_force(mac, gravity, dx, dt);
    for force in body_forces {
        match *force {
            BodyForce::Constant(v) => add_constant_force(mac, v, dx, dt),
            BodyForce::Radial { center, radius, value } => add_radial_force(mac, center, radius, value, dx, dt),
        }
    }
}

fn add_constant_force<R: Real>(mac: &mut MacField<R>, force: Vector3<R>, dx: R, dt: R) {
    apply_component_force(mac.u_mut(), FaceDir::U, dx, dt, |_| force.x);
    apply_component_force(mac.v_mut(), FaceDir::V, dx, dt, |_| force.y);
    apply_component_force(mac.w_mut(), FaceDir::W, dx, dt, |_| force.z);
}

fn add_radial_force<R: Real>(mac: &mut MacField<R>, center: Vector3<R>, radius: R, value: Vector3<R>, dx: R, dt: R) {
    apply_component_radial(mac, FaceDir::U, center, radius, value.x, dx, dt);
    apply_component_radial(mac, FaceDir::V, center, radius, value.y, dx, dt);
    apply_component_radial(mac, FaceDir::W, center, radius, value.z, dx, dt);
}

fn apply_component_force<R: Real>(grid: &mut Grid3D<R>, dir: FaceDir, dx: R, dt: R, value_at: impl Fn(Vector3<R>) -> R) {
    let (isize_, jsize_, ksize_) = grid.dims();
    let _ = dir;
    for k in 0..ksize_ as isize {
        for j in 0..jsize_ as isize {
            for i in 0..isize_ as isize {
                let pos = face_position(i, j, k, dir, dx);
                let current = grid.get(i, j, k);
                grid.set(i, j, k, current + value_at(pos) * dt).ok();
            }
        }
    }
}

fn apply_component_radial<R: Real>(mac: &mut MacField<R>, dir: FaceDir, center: Vector3<R>, radius: R, value: R, dx: R, dt: R) {
    let grid = mac.component_mut(dir);
    let (isize_, jsize_, ksize_) = grid.dims();
    for k in 0..ksize_ as isize {
        for j in 0..jsize_ as isize {
            for i in 0..isize_ as isize {
                let pos = face_position(i, j, k, dir, dx);
                let r = (pos - center).norm();
                let falloff = smooth_falloff(r, radius);
                if falloff <= R::zero() {
                    continue;
                }
                let current = grid.get(i, j, k);
                grid.set(i, j, k, current + value * falloff * dt).ok();
            }
        }
    }
}

fn face_position<R: Real>(i: isize, j: isize, k: isize, dir: FaceDir, dx: R) -> Vector3<R> {
    let half = R::from_f64(0.5).unwrap();
    match dir {
        FaceDir::U => Vector3::new(R::from_isize(i).unwrap() * dx, (R::from_isize(j).unwrap() + half) * dx, (R::from_isize(k).unwrap() + half) * dx),
        FaceDir::V => Vector3::new((R::from_isize(i).unwrap() + half) * dx, R::from_isize(j).unwrap() * dx, (R::from_isize(k).unwrap() + half) * dx),
        FaceDir::W => Vector3::new((R::from_isize(i).unwrap() + half) * dx, (R::from_isize(j).unwrap() + half) * dx, R::from_isize(k).unwrap() * dx),
    }
}

/// Blends each face toward the solid's velocity in proportion to how much
/// of that face is solid-occluded (spec §4.12 step 10).
fn apply_boundary_friction<R: Real>(mac: &mut MacField<R>, solid: &MeshLevelSet<R>, friction: R) {
    blend_component(mac.u_mut(), solid.weight_u(), solid, FaceDir::U, friction);
    blend_component(mac.v_mut(), solid.weight_v(), solid, FaceDir::V, friction);
    blend_component(mac.w_mut(), solid.weight_w(), solid, FaceDir::W, friction);
}

fn blend_component<R: Real>(grid: &mut Grid3D<R>, weight: &Grid3D<R>, solid: &MeshLevelSet<R>, dir: FaceDir, friction: R) {
    let (isize_, jsize_, ksize_) = grid.dims();
    let one = R::one_();
    for k in 0..ksize_ as isize {
        for j in 0..jsize_ as isize {
            for i in 0..isize_ as isize {
                let w = weight.get(i, j, k);
                if w >= one {
                    continue;
                }
                let solid_v = solid_velocity_component(solid, i, j, k, dir);
                let current = grid.get(i, j, k);
                grid.set(i, j, k, current * (one - friction) + solid_v * friction).ok();
            }
        }
    }
}

fn solid_velocity_component<R: Real>(solid: &MeshLevelSet<R>, i: isize, j: isize, k: isize, dir: FaceDir) -> R {
    let v = solid.velocity_at_node(i, j, k);
    match dir {
        FaceDir::U => v.x,
        FaceDir::V => v.y,
        FaceDir::W => v.z,
    }
}

/// Projects `p` to the nearest point with `phi_s > buffer`, walking along
/// the numerical gradient of `solid`'s distance field; no-op if `p` is
/// already clear of the buffer (spec §4.12 step 13, §8).
fn project_to_buffer<R: Real>(p: Vector3<R>, solid: &MeshLevelSet<R>, buffer: R) -> Vector3<R> {
    let phi = solid.trilinear_interpolate(p);
    if phi > buffer {
        return p;
    }
    let eps = R::from_f64(0.5).unwrap() * solid.dx();
    let grad = central_gradient(solid, p, eps);
    let norm = grad.norm();
    if norm <= R::from_f64(1e-12).unwrap() {
        return p;
    }
    let direction = grad / norm;
    p + direction * (buffer - phi + eps)
}

fn central_gradient<R: Real>(solid: &MeshLevelSet<R>, p: Vector3<R>, eps: R) -> Vector3<R> {
    let dx_plus = solid.trilinear_interpolate(p + Vector3::new(eps, R::zero(), R::zero()));
    let dx_minus = solid.trilinear_interpolate(p - Vector3::new(eps, R::zero(), R::zero()));
    let dy_plus = solid.trilinear_interpolate(p + Vector3::new(R::zero(), eps, R::zero()));
    let dy_minus = solid.trilinear_interpolate(p - Vector3::new(R::zero(), eps, R::zero()));
    let dz_plus = solid.trilinear_interpolate(p + Vector3::new(R::zero(), R::zero(), eps));
    let dz_minus = solid.trilinear_interpolate(p - Vector3::new(R::zero(), R::zero(), eps));
    let two = R::from_f64(2.0).unwrap();
    Vector3::new((dx_plus - dx_minus) / (two * eps), (dy_plus - dy_minus) / (two * eps), (dz_plus - dz_minus) / (two * eps))
}

/// Applies every active inflow/outflow source (spec §4.12 step 14). Inflow
/// is rate-limited to one batch of `seed_cell`'s 8 sub-cell particles per
/// under-filled cell per substep rather than scaled explicitly by `dt`: with
/// `dt` already CFL-bounded, "per substep" and "sub-step-proportional" are
/// the same cadence here, so a source fills its volume over however many
/// substeps it takes to top up every cell rather than in one shot.
fn apply_sources<R: Real>(state: &mut DomainState<R>, _dt: R) {
    let dx = state.dx;
    let (isize_, jsize_, ksize_) = (state.isize, state.jsize, state.ksize);
    let frame = state.frame;

    let sources = state.sources.clone();
    for (source_index, source) in sources.iter().enumerate() {
        if !source.active {
            continue;
        }
        match &source.kind {
            SourceKind::Outflow => {
                state.particles.retain(|(p, _)| !source.mesh.contains_point(*p));
            }
            SourceKind::Inflow { velocity } => {
                let counts = per_cell_particle_count(&state.particles, isize_, jsize_, ksize_, dx);
                let (i0, j0, k0, i1, j1, k1) = cell_range(&source.mesh.aabb(), dx, isize_, jsize_, ksize_);
                let target_count = 8u32;
                let mut salt = 0u64;
                for k in k0..=k1 {
                    for j in j0..=j1 {
                        for i in i0..=i1 {
                            if i < 0 || j < 0 || k < 0 || i as usize >= isize_ || j as usize >= jsize_ || k as usize >= ksize_ {
                                continue;
                            }
                            let center = crate::domain_state::cell_center(i, j, k, dx);
                            if !source.mesh.contains_point(center) {
                                continue;
                            }
                            let existing = counts.get(i, j, k);
                            if existing >= target_count {
                                continue;
                            }
                            seed_cell(i, j, k, dx, *velocity, state.params.jitter_factor, hash_salt(frame, salt ^ (source_index as u64) << 32), &mut state.particles);
                            salt += 1;
                        }
                    }
                }
            }
        }
    }
}

fn apply_extreme_velocity_removal<R: Real>(particles: &mut Vec<(Vector3<R>, Vector3<R>)>, max_pct: R, max_abs: R) {
    let mut eligible: Vec<usize> = particles.iter().enumerate().filter(|(_, (_, v))| v.norm() > max_abs).map(|(idx, _)| idx).collect();
    if eligible.is_empty() {
        return;
    }
    eligible.sort_by(|&a, &b| particles[b].1.norm().partial_cmp(&particles[a].1.norm()).unwrap());
    let drop_count = (R::from_usize(eligible.len()).unwrap() * max_pct).to_usize().unwrap_or(0).min(eligible.len());
    let mut drop_set: std::collections::HashSet<usize> = eligible.into_iter().take(drop_count).collect();
    if drop_set.is_empty() {
        return;
    }
    let mut kept = Vec::with_capacity(particles.len() - drop_set.len());
    for (idx, particle) in particles.drain(..).enumerate() {
        if drop_set.remove(&idx) {
            continue;
        }
        kept.push(particle);
    }
    *particles = kept;
}

/// Drops particles past `max_per_cell` in any `dx`-sized cell, keeping the
/// lowest-indexed particle(s) in each over-full cell (spec §3's per-cell
/// density cap).
fn enforce_density_cap<R: Real>(particles: &mut Vec<(Vector3<R>, Vector3<R>)>, dx: R, max_per_cell: usize) {
    if particles.is_empty() {
        return;
    }
    let positions: Vec<Vector3<R>> = particles.iter().map(|(p, _)| *p).collect();
    let grid = crate::spatial_point_grid::SpatialPointGrid::build(&positions, dx);
    let excess = grid.excess_indices(max_per_cell);
    if excess.is_empty() {
        return;
    }
    let mut drop_set: std::collections::HashSet<usize> = excess.into_iter().map(|idx| idx as usize).collect();
    let mut kept = Vec::with_capacity(particles.len() - drop_set.len());
    for (idx, particle) in particles.drain(..).enumerate() {
        if drop_set.remove(&idx) {
            continue;
        }
        kept.push(particle);
    }
    *particles = kept;
}

/// Builds the surface and preview meshes from a level-set snapshot (spec
/// §4.12 "After all substeps ... trigger surface reconstruction"). A pure
/// function over owned/cloned inputs so it can run on [`DomainState`]'s
/// background meshing thread as easily as inline.
pub fn reconstruct_surface<R: Real>(liquid: &ParticleLevelSet<R>, solid: &MeshLevelSet<R>, params: &crate::config::SimulationParameters<R>) -> (TriangleMesh3d<R>, TriangleMesh3d<R>) {
    let subdivision = params.surface_subdivision.max(1) as usize;
    let mut surface = polygonize_combined(liquid, solid, params.dx, subdivision);
    surface.smooth(params.surface_smoothing_value, params.surface_smoothing_iterations);
    surface.remove_minimum_triangle_count_polyhedra(params.min_polyhedron_triangles);

    let preview = if params.enable_preview_mesh {
        polygonize_combined(liquid, solid, params.dx, 1)
    } else {
        TriangleMesh3d::new()
    };

    (surface, preview)
}

fn polygonize_combined<R: Real>(liquid: &ParticleLevelSet<R>, solid: &MeshLevelSet<R>, dx: R, subdivision: usize) -> TriangleMesh3d<R> {
    let (isize_, jsize_, ksize_) = liquid.dims();

    if subdivision <= 1 {
        let mut combined = crate::marching_cubes::sample_particle_level_set_to_nodes(liquid);
        let solid_phi = solid.phi();
        for (c, s) in combined.as_mut_slice().iter_mut().zip(solid_phi.as_slice()) {
            let inverted = -*s;
            if inverted < *c {
                *c = inverted;
            }
        }
        return crate::marching_cubes::polygonize(&combined, dx, R::zero());
    }

    let fine_dx = dx / R::from_usize(subdivision).unwrap();
    let (ni, nj, nk) = (isize_ * subdivision + 1, jsize_ * subdivision + 1, ksize_ * subdivision + 1);
    let mut combined = Grid3D::<R>::new(ni, nj, nk);
    for k in 0..nk {
        for j in 0..nj {
            for i in 0..ni {
                let p = Vector3::new(R::from_usize(i).unwrap() * fine_dx, R::from_usize(j).unwrap() * fine_dx, R::from_usize(k).unwrap() * fine_dx);
                let liquid_val = liquid.trilinear_interpolate(p);
                let solid_val = -solid.trilinear_interpolate(p);
                let v = if solid_val < liquid_val { solid_val } else { liquid_val };
                combined.set(i as isize, j as isize, k as isize, v).ok();
            }
        }
    }
    crate::marching_cubes::polygonize(&combined, fine_dx, R::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_state::DomainState;

    #[test]
    fn enforce_density_cap_drops_only_excess_particles_per_cell() {
        let dx = 1.0f32;
        let mut particles: Vec<(Vector3<f32>, Vector3<f32>)> =
            (0..5).map(|i| (Vector3::new(0.1 + i as f32 * 0.01, 0.1, 0.1), Vector3::zeros())).collect();
        particles.push((Vector3::new(5.5, 5.5, 5.5), Vector3::zeros()));
        enforce_density_cap(&mut particles, dx, 2);
        assert_eq!(particles.len(), 3);
    }

    #[test]
    fn density_cap_disabled_by_default_keeps_overcrowded_cells() {
        let mut state = DomainState::<f32>::new(6, 6, 6, 0.1);
        state.initialize().unwrap();
        for _ in 0..20 {
            state.add_fluid_cells(&[(3, 3, 3)], Vector3::zeros());
        }
        let before = state.num_particles();
        state.update(1.0 / 30.0).unwrap();
        assert_eq!(state.num_particles(), before);
    }

    #[test]
    fn a_rest_column_of_fluid_stays_settled_after_one_frame() {
        let mut state = DomainState::<f32>::new(6, 6, 6, 0.1);
        state.initialize().unwrap();
        for i in 1..5 {
            for j in 1..3 {
                for k in 1..5 {
                    state.add_fluid_cells(&[(i, j, k)], Vector3::zeros());
                }
            }
        }
        let before = state.num_particles();
        assert!(state.update(1.0 / 30.0).is_ok());
        assert_eq!(state.num_particles(), before);
    }

    #[test]
    fn particles_in_free_fall_gain_downward_velocity() {
        let mut state = DomainState::<f32>::new(8, 8, 8, 0.1);
        state.initialize().unwrap();
        state.add_fluid_cells(&[(4, 6, 4)], Vector3::zeros());
        state.update(1.0 / 30.0).unwrap();
        let mean_vy: f32 = state.particles().iter().map(|(_, v)| v.y).sum::<f32>() / state.particles().len() as f32;
        assert!(mean_vy < 0.0);
    }

    #[test]
    fn outflow_source_removes_particles_inside_its_volume() {
        let mut state = DomainState::<f32>::new(8, 8, 8, 0.1);
        state.initialize().unwrap();
        state.add_fluid_cells(&[(4, 4, 4)], Vector3::zeros());
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.8, 0.0, 0.0),
            Vector3::new(0.8, 0.8, 0.0),
            Vector3::new(0.0, 0.8, 0.0),
            Vector3::new(0.0, 0.0, 0.8),
            Vector3::new(0.8, 0.0, 0.8),
            Vector3::new(0.8, 0.8, 0.8),
            Vector3::new(0.0, 0.8, 0.8),
        ];
        let quad = |a: u32, b: u32, c: u32, d: u32| [crate::mesh::Triangle { indices: [a, b, c] }, crate::mesh::Triangle { indices: [a, c, d] }];
        let mut triangles = Vec::new();
        triangles.extend(quad(0, 1, 2, 3));
        triangles.extend(quad(4, 7, 6, 5));
        triangles.extend(quad(0, 4, 5, 1));
        triangles.extend(quad(3, 2, 6, 7));
        triangles.extend(quad(0, 3, 7, 4));
        triangles.extend(quad(1, 5, 6, 2));
        let mesh = crate::mesh::TriangleMesh3d { vertices, triangles };
        state.add_mesh_fluid_source(mesh, crate::domain_state::SourceKind::Outflow);
        state.update(1.0 / 30.0).unwrap();
        assert_eq!(state.num_particles(), 0);
    }
}
