//! End-to-end scenarios exercised only through `DomainState`'s public
//! contract (spec §6), mirroring a subset of the concrete scenarios and
//! quantified invariants in spec §8. These run at much smaller grid sizes
//! and frame counts than the spec's scenarios to keep the suite fast, but
//! check the same properties.

use flip_fluid_engine::domain_state::DomainState;
use flip_fluid_engine::mesh::{Triangle, TriangleMesh3d};
use flip_fluid_engine::nalgebra::Vector3;

fn box_mesh(min: Vector3<f32>, max: Vector3<f32>) -> TriangleMesh3d<f32> {
    let vertices = vec![
        Vector3::new(min.x, min.y, min.z),
        Vector3::new(max.x, min.y, min.z),
        Vector3::new(max.x, max.y, min.z),
        Vector3::new(min.x, max.y, min.z),
        Vector3::new(min.x, min.y, max.z),
        Vector3::new(max.x, min.y, max.z),
        Vector3::new(max.x, max.y, max.z),
        Vector3::new(min.x, max.y, max.z),
    ];
    let quad = |a: u32, b: u32, c: u32, d: u32| [Triangle { indices: [a, b, c] }, Triangle { indices: [a, c, d] }];
    let mut triangles = Vec::new();
    triangles.extend(quad(0, 1, 2, 3));
    triangles.extend(quad(4, 7, 6, 5));
    triangles.extend(quad(0, 4, 5, 1));
    triangles.extend(quad(3, 2, 6, 7));
    triangles.extend(quad(0, 3, 7, 4));
    triangles.extend(quad(1, 5, 6, 2));
    TriangleMesh3d { vertices, triangles }
}

fn domain_aabb_min_max(isize: usize, jsize: usize, ksize: usize, dx: f32) -> (Vector3<f32>, Vector3<f32>) {
    (
        Vector3::zeros(),
        Vector3::new(isize as f32 * dx, jsize as f32 * dx, ksize as f32 * dx),
    )
}

/// Spec §8 "Containment": every marker particle stays within the domain
/// AABB (shrunk by the boundary epsilon) after every `update`.
#[test]
fn containment_holds_across_several_frames_of_free_fall() {
    let (isize, jsize, ksize, dx) = (12usize, 16usize, 12usize, 0.1f32);
    let mut state = DomainState::<f32>::new(isize, jsize, ksize, dx);
    state.initialize().unwrap();
    state.add_fluid_cells(&[(6, 12, 6)], Vector3::zeros());

    let (min, max) = domain_aabb_min_max(isize, jsize, ksize, dx);
    let eps = 1e-4f32;

    for _ in 0..10 {
        state.update(1.0 / 30.0).unwrap();
        for (p, _) in state.particles() {
            assert!(p.x >= min.x - eps && p.x <= max.x + eps, "x out of bounds: {p:?}");
            assert!(p.y >= min.y - eps && p.y <= max.y + eps, "y out of bounds: {p:?}");
            assert!(p.z >= min.z - eps && p.z <= max.z + eps, "z out of bounds: {p:?}");
        }
    }
}

/// Spec §8 "Mass conservation (approximate)": with no sources active,
/// consecutive frames keep the particle count fixed (extreme-velocity
/// removal is disabled by default, so the delta should be exactly zero).
#[test]
fn particle_count_is_conserved_without_sources_or_sinks() {
    let mut state = DomainState::<f32>::new(10, 10, 10, 0.1);
    state.initialize().unwrap();
    for i in 3..7 {
        for j in 2..6 {
            for k in 3..7 {
                state.add_fluid_cells(&[(i, j, k)], Vector3::zeros());
            }
        }
    }
    let before = state.num_particles();
    for _ in 0..5 {
        state.update(1.0 / 30.0).unwrap();
        assert_eq!(state.num_particles(), before);
    }
}

/// Spec §8 boundary behavior: at rest, with no obstacles/sources, zero
/// viscosity, and zero gravity, the system stays at rest.
#[test]
fn zero_gravity_rest_state_stays_at_rest() {
    let mut state = DomainState::<f32>::new(8, 8, 8, 0.1);
    state.params_mut().gravity = Vector3::zeros();
    state.initialize().unwrap();
    for i in 2..6 {
        for j in 2..6 {
            for k in 2..6 {
                state.add_fluid_cells(&[(i, j, k)], Vector3::zeros());
            }
        }
    }

    for _ in 0..10 {
        state.update(1.0 / 30.0).unwrap();
        let max_speed = state.particles().iter().map(|(_, v)| v.norm()).fold(0.0f32, f32::max);
        assert!(max_speed < 1e-3, "max speed {max_speed} exceeded rest threshold");
    }
}

/// Spec §8 boundary behavior: under gravity and an open domain, a
/// free-falling parcel's centroid tracks `y0 + 0.5*g*t^2` closely within
/// the first several frames (before it reaches the floor).
#[test]
fn free_falling_parcel_tracks_kinematic_free_fall() {
    let (isize, jsize, ksize, dx) = (12usize, 40usize, 12usize, 0.05f32);
    let mut state = DomainState::<f32>::new(isize, jsize, ksize, dx);
    state.params_mut().gravity = Vector3::new(0.0, -9.8, 0.0);
    state.initialize().unwrap();
    for i in 5..7 {
        for j in 34..36 {
            for k in 5..7 {
                state.add_fluid_cells(&[(i, j, k)], Vector3::zeros());
            }
        }
    }

    let centroid_y = |s: &DomainState<f32>| -> f32 {
        let ps = s.particles();
        ps.iter().map(|(p, _)| p.y).sum::<f32>() / ps.len() as f32
    };
    let y0 = centroid_y(&state);

    let frame_dt = 1.0 / 30.0f32;
    let mut t = 0.0f32;
    for _ in 0..8 {
        state.update(frame_dt as f64).unwrap();
        t += frame_dt;
        let predicted = y0 + 0.5 * (-9.8) * t * t;
        let actual = centroid_y(&state);
        let scale = (y0 - actual).abs().max(1e-3);
        assert!((actual - predicted).abs() <= 0.25 * scale, "t={t} predicted={predicted} actual={actual}");
    }
}

/// Spec §8 Scenario E ("adaptive substep"): a fast-moving particle forces
/// more substeps per frame, clamped to `max_substeps_per_frame`.
#[test]
fn faster_particles_trigger_more_cfl_bounded_substeps() {
    let dx = 0.1f32;
    let mut slow = DomainState::<f32>::new(16, 16, 16, dx);
    slow.initialize().unwrap();
    slow.load_marker_particle_data(&[Vector3::new(0.8, 0.8, 0.8)], &[Vector3::new(100.0 * dx, 0.0, 0.0)]);
    slow.update(1.0 / 30.0).unwrap();
    let slow_substeps = slow.frame_stats().substep_count;

    let mut fast = DomainState::<f32>::new(16, 16, 16, dx);
    fast.initialize().unwrap();
    fast.load_marker_particle_data(&[Vector3::new(0.8, 0.8, 0.8)], &[Vector3::new(1000.0 * dx, 0.0, 0.0)]);
    fast.update(1.0 / 30.0).unwrap();
    let fast_substeps = fast.frame_stats().substep_count;

    assert!(fast_substeps >= slow_substeps);
    assert!(fast_substeps <= fast.params().max_substeps_per_frame as usize);
    assert!(slow_substeps >= fast.params().min_substeps_per_frame as usize);
}

/// Spec §8 Scenario C ("inflow"): an inflow source steadily adds particles
/// over several frames.
#[test]
fn inflow_source_adds_particles_over_time() {
    let mut state = DomainState::<f32>::new(16, 16, 16, 0.1);
    state.initialize().unwrap();

    let source_mesh = box_mesh(Vector3::new(0.0, 0.5, 0.5), Vector3::new(0.3, 1.1, 1.1));
    state.add_mesh_fluid_source(
        source_mesh,
        flip_fluid_engine::domain_state::SourceKind::Inflow { velocity: Vector3::new(2.0, 0.0, 0.0) },
    );

    let mut counts = Vec::new();
    for _ in 0..6 {
        state.update(1.0 / 30.0).unwrap();
        counts.push(state.num_particles());
    }

    assert!(counts[5] > 0, "inflow produced no particles after 6 frames");
    assert!(counts.windows(2).all(|w| w[1] >= w[0]), "particle count should be non-decreasing while inflow is active");
}

/// Spec §8 "Solid non-penetration" as observable from outside `DomainState`:
/// a column of fluid resting above a floor obstacle should not tunnel
/// through it after several frames (checked via the particle y-coordinate
/// staying above the floor's top face, within a small buffer).
#[test]
fn fluid_does_not_tunnel_through_a_floor_obstacle() {
    let dx = 0.1f32;
    let mut state = DomainState::<f32>::new(10, 14, 10, dx);
    state.initialize().unwrap();

    let floor_top = 3.0 * dx;
    let floor = box_mesh(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(2.0, floor_top, 2.0));
    state.add_mesh_obstacle(flip_fluid_engine::mesh::MeshObject::static_mesh(floor.vertices, floor.triangles));

    for i in 3..7 {
        for j in 4..8 {
            for k in 3..7 {
                state.add_fluid_cells(&[(i, j, k)], Vector3::zeros());
            }
        }
    }

    for _ in 0..20 {
        state.update(1.0 / 30.0).unwrap();
    }

    let buffer = state.params().solid_buffer_width * dx;
    for (p, _) in state.particles() {
        assert!(p.y >= floor_top - buffer - 1e-3, "particle tunneled through the floor: {p:?}");
    }
}
