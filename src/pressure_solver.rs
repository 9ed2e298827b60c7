//! Variational pressure projection: builds the weighted Poisson system from
//! face-area fractions and liquid occupancy, solves it with a modified
//! incomplete-Cholesky preconditioned conjugate gradient (MICCG) iteration,
//! and applies the resulting pressure gradient to remove divergence from the
//! velocity field.
//!
//! The sparse system is stored the way Bridson's reference fluid solver
//! stores it rather than as a generic sparse matrix type: one diagonal grid
//! plus three off-diagonal grids for the `+i`, `+j`, `+k` neighbor
//! coefficients, since the stencil is always a symmetric 7-point Laplacian
//! and the symmetric half fully determines it.

use crate::error::SolverDivergence;
use crate::grid3d::Grid3D;
use crate::mac_field::MacField;
use crate::mesh_level_set::MeshLevelSet;
use crate::numeric_types::Real;
use crate::particle_level_set::ParticleLevelSet;

pub struct PressureSolverParams<R: Real> {
    pub max_iterations: usize,
    pub tolerance: R,
    /// Looser tolerance accepted (with a warning) when `max_iterations` is
    /// exhausted without reaching `tolerance` (spec §4.9), mirroring
    /// [`crate::viscosity_solver::ViscositySolverParams`]'s same field.
    pub acceptable_tolerance: R,
}

struct System<R: Real> {
    isize: usize,
    jsize: usize,
    ksize: usize,
    adiag: Grid3D<R>,
    aplusi: Grid3D<R>,
    aplusj: Grid3D<R>,
    aplusk: Grid3D<R>,
    rhs: Grid3D<R>,
}

fn is_fluid<R: Real>(liquid: &ParticleLevelSet<R>, i: isize, j: isize, k: isize) -> bool {
    liquid.phi().in_bounds(i, j, k) && liquid.is_liquid(i, j, k)
}

/// Ghost-fluid scale factor for an air-side neighbor (spec §4.9): the plain
/// face-weight diagonal contribution `w_f * scale` is divided by
/// `theta = phi_c / (phi_c - phi_n)`, the fraction of the cell-to-neighbor
/// distance that actually lies in the liquid, so a sliver of air right at the
/// free surface doesn't get the same coupling as a full air cell. `theta` is
/// floored at `MIN_THETA` rather than allowed to approach zero, matching
/// Bridson's reference treatment of the singularity at an exact interface
/// crossing.
const MIN_THETA: f64 = 0.01;

fn ghost_fluid_scale<R: Real>(liquid: &ParticleLevelSet<R>, phi_c: R, ni: isize, nj: isize, nk: isize) -> R {
    if !liquid.phi().in_bounds(ni, nj, nk) {
        return R::one_();
    }
    let phi_n = liquid.phi().get(ni, nj, nk);
    let denom = phi_c - phi_n;
    let min_theta = R::from_f64(MIN_THETA).unwrap();
    if denom.abs() <= R::from_f64(1e-12).unwrap() {
        return R::one_() / min_theta;
    }
    let theta = (phi_c / denom).max(min_theta);
    R::one_() / theta
}

fn build_system<R: Real>(velocity: &MacField<R>, liquid: &ParticleLevelSet<R>, solid: &MeshLevelSet<R>, dt: R, density: R) -> System<R> {
    let (isize, jsize, ksize) = velocity.dims();
    let dx = velocity.dx();
    let scale = dt / (density * dx * dx);

    let mut adiag = Grid3D::<R>::new(isize, jsize, ksize);
    let mut aplusi = Grid3D::<R>::new(isize, jsize, ksize);
    let mut aplusj = Grid3D::<R>::new(isize, jsize, ksize);
    let mut aplusk = Grid3D::<R>::new(isize, jsize, ksize);
    let mut rhs = Grid3D::<R>::new(isize, jsize, ksize);

    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                if !is_fluid(liquid, i, j, k) {
                    continue;
                }

                let mut diag = R::zero();
                let mut divergence = R::zero();
                let phi_c = liquid.phi().get(i, j, k);

                // +i neighbor (shared face u[i+1])
                let w_xp = solid.weight_u().get(i + 1, j, k);
                let u_xp = velocity.u().get(i + 1, j, k);
                divergence = divergence - w_xp * u_xp;
                if is_fluid(liquid, i + 1, j, k) {
                    diag = diag + w_xp * scale;
                    aplusi.set(i, j, k, -w_xp * scale).ok();
                } else {
                    diag = diag + w_xp * scale * ghost_fluid_scale(liquid, phi_c, i + 1, j, k);
                }

                // -i neighbor (shared face u[i])
                let w_xm = solid.weight_u().get(i, j, k);
                let u_xm = velocity.u().get(i, j, k);
                divergence = divergence + w_xm * u_xm;
                if !is_fluid(liquid, i - 1, j, k) {
                    diag = diag + w_xm * scale * ghost_fluid_scale(liquid, phi_c, i - 1, j, k);
                }

                // +j neighbor
                let w_yp = solid.weight_v().get(i, j + 1, k);
                let v_yp = velocity.v().get(i, j + 1, k);
                divergence = divergence - w_yp * v_yp;
                if is_fluid(liquid, i, j + 1, k) {
                    diag = diag + w_yp * scale;
                    aplusj.set(i, j, k, -w_yp * scale).ok();
                } else {
                    diag = diag + w_yp * scale * ghost_fluid_scale(liquid, phi_c, i, j + 1, k);
                }

                // -j neighbor
                let w_ym = solid.weight_v().get(i, j, k);
                let v_ym = velocity.v().get(i, j, k);
                divergence = divergence + w_ym * v_ym;
                if !is_fluid(liquid, i, j - 1, k) {
                    diag = diag + w_ym * scale * ghost_fluid_scale(liquid, phi_c, i, j - 1, k);
                }

                // +k neighbor
                let w_zp = solid.weight_w().get(i, j, k + 1);
                let w_zp_vel = velocity.w().get(i, j, k + 1);
                divergence = divergence - w_zp * w_zp_vel;
                if is_fluid(liquid, i, j, k + 1) {
                    diag = diag + w_zp * scale;
                    aplusk.set(i, j, k, -w_zp * scale).ok();
                } else {
                    diag = diag + w_zp * scale * ghost_fluid_scale(liquid, phi_c, i, j, k + 1);
                }

                // -k neighbor
                let w_zm = solid.weight_w().get(i, j, k);
                let w_zm_vel = velocity.w().get(i, j, k);
                divergence = divergence + w_zm * w_zm_vel;
                if !is_fluid(liquid, i, j, k - 1) {
                    diag = diag + w_zm * scale * ghost_fluid_scale(liquid, phi_c, i, j, k - 1);
                }

                adiag.set(i, j, k, diag).ok();
                rhs.set(i, j, k, divergence / dx).ok();
            }
        }
    }

    System {
        isize,
        jsize,
        ksize,
        adiag,
        aplusi,
        aplusj,
        aplusk,
        rhs,
    }
}

fn apply_matrix<R: Real>(system: &System<R>, x: &Grid3D<R>, out: &mut Grid3D<R>) {
    let (isize, jsize, ksize) = (system.isize, system.jsize, system.ksize);
    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                let mut value = system.adiag.get(i, j, k) * x.get(i, j, k);
                value = value + system.aplusi.get(i, j, k) * x.get(i + 1, j, k);
                value = value + system.aplusj.get(i, j, k) * x.get(i, j + 1, k);
                value = value + system.aplusk.get(i, j, k) * x.get(i, j, k + 1);
                if i > 0 {
                    value = value + system.aplusi.get(i - 1, j, k) * x.get(i - 1, j, k);
                }
                if j > 0 {
                    value = value + system.aplusj.get(i, j - 1, k) * x.get(i, j - 1, k);
                }
                if k > 0 {
                    value = value + system.aplusk.get(i, j, k - 1) * x.get(i, j, k - 1);
                }
                out.set(i, j, k, value).ok();
            }
        }
    }
}

/// Builds the MIC(0) preconditioner diagonal (Bridson, "Fluid Simulation for
/// Computer Graphics", §4.4).
fn build_precon<R: Real>(system: &System<R>) -> Grid3D<R> {
    let (isize, jsize, ksize) = (system.isize, system.jsize, system.ksize);
    let mut precon = Grid3D::<R>::new(isize, jsize, ksize);
    let tau = R::from_f64(0.97).unwrap();
    let sigma = R::from_f64(0.25).unwrap();
    let safety = R::from_f64(1e-6).unwrap();

    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                let adiag = system.adiag.get(i, j, k);
                if adiag == R::zero() {
                    continue;
                }

                let (pi, pj, pk) = (
                    if i > 0 { precon.get(i - 1, j, k) } else { R::zero() },
                    if j > 0 { precon.get(i, j - 1, k) } else { R::zero() },
                    if k > 0 { precon.get(i, j, k - 1) } else { R::zero() },
                );
                let (ai, aj, ak) = (
                    if i > 0 { system.aplusi.get(i - 1, j, k) } else { R::zero() },
                    if j > 0 { system.aplusj.get(i, j - 1, k) } else { R::zero() },
                    if k > 0 { system.aplusk.get(i, j, k - 1) } else { R::zero() },
                );

                let e = adiag
                    - (ai * pi) * (ai * pi)
                    - (aj * pj) * (aj * pj)
                    - (ak * pk) * (ak * pk)
                    - tau
                        * (ai
                            * (if i > 0 {
                                (system.aplusj.get(i - 1, j, k) + system.aplusk.get(i - 1, j, k)) * pi * pi
                            } else {
                                R::zero()
                            })
                            + aj
                                * (if j > 0 {
                                    (system.aplusi.get(i, j - 1, k) + system.aplusk.get(i, j - 1, k)) * pj * pj
                                } else {
                                    R::zero()
                                })
                            + ak * (if k > 0 {
                                (system.aplusi.get(i, j, k - 1) + system.aplusj.get(i, j, k - 1)) * pk * pk
                            } else {
                                R::zero()
                            }));

                let e = if e < sigma * adiag { adiag } else { e };
                precon.set(i, j, k, R::one_() / (e + safety).sqrt()).ok();
            }
        }
    }
    precon
}

fn apply_precon<R: Real>(system: &System<R>, precon: &Grid3D<R>, r: &Grid3D<R>, z: &mut Grid3D<R>) {
    let (isize, jsize, ksize) = (system.isize, system.jsize, system.ksize);
    let mut q = Grid3D::<R>::new(isize, jsize, ksize);

    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                if system.adiag.get(i, j, k) == R::zero() {
                    continue;
                }
                let ai = if i > 0 { system.aplusi.get(i - 1, j, k) } else { R::zero() };
                let aj = if j > 0 { system.aplusj.get(i, j - 1, k) } else { R::zero() };
                let ak = if k > 0 { system.aplusk.get(i, j, k - 1) } else { R::zero() };
                let pi = if i > 0 { precon.get(i - 1, j, k) } else { R::zero() };
                let pj = if j > 0 { precon.get(i, j - 1, k) } else { R::zero() };
                let pk = if k > 0 { precon.get(i, j, k - 1) } else { R::zero() };
                let qi = if i > 0 { q.get(i - 1, j, k) } else { R::zero() };
                let qj = if j > 0 { q.get(i, j - 1, k) } else { R::zero() };
                let qk = if k > 0 { q.get(i, j, k - 1) } else { R::zero() };

                let t = r.get(i, j, k) - ai * pi * qi - aj * pj * qj - ak * pk * qk;
                q.set(i, j, k, t * precon.get(i, j, k)).ok();
            }
        }
    }

    for k in (0..ksize as isize).rev() {
        for j in (0..jsize as isize).rev() {
            for i in (0..isize as isize).rev() {
                if system.adiag.get(i, j, k) == R::zero() {
                    continue;
                }
                let ai = system.aplusi.get(i, j, k);
                let aj = system.aplusj.get(i, j, k);
                let ak = system.aplusk.get(i, j, k);
                let zi = if (i as usize) + 1 < isize { z.get(i + 1, j, k) } else { R::zero() };
                let zj = if (j as usize) + 1 < jsize { z.get(i, j + 1, k) } else { R::zero() };
                let zk = if (k as usize) + 1 < ksize { z.get(i, j, k + 1) } else { R::zero() };
                let p = precon.get(i, j, k);

                let t = q.get(i, j, k) - ai * p * zi - aj * p * zj - ak * p * zk;
                z.set(i, j, k, t * p).ok();
            }
        }
    }
}

fn dot<R: Real>(a: &Grid3D<R>, b: &Grid3D<R>) -> R {
    a.as_slice().iter().zip(b.as_slice()).fold(R::zero(), |acc, (x, y)| acc + *x * *y)
}

fn infinity_norm<R: Real>(a: &Grid3D<R>) -> R {
    a.as_slice().iter().fold(R::zero(), |acc, x| if x.abs() > acc { x.abs() } else { acc })
}

/// Solves the pressure Poisson system and subtracts `dt/(density*dx) *
/// grad(pressure)` from `velocity`'s fluid-adjacent faces, zeroing any face
/// that borders a zero-weight (fully solid) neighbor.
pub fn project<R: Real>(
    velocity: &mut MacField<R>,
    liquid: &ParticleLevelSet<R>,
    solid: &MeshLevelSet<R>,
    dt: R,
    density: R,
    params: &PressureSolverParams<R>,
) -> Result<Grid3D<R>, SolverDivergence> {
    let system = build_system(velocity, liquid, solid, dt, density);
    let (isize, jsize, ksize) = (system.isize, system.jsize, system.ksize);

    let mut pressure = Grid3D::<R>::new(isize, jsize, ksize);
    let mut residual = system.rhs.clone();
    let initial_norm = infinity_norm(&residual);

    if initial_norm <= params.tolerance {
        return Ok(pressure);
    }

    let precon = build_precon(&system);
    let mut z = Grid3D::<R>::new(isize, jsize, ksize);
    apply_precon(&system, &precon, &residual, &mut z);
    let mut search = z.clone();
    let mut sigma = dot(&residual, &z);
    let mut last_norm = initial_norm;

    for iteration in 0..params.max_iterations {
        let mut a_search = Grid3D::<R>::new(isize, jsize, ksize);
        apply_matrix(&system, &search, &mut a_search);
        let denom = dot(&search, &a_search);
        if denom.abs() <= R::from_f64(1e-30).unwrap() {
            break;
        }
        let alpha = sigma / denom;

        for i in 0..pressure.len() {
            pressure.as_mut_slice()[i] = pressure.as_slice()[i] + search.as_slice()[i] * alpha;
            residual.as_mut_slice()[i] = residual.as_slice()[i] - a_search.as_slice()[i] * alpha;
        }

        last_norm = infinity_norm(&residual);
        if last_norm.to_f64().unwrap_or(f64::MAX) <= params.tolerance.to_f64().unwrap_or(0.0) {
            apply_gradient(velocity, &pressure, liquid, solid, dt, density);
            return Ok(pressure);
        }

        apply_precon(&system, &precon, &residual, &mut z);
        let sigma_new = dot(&residual, &z);
        let beta = sigma_new / sigma;
        for i in 0..search.len() {
            search.as_mut_slice()[i] = z.as_slice()[i] + search.as_slice()[i] * beta;
        }
        sigma = sigma_new;

        if iteration == params.max_iterations - 1 {
            if last_norm <= params.acceptable_tolerance {
                log::warn!("pressure solve reached only acceptable tolerance ({:?}) after {} iterations", last_norm.to_f64(), params.max_iterations);
                apply_gradient(velocity, &pressure, liquid, solid, dt, density);
                return Ok(pressure);
            }
            return Err(SolverDivergence {
                solver: "pressure-miccg",
                residual: last_norm.to_f64().unwrap_or(f64::MAX),
                iterations: params.max_iterations,
            });
        }
    }

    if last_norm <= params.acceptable_tolerance {
        apply_gradient(velocity, &pressure, liquid, solid, dt, density);
        Ok(pressure)
    } else {
        Err(SolverDivergence {
            solver: "pressure-miccg",
            residual: last_norm.to_f64().unwrap_or(f64::MAX),
            iterations: params.max_iterations,
        })
    }
}

fn apply_gradient<R: Real>(velocity: &mut MacField<R>, pressure: &Grid3D<R>, liquid: &ParticleLevelSet<R>, solid: &MeshLevelSet<R>, dt: R, density: R) {
    let (isize, jsize, ksize) = velocity.dims();
    let dx = velocity.dx();
    let scale = dt / (density * dx);

    for k in 0..ksize as isize {
        for j in 0..jsize as isize {
            for i in 1..isize as isize {
                if solid.weight_u().get(i, j, k) <= R::zero() {
                    velocity.u_mut().set(i, j, k, R::zero()).ok();
                    continue;
                }
                if is_fluid(liquid, i - 1, j, k) || is_fluid(liquid, i, j, k) {
                    let grad = pressure.get(i, j, k) - pressure.get(i - 1, j, k);
                    let updated = velocity.u().get(i, j, k) - scale * grad;
                    velocity.u_mut().set(i, j, k, updated).ok();
                }
            }
        }
    }

    for k in 0..ksize as isize {
        for j in 1..jsize as isize {
            for i in 0..isize as isize {
                if solid.weight_v().get(i, j, k) <= R::zero() {
                    velocity.v_mut().set(i, j, k, R::zero()).ok();
                    continue;
                }
                if is_fluid(liquid, i, j - 1, k) || is_fluid(liquid, i, j, k) {
                    let grad = pressure.get(i, j, k) - pressure.get(i, j - 1, k);
                    let updated = velocity.v().get(i, j, k) - scale * grad;
                    velocity.v_mut().set(i, j, k, updated).ok();
                }
            }
        }
    }

    for k in 1..ksize as isize {
        for j in 0..jsize as isize {
            for i in 0..isize as isize {
                if solid.weight_w().get(i, j, k) <= R::zero() {
                    velocity.w_mut().set(i, j, k, R::zero()).ok();
                    continue;
                }
                if is_fluid(liquid, i, j, k - 1) || is_fluid(liquid, i, j, k) {
                    let grad = pressure.get(i, j, k) - pressure.get(i, j, k - 1);
                    let updated = velocity.w().get(i, j, k) - scale * grad;
                    velocity.w_mut().set(i, j, k, updated).ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn divergence_decreases_after_projection() {
        let dx = 0.1f32;
        let mut velocity = MacField::<f32>::new(6, 6, 6, dx);
        // inject a divergent point source at the center
        velocity.u_mut().set(3, 3, 3, 1.0).unwrap();
        velocity.u_mut().set(4, 3, 3, 2.0).unwrap();

        let mut liquid = ParticleLevelSet::<f32>::new(6, 6, 6, dx);
        let mut particles = Vec::new();
        for k in 1..5 {
            for j in 1..5 {
                for i in 1..5 {
                    particles.push((Vector3::new((i as f32 + 0.5) * dx, (j as f32 + 0.5) * dx, (k as f32 + 0.5) * dx), Vector3::zeros()));
                }
            }
        }
        let radius = crate::particle_level_set::particle_radius(dx);
        liquid.rebuild(&particles, radius);

        let solid = MeshLevelSet::<f32>::empty(6, 6, 6, dx);
        let params = PressureSolverParams {
            max_iterations: 200,
            tolerance: 1e-4,
            acceptable_tolerance: 1.0,
        };

        let divergence_before = cell_divergence(&velocity, 3, 3, 3);
        project(&mut velocity, &liquid, &solid, 0.01, 1000.0, &params).unwrap();
        let divergence_after = cell_divergence(&velocity, 3, 3, 3);

        assert!(divergence_after.abs() < divergence_before.abs());
    }

    fn cell_divergence(v: &MacField<f32>, i: isize, j: isize, k: isize) -> f32 {
        v.u().get(i + 1, j, k) - v.u().get(i, j, k) + v.v().get(i, j + 1, k) - v.v().get(i, j, k) + v.w().get(i, j, k + 1) - v.w().get(i, j, k)
    }
}
