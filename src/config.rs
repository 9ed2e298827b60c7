//! `SimulationParameters`: the configuration record enumerated in spec §3.
//!
//! A plain generic struct validated once at [`crate::domain_state::DomainState::initialize`]
//! time, the way the teacher crate's own `Parameters<R>` is a plain struct
//! validated by `grid_for_reconstruction`/`reconstruct_surface_inplace` rather
//! than routed through an external config crate.

use crate::error::ConfigError;
use crate::numeric_types::Real;

/// Either a single scalar applied uniformly, or a value that the caller has
/// already rasterized onto a per-cell field (spec §3: "viscosity (constant or
/// per-cell field)"). `DomainState::set_viscosity` accepts either form.
#[derive(Clone, Debug)]
pub enum ScalarOrField<R: Real> {
    Constant(R),
    Field(crate::grid3d::Grid3D<R>),
}

impl<R: Real> ScalarOrField<R> {
    pub fn sample(&self, i: isize, j: isize, k: isize) -> R {
        match self {
            ScalarOrField::Constant(v) => *v,
            ScalarOrField::Field(grid) => {
                if grid.in_bounds(i, j, k) {
                    grid.get(i, j, k)
                } else {
                    R::zero()
                }
            }
        }
    }

    pub fn is_nonzero_anywhere(&self) -> bool {
        match self {
            ScalarOrField::Constant(v) => *v > R::zero(),
            ScalarOrField::Field(grid) => grid.as_slice().iter().any(|v| *v > R::zero()),
        }
    }

    /// Reduces a per-cell field to the single scalar `viscosity_solver::solve`
    /// expects, as the arithmetic mean of its cells; a constant is returned
    /// unchanged. The per-cell spatial variation a `Field` carries is lost
    /// here by construction (spec §9 open question, resolved: the solver
    /// itself is decoupled-per-component scalar, so a spatially varying
    /// viscosity is approximated by its average until the solver grows a
    /// field-aware variant).
    pub fn representative(&self) -> R {
        match self {
            ScalarOrField::Constant(v) => *v,
            ScalarOrField::Field(grid) => {
                let slice = grid.as_slice();
                if slice.is_empty() {
                    return R::zero();
                }
                let sum = slice.iter().fold(R::zero(), |acc, v| acc + *v);
                sum / R::from_usize(slice.len()).unwrap()
            }
        }
    }
}

/// Policy for dropping particles whose speed has run away (spec §3, §4.12
/// step 15, §9 open question: a particle simultaneously past the domain
/// boundary *and* inside an obstacle is removed, never reflected).
#[derive(Clone, Copy, Debug)]
pub struct ExtremeVelocityRemoval<R: Real> {
    pub enabled: bool,
    /// Fraction (in `[0, 1]`) of the fastest particles eligible for removal.
    pub max_pct: R,
    /// Absolute speed threshold (m/s) a particle must exceed to be eligible.
    pub max_abs: R,
}

impl<R: Real> Default for ExtremeVelocityRemoval<R> {
    fn default() -> Self {
        Self {
            enabled: false,
            max_pct: R::from_f64(0.0).unwrap(),
            max_abs: R::max_value(),
        }
    }
}

/// All tunables recognized by the engine (spec §3's configuration block).
/// Setters on [`crate::domain_state::DomainState`] populate this struct and
/// cause no side effects until `initialize()` validates it.
#[derive(Clone, Debug)]
pub struct SimulationParameters<R: Real> {
    pub isize: usize,
    pub jsize: usize,
    pub ksize: usize,
    pub dx: R,

    pub density: R,
    pub viscosity: ScalarOrField<R>,

    pub cfl_number: R,
    pub min_substeps_per_frame: u32,
    pub max_substeps_per_frame: u32,
    pub pic_flip_ratio: R,

    pub marker_particle_scale: R,
    pub jitter_factor: R,

    pub surface_subdivision: u32,
    pub surface_smoothing_value: R,
    pub surface_smoothing_iterations: u32,
    pub min_polyhedron_triangles: usize,

    pub boundary_friction: R,
    pub extreme_velocity_removal: ExtremeVelocityRemoval<R>,
    pub adaptive_obstacle_time_stepping: bool,

    pub preferred_accelerator_device: Option<String>,
    pub async_meshing: bool,

    /// Extrapolation layer count applied after each pressure solve (spec
    /// §4.12 step 11 default: `max(isize,jsize,ksize)/2`). `None` uses the
    /// spec default at `initialize()` time.
    pub extrapolation_layers: Option<usize>,

    /// Gravity / constant body force, added every substep (spec §4.12 step 7).
    pub gravity: nalgebra::Vector3<R>,

    /// Island-count threshold above which [`crate::mesh_level_set`] unions
    /// run on the bounded-queue worker pool rather than serially in a single
    /// thread (spec §9 open question, default ≈25, exposed as a tunable).
    pub parallel_union_island_threshold: usize,

    /// Side length (in cells) of the blocks used by [`crate::block_grid3d`]
    /// and [`crate::particle_block_sort`] (spec §3: "B = 8 or 10").
    pub block_width: usize,

    /// Solid collision buffer (spec §4.12 step 13, §8): particles are
    /// projected to `phi_s > solid_buffer_width * dx`.
    pub solid_buffer_width: R,

    /// Generates a cheap, unsmoothed preview mesh at native grid resolution
    /// after every substep rather than only the full surface mesh after the
    /// last one (spec §6: "preview mesh (same formats) when preview is
    /// enabled"; resolution/smoothing policy is this crate's own choice).
    pub enable_preview_mesh: bool,

    /// Exposes a per-frame snapshot of the obstacles' current-frame geometry
    /// (spec §6: "internal obstacle mesh snapshot when enabled").
    pub enable_obstacle_snapshot: bool,

    /// Per-cell marker particle cap (spec §3: a `MarkerParticle` is
    /// "destroyed when entering an outflow or exceeding per-cell density
    /// caps"). `None` disables the cap. When set, the particle closest to
    /// its cell's neighbor count limit is dropped every substep using
    /// [`crate::spatial_point_grid::SpatialPointGrid`], keeping the
    /// lowest-indexed particles in each over-full cell.
    pub max_particles_per_cell: Option<u32>,
}

impl<R: Real> SimulationParameters<R> {
    pub fn new(isize: usize, jsize: usize, ksize: usize, dx: R) -> Self {
        Self {
            isize,
            jsize,
            ksize,
            dx,
            density: R::from_f64(1000.0).unwrap(),
            viscosity: ScalarOrField::Constant(R::zero()),
            cfl_number: R::from_f64(5.0).unwrap(),
            min_substeps_per_frame: 1,
            max_substeps_per_frame: 6,
            pic_flip_ratio: R::from_f64(0.05).unwrap(),
            marker_particle_scale: R::from_f64(1.0).unwrap(),
            jitter_factor: R::from_f64(0.1).unwrap(),
            surface_subdivision: 1,
            surface_smoothing_value: R::from_f64(0.5).unwrap(),
            surface_smoothing_iterations: 2,
            min_polyhedron_triangles: 0,
            boundary_friction: R::zero(),
            extreme_velocity_removal: ExtremeVelocityRemoval::default(),
            adaptive_obstacle_time_stepping: false,
            preferred_accelerator_device: None,
            async_meshing: false,
            extrapolation_layers: None,
            gravity: nalgebra::Vector3::new(R::zero(), R::from_f64(-9.8).unwrap(), R::zero()),
            parallel_union_island_threshold: 25,
            block_width: 8,
            solid_buffer_width: R::from_f64(0.1).unwrap(),
            enable_preview_mesh: false,
            enable_obstacle_snapshot: false,
            max_particles_per_cell: None,
        }
    }

    /// The extrapolation layer count to use, defaulting to
    /// `max(isize,jsize,ksize)/2` per spec §4.12 step 11 when unset.
    pub fn effective_extrapolation_layers(&self) -> usize {
        self.extrapolation_layers
            .unwrap_or_else(|| self.isize.max(self.jsize).max(self.ksize) / 2)
    }

    /// Validates everything spec §7 assigns to `ConfigError`, caught at
    /// `initialize()`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.isize == 0 || self.jsize == 0 || self.ksize == 0 {
            return Err(ConfigError::NonPositiveDimensions(self.isize as i64, self.jsize as i64, self.ksize as i64));
        }
        if self.dx <= R::zero() {
            return Err(ConfigError::NonPositiveDx(self.dx.to_f64().unwrap_or(0.0)));
        }
        let cfl = self.cfl_number.to_f64().unwrap_or(0.0);
        if !(1.0..=10.0).contains(&cfl) {
            return Err(ConfigError::CflOutOfRange(cfl));
        }
        if self.min_substeps_per_frame > self.max_substeps_per_frame {
            return Err(ConfigError::SubstepBoundsInverted(self.min_substeps_per_frame, self.max_substeps_per_frame));
        }
        let ratio = self.pic_flip_ratio.to_f64().unwrap_or(0.0);
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::PicFlipRatioOutOfRange(ratio));
        }
        let friction = self.boundary_friction.to_f64().unwrap_or(0.0);
        if !(0.0..=1.0).contains(&friction) {
            return Err(ConfigError::FractionOutOfRange("boundary_friction", friction));
        }
        let max_pct = self.extreme_velocity_removal.max_pct.to_f64().unwrap_or(0.0);
        if !(0.0..=1.0).contains(&max_pct) {
            return Err(ConfigError::FractionOutOfRange("extreme_velocity_removal.max_pct", max_pct));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let params = SimulationParameters::<f32>::new(8, 8, 8, 0.1);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn rejects_cfl_out_of_range() {
        let mut params = SimulationParameters::<f32>::new(8, 8, 8, 0.1);
        params.cfl_number = 0.5;
        assert!(matches!(params.validate(), Err(ConfigError::CflOutOfRange(_))));
    }

    #[test]
    fn rejects_inverted_substep_bounds() {
        let mut params = SimulationParameters::<f32>::new(8, 8, 8, 0.1);
        params.min_substeps_per_frame = 8;
        params.max_substeps_per_frame = 2;
        assert!(matches!(params.validate(), Err(ConfigError::SubstepBoundsInverted(_, _))));
    }

    #[test]
    fn effective_extrapolation_layers_defaults_to_half_max_dim() {
        let params = SimulationParameters::<f32>::new(10, 20, 8, 0.1);
        assert_eq!(params.effective_extrapolation_layers(), 10);
    }
}
