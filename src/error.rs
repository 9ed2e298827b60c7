//! Error taxonomy for the simulation core (spec §7).

use thiserror::Error as ThisError;

/// Errors raised while validating a [`crate::config::SimulationParameters`]
/// at `initialize()` time.
#[non_exhaustive]
#[derive(Debug, Clone, ThisError)]
pub enum ConfigError {
    #[error("grid dimensions must be positive, got ({0}, {1}, {2})")]
    NonPositiveDimensions(i64, i64, i64),
    #[error("dx must be positive, got {0}")]
    NonPositiveDx(f64),
    #[error("cfl_number must be in [1, 10], got {0}")]
    CflOutOfRange(f64),
    #[error("min_substeps_per_frame ({0}) must be <= max_substeps_per_frame ({1})")]
    SubstepBoundsInverted(u32, u32),
    #[error("pic_flip_ratio must be in [0, 1], got {0}")]
    PicFlipRatioOutOfRange(f64),
    #[error("{0} must be in [0, 1], got {1}")]
    FractionOutOfRange(&'static str, f64),
}

/// A debug-mode assertion for grid index misuse (spec §7). Release builds
/// may elide the check that produces this at the call site, but the type
/// always exists so accelerated and non-accelerated paths share one error.
#[derive(Debug, Clone, Copy, ThisError)]
#[error("grid index ({i}, {j}, {k}) out of bounds for ({isize}, {jsize}, {ksize})")]
pub struct OutOfBounds {
    pub i: i64,
    pub j: i64,
    pub k: i64,
    pub isize: i64,
    pub jsize: i64,
    pub ksize: i64,
}

/// Raised when the MICCG solver fails to reach even the acceptable
/// tolerance within `max_iterations` (spec §4.9, §7).
#[derive(Debug, Clone, ThisError)]
#[error("{solver} did not converge: residual {residual:e} after {iterations} iterations")]
pub struct SolverDivergence {
    pub solver: &'static str,
    pub residual: f64,
    pub iterations: usize,
}

/// Raised by an [`crate::accelerator::Accelerator`] implementation when a
/// device-backed operation fails. The scheduler recovers from this by
/// permanently falling back to the CPU accelerator for the rest of the run.
#[derive(Debug, Clone, ThisError)]
#[error("accelerator backend failure: {0}")]
pub struct BackendError(pub String);

/// Top level error returned from the public `DomainState` contract.
///
/// `Unknown` is the same "anything else" escape hatch the teacher's own
/// `ReconstructionError` carries: a conversion from [`anyhow::Error`] rather
/// than a pre-formatted string, so call sites can attach context with
/// `anyhow::anyhow!`/`.context()` instead of building a `String` by hand.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBounds),
    #[error(transparent)]
    Diverged(#[from] SolverDivergence),
    #[error("a worker thread panicked while executing a substep")]
    WorkerPanic,
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
