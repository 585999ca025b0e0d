//! Numerical constants used throughout the kinematic fitters
//!
//! Physical constants and fixed limits. User-tunable values (field, iteration
//! cap, starting χ²) live in [`FitConfig`](crate::fit::FitConfig) and only take
//! their defaults from here.

/// Number of parameters per track: (px, py, pz, E, x, y, z)
pub const TRACK_PARAMS: usize = 7;

/// Number of parameters per track without the energy slot: (px, py, pz, x, y, z)
pub const TRACK_PARAMS_NO_ENERGY: usize = 6;

/// Dimension of the vertex unknown
pub const VERTEX_DIM: usize = 3;

/// Geometric constraint equations contributed by each track
pub const CONSTRAINTS_PER_TRACK: usize = 2;

/// Maximum number of tracks a single fit accepts
///
/// The global covariance is 7N × 7N, so this bounds the working set.
pub const MAX_TRACK_COUNT: usize = 10;

/// Minimum number of tracks required to determine a vertex
pub const NECESSARY_TRACK_COUNT: usize = 2;

/// Speed of light in GeV/c per (T·cm)
///
/// The curvature coefficient of a track is `a = -LIGHT_SPEED * B * charge`.
pub const LIGHT_SPEED: f64 = 0.002_997_924_58;

/// Default solenoid field in Tesla
pub const DEFAULT_MAGNETIC_FIELD: f64 = 1.5;

/// Default iteration cap for both the inner (vertex) and outer (track) loops
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// χ² the first iteration has to beat
///
/// A first iteration that does not improve on this is reported as
/// [`FitError::BadInitialChiSquare`](crate::fit::FitError::BadInitialChiSquare).
pub const DEFAULT_INITIAL_CHISQ: f64 = 1.0e6;
