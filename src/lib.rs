/*!
# kinfit - Constrained kinematic fitting

Rust implementation of Lagrange-multiplier kinematic fits for particle
physics track collections.

## Features

- Common-vertex fit of 2 to 10 charged or neutral tracks in a solenoid field
- Optional invariant-mass constraint on the combined 4-momentum
- Per-track choice between a fixed mass hypothesis and a free energy
- Beam-spot prior or known vertex instead of a free vertex
- Full after-fit covariances, vertex–track and track–track correlations
- Mother particle construction from the fitted daughters

## Modules

- [`fit`] - Fitters, solver, track model, error propagation
- [`reporter`] - Observability hooks for fit execution
- [`common`] - Constants and linear algebra helpers

## Example

```rust,no_run
use kinfit::{FitConfig, FitStage, FitTrack, MassVertexFit};
use nalgebra::{Matrix6, Point3, Vector3};

let cov = Matrix6::identity() * 1e-4;
let mut fit = MassVertexFit::new(FitConfig::default());
fit.add_track(FitTrack::from_position_momentum(
    Point3::new(0.1, 0.0, 0.0),
    Vector3::new(0.4, 0.1, 0.2),
    &cov,
    0.13957,
    1.0,
))?;
fit.add_track(FitTrack::from_position_momentum(
    Point3::new(0.0, 0.1, 0.0),
    Vector3::new(-0.1, 0.5, -0.1),
    &cov,
    0.13957,
    -1.0,
))?;
fit.set_invariant_mass(0.497611);
fit.do_fit()?;

let vertex = fit.vertex(FitStage::AfterFit);
let chisq = fit.chisq();
# Ok::<(), kinfit::FitError>(())
```
*/

// ============================================================================
// Core modules
// ============================================================================

/// Kinematic fitters
///
/// - [`MassVertexFit`]: vertex fit with optional mass constraint
/// - [`LagrangeSolver`]: the generic constrained least-squares solver
/// - [`MotherCombiner`]: composite particle from fitted tracks
pub mod fit;

/// Observability hooks
pub mod reporter;

/// Low-level utilities (constants, linear algebra)
pub mod common;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Core types
pub use fit::{FitConfig, FitStage, FitTrack, Matrix3x7, Matrix7, TrackState, Vector7};

// Errors
pub use fit::{ErrorCode, FitError};

// Traits
pub use fit::{CompositeParticle, ConstraintModel, Linearization};

// Fitters and solver
pub use fit::{LagrangeSolver, MassVertexConstraints, MassVertexFit, SolverOutput, TrackProperty};

// Mother construction
pub use fit::{MotherCombiner, MotherState};

// Reporters
pub use reporter::{
    CompositeReporter, DebugReporter, FitReporter, FitSummary, LoggingReporter, NoOpReporter,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
