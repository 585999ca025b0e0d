//! Kinematic fitters and their building blocks
//!
//! - [`MassVertexFit`] - common vertex with an optional invariant mass
//! - [`LagrangeSolver`] - the iterative solver behind it
//! - [`ConstraintModel`] - the seam between solver and constraint equations
//! - [`MotherCombiner`] - composite particle from fitted daughters

pub mod config;
pub mod constraints;
pub mod errors;
pub mod mass_vertex;
pub mod mother;
pub mod propagation;
pub mod solver;
pub mod track;
pub mod traits;

pub use config::FitConfig;
pub use constraints::{MassVertexConstraints, TrackProperty};
pub use errors::{ErrorCode, FitError};
pub use mass_vertex::MassVertexFit;
pub use mother::{MotherCombiner, MotherState};
pub use solver::{LagrangeSolver, SolverOutput};
pub use track::{FitStage, FitTrack, Matrix3x7, Matrix7, TrackState, Vector7};
pub use traits::{CompositeParticle, ConstraintModel, Linearization};
