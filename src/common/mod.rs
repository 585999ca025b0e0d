//! Common utilities shared by the fitters.
//!
//! This module contains numerical constants and the linear algebra helpers
//! (inversion, similarity transforms, χ² probabilities) used by the solver.

pub mod constants;
pub mod linalg;
