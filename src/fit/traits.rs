//! Core traits for fitters and their collaborators
//!
//! [`ConstraintModel`] is the seam between the generic Lagrange-multiplier
//! solver and a concrete fit: the model supplies residuals and Jacobians, the
//! solver does the linear algebra. [`CompositeParticle`] is the sink the
//! fitted mother particle is written into.

use nalgebra::{DMatrix, DVector, Point3, Vector3, Vector4};

use super::errors::FitError;
use super::track::Matrix7;

/// Constraint equations linearised at one point
///
/// For `m` constraints on `n` track parameters:
/// - `residual` is `d` (m)
/// - `jacobian` is `D = ∂d/∂α` (m × n)
/// - `vertex_jacobian` is `E = ∂d/∂v` (m × 3)
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    /// Constraint residuals `d`
    pub residual: DVector<f64>,
    /// Derivatives with respect to the track parameters
    pub jacobian: DMatrix<f64>,
    /// Derivatives with respect to the vertex
    pub vertex_jacobian: DMatrix<f64>,
}

impl Linearization {
    /// Zero-filled linearisation for `m` constraints on `n` parameters
    pub fn zeros(m: usize, n: usize) -> Self {
        Self {
            residual: DVector::zeros(m),
            jacobian: DMatrix::zeros(m, n),
            vertex_jacobian: DMatrix::zeros(m, 3),
        }
    }

    /// Number of constraint equations
    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.residual.len()
    }
}

/// A set of constraint equations on track parameters and a common vertex
///
/// Implementations evaluate the constraints at the current iterate. Any
/// degeneracy must be reported as an error rather than a partially filled
/// linearisation.
pub trait ConstraintModel {
    /// Length of the track parameter vector
    fn num_params(&self) -> usize;

    /// Number of constraint equations
    fn num_constraints(&self) -> usize;

    /// Residuals and Jacobians at `params` and `vertex`
    fn linearize(
        &self,
        params: &DVector<f64>,
        vertex: &Vector3<f64>,
    ) -> Result<Linearization, FitError>;
}

/// Destination for a fitted composite particle
///
/// Implemented by whatever particle representation the caller uses.
pub trait CompositeParticle {
    /// Overwrite the particle's kinematics
    ///
    /// # Arguments
    /// * `momentum` - (px, py, pz, E)
    /// * `position` - Decay vertex
    /// * `error` - 7×7 covariance of (px, py, pz, E, x, y, z)
    /// * `p_value` - χ² probability of the fit that produced it
    fn update_momentum(
        &mut self,
        momentum: Vector4<f64>,
        position: Point3<f64>,
        error: Matrix7,
        p_value: f64,
    );
}
