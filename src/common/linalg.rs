//! Linear algebra utilities
//!
//! Matrix inversion with a Cholesky-first strategy, similarity transforms and
//! χ² helpers used by the constrained least-squares solver.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::fit::FitError;

/// Invert a (symmetric) matrix
///
/// Tries a Cholesky factorisation first and falls back to LU for matrices that
/// are invertible but not positive definite.
///
/// # Arguments
/// * `matrix` - Square matrix to invert
/// * `context` - Which matrix this is, carried into the error
///
/// # Returns
/// The inverse, or [`FitError::CannotGetMatrixInverse`] if the matrix is singular
pub fn try_inverse(matrix: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>, FitError> {
    if let Some(chol) = matrix.clone().cholesky() {
        let inverse = chol.inverse();
        if inverse.iter().all(|v| v.is_finite()) {
            return Ok(inverse);
        }
    }

    match matrix.clone().try_inverse() {
        Some(inverse) if inverse.iter().all(|v| v.is_finite()) => Ok(inverse),
        _ => Err(FitError::CannotGetMatrixInverse {
            context: context.to_string(),
        }),
    }
}

/// Similarity transform `m * v * mᵀ`
///
/// Propagates a covariance `v` through a linear map `m`.
pub fn similarity(m: &DMatrix<f64>, v: &DMatrix<f64>) -> DMatrix<f64> {
    m * v * m.transpose()
}

/// Quadratic form `xᵀ * cov⁻¹ * x`
///
/// # Returns
/// The squared Mahalanobis length, or an error if `cov` is singular
pub fn chisq_form(x: &DVector<f64>, cov: &DMatrix<f64>, context: &str) -> Result<f64, FitError> {
    let inverse = try_inverse(cov, context)?;
    Ok(x.dot(&(inverse * x)))
}

/// Make matrix symmetric
///
/// Averages with the transpose to remove round-off asymmetry.
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (matrix + matrix.transpose())
}

/// Check if matrix is positive definite
pub fn is_positive_definite(matrix: &DMatrix<f64>) -> bool {
    matrix.clone().cholesky().is_some()
}

/// Upper-tail χ² probability
///
/// Probability that a χ²-distributed variable with `ndf` degrees of freedom
/// exceeds `chisq`. Returns 0 for non-positive `ndf` or negative `chisq`.
pub fn chisq_probability(chisq: f64, ndf: i32) -> f64 {
    if ndf <= 0 || chisq < 0.0 || !chisq.is_finite() {
        return 0.0;
    }
    match ChiSquared::new(f64::from(ndf)) {
        Ok(dist) => dist.sf(chisq),
        Err(_) => 0.0,
    }
}
