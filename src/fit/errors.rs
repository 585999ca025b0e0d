//! Error types for the kinematic fitters
//!
//! Every fallible operation returns [`FitError`]. [`ErrorCode`] is the flat
//! code taxonomy for callers that only need to branch on the kind of failure.

use thiserror::Error;

/// Errors that can occur while preparing, running or reading back a fit
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Wrong number of tracks, or a mass-fix flag list of the wrong length
    #[error("bad track size: expected {expected}, got {actual}")]
    BadTrackSize {
        /// What was expected (a bound or an exact count)
        expected: usize,
        /// What was supplied
        actual: usize,
    },

    /// Number of pairwise correlation blocks is not N(N-1)/2
    #[error("bad correlation size: expected {expected} blocks, got {actual}")]
    BadCorrelationSize {
        /// N(N-1)/2
        expected: usize,
        /// Blocks supplied
        actual: usize,
    },

    /// Degenerate geometry or kinematics (zero pt, |B| > 1, zero energy)
    #[error("division by zero: {context}")]
    DivisionByZero {
        /// Which quantity vanished
        context: String,
    },

    /// Matrix inversion failed (singular matrix)
    #[error("cannot get matrix inverse: {context}")]
    CannotGetMatrixInverse {
        /// Which matrix failed
        context: String,
    },

    /// Track id or stage flag outside the valid range
    #[error("index {index} out of range (len {len})")]
    OutOfRange {
        /// Offending index or flag
        index: i64,
        /// Number of valid entries
        len: usize,
    },

    /// The first iteration did not improve on the starting χ²
    #[error("bad initial chi-square: {chisq:.6e}")]
    BadInitialChiSquare {
        /// χ² of the first iteration
        chisq: f64,
    },

    /// The solver hit its iteration cap without converging
    #[error("no convergence after {iterations} iterations")]
    MaxIterationsExceeded {
        /// The configured cap
        iterations: usize,
    },

    /// An after-fit quantity was requested before a successful fit
    #[error("fit has not been performed yet")]
    NotFittedYet,

    /// Invalid fitter configuration
    #[error("configuration error: {description}")]
    Configuration {
        /// What is wrong
        description: String,
    },
}

/// Flat error code taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Success
    NoError,
    /// See [`FitError::BadTrackSize`]
    BadTrackSize,
    /// See [`FitError::BadCorrelationSize`]
    BadCorrelationSize,
    /// See [`FitError::DivisionByZero`]
    DivisionByZero,
    /// See [`FitError::CannotGetMatrixInverse`]
    CannotGetMatrixInverse,
    /// See [`FitError::OutOfRange`]
    OutOfRange,
    /// See [`FitError::BadInitialChiSquare`]
    BadInitialChiSquare,
    /// See [`FitError::MaxIterationsExceeded`]
    MaxIterationsExceeded,
    /// See [`FitError::NotFittedYet`]
    NotFittedYet,
    /// See [`FitError::Configuration`]
    Configuration,
}

impl FitError {
    /// Flat code of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            FitError::BadTrackSize { .. } => ErrorCode::BadTrackSize,
            FitError::BadCorrelationSize { .. } => ErrorCode::BadCorrelationSize,
            FitError::DivisionByZero { .. } => ErrorCode::DivisionByZero,
            FitError::CannotGetMatrixInverse { .. } => ErrorCode::CannotGetMatrixInverse,
            FitError::OutOfRange { .. } => ErrorCode::OutOfRange,
            FitError::BadInitialChiSquare { .. } => ErrorCode::BadInitialChiSquare,
            FitError::MaxIterationsExceeded { .. } => ErrorCode::MaxIterationsExceeded,
            FitError::NotFittedYet => ErrorCode::NotFittedYet,
            FitError::Configuration { .. } => ErrorCode::Configuration,
        }
    }

    pub(crate) fn division_by_zero(context: impl Into<String>) -> Self {
        FitError::DivisionByZero {
            context: context.into(),
        }
    }
}

impl ErrorCode {
    /// Code of a fit outcome, `NoError` on success
    pub fn of<T>(result: &Result<T, FitError>) -> Self {
        match result {
            Ok(_) => ErrorCode::NoError,
            Err(e) => e.code(),
        }
    }
}
