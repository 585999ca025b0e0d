//! Fitter configuration
//!
//! Tunables shared by every fit: the solenoid field that sets track curvature,
//! and the solver's iteration cap and starting χ².

use serde::{Deserialize, Serialize};

use super::errors::FitError;
use crate::common::constants::{
    DEFAULT_INITIAL_CHISQ, DEFAULT_MAGNETIC_FIELD, DEFAULT_MAX_ITERATIONS, LIGHT_SPEED,
};

/// Configuration of a constrained fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Magnetic field along z in Tesla
    pub magnetic_field: f64,
    /// Iteration cap for the inner (vertex) and outer (track) loops
    pub max_iterations: usize,
    /// χ² the first iteration has to improve on
    pub initial_chisq: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            magnetic_field: DEFAULT_MAGNETIC_FIELD,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            initial_chisq: DEFAULT_INITIAL_CHISQ,
        }
    }
}

impl FitConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the magnetic field (Tesla)
    pub fn with_magnetic_field(mut self, field: f64) -> Self {
        self.magnetic_field = field;
        self
    }

    /// Set the iteration cap
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the starting χ²
    pub fn with_initial_chisq(mut self, chisq: f64) -> Self {
        self.initial_chisq = chisq;
        self
    }

    /// Curvature coefficient `a = -c·B·q` for a given charge
    ///
    /// Zero for neutral tracks or a zero field.
    #[inline]
    pub fn curvature(&self, charge: f64) -> f64 {
        -LIGHT_SPEED * self.magnetic_field * charge
    }

    /// Check the configuration for values the solver cannot work with
    pub fn validate(&self) -> Result<(), FitError> {
        if !self.magnetic_field.is_finite() {
            return Err(FitError::Configuration {
                description: format!("magnetic field must be finite, got {}", self.magnetic_field),
            });
        }
        if self.max_iterations == 0 {
            return Err(FitError::Configuration {
                description: "max_iterations must be at least 1".to_string(),
            });
        }
        if !(self.initial_chisq > 0.0) {
            return Err(FitError::Configuration {
                description: format!("initial_chisq must be positive, got {}", self.initial_chisq),
            });
        }
        Ok(())
    }
}
