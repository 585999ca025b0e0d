//! Observability for fit execution.
//!
//! This module provides the [`FitReporter`] trait. Reporters receive callbacks
//! at key points of a fit (input preparation, every solver iteration,
//! convergence, failure) without the fitter printing anything itself.
//!
//! # Zero-Cost Abstraction
//!
//! The default [`NoOpReporter`] compiles to zero overhead - all callback
//! methods are empty and will be optimized away by the compiler.
//!
//! # Example
//!
//! ```
//! use kinfit::{DebugReporter, FitConfig, MassVertexFit};
//!
//! let mut fit = MassVertexFit::with_reporter(FitConfig::default(), DebugReporter::new());
//! // ... add tracks, call do_fit() ...
//! assert_eq!(fit.reporter().errors().len(), 0);
//! ```

use nalgebra::Point3;

use crate::fit::FitError;

// ============================================================================
// FitReporter Trait
// ============================================================================

/// Summary passed to [`FitReporter::on_converged`]
#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    /// Number of tracks in the fit
    pub track_count: usize,
    /// χ² at convergence
    pub chisq: f64,
    /// Degrees of freedom
    pub ndf: i32,
    /// Outer (track-parameter) iterations used
    pub iterations: usize,
    /// Fitted vertex
    pub vertex: Point3<f64>,
}

/// Observability trait for fit execution.
///
/// All methods have default empty implementations, so you only need
/// to override the events you care about.
///
/// # Thread Safety
///
/// Reporters use `&mut self` for callbacks, so they are NOT required
/// to be `Send + Sync`.
///
/// # Example
///
/// ```
/// use kinfit::FitReporter;
///
/// struct IterationCounter {
///     iterations: usize,
/// }
///
/// impl FitReporter for IterationCounter {
///     fn on_iteration(&mut self, _outer: usize, _inner: usize, _chisq: f64) {
///         self.iterations += 1;
///     }
/// }
/// ```
pub trait FitReporter {
    /// Called once the global parameter vector and covariance are built.
    fn on_input_prepared(&mut self, _track_count: usize, _constraint_count: usize) {}

    /// Called for every accepted vertex (inner) iteration.
    fn on_iteration(&mut self, _outer: usize, _inner: usize, _chisq: f64) {}

    /// Called after every accepted track-parameter (outer) iteration.
    fn on_outer_iteration(&mut self, _outer: usize, _chisq: f64) {}

    /// Called when a fit converged and its output has been extracted.
    fn on_converged(&mut self, _summary: &FitSummary) {}

    /// Called when a fit fails, with the error returned to the caller.
    fn on_error(&mut self, _error: &FitError) {}
}

impl<R: FitReporter + ?Sized> FitReporter for &mut R {
    fn on_input_prepared(&mut self, track_count: usize, constraint_count: usize) {
        (**self).on_input_prepared(track_count, constraint_count);
    }

    fn on_iteration(&mut self, outer: usize, inner: usize, chisq: f64) {
        (**self).on_iteration(outer, inner, chisq);
    }

    fn on_outer_iteration(&mut self, outer: usize, chisq: f64) {
        (**self).on_outer_iteration(outer, chisq);
    }

    fn on_converged(&mut self, summary: &FitSummary) {
        (**self).on_converged(summary);
    }

    fn on_error(&mut self, error: &FitError) {
        (**self).on_error(error);
    }
}

// ============================================================================
// NoOpReporter
// ============================================================================

/// Zero-cost reporter that does nothing.
///
/// This is the default reporter used when no observability is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl NoOpReporter {
    /// Create a new no-op reporter.
    pub fn new() -> Self {
        Self
    }
}

impl FitReporter for NoOpReporter {}

// ============================================================================
// DebugReporter
// ============================================================================

/// Reporter that captures all events for debugging.
///
/// # Example
///
/// ```
/// use kinfit::{DebugReporter, FitReporter};
///
/// let mut reporter = DebugReporter::new();
/// reporter.on_iteration(0, 0, 12.5);
/// reporter.on_iteration(0, 1, 0.3);
///
/// assert_eq!(reporter.iterations().len(), 2);
/// assert_eq!(reporter.iterations()[1], (0, 1, 0.3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DebugReporter {
    /// Captured input preparations (tracks, constraints)
    inputs: Vec<(usize, usize)>,

    /// Captured inner iterations (outer, inner, chisq)
    iterations: Vec<(usize, usize, f64)>,

    /// Captured outer iterations (outer, chisq)
    outer_iterations: Vec<(usize, f64)>,

    /// Captured convergence summaries
    converged: Vec<FitSummary>,

    /// Captured errors
    errors: Vec<FitError>,
}

impl DebugReporter {
    /// Create a new debug reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all captured events.
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.iterations.clear();
        self.outer_iterations.clear();
        self.converged.clear();
        self.errors.clear();
    }

    /// Get captured input preparations.
    pub fn inputs(&self) -> &[(usize, usize)] {
        &self.inputs
    }

    /// Get captured inner iterations.
    pub fn iterations(&self) -> &[(usize, usize, f64)] {
        &self.iterations
    }

    /// Get captured outer iterations.
    pub fn outer_iterations(&self) -> &[(usize, f64)] {
        &self.outer_iterations
    }

    /// Get captured convergence summaries.
    pub fn converged(&self) -> &[FitSummary] {
        &self.converged
    }

    /// Get captured errors.
    pub fn errors(&self) -> &[FitError] {
        &self.errors
    }

    /// Total number of captured events across all types.
    pub fn total_events(&self) -> usize {
        self.inputs.len()
            + self.iterations.len()
            + self.outer_iterations.len()
            + self.converged.len()
            + self.errors.len()
    }
}

impl FitReporter for DebugReporter {
    fn on_input_prepared(&mut self, track_count: usize, constraint_count: usize) {
        self.inputs.push((track_count, constraint_count));
    }

    fn on_iteration(&mut self, outer: usize, inner: usize, chisq: f64) {
        self.iterations.push((outer, inner, chisq));
    }

    fn on_outer_iteration(&mut self, outer: usize, chisq: f64) {
        self.outer_iterations.push((outer, chisq));
    }

    fn on_converged(&mut self, summary: &FitSummary) {
        self.converged.push(summary.clone());
    }

    fn on_error(&mut self, error: &FitError) {
        self.errors.push(error.clone());
    }
}

// ============================================================================
// LoggingReporter
// ============================================================================

/// Reporter that emits events through the `log` facade.
///
/// Levels:
/// - `on_converged`: INFO
/// - `on_error`: WARN
/// - `on_input_prepared`, `on_outer_iteration`: DEBUG
/// - `on_iteration`: TRACE
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter {
    /// Whether to log every inner iteration
    verbose: bool,
}

impl LoggingReporter {
    /// Create a new logging reporter.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Create a verbose logging reporter that also traces inner iterations.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl FitReporter for LoggingReporter {
    fn on_input_prepared(&mut self, track_count: usize, constraint_count: usize) {
        log::debug!(
            "Input prepared: {} tracks, {} constraints",
            track_count,
            constraint_count
        );
    }

    fn on_iteration(&mut self, outer: usize, inner: usize, chisq: f64) {
        if self.verbose {
            log::trace!("Iteration {}.{}: chisq={:.6e}", outer, inner, chisq);
        }
    }

    fn on_outer_iteration(&mut self, outer: usize, chisq: f64) {
        log::debug!("Outer iteration {}: chisq={:.6e}", outer, chisq);
    }

    fn on_converged(&mut self, summary: &FitSummary) {
        log::info!(
            "Fit converged: {} tracks, chisq={:.4}, ndf={}, iterations={}, vertex=({:.4}, {:.4}, {:.4})",
            summary.track_count,
            summary.chisq,
            summary.ndf,
            summary.iterations,
            summary.vertex.x,
            summary.vertex.y,
            summary.vertex.z
        );
    }

    fn on_error(&mut self, error: &FitError) {
        log::warn!("Fit failed: {}", error);
    }
}

// ============================================================================
// CompositeReporter
// ============================================================================

/// Reporter that forwards events to two child reporters.
#[derive(Debug, Clone)]
pub struct CompositeReporter<A: FitReporter, B: FitReporter> {
    first: A,
    second: B,
}

impl<A: FitReporter, B: FitReporter> CompositeReporter<A, B> {
    /// Create a new composite reporter.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Get a reference to the first reporter.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// Get a reference to the second reporter.
    pub fn second(&self) -> &B {
        &self.second
    }

    /// Consume and return both reporters.
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: FitReporter, B: FitReporter> FitReporter for CompositeReporter<A, B> {
    fn on_input_prepared(&mut self, track_count: usize, constraint_count: usize) {
        self.first.on_input_prepared(track_count, constraint_count);
        self.second.on_input_prepared(track_count, constraint_count);
    }

    fn on_iteration(&mut self, outer: usize, inner: usize, chisq: f64) {
        self.first.on_iteration(outer, inner, chisq);
        self.second.on_iteration(outer, inner, chisq);
    }

    fn on_outer_iteration(&mut self, outer: usize, chisq: f64) {
        self.first.on_outer_iteration(outer, chisq);
        self.second.on_outer_iteration(outer, chisq);
    }

    fn on_converged(&mut self, summary: &FitSummary) {
        self.first.on_converged(summary);
        self.second.on_converged(summary);
    }

    fn on_error(&mut self, error: &FitError) {
        self.first.on_error(error);
        self.second.on_error(error);
    }
}

// ============================================================================
// Tests
// ============================================================================
