//! Vertex fit with an optional invariant-mass constraint
//!
//! [`MassVertexFit`] collects tracks, optional pairwise correlations and an
//! optional invariant mass, then finds the common vertex and the fitted track
//! parameters that minimise χ² under those constraints.
//!
//! ```no_run
//! use kinfit::{FitConfig, FitStage, FitTrack, MassVertexFit, Matrix7};
//! use nalgebra::{Point3, Vector3};
//!
//! let error = Matrix7::identity() * 1e-4;
//! let mut fit = MassVertexFit::new(FitConfig::default());
//! fit.add_track(FitTrack::with_mass(Vector3::new(0.3, 0.1, 0.2), 0.1396, Point3::origin(), error, 1.0))?;
//! fit.add_track(FitTrack::with_mass(Vector3::new(-0.2, 0.3, 0.1), 0.1396, Point3::origin(), error, -1.0))?;
//! fit.set_invariant_mass(0.4976);
//! fit.do_fit()?;
//! println!("vertex {:?} chi2 {:?}", fit.vertex(FitStage::AfterFit), fit.chisq());
//! # Ok::<(), kinfit::FitError>(())
//! ```

use nalgebra::{DMatrix, DVector, Matrix3, Point3, Vector3, Vector4};
use smallvec::SmallVec;

use super::config::FitConfig;
use super::constraints::{MassVertexConstraints, TrackProperty};
use super::errors::FitError;
use super::mother::MotherCombiner;
use super::propagation::{pair_error, track_error, vertex_track_error};
use super::solver::{LagrangeSolver, SolverOutput};
use super::track::{FitStage, FitTrack, Matrix3x7, Matrix7};
use super::traits::{CompositeParticle, ConstraintModel};
use crate::common::constants::{
    CONSTRAINTS_PER_TRACK, MAX_TRACK_COUNT, NECESSARY_TRACK_COUNT, TRACK_PARAMS, TRACK_PARAMS_NO_ENERGY,
    VERTEX_DIM,
};
use crate::common::linalg::{chisq_form, chisq_probability};
use crate::reporter::{FitReporter, FitSummary, NoOpReporter};

/// How the vertex enters the fit
#[derive(Debug, Clone, Copy, PartialEq)]
enum VertexMode {
    /// Common vertex found by the fit
    Free,
    /// Gaussian prior around the initial vertex
    Beam(Matrix3<f64>),
    /// Vertex held at the initial vertex
    Known,
}

/// Global inputs of one fit
struct FitInput {
    al0: DVector<f64>,
    v_al0: DMatrix<f64>,
    model: MassVertexConstraints,
}

/// Everything kept from a successful fit
#[derive(Debug, Clone)]
struct FitResult {
    vertex: Point3<f64>,
    vertex_error: Matrix3<f64>,
    track_vertex_errors: Vec<Matrix3x7>,
    covariance: DMatrix<f64>,
    fix_mass: SmallVec<[bool; MAX_TRACK_COUNT]>,
    chisq: f64,
    vertex_chisq: Option<f64>,
    iterations: usize,
}

/// Vertex fit with an optional invariant-mass constraint
///
/// Each track is described by seven parameters (px, py, pz, E, x, y, z).
/// Every track adds two equations requiring its helix to pass through the
/// common vertex. With [`set_invariant_mass`](Self::set_invariant_mass) one
/// more equation requires the summed 4-momentum to have that mass.
///
/// Tracks whose mass is fixed (the default) have their energy derived from
/// momentum and mass; the others have the energy fitted as a free parameter.
///
/// The vertex is normally free. [`set_ip_profile`](Self::set_ip_profile)
/// adds a beam-spot prior on it instead, and
/// [`set_known_vertex`](Self::set_known_vertex) holds it at the initial
/// vertex. The beam spot takes precedence when both are set.
pub struct MassVertexFit<R: FitReporter = NoOpReporter> {
    config: FitConfig,
    tracks: Vec<FitTrack>,
    fix_mass: SmallVec<[bool; MAX_TRACK_COUNT]>,
    correlations: Vec<Matrix7>,
    initial_vertex: Point3<f64>,
    beam_error: Option<Matrix3<f64>>,
    known_vertex: bool,
    invariant_mass: Option<f64>,
    result: Option<FitResult>,
    reporter: R,
}

impl MassVertexFit<NoOpReporter> {
    /// Create an empty fit
    pub fn new(config: FitConfig) -> Self {
        Self::with_reporter(config, NoOpReporter::new())
    }
}

impl<R: FitReporter> MassVertexFit<R> {
    /// Create an empty fit that reports to `reporter`
    pub fn with_reporter(config: FitConfig, reporter: R) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            fix_mass: SmallVec::new(),
            correlations: Vec::new(),
            initial_vertex: Point3::origin(),
            beam_error: None,
            known_vertex: false,
            invariant_mass: None,
            result: None,
            reporter,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// The reporter
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Mutable access to the reporter
    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Add a track
    ///
    /// Fails with [`FitError::BadTrackSize`] once `MAX_TRACK_COUNT` tracks are
    /// present.
    pub fn add_track(&mut self, track: FitTrack) -> Result<(), FitError> {
        if self.tracks.len() >= MAX_TRACK_COUNT {
            return Err(FitError::BadTrackSize {
                expected: MAX_TRACK_COUNT,
                actual: self.tracks.len() + 1,
            });
        }
        self.tracks.push(track);
        self.invalidate();
        Ok(())
    }

    /// Starting point of the vertex search
    pub fn set_initial_vertex(&mut self, vertex: Point3<f64>) {
        self.initial_vertex = vertex;
        self.invalidate();
    }

    /// Constrain the vertex to a beam spot
    ///
    /// `ip` becomes the initial vertex and the mean of a Gaussian prior with
    /// covariance `error`.
    pub fn set_ip_profile(&mut self, ip: Point3<f64>, error: Matrix3<f64>) {
        self.initial_vertex = ip;
        self.beam_error = Some(error);
        self.invalidate();
    }

    /// Drop the beam-spot prior
    pub fn clear_ip_profile(&mut self) {
        self.beam_error = None;
        self.invalidate();
    }

    /// Hold the vertex at the initial vertex instead of fitting it
    pub fn set_known_vertex(&mut self, known: bool) {
        self.known_vertex = known;
        self.invalidate();
    }

    /// Constrain the invariant mass of all tracks
    pub fn set_invariant_mass(&mut self, mass: f64) {
        self.invariant_mass = Some(mass);
        self.invalidate();
    }

    /// Drop the invariant-mass constraint
    pub fn clear_invariant_mass(&mut self) {
        self.invariant_mass = None;
        self.invalidate();
    }

    /// Mark the next track's mass as fixed
    ///
    /// Flags are positional. If none are given all masses are fixed;
    /// otherwise there must be exactly one per track.
    pub fn fix_mass(&mut self) {
        self.fix_mass.push(true);
        self.invalidate();
    }

    /// Mark the next track's energy as a free parameter
    pub fn unfix_mass(&mut self) {
        self.fix_mass.push(false);
        self.invalidate();
    }

    /// Add the next pairwise correlation block
    ///
    /// Blocks are taken in the order (0,1), (0,2), …, (0,N-1), (1,2), …;
    /// rows belong to the lower-indexed track. Either none or all N(N-1)/2
    /// must be supplied.
    pub fn set_correlation(&mut self, correlation: Matrix7) {
        self.correlations.push(correlation);
        self.invalidate();
    }

    /// Add an all-zero correlation block
    pub fn set_zero_correlation(&mut self) {
        self.set_correlation(Matrix7::zeros());
    }

    /// Forget tracks, flags, correlations, vertex mode, mass constraint and
    /// result
    ///
    /// Configuration and reporter are kept.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.fix_mass.clear();
        self.correlations.clear();
        self.initial_vertex = Point3::origin();
        self.beam_error = None;
        self.known_vertex = false;
        self.invariant_mass = None;
        self.result = None;
    }

    fn vertex_mode(&self) -> VertexMode {
        match self.beam_error {
            Some(error) => VertexMode::Beam(error),
            None if self.known_vertex => VertexMode::Known,
            None => VertexMode::Free,
        }
    }

    fn invalidate(&mut self) {
        if self.result.take().is_some() {
            for t in &mut self.tracks {
                t.clear_after();
            }
        }
    }

    // ------------------------------------------------------------------
    // Fit
    // ------------------------------------------------------------------

    /// Run the fit
    ///
    /// On success all after-fit quantities become available. On failure the
    /// error is also passed to the reporter and the fit is left unfitted;
    /// tracks extracted before an output failure keep their fitted state.
    pub fn do_fit(&mut self) -> Result<(), FitError> {
        self.result = None;
        for t in &mut self.tracks {
            t.clear_after();
        }

        match self.run() {
            Ok(result) => {
                let summary = FitSummary {
                    track_count: self.tracks.len(),
                    chisq: result.chisq,
                    ndf: self.ndf(),
                    iterations: result.iterations,
                    vertex: result.vertex,
                };
                self.result = Some(result);
                self.reporter.on_converged(&summary);
                Ok(())
            }
            Err(err) => {
                self.reporter.on_error(&err);
                Err(err)
            }
        }
    }

    fn run(&mut self) -> Result<FitResult, FitError> {
        self.config.validate()?;
        let input = self.prepare_input()?;
        self.reporter
            .on_input_prepared(self.tracks.len(), input.model.num_constraints());

        let solver = LagrangeSolver::new(&self.config);
        let vertex = self.initial_vertex.coords;
        let mode = self.vertex_mode();
        let output = match mode {
            VertexMode::Free => solver.solve(
                &input.model,
                &input.al0,
                &input.v_al0,
                vertex,
                &mut self.reporter,
            )?,
            VertexMode::Beam(error) => solver.solve_with_prior(
                &input.model,
                &input.al0,
                &input.v_al0,
                vertex,
                &error,
                &mut self.reporter,
            )?,
            VertexMode::Known => solver.solve_with_prior(
                &input.model,
                &input.al0,
                &input.v_al0,
                vertex,
                &Matrix3::zeros(),
                &mut self.reporter,
            )?,
        };

        let mut result = self.prepare_output(&input.model, output)?;
        if !matches!(mode, VertexMode::Beam(_)) {
            result.vertex_chisq = None;
        }
        Ok(result)
    }

    fn check_track_count(&self) -> Result<usize, FitError> {
        let n = self.tracks.len();
        // a vertex from outside the tracks needs only one of them
        let necessary = match self.vertex_mode() {
            VertexMode::Free => NECESSARY_TRACK_COUNT,
            VertexMode::Beam(_) | VertexMode::Known => NECESSARY_TRACK_COUNT - 1,
        };
        if n < necessary {
            return Err(FitError::BadTrackSize {
                expected: necessary,
                actual: n,
            });
        }
        if n > MAX_TRACK_COUNT {
            return Err(FitError::BadTrackSize {
                expected: MAX_TRACK_COUNT,
                actual: n,
            });
        }
        Ok(n)
    }

    fn resolved_fix_mass(&self, n: usize) -> Result<SmallVec<[bool; MAX_TRACK_COUNT]>, FitError> {
        if self.fix_mass.is_empty() {
            return Ok(SmallVec::from_elem(true, n));
        }
        if self.fix_mass.len() != n {
            return Err(FitError::BadTrackSize {
                expected: n,
                actual: self.fix_mass.len(),
            });
        }
        Ok(self.fix_mass.clone())
    }

    fn prepare_input(&self) -> Result<FitInput, FitError> {
        let n = self.check_track_count()?;
        let fix_mass = self.resolved_fix_mass(n)?;

        let mut al0 = DVector::zeros(TRACK_PARAMS * n);
        let mut v_al0 = DMatrix::zeros(TRACK_PARAMS * n, TRACK_PARAMS * n);
        let mut properties = Vec::with_capacity(n);

        for (i, track) in self.tracks.iter().enumerate() {
            let o = TRACK_PARAMS * i;
            al0.fixed_rows_mut::<7>(o)
                .copy_from(&track.parameters(FitStage::BeforeFit));
            v_al0
                .fixed_view_mut::<7, 7>(o, o)
                .copy_from(&track.error(FitStage::BeforeFit));
            properties.push(TrackProperty {
                charge: track.charge(),
                mass: track.mass(),
                curvature: self.config.curvature(track.charge()),
            });
        }

        if !self.correlations.is_empty() {
            self.prepare_correlation(n, &mut v_al0)?;
        }

        let model = MassVertexConstraints::new(properties, fix_mass, self.invariant_mass)?;
        Ok(FitInput { al0, v_al0, model })
    }

    fn prepare_correlation(&self, n: usize, v_al0: &mut DMatrix<f64>) -> Result<(), FitError> {
        let pairs = n * (n - 1) / 2;
        if self.correlations.len() != pairs {
            return Err(FitError::BadCorrelationSize {
                expected: pairs,
                actual: self.correlations.len(),
            });
        }

        let mut blocks = self.correlations.iter();
        for i in 0..n {
            for j in (i + 1)..n {
                if let Some(block) = blocks.next() {
                    v_al0
                        .fixed_view_mut::<7, 7>(TRACK_PARAMS * i, TRACK_PARAMS * j)
                        .copy_from(block);
                    v_al0
                        .fixed_view_mut::<7, 7>(TRACK_PARAMS * j, TRACK_PARAMS * i)
                        .copy_from(&block.transpose());
                }
            }
        }
        Ok(())
    }

    fn prepare_output(
        &mut self,
        model: &MassVertexConstraints,
        output: SolverOutput,
    ) -> Result<FitResult, FitError> {
        let fix_mass: SmallVec<[bool; MAX_TRACK_COUNT]> = model.fix_mass().iter().copied().collect();
        let mut track_vertex_errors = Vec::with_capacity(self.tracks.len());

        for (i, track) in self.tracks.iter_mut().enumerate() {
            let o = TRACK_PARAMS * i;
            let al = &output.params;
            let p = Vector3::new(al[o], al[o + 1], al[o + 2]);
            let energy = if fix_mass[i] {
                (p.norm_squared() + track.mass() * track.mass()).sqrt()
            } else {
                al[o + 3]
            };
            let momentum = Vector4::new(p.x, p.y, p.z, energy);
            let position = Point3::new(al[o + 4], al[o + 5], al[o + 6]);

            let block: Matrix7 = output.covariance.fixed_view::<7, 7>(o, o).into_owned();
            let error = track_error(&momentum, &block, fix_mass[i])?;
            track.set_after(momentum, position, error);

            let cross: Matrix3x7 = output
                .vertex_param_covariance
                .fixed_view::<3, 7>(0, o)
                .into_owned();
            track_vertex_errors.push(if fix_mass[i] {
                vertex_track_error(&momentum, &cross)?
            } else {
                cross
            });
        }

        let vertex_error: Matrix3<f64> = output
            .vertex_covariance
            .fixed_view::<3, 3>(0, 0)
            .into_owned();

        Ok(FitResult {
            vertex: Point3::from(output.vertex),
            vertex_error,
            track_vertex_errors,
            covariance: output.covariance,
            fix_mass,
            chisq: output.chisq,
            vertex_chisq: Some(output.vertex_chisq),
            iterations: output.iterations,
        })
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    fn fitted(&self) -> Result<&FitResult, FitError> {
        self.result.as_ref().ok_or(FitError::NotFittedYet)
    }

    fn check_id(&self, id: usize) -> Result<&FitTrack, FitError> {
        self.tracks.get(id).ok_or(FitError::OutOfRange {
            index: id as i64,
            len: self.tracks.len(),
        })
    }

    /// Whether the last [`do_fit`](Self::do_fit) succeeded
    pub fn is_fitted(&self) -> bool {
        self.result.is_some()
    }

    /// Initial vertex, or the fitted vertex
    ///
    /// The after-fit vertex is the origin until a fit succeeds.
    pub fn vertex(&self, stage: FitStage) -> Point3<f64> {
        match stage {
            FitStage::BeforeFit => self.initial_vertex,
            FitStage::AfterFit => self
                .result
                .as_ref()
                .map_or_else(Point3::origin, |r| r.vertex),
        }
    }

    /// 3×3 covariance of the fitted vertex, zero until a fit succeeds
    pub fn vertex_error(&self) -> Matrix3<f64> {
        self.result
            .as_ref()
            .map_or_else(Matrix3::zeros, |r| r.vertex_error)
    }

    /// The invariant mass being constrained, if any
    pub fn invariant_mass(&self) -> Option<f64> {
        self.invariant_mass
    }

    /// χ² of the last successful fit
    pub fn chisq(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.chisq)
    }

    /// Part of [`chisq`](Self::chisq) carried by the beam-spot prior
    ///
    /// Only available after a fit with an IP profile.
    pub fn chisq_vertex(&self) -> Option<f64> {
        self.result.as_ref().and_then(|r| r.vertex_chisq)
    }

    /// Degrees of freedom
    ///
    /// 2N - 3 with a free vertex, 2N with a beam spot or a known vertex, plus
    /// one with a mass constraint.
    pub fn ndf(&self) -> i32 {
        let n = self.tracks.len() as i32;
        let vertex = match self.vertex_mode() {
            VertexMode::Free => VERTEX_DIM as i32,
            VertexMode::Beam(_) | VertexMode::Known => 0,
        };
        CONSTRAINTS_PER_TRACK as i32 * n - vertex + i32::from(self.invariant_mass.is_some())
    }

    /// Degrees of freedom attributed to the tracks: 2N - 2
    pub fn track_part_ndf(&self) -> Result<i32, FitError> {
        let n = self.tracks.len();
        if n == 0 {
            return Err(FitError::BadTrackSize {
                expected: NECESSARY_TRACK_COUNT,
                actual: 0,
            });
        }
        Ok(CONSTRAINTS_PER_TRACK as i32 * n as i32 - 2)
    }

    /// χ² probability of the last successful fit
    pub fn chisq_probability(&self) -> Option<f64> {
        self.chisq().map(|chisq| chisq_probability(chisq, self.ndf()))
    }

    /// Outer iterations used by the last successful fit
    pub fn iterations(&self) -> Option<usize> {
        self.result.as_ref().map(|r| r.iterations)
    }

    /// Track by id
    pub fn track(&self, id: usize) -> Result<&FitTrack, FitError> {
        self.check_id(id)
    }

    /// All tracks in insertion order
    pub fn tracks(&self) -> &[FitTrack] {
        &self.tracks
    }

    /// Number of tracks
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Vertex–track covariance of a fitted track
    pub fn track_vertex_error(&self, id: usize) -> Result<Matrix3x7, FitError> {
        let result = self.fitted()?;
        self.check_id(id)?;
        Ok(result.track_vertex_errors[id])
    }

    /// χ² contribution of one track
    ///
    /// Mass-fixed tracks use their six (p, x) parameters; free-energy tracks
    /// use all seven, which needs a non-singular input covariance.
    pub fn track_chisq(&self, id: usize) -> Result<f64, FitError> {
        let result = self.fitted()?;
        let track = self.check_id(id)?;

        if result.fix_mass[id] {
            let delta = track.fit_parameters(FitStage::BeforeFit) - track.fit_parameters(FitStage::AfterFit);
            let cov = track.fit_error(FitStage::BeforeFit);
            chisq_form(
                &DVector::from_column_slice(delta.as_slice()),
                &DMatrix::from_column_slice(TRACK_PARAMS_NO_ENERGY, TRACK_PARAMS_NO_ENERGY, cov.as_slice()),
                "track input covariance",
            )
        } else {
            let delta = track.parameters(FitStage::BeforeFit) - track.parameters(FitStage::AfterFit);
            let cov = track.error(FitStage::BeforeFit);
            chisq_form(
                &DVector::from_column_slice(delta.as_slice()),
                &DMatrix::from_column_slice(TRACK_PARAMS, TRACK_PARAMS, cov.as_slice()),
                "track input covariance",
            )
        }
    }

    /// Sum of the per-track χ² contributions
    pub fn track_part_chisq(&self) -> Result<f64, FitError> {
        (0..self.tracks.len()).map(|id| self.track_chisq(id)).sum()
    }

    /// 7×7 covariance between two tracks
    ///
    /// Rows belong to `id1`. Before the fit this is the supplied correlation
    /// (zero if none was supplied) or, for `id1 == id2`, the track's own
    /// error.
    pub fn correlation(&self, id1: usize, id2: usize, stage: FitStage) -> Result<Matrix7, FitError> {
        let t1 = self.check_id(id1)?;
        let t2 = self.check_id(id2)?;

        match stage {
            FitStage::BeforeFit => {
                if id1 == id2 {
                    return Ok(t1.error(FitStage::BeforeFit));
                }
                let (lo, hi) = (id1.min(id2), id1.max(id2));
                let n = self.tracks.len();
                let index = lo * (2 * n - lo - 1) / 2 + (hi - lo - 1);
                let block = self.correlations.get(index).copied().unwrap_or_else(Matrix7::zeros);
                Ok(if id1 < id2 { block } else { block.transpose() })
            }
            FitStage::AfterFit => {
                let result = self.fitted()?;
                let block: Matrix7 = result
                    .covariance
                    .fixed_view::<7, 7>(TRACK_PARAMS * id1, TRACK_PARAMS * id2)
                    .into_owned();
                pair_error(
                    &t1.momentum(FitStage::AfterFit),
                    &t2.momentum(FitStage::AfterFit),
                    &block,
                    result.fix_mass[id1],
                    result.fix_mass[id2],
                )
            }
        }
    }

    /// Write the fitted mother particle into `mother`
    ///
    /// The mother is the sum of the fitted tracks at the fitted vertex, with
    /// the χ² probability of this fit attached.
    pub fn update_mother<P: CompositeParticle + ?Sized>(&self, mother: &mut P) -> Result<(), FitError> {
        let result = self.fitted()?;
        let n = self.tracks.len();

        let mut combiner = MotherCombiner::new(self.config.magnetic_field);
        for (track, tv) in self.tracks.iter().zip(&result.track_vertex_errors) {
            combiner.add_track(
                track.momentum(FitStage::AfterFit),
                track.position(FitStage::AfterFit),
                track.error(FitStage::AfterFit),
                track.charge(),
            );
            combiner.set_track_vertex_error(*tv);
        }
        for i in 0..n {
            for j in (i + 1)..n {
                combiner.set_correlation(self.correlation(i, j, FitStage::AfterFit)?);
            }
        }
        combiner.set_vertex(result.vertex);
        combiner.set_vertex_error(result.vertex_error);

        let state = combiner.combine()?;
        mother.update_momentum(
            state.momentum,
            state.position,
            state.error,
            chisq_probability(result.chisq, self.ndf()),
        );
        Ok(())
    }
}

impl Default for MassVertexFit<NoOpReporter> {
    fn default() -> Self {
        Self::new(FitConfig::default())
    }
}
