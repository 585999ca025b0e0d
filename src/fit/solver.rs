//! Lagrange-multiplier solver for vertex-constrained fits
//!
//! Minimises `(α - α₀)ᵀ V₀⁻¹ (α - α₀)` subject to `H(α, v) = 0`, where `α` are
//! the track parameters and `v` the common vertex. The constraints are
//! linearised by a [`ConstraintModel`] at every step:
//!
//! ```text
//! H(α, v) ≈ D (α - α₁) + E (v - v₁) + d
//! ```
//!
//! Two nested loops run until χ² stops improving:
//! - inner: with the track parameters held, move the vertex
//!   `v ← v - V_E Eᵀ λ₀` where `V_D = (D V₀ Dᵀ)⁻¹`, `V_E = (Eᵀ V_D E)⁻¹` and
//!   `λ₀ = V_D (D (α₀ - α₁) + d)`
//! - outer: update the track parameters `α₁ = α₀ - V₀ Dᵀ λ` with
//!   `λ = λ₀ - V_D E V_E Eᵀ λ₀`
//!
//! An iterate whose χ² is not lower than the previous one is rejected and the
//! previous one is kept.
//!
//! [`LagrangeSolver::solve_with_prior`] replaces the free vertex by a
//! Gaussian prior `(v₀, V_v)` (a beam spot). A single loop then updates both
//! sides at once:
//!
//! ```text
//! V_Dt = (D V₀ Dᵀ + E V_v Eᵀ)⁻¹
//! λ    = V_Dt (D (α₀ - α₁) + E (v₀ - v₁) + d)
//! v    = v₀ - V_v Eᵀ λ
//! ```
//!
//! A zero `V_v` pins the vertex at `v₀`.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use super::config::FitConfig;
use super::errors::FitError;
use super::traits::{ConstraintModel, Linearization};
use crate::common::linalg::{similarity, symmetrize, try_inverse};
use crate::reporter::FitReporter;

/// Converged solver state
#[derive(Debug, Clone)]
pub struct SolverOutput {
    /// Fitted track parameters `α₁`
    pub params: DVector<f64>,
    /// Covariance of `α₁`
    pub covariance: DMatrix<f64>,
    /// Fitted vertex
    pub vertex: Vector3<f64>,
    /// 3×3 vertex covariance
    pub vertex_covariance: DMatrix<f64>,
    /// 3×n covariance between vertex and track parameters
    pub vertex_param_covariance: DMatrix<f64>,
    /// χ² at convergence
    pub chisq: f64,
    /// Part of `chisq` carried by the vertex prior, zero for a free vertex
    pub vertex_chisq: f64,
    /// Outer iterations performed
    pub iterations: usize,
}

/// One accepted vertex step and everything needed to resume from it
#[derive(Debug, Clone)]
struct Iterate {
    chisq: f64,
    vertex: Vector3<f64>,
    v_d: DMatrix<f64>,
    v_e: DMatrix<f64>,
    lam0: DVector<f64>,
    lin: Linearization,
}

impl Iterate {
    /// `λ = λ₀ - V_D E V_E Eᵀ λ₀`
    fn multiplier(&self) -> DVector<f64> {
        let e = &self.lin.vertex_jacobian;
        &self.lam0 - &self.v_d * e * &self.v_e * e.transpose() * &self.lam0
    }
}

/// One step of the vertex-prior iteration
#[derive(Debug, Clone)]
struct PriorIterate {
    chisq: f64,
    vertex_chisq: f64,
    vertex: Vector3<f64>,
    v_dt: DMatrix<f64>,
    lam: DVector<f64>,
    lin: Linearization,
}

/// Iterative Lagrange-multiplier solver
#[derive(Debug, Clone, Copy)]
pub struct LagrangeSolver {
    max_iterations: usize,
    initial_chisq: f64,
}

impl LagrangeSolver {
    /// Create a solver with the iteration cap and starting χ² of `config`
    pub fn new(config: &FitConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            initial_chisq: config.initial_chisq,
        }
    }

    /// Run the fit
    ///
    /// # Arguments
    /// * `model` - Constraint equations
    /// * `al0` - Measured track parameters
    /// * `v_al0` - Their covariance
    /// * `vertex` - Starting vertex
    /// * `reporter` - Receives per-iteration χ²
    pub fn solve<M, R>(
        &self,
        model: &M,
        al0: &DVector<f64>,
        v_al0: &DMatrix<f64>,
        vertex: Vector3<f64>,
        reporter: &mut R,
    ) -> Result<SolverOutput, FitError>
    where
        M: ConstraintModel + ?Sized,
        R: FitReporter + ?Sized,
    {
        let n = model.num_params();
        if al0.len() != n || v_al0.nrows() != n || v_al0.ncols() != n {
            return Err(FitError::BadTrackSize {
                expected: n,
                actual: al0.len(),
            });
        }

        let mut al1 = al0.clone();
        let mut vertex = vertex;
        let mut best: Option<Iterate> = None;
        let mut iterations = 0;
        let mut converged = false;

        for outer in 0..self.max_iterations {
            let step = self.vertex_loop(model, al0, v_al0, &al1, vertex, outer, reporter)?;

            if let Some(prev) = &best {
                if !(step.chisq < prev.chisq) {
                    converged = true;
                    break;
                }
            }

            al1 = al0 - v_al0 * step.lin.jacobian.transpose() * step.multiplier();
            vertex = step.vertex;
            iterations = outer + 1;
            reporter.on_outer_iteration(outer, step.chisq);
            best = Some(step);
        }

        let best = match best {
            Some(b) if converged => b,
            _ => {
                return Err(FitError::MaxIterationsExceeded {
                    iterations: self.max_iterations,
                })
            }
        };

        Ok(Self::finish(&best, al0, v_al0, iterations))
    }

    /// Inner loop: move the vertex with the track parameters held at `al1`
    #[allow(clippy::too_many_arguments)]
    fn vertex_loop<M, R>(
        &self,
        model: &M,
        al0: &DVector<f64>,
        v_al0: &DMatrix<f64>,
        al1: &DVector<f64>,
        vertex: Vector3<f64>,
        outer: usize,
        reporter: &mut R,
    ) -> Result<Iterate, FitError>
    where
        M: ConstraintModel + ?Sized,
        R: FitReporter + ?Sized,
    {
        let delta = al0 - al1;
        let mut vertex = vertex;
        let mut best: Option<Iterate> = None;

        for inner in 0..self.max_iterations {
            let step = Self::vertex_step(model, v_al0, al1, &delta, vertex)?;
            let threshold = best.as_ref().map_or(self.initial_chisq, |b| b.chisq);

            if !(step.chisq < threshold) {
                return match best {
                    Some(b) => Ok(b),
                    None => Err(FitError::BadInitialChiSquare { chisq: step.chisq }),
                };
            }

            reporter.on_iteration(outer, inner, step.chisq);
            vertex = step.vertex;
            best = Some(step);
        }

        Err(FitError::MaxIterationsExceeded {
            iterations: self.max_iterations,
        })
    }

    /// One linearisation and vertex update at fixed track parameters
    fn vertex_step<M>(
        model: &M,
        v_al0: &DMatrix<f64>,
        al1: &DVector<f64>,
        delta: &DVector<f64>,
        vertex: Vector3<f64>,
    ) -> Result<Iterate, FitError>
    where
        M: ConstraintModel + ?Sized,
    {
        let lin = model.linearize(al1, &vertex)?;
        let d = &lin.jacobian;
        let e = &lin.vertex_jacobian;

        let v_d = try_inverse(&similarity(d, v_al0), "constraint covariance D V Dᵀ")?;
        let v_e = try_inverse(
            &symmetrize(&(e.transpose() * &v_d * e)),
            "vertex information Eᵀ V_D E",
        )?;

        let r = d * delta + &lin.residual;
        let lam0 = &v_d * &r;
        let chisq = lam0.dot(&r);

        let shift = &v_e * e.transpose() * &lam0;
        let vertex = vertex - Vector3::new(shift[0], shift[1], shift[2]);

        Ok(Iterate {
            chisq,
            vertex,
            v_d,
            v_e,
            lam0,
            lin,
        })
    }

    /// Final parameters and covariances from the accepted iterate
    fn finish(
        it: &Iterate,
        al0: &DVector<f64>,
        v_al0: &DMatrix<f64>,
        iterations: usize,
    ) -> SolverOutput {
        let d = &it.lin.jacobian;
        let e = &it.lin.vertex_jacobian;

        let lam = it.multiplier();
        let params = al0 - v_al0 * d.transpose() * &lam;

        let v_dt = &it.v_d - &it.v_d * e * &it.v_e * e.transpose() * &it.v_d;
        let covariance = symmetrize(&(v_al0 - v_al0 * d.transpose() * &v_dt * d * v_al0));
        let vertex_param_covariance = -(&it.v_e * e.transpose() * &it.v_d * d * v_al0);

        SolverOutput {
            params,
            covariance,
            vertex: it.vertex,
            vertex_covariance: it.v_e.clone(),
            vertex_param_covariance,
            chisq: it.chisq,
            vertex_chisq: 0.0,
            iterations,
        }
    }

    /// Run the fit with a Gaussian prior on the vertex
    ///
    /// # Arguments
    /// * `model` - Constraint equations
    /// * `al0` - Measured track parameters
    /// * `v_al0` - Their covariance
    /// * `vertex` - Prior mean of the vertex
    /// * `prior` - Prior covariance of the vertex (zero pins it)
    /// * `reporter` - Receives per-iteration χ²
    ///
    /// One step that does not lower χ² is tolerated before the iteration
    /// stops, so the vertex can settle along poorly constrained directions.
    pub fn solve_with_prior<M, R>(
        &self,
        model: &M,
        al0: &DVector<f64>,
        v_al0: &DMatrix<f64>,
        vertex: Vector3<f64>,
        prior: &Matrix3<f64>,
        reporter: &mut R,
    ) -> Result<SolverOutput, FitError>
    where
        M: ConstraintModel + ?Sized,
        R: FitReporter + ?Sized,
    {
        let n = model.num_params();
        if al0.len() != n || v_al0.nrows() != n || v_al0.ncols() != n {
            return Err(FitError::BadTrackSize {
                expected: n,
                actual: al0.len(),
            });
        }

        let prior = DMatrix::from_column_slice(3, 3, prior.as_slice());
        let mut al1 = al0.clone();
        let mut linearized_at = vertex;
        let mut best: Option<PriorIterate> = None;
        let mut tolerated = false;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.max_iterations {
            let step = Self::prior_step(model, al0, v_al0, &al1, &vertex, &linearized_at, &prior)?;
            let threshold = best.as_ref().map_or(self.initial_chisq, |b| b.chisq);

            if !(step.chisq < threshold) {
                if best.is_none() {
                    return Err(FitError::BadInitialChiSquare { chisq: step.chisq });
                }
                if tolerated {
                    converged = true;
                    break;
                }
                tolerated = true;
            }

            reporter.on_iteration(0, iter, step.chisq);
            al1 = al0 - v_al0 * step.lin.jacobian.transpose() * &step.lam;
            linearized_at = step.vertex;
            iterations = iter + 1;
            best = Some(step);
        }

        let best = match best {
            Some(b) if converged => b,
            _ => {
                return Err(FitError::MaxIterationsExceeded {
                    iterations: self.max_iterations,
                })
            }
        };
        reporter.on_outer_iteration(0, best.chisq);

        let d = &best.lin.jacobian;
        let e = &best.lin.vertex_jacobian;
        let params = al0 - v_al0 * d.transpose() * &best.lam;
        let covariance = symmetrize(&(v_al0 - v_al0 * d.transpose() * &best.v_dt * d * v_al0));
        let vertex_param_covariance = -(&prior * e.transpose() * &best.v_dt * d * v_al0);
        let vertex_covariance =
            symmetrize(&(&prior - &prior * e.transpose() * &best.v_dt * e * &prior));

        Ok(SolverOutput {
            params,
            covariance,
            vertex: best.vertex,
            vertex_covariance,
            vertex_param_covariance,
            chisq: best.chisq,
            vertex_chisq: best.vertex_chisq,
            iterations,
        })
    }

    /// One linearisation and joint update under the vertex prior
    fn prior_step<M>(
        model: &M,
        al0: &DVector<f64>,
        v_al0: &DMatrix<f64>,
        al1: &DVector<f64>,
        mean: &Vector3<f64>,
        linearized_at: &Vector3<f64>,
        prior: &DMatrix<f64>,
    ) -> Result<PriorIterate, FitError>
    where
        M: ConstraintModel + ?Sized,
    {
        let lin = model.linearize(al1, linearized_at)?;
        let d = &lin.jacobian;
        let e = &lin.vertex_jacobian;

        let vertex_term = similarity(e, prior);
        let v_dt = try_inverse(
            &symmetrize(&(similarity(d, v_al0) + &vertex_term)),
            "constraint covariance D V Dᵀ + E V_v Eᵀ",
        )?;

        let pull = mean - linearized_at;
        let r = d * (al0 - al1) + e * DVector::from_column_slice(pull.as_slice()) + &lin.residual;
        let lam = &v_dt * &r;
        let chisq = lam.dot(&r);
        let vertex_chisq = lam.dot(&(&vertex_term * &lam));

        let shift = prior * e.transpose() * &lam;
        let vertex = mean - Vector3::new(shift[0], shift[1], shift[2]);

        Ok(PriorIterate {
            chisq,
            vertex_chisq,
            vertex,
            v_dt,
            lam,
            lin,
        })
    }
}
