//! Mother particle from fitted daughters
//!
//! Combines the fitted tracks of a vertex fit into the 4-momentum, position
//! and covariance of the decaying particle. Daughter momenta are transported
//! along their helices to the vertex before summing:
//!
//! ```text
//! px' = px - a·(vy - y)
//! py' = py + a·(vx - x)
//! ```
//!
//! The mother covariance is `J C Jᵀ`, with `C` the joint covariance of all
//! daughter parameters and the vertex, and `J` the Jacobian of the sum.

use nalgebra::{DMatrix, Matrix3, Point3, Vector4};

use super::errors::FitError;
use super::track::{Matrix3x7, Matrix7};
use crate::common::constants::{LIGHT_SPEED, MAX_TRACK_COUNT, TRACK_PARAMS, VERTEX_DIM};
use crate::common::linalg::{similarity, symmetrize};

/// One daughter entering the combination
#[derive(Debug, Clone, PartialEq)]
struct Daughter {
    momentum: Vector4<f64>,
    position: Point3<f64>,
    error: Matrix7,
    charge: f64,
}

/// Kinematics of a combined mother particle
#[derive(Debug, Clone, PartialEq)]
pub struct MotherState {
    /// (px, py, pz, E) at the vertex
    pub momentum: Vector4<f64>,
    /// Decay vertex
    pub position: Point3<f64>,
    /// 7×7 covariance of (px, py, pz, E, x, y, z)
    pub error: Matrix7,
}

/// Builds a mother particle from daughters and their common vertex
///
/// Correlations between daughters are supplied as N(N-1)/2 blocks in the
/// order (0,1), (0,2), …, (0,N-1), (1,2), … with rows belonging to the first
/// track of the pair. Missing correlations or track–vertex errors are
/// treated as zero.
#[derive(Debug, Clone)]
pub struct MotherCombiner {
    magnetic_field: f64,
    daughters: Vec<Daughter>,
    track_vertex_errors: Vec<Matrix3x7>,
    correlations: Vec<Matrix7>,
    vertex: Point3<f64>,
    vertex_error: Matrix3<f64>,
}

impl MotherCombiner {
    /// Create an empty combiner for a field in Tesla
    pub fn new(magnetic_field: f64) -> Self {
        Self {
            magnetic_field,
            daughters: Vec::new(),
            track_vertex_errors: Vec::new(),
            correlations: Vec::new(),
            vertex: Point3::origin(),
            vertex_error: Matrix3::zeros(),
        }
    }

    /// Add a daughter
    pub fn add_track(
        &mut self,
        momentum: Vector4<f64>,
        position: Point3<f64>,
        error: Matrix7,
        charge: f64,
    ) {
        self.daughters.push(Daughter {
            momentum,
            position,
            error,
            charge,
        });
    }

    /// Add the vertex–track covariance of the next daughter
    pub fn set_track_vertex_error(&mut self, error: Matrix3x7) {
        self.track_vertex_errors.push(error);
    }

    /// Add the next pairwise correlation block
    pub fn set_correlation(&mut self, correlation: Matrix7) {
        self.correlations.push(correlation);
    }

    /// Set the decay vertex
    pub fn set_vertex(&mut self, vertex: Point3<f64>) {
        self.vertex = vertex;
    }

    /// Set the 3×3 vertex covariance
    pub fn set_vertex_error(&mut self, error: Matrix3<f64>) {
        self.vertex_error = error;
    }

    /// Number of daughters added so far
    pub fn track_count(&self) -> usize {
        self.daughters.len()
    }

    fn curvature(&self, charge: f64) -> f64 {
        -LIGHT_SPEED * self.magnetic_field * charge
    }

    /// Combine the daughters
    pub fn combine(&self) -> Result<MotherState, FitError> {
        let n = self.daughters.len();
        if n == 0 || n > MAX_TRACK_COUNT {
            return Err(FitError::BadTrackSize {
                expected: if n == 0 { 1 } else { MAX_TRACK_COUNT },
                actual: n,
            });
        }
        let pairs = n * (n - 1) / 2;
        if !self.correlations.is_empty() && self.correlations.len() != pairs {
            return Err(FitError::BadCorrelationSize {
                expected: pairs,
                actual: self.correlations.len(),
            });
        }
        if !self.track_vertex_errors.is_empty() && self.track_vertex_errors.len() != n {
            return Err(FitError::BadTrackSize {
                expected: n,
                actual: self.track_vertex_errors.len(),
            });
        }

        Ok(MotherState {
            momentum: self.momentum(),
            position: self.vertex,
            error: self.error(),
        })
    }

    fn momentum(&self) -> Vector4<f64> {
        let v = &self.vertex;
        self.daughters.iter().fold(Vector4::zeros(), |sum, d| {
            let a = self.curvature(d.charge);
            sum + Vector4::new(
                d.momentum[0] - a * (v.y - d.position.y),
                d.momentum[1] + a * (v.x - d.position.x),
                d.momentum[2],
                d.momentum[3],
            )
        })
    }

    fn joint_covariance(&self) -> DMatrix<f64> {
        let n = self.daughters.len();
        let dim = TRACK_PARAMS * n + VERTEX_DIM;
        let vo = TRACK_PARAMS * n;
        let mut c = DMatrix::zeros(dim, dim);

        for (i, d) in self.daughters.iter().enumerate() {
            c.fixed_view_mut::<7, 7>(TRACK_PARAMS * i, TRACK_PARAMS * i)
                .copy_from(&d.error);
        }

        let mut block = self.correlations.iter();
        for i in 0..n {
            for j in (i + 1)..n {
                if let Some(corr) = block.next() {
                    c.fixed_view_mut::<7, 7>(TRACK_PARAMS * i, TRACK_PARAMS * j)
                        .copy_from(corr);
                    c.fixed_view_mut::<7, 7>(TRACK_PARAMS * j, TRACK_PARAMS * i)
                        .copy_from(&corr.transpose());
                }
            }
        }

        c.fixed_view_mut::<3, 3>(vo, vo).copy_from(&self.vertex_error);
        for (i, tv) in self.track_vertex_errors.iter().enumerate() {
            c.fixed_view_mut::<3, 7>(vo, TRACK_PARAMS * i).copy_from(tv);
            c.fixed_view_mut::<7, 3>(TRACK_PARAMS * i, vo)
                .copy_from(&tv.transpose());
        }
        c
    }

    fn jacobian(&self) -> DMatrix<f64> {
        let n = self.daughters.len();
        let vo = TRACK_PARAMS * n;
        let mut j = DMatrix::zeros(TRACK_PARAMS, vo + VERTEX_DIM);
        let mut sum_a = 0.0;

        for (i, d) in self.daughters.iter().enumerate() {
            let o = TRACK_PARAMS * i;
            let a = self.curvature(d.charge);
            for k in 0..4 {
                j[(k, o + k)] = 1.0;
            }
            j[(0, o + 5)] = a;
            j[(1, o + 4)] = -a;
            sum_a += a;
        }

        j[(0, vo + 1)] = -sum_a;
        j[(1, vo)] = sum_a;
        for k in 0..VERTEX_DIM {
            j[(4 + k, vo + k)] = 1.0;
        }
        j
    }

    fn error(&self) -> Matrix7 {
        let cov = symmetrize(&similarity(&self.jacobian(), &self.joint_covariance()));
        Matrix7::from_fn(|r, c| cov[(r, c)])
    }
}
