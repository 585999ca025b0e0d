//! Track type consumed and produced by the fitters
//!
//! A [`FitTrack`] carries a 4-momentum, a reference position and a 7×7
//! covariance in the (px, py, pz, E, x, y, z) layout, once as measured and
//! once as fitted.

use nalgebra::{Matrix6, Point3, SMatrix, SVector, Vector3, Vector4, Vector6};

use super::errors::FitError;

/// 7×7 covariance in (px, py, pz, E, x, y, z) order
pub type Matrix7 = SMatrix<f64, 7, 7>;

/// 3×7 vertex–track cross covariance
pub type Matrix3x7 = SMatrix<f64, 3, 7>;

/// Full 7-parameter track state
pub type Vector7 = SVector<f64, 7>;

/// Which side of the fit a quantity refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitStage {
    /// Measured input
    BeforeFit,
    /// Fitted output
    AfterFit,
}

impl TryFrom<i32> for FitStage {
    type Error = FitError;

    /// Numeric flag: 0 before fit, 1 after fit
    fn try_from(flag: i32) -> Result<Self, Self::Error> {
        match flag {
            0 => Ok(FitStage::BeforeFit),
            1 => Ok(FitStage::AfterFit),
            other => Err(FitError::OutOfRange {
                index: i64::from(other),
                len: 2,
            }),
        }
    }
}

/// Kinematic state of a track on one side of the fit
#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    /// (px, py, pz, E)
    pub momentum: Vector4<f64>,
    /// Reference point of the track
    pub position: Point3<f64>,
    /// Covariance of (px, py, pz, E, x, y, z)
    pub error: Matrix7,
}

impl TrackState {
    fn zero() -> Self {
        Self {
            momentum: Vector4::zeros(),
            position: Point3::origin(),
            error: Matrix7::zeros(),
        }
    }
}

/// A charged or neutral track entering a kinematic fit
///
/// The before-fit state is fixed at construction. The after-fit state is
/// written only by a fitter, on success.
#[derive(Debug, Clone, PartialEq)]
pub struct FitTrack {
    before: TrackState,
    after: TrackState,
    charge: f64,
    mass: f64,
}

impl FitTrack {
    /// Create a track from a 4-momentum, position and 7×7 covariance
    ///
    /// The mass hypothesis is taken from the 4-momentum, clamped at zero for
    /// slightly space-like inputs.
    pub fn new(momentum: Vector4<f64>, position: Point3<f64>, error: Matrix7, charge: f64) -> Self {
        let m2 = momentum[3] * momentum[3] - momentum.xyz().norm_squared();
        Self {
            before: TrackState {
                momentum,
                position,
                error,
            },
            after: TrackState::zero(),
            charge,
            mass: m2.max(0.0).sqrt(),
        }
    }

    /// Create a track from a 3-momentum and a mass hypothesis
    pub fn with_mass(
        momentum: Vector3<f64>,
        mass: f64,
        position: Point3<f64>,
        error: Matrix7,
        charge: f64,
    ) -> Self {
        let energy = (momentum.norm_squared() + mass * mass).sqrt();
        let mut track = Self::new(
            Vector4::new(momentum.x, momentum.y, momentum.z, energy),
            position,
            error,
            charge,
        );
        track.mass = mass;
        track
    }

    /// Create a track from a (x, y, z, px, py, pz) covariance
    ///
    /// This is the layout track fitters usually report. The energy row and
    /// column are filled by propagating through `E = sqrt(p² + m²)`.
    pub fn from_position_momentum(
        position: Point3<f64>,
        momentum: Vector3<f64>,
        covariance: &Matrix6<f64>,
        mass: f64,
        charge: f64,
    ) -> Self {
        let energy = (momentum.norm_squared() + mass * mass).sqrt();

        // (x, y, z, px, py, pz) -> (px, py, pz, E, x, y, z)
        let mut jacobian = SMatrix::<f64, 7, 6>::zeros();
        for k in 0..3 {
            jacobian[(k, 3 + k)] = 1.0;
            jacobian[(4 + k, k)] = 1.0;
            if energy > 0.0 {
                jacobian[(3, 3 + k)] = momentum[k] / energy;
            }
        }
        let error = jacobian * covariance * jacobian.transpose();

        let mut track = Self::new(
            Vector4::new(momentum.x, momentum.y, momentum.z, energy),
            position,
            error,
            charge,
        );
        track.mass = mass;
        track
    }

    fn state(&self, stage: FitStage) -> &TrackState {
        match stage {
            FitStage::BeforeFit => &self.before,
            FitStage::AfterFit => &self.after,
        }
    }

    /// 4-momentum (px, py, pz, E)
    pub fn momentum(&self, stage: FitStage) -> Vector4<f64> {
        self.state(stage).momentum
    }

    /// Reference position
    pub fn position(&self, stage: FitStage) -> Point3<f64> {
        self.state(stage).position
    }

    /// 7×7 covariance
    pub fn error(&self, stage: FitStage) -> Matrix7 {
        self.state(stage).error
    }

    /// Electric charge in units of e
    #[inline]
    pub fn charge(&self) -> f64 {
        self.charge
    }

    /// Mass hypothesis
    #[inline]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// All seven parameters (px, py, pz, E, x, y, z)
    pub fn parameters(&self, stage: FitStage) -> Vector7 {
        let s = self.state(stage);
        Vector7::from_column_slice(&[
            s.momentum[0],
            s.momentum[1],
            s.momentum[2],
            s.momentum[3],
            s.position.x,
            s.position.y,
            s.position.z,
        ])
    }

    /// Six parameters without energy (px, py, pz, x, y, z)
    pub fn fit_parameters(&self, stage: FitStage) -> Vector6<f64> {
        let s = self.state(stage);
        Vector6::new(
            s.momentum[0],
            s.momentum[1],
            s.momentum[2],
            s.position.x,
            s.position.y,
            s.position.z,
        )
    }

    /// 6×6 covariance of [`fit_parameters`](Self::fit_parameters)
    pub fn fit_error(&self, stage: FitStage) -> Matrix6<f64> {
        let e = &self.state(stage).error;
        let idx = [0, 1, 2, 4, 5, 6];
        Matrix6::from_fn(|i, j| e[(idx[i], idx[j])])
    }

    pub(crate) fn set_after(&mut self, momentum: Vector4<f64>, position: Point3<f64>, error: Matrix7) {
        self.after = TrackState {
            momentum,
            position,
            error,
        };
    }

    pub(crate) fn clear_after(&mut self) {
        self.after = TrackState::zero();
    }
}
