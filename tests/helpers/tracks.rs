//! Track builders
//!
//! Tracks are placed on exact helices through a known vertex, so an
//! unsmeared set satisfies every vertex constraint.

use kinfit::common::constants::LIGHT_SPEED;
use kinfit::{FitStage, FitTrack};
use nalgebra::{Matrix6, Point3, Vector3, Vector4};
use rand::Rng;
use rand_distr::{Distribution, Normal};

pub const PION_MASS: f64 = 0.139_57;
pub const KAON_SHORT_MASS: f64 = 0.497_611;
pub const FIELD: f64 = 1.5;

/// Diagonal (x, y, z, px, py, pz) covariance
pub fn diagonal_covariance(position_sigma: f64, momentum_sigma: f64) -> Matrix6<f64> {
    let mut c = Matrix6::zeros();
    for k in 0..3 {
        c[(k, k)] = position_sigma * position_sigma;
        c[(3 + k, 3 + k)] = momentum_sigma * momentum_sigma;
    }
    c
}

/// Point and momentum on the helix through `vertex`
///
/// `momentum` is the momentum at the vertex. For charged tracks `turn` is
/// the bending angle from the vertex; for neutral ones the point is
/// `vertex + turn·momentum`.
pub fn helix_point(
    vertex: &Point3<f64>,
    momentum: &Vector3<f64>,
    charge: f64,
    turn: f64,
) -> (Point3<f64>, Vector3<f64>) {
    let a = -LIGHT_SPEED * FIELD * charge;
    if a == 0.0 {
        return (vertex + momentum * turn, *momentum);
    }
    let pt = momentum.xy().norm();
    let phi0 = momentum.y.atan2(momentum.x);
    let phi = phi0 + turn;
    let offset = Vector3::new(
        pt * (phi.sin() - phi0.sin()) / a,
        pt * (phi0.cos() - phi.cos()) / a,
        momentum.z * turn / a,
    );
    (
        vertex + offset,
        Vector3::new(pt * phi.cos(), pt * phi.sin(), momentum.z),
    )
}

/// Track on the helix through `vertex` with the given covariance
pub fn helix_track(
    vertex: &Point3<f64>,
    momentum: &Vector3<f64>,
    mass: f64,
    charge: f64,
    turn: f64,
    covariance: &Matrix6<f64>,
) -> FitTrack {
    let (position, p) = helix_point(vertex, momentum, charge, turn);
    FitTrack::from_position_momentum(position, p, covariance, mass, charge)
}

/// Copy of `track` with Gaussian noise of width `sigma` on each momentum component
///
/// `covariance` is the (x, y, z, px, py, pz) covariance the track was built with.
pub fn smear_momentum<R: Rng>(
    track: &FitTrack,
    covariance: &Matrix6<f64>,
    sigma: f64,
    rng: &mut R,
) -> FitTrack {
    let noise = Normal::new(0.0, sigma).unwrap();
    let p = track.momentum(FitStage::BeforeFit).xyz();
    let smeared = Vector3::new(
        p.x + noise.sample(rng),
        p.y + noise.sample(rng),
        p.z + noise.sample(rng),
    );
    FitTrack::from_position_momentum(
        track.position(FitStage::BeforeFit),
        smeared,
        covariance,
        track.mass(),
        track.charge(),
    )
}

/// Invariant mass of a 4-momentum
pub fn mass_of(p: &Vector4<f64>) -> f64 {
    (p[3] * p[3] - p.xyz().norm_squared()).max(0.0).sqrt()
}

/// Daughter momenta of a two-body decay with mother momentum `boost`
///
/// The decay axis is given in the mother rest frame.
pub fn two_body_decay(
    mother_mass: f64,
    daughter_mass: f64,
    decay_axis: &Vector3<f64>,
    boost: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let q = (mother_mass * mother_mass / 4.0 - daughter_mass * daughter_mass).sqrt();
    let e_star = mother_mass / 2.0;
    let axis = decay_axis.normalize();

    // mother momentum `boost`, γ and β from it
    let e_mother = (boost.norm_squared() + mother_mass * mother_mass).sqrt();
    let beta = boost / e_mother;
    let gamma = e_mother / mother_mass;

    let lorentz = |p: Vector3<f64>| -> Vector3<f64> {
        let b2 = beta.norm_squared();
        if b2 == 0.0 {
            return p;
        }
        let bp = beta.dot(&p);
        p + beta * ((gamma - 1.0) * bp / b2 + gamma * e_star)
    };
    (lorentz(axis * q), lorentz(-axis * q))
}
