//! Vertex and invariant-mass constraint equations
//!
//! Each track contributes two equations tying its helix to the common vertex
//! `v`. With `Δ = v - x` (track reference point `x`), `pt = |p_T|` and the
//! curvature coefficient `a = -c·B·q`:
//!
//! ```text
//! a1 = -Δx·py + Δy·px          a2 = Δx·px + Δy·py
//! transverse:    a1 - ½·a·(Δx² + Δy²)              = 0
//! longitudinal:  (Δz - pz·asin(a·a2/pt²)/a) · pt   = 0   (charged)
//!                (Δz - pz·a2/pt²) · pt             = 0   (neutral)
//! ```
//!
//! An optional last row constrains the invariant mass of all tracks:
//! `E² - |P|² - M² = 0` with `(P, E)` the summed 4-momentum. Every track
//! enters with its momentum transported to the vertex (`px - a·(vy - y)`,
//! `py + a·(vx - x)`). Mass-fixed tracks take `E = sqrt(p² + m²)` of that
//! momentum; free-energy tracks use their fitted `E`.
//!
//! Parameters are laid out 7 per track: (px, py, pz, E, x, y, z).

use nalgebra::{DVector, Vector3};
use smallvec::SmallVec;

use super::errors::FitError;
use super::traits::{ConstraintModel, Linearization};
use crate::common::constants::{CONSTRAINTS_PER_TRACK, MAX_TRACK_COUNT, TRACK_PARAMS};

const PX: usize = 0;
const PY: usize = 1;
const PZ: usize = 2;
const E: usize = 3;
const X: usize = 4;
const Y: usize = 5;
const Z: usize = 6;

/// Per-track constants of a fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackProperty {
    /// Electric charge
    pub charge: f64,
    /// Mass hypothesis
    pub mass: f64,
    /// Curvature coefficient `-c·B·q`; zero for neutral tracks
    pub curvature: f64,
}

/// Common-vertex constraints with an optional invariant-mass constraint
#[derive(Debug, Clone)]
pub struct MassVertexConstraints {
    properties: Vec<TrackProperty>,
    fix_mass: SmallVec<[bool; MAX_TRACK_COUNT]>,
    invariant_mass: Option<f64>,
}

impl MassVertexConstraints {
    /// Create the constraint set
    ///
    /// `fix_mass` must have one entry per property.
    pub fn new(
        properties: Vec<TrackProperty>,
        fix_mass: SmallVec<[bool; MAX_TRACK_COUNT]>,
        invariant_mass: Option<f64>,
    ) -> Result<Self, FitError> {
        if fix_mass.len() != properties.len() {
            return Err(FitError::BadTrackSize {
                expected: properties.len(),
                actual: fix_mass.len(),
            });
        }
        Ok(Self {
            properties,
            fix_mass,
            invariant_mass,
        })
    }

    /// Number of tracks
    #[inline]
    pub fn track_count(&self) -> usize {
        self.properties.len()
    }

    /// Whether the invariant-mass row is present
    #[inline]
    pub fn is_mass_constrained(&self) -> bool {
        self.invariant_mass.is_some()
    }

    /// Per-track properties
    pub fn properties(&self) -> &[TrackProperty] {
        &self.properties
    }

    /// Per-track mass-fix flags
    pub fn fix_mass(&self) -> &[bool] {
        &self.fix_mass
    }

    fn vertex_rows(
        &self,
        al: &DVector<f64>,
        vertex: &Vector3<f64>,
        lin: &mut Linearization,
    ) -> Result<(), FitError> {
        for (i, prop) in self.properties.iter().enumerate() {
            let o = TRACK_PARAMS * i;
            let r0 = CONSTRAINTS_PER_TRACK * i;
            let r1 = r0 + 1;

            let px = al[o + PX];
            let py = al[o + PY];
            let pz = al[o + PZ];
            let a = prop.curvature;

            let pt = (px * px + py * py).sqrt();
            if pt == 0.0 {
                return Err(FitError::division_by_zero(format!(
                    "track {} has zero transverse momentum",
                    i
                )));
            }
            let inv_pt = 1.0 / pt;
            let inv_pt2 = inv_pt * inv_pt;

            let dlx = vertex[0] - al[o + X];
            let dly = vertex[1] - al[o + Y];
            let dlz = vertex[2] - al[o + Z];
            let a1 = -dlx * py + dly * px;
            let a2 = dlx * px + dly * py;
            let r2d2 = dlx * dlx + dly * dly;
            let rx = dlx - 2.0 * px * a2 * inv_pt2;
            let ry = dly - 2.0 * py * a2 * inv_pt2;

            let (sininv, s, u) = if a != 0.0 {
                let b = a * a2 * inv_pt2;
                if b.abs() > 1.0 {
                    return Err(FitError::division_by_zero(format!(
                        "track {} cannot reach the vertex (|asin argument| = {:.6} > 1)",
                        i,
                        b.abs()
                    )));
                }
                let one_minus_b2 = 1.0 - b * b;
                if one_minus_b2 == 0.0 {
                    return Err(FitError::division_by_zero(format!(
                        "track {} is tangent at the vertex",
                        i
                    )));
                }
                let sininv = b.asin();
                let sqrtag = 1.0 / one_minus_b2.sqrt();
                (sininv, sqrtag * inv_pt2, dlz - pz * sininv / a)
            } else {
                (0.0, inv_pt2, dlz - pz * a2 * inv_pt2)
            };

            lin.residual[r0] = a1 - 0.5 * a * r2d2;
            lin.residual[r1] = u * pt;

            let d = &mut lin.jacobian;
            d[(r0, o + PX)] = dly;
            d[(r0, o + PY)] = -dlx;
            d[(r0, o + X)] = py + a * dlx;
            d[(r0, o + Y)] = -px + a * dly;

            let pzpts = pz * pt * s;
            d[(r1, o + PX)] = -pzpts * rx + u * px * inv_pt;
            d[(r1, o + PY)] = -pzpts * ry + u * py * inv_pt;
            d[(r1, o + PZ)] = if a != 0.0 {
                -sininv * pt / a
            } else {
                -a2 * inv_pt
            };
            d[(r1, o + X)] = px * pzpts;
            d[(r1, o + Y)] = py * pzpts;
            d[(r1, o + Z)] = -pt;

            let e = &mut lin.vertex_jacobian;
            e[(r0, 0)] = -py - a * dlx;
            e[(r0, 1)] = px - a * dly;
            e[(r1, 0)] = -px * pzpts;
            e[(r1, 1)] = -py * pzpts;
            e[(r1, 2)] = pt;
        }
        Ok(())
    }

    fn mass_row(
        &self,
        al: &DVector<f64>,
        vertex: &Vector3<f64>,
        invariant_mass: f64,
        lin: &mut Linearization,
    ) -> Result<(), FitError> {
        let n = self.track_count();
        let row = CONSTRAINTS_PER_TRACK * n;

        // 4-momentum each track contributes to the sum, transported to the vertex
        let mut moved: SmallVec<[[f64; 4]; MAX_TRACK_COUNT]> = SmallVec::with_capacity(n);
        let mut sum = [0.0f64; 4];

        for (i, prop) in self.properties.iter().enumerate() {
            let o = TRACK_PARAMS * i;
            let a = prop.curvature;
            let px = al[o + PX] - a * (vertex[1] - al[o + Y]);
            let py = al[o + PY] + a * (vertex[0] - al[o + X]);
            let pz = al[o + PZ];
            let energy = if self.fix_mass[i] {
                let energy = (px * px + py * py + pz * pz + prop.mass * prop.mass).sqrt();
                if energy == 0.0 {
                    return Err(FitError::division_by_zero(format!(
                        "track {} has zero energy",
                        i
                    )));
                }
                energy
            } else {
                al[o + E]
            };
            let p = [px, py, pz, energy];
            for k in 0..4 {
                sum[k] += p[k];
            }
            moved.push(p);
        }

        lin.residual[row] = sum[3] * sum[3]
            - sum[0] * sum[0]
            - sum[1] * sum[1]
            - sum[2] * sum[2]
            - invariant_mass * invariant_mass;

        for (i, prop) in self.properties.iter().enumerate() {
            let o = TRACK_PARAMS * i;
            let a = prop.curvature;
            let p = &moved[i];

            // derivatives with respect to the transported momentum
            let (gx, gy, gz) = if self.fix_mass[i] {
                let inv_e = 1.0 / p[3];
                (
                    2.0 * (sum[3] * p[0] * inv_e - sum[0]),
                    2.0 * (sum[3] * p[1] * inv_e - sum[1]),
                    2.0 * (sum[3] * p[2] * inv_e - sum[2]),
                )
            } else {
                lin.jacobian[(row, o + E)] = 2.0 * sum[3];
                (-2.0 * sum[0], -2.0 * sum[1], -2.0 * sum[2])
            };

            let d = &mut lin.jacobian;
            d[(row, o + PX)] = gx;
            d[(row, o + PY)] = gy;
            d[(row, o + PZ)] = gz;
            d[(row, o + X)] = -a * gy;
            d[(row, o + Y)] = a * gx;

            lin.vertex_jacobian[(row, 0)] += a * gy;
            lin.vertex_jacobian[(row, 1)] -= a * gx;
        }
        Ok(())
    }
}

impl ConstraintModel for MassVertexConstraints {
    fn num_params(&self) -> usize {
        TRACK_PARAMS * self.track_count()
    }

    fn num_constraints(&self) -> usize {
        CONSTRAINTS_PER_TRACK * self.track_count() + usize::from(self.is_mass_constrained())
    }

    fn linearize(
        &self,
        params: &DVector<f64>,
        vertex: &Vector3<f64>,
    ) -> Result<Linearization, FitError> {
        let mut lin = Linearization::zeros(self.num_constraints(), self.num_params());
        self.vertex_rows(params, vertex, &mut lin)?;
        if let Some(mass) = self.invariant_mass {
            self.mass_row(params, vertex, mass, &mut lin)?;
        }
        Ok(lin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    const A_CHARGED: f64 = -0.002_997_924_58 * 1.5;

    fn props(curvatures: &[f64], masses: &[f64]) -> Vec<TrackProperty> {
        curvatures
            .iter()
            .zip(masses)
            .map(|(&a, &m)| TrackProperty {
                charge: if a == 0.0 { 0.0 } else { -a.signum() },
                mass: m,
                curvature: a,
            })
            .collect()
    }

    /// Two tracks near, but not exactly through, the vertex
    fn params() -> DVector<f64> {
        DVector::from_vec(vec![
            0.8, 0.3, 0.4, 0.92, 0.02, -0.01, 0.03, //
            -0.5, 0.6, -0.2, 0.83, -0.015, 0.025, -0.02,
        ])
    }

    /// Central finite differences against the analytic D and E
    fn check_jacobians(model: &MassVertexConstraints, al: &DVector<f64>, v: &Vector3<f64>) {
        let lin = model.linearize(al, v).unwrap();
        let h = 1e-6;

        for col in 0..al.len() {
            let mut up = al.clone();
            let mut down = al.clone();
            up[col] += h;
            down[col] -= h;
            let fd = (model.linearize(&up, v).unwrap().residual
                - model.linearize(&down, v).unwrap().residual)
                / (2.0 * h);
            for row in 0..lin.num_constraints() {
                let analytic = lin.jacobian[(row, col)];
                let tol = 1e-6 * (1.0 + analytic.abs());
                assert!(
                    (fd[row] - analytic).abs() < tol,
                    "D[{}, {}]: analytic {} vs numeric {}",
                    row,
                    col,
                    analytic,
                    fd[row]
                );
            }
        }

        for c in 0..3 {
            let mut up = *v;
            let mut down = *v;
            up[c] += h;
            down[c] -= h;
            let fd = (model.linearize(al, &up).unwrap().residual
                - model.linearize(al, &down).unwrap().residual)
                / (2.0 * h);
            for row in 0..lin.num_constraints() {
                let analytic = lin.vertex_jacobian[(row, c)];
                let tol = 1e-6 * (1.0 + analytic.abs());
                assert!(
                    (fd[row] - analytic).abs() < tol,
                    "E[{}, {}]: analytic {} vs numeric {}",
                    row,
                    c,
                    analytic,
                    fd[row]
                );
            }
        }
    }

    #[test]
    fn test_row_counts() {
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.14, 0.14]),
            smallvec![true, true],
            None,
        )
        .unwrap();
        assert_eq!(m.num_params(), 14);
        assert_eq!(m.num_constraints(), 4);

        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.14, 0.14]),
            smallvec![true, true],
            Some(0.5),
        )
        .unwrap();
        assert_eq!(m.num_constraints(), 5);
    }

    #[test]
    fn test_flag_count_must_match() {
        let err = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.14, 0.14]),
            smallvec![true],
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FitError::BadTrackSize {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_jacobians_charged_vertex_only() {
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.14, 0.14]),
            smallvec![true, true],
            None,
        )
        .unwrap();
        check_jacobians(&m, &params(), &Vector3::new(0.01, 0.005, -0.01));
    }

    #[test]
    fn test_jacobians_neutral_vertex_only() {
        let m = MassVertexConstraints::new(
            props(&[0.0, 0.0], &[0.0, 0.0]),
            smallvec![true, true],
            None,
        )
        .unwrap();
        check_jacobians(&m, &params(), &Vector3::new(0.01, 0.005, -0.01));
    }

    #[test]
    fn test_jacobians_mass_constraint_fixed_masses() {
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.13957, 0.13957]),
            smallvec![true, true],
            Some(0.497_611),
        )
        .unwrap();
        check_jacobians(&m, &params(), &Vector3::new(0.01, 0.005, -0.01));
    }

    #[test]
    fn test_jacobians_mass_constraint_mixed_flags() {
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.13957, 0.13957]),
            smallvec![true, false],
            Some(0.497_611),
        )
        .unwrap();
        check_jacobians(&m, &params(), &Vector3::new(-0.02, 0.01, 0.015));
    }

    #[test]
    fn test_jacobians_mass_constraint_free_energies() {
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.13957, 0.13957]),
            smallvec![false, false],
            Some(0.497_611),
        )
        .unwrap();
        check_jacobians(&m, &params(), &Vector3::new(0.3, -0.4, 0.015));
    }

    #[test]
    fn test_free_energy_momentum_is_transported_to_vertex() {
        // one charged track displaced from the vertex along x
        let al = DVector::from_vec(vec![
            0.0, 1.0, 0.0, 2.0, -2.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, 2.0, 0.0, 0.0, 0.0,
        ]);
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, 0.0], &[0.0, 0.0]),
            smallvec![false, false],
            Some(3.0),
        )
        .unwrap();
        let lin = m.linearize(&al, &Vector3::zeros()).unwrap();

        // py' = 1 + a·(0 - (-2)), the neutral track keeps py = -1
        let py = 2.0 * A_CHARGED;
        let expected = 16.0 - py * py - 9.0;
        assert!((lin.residual[4] - expected).abs() < 1e-12);
        assert!(lin.vertex_jacobian[(4, 0)] != 0.0);
    }

    #[test]
    fn test_residuals_vanish_for_straight_tracks_through_vertex() {
        // neutral tracks starting exactly at the vertex
        let al = DVector::from_vec(vec![
            1.0, 0.0, 0.5, 1.2, 0.1, 0.2, 0.3, //
            0.0, -1.0, 0.2, 1.1, 0.1, 0.2, 0.3,
        ]);
        let m = MassVertexConstraints::new(
            props(&[0.0, 0.0], &[0.0, 0.0]),
            smallvec![false, false],
            None,
        )
        .unwrap();
        let lin = m.linearize(&al, &Vector3::new(0.1, 0.2, 0.3)).unwrap();
        assert!(lin.residual.amax() < 1e-15);
    }

    #[test]
    fn test_mass_residual_of_free_energy_tracks() {
        let al = DVector::from_vec(vec![
            1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, //
            -1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0,
        ]);
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.0, 0.0]),
            smallvec![false, false],
            Some(3.0),
        )
        .unwrap();
        let lin = m.linearize(&al, &Vector3::zeros()).unwrap();
        // (2 + 2)² - 0 - 3²
        assert!((lin.residual[4] - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_pt_is_division_by_zero() {
        let mut al = params();
        al[7] = 0.0;
        al[8] = 0.0;
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.14, 0.14]),
            smallvec![true, true],
            None,
        )
        .unwrap();
        let err = m.linearize(&al, &Vector3::zeros()).unwrap_err();
        assert!(matches!(err, FitError::DivisionByZero { .. }));
    }

    #[test]
    fn test_unreachable_vertex_is_division_by_zero() {
        // |a·a2/pt²| > 1: the vertex is further away than the helix diameter
        let al = DVector::from_vec(vec![
            0.01, 0.0, 0.0, 0.1, 0.0, 0.0, 0.0, //
            -0.5, 0.6, -0.2, 0.83, 0.0, 0.0, 0.0,
        ]);
        let m = MassVertexConstraints::new(
            props(&[A_CHARGED, -A_CHARGED], &[0.1, 0.1]),
            smallvec![true, true],
            None,
        )
        .unwrap();
        let err = m.linearize(&al, &Vector3::new(50.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, FitError::DivisionByZero { .. }));
    }
}
