//! Covariance propagation through the mass hypothesis
//!
//! When a track's energy is derived from its momentum and mass rather than
//! fitted, the energy row/column of its covariance has to be rebuilt from
//! `dE/dp = p/E`. These helpers do that for a single track, for a track pair
//! and for a vertex–track cross covariance.

use nalgebra::Vector4;

use super::errors::FitError;
use super::track::{Matrix3x7, Matrix7};

const E: usize = 3;

fn energy_gradient(p: &Vector4<f64>) -> Result<[f64; 3], FitError> {
    if p[3] == 0.0 {
        return Err(FitError::division_by_zero("track energy in error propagation"));
    }
    let inv_e = 1.0 / p[3];
    Ok([p[0] * inv_e, p[1] * inv_e, p[2] * inv_e])
}

/// Covariance of one track
///
/// With `fix_mass`, the energy row and column are recomputed from the
/// momentum block; otherwise `e` is returned symmetrised from its upper
/// triangle.
pub fn track_error(p: &Vector4<f64>, e: &Matrix7, fix_mass: bool) -> Result<Matrix7, FitError> {
    let g = energy_gradient(p)?;
    let mut out = Matrix7::zeros();
    for i in 0..7 {
        for j in i..7 {
            out[(i, j)] = e[(i, j)];
            out[(j, i)] = e[(i, j)];
        }
    }
    if !fix_mass {
        return Ok(out);
    }

    for j in 0..7 {
        if j == E {
            continue;
        }
        let cov: f64 = (0..3).map(|k| g[k] * out[(k, j)]).sum();
        out[(E, j)] = cov;
        out[(j, E)] = cov;
    }
    let mut var = 0.0;
    for k in 0..3 {
        for l in 0..3 {
            var += g[k] * g[l] * out[(k, l)];
        }
    }
    out[(E, E)] = var;
    Ok(out)
}

/// Cross covariance of two tracks
///
/// Rows belong to the first track, columns to the second. Each side's energy
/// is rebuilt only if that side is mass-fixed.
pub fn pair_error(
    p1: &Vector4<f64>,
    p2: &Vector4<f64>,
    e: &Matrix7,
    fix_mass1: bool,
    fix_mass2: bool,
) -> Result<Matrix7, FitError> {
    let mut out = *e;

    if fix_mass2 {
        let g2 = energy_gradient(p2)?;
        for i in 0..7 {
            if fix_mass1 && i == E {
                continue;
            }
            out[(i, E)] = (0..3).map(|k| g2[k] * e[(i, k)]).sum();
        }
    }

    if fix_mass1 {
        let g1 = energy_gradient(p1)?;
        let source = out;
        for j in 0..7 {
            out[(E, j)] = (0..3).map(|k| g1[k] * source[(k, j)]).sum();
        }
    }

    Ok(out)
}

/// Vertex–track cross covariance
///
/// Rebuilds the energy column of a 3×7 block for a mass-fixed track.
pub fn vertex_track_error(p: &Vector4<f64>, e: &Matrix3x7) -> Result<Matrix3x7, FitError> {
    let g = energy_gradient(p)?;
    let mut out = *e;
    for i in 0..3 {
        out[(i, E)] = (0..3).map(|k| g[k] * e[(i, k)]).sum();
    }
    Ok(out)
}
