//! Assertion functions for numerical comparisons with tolerance

use nalgebra::{Point3, SMatrix};

/// Compare scalar values with tolerance
pub fn assert_scalar_close(actual: f64, expected: f64, tolerance: f64, field_name: &str) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "{}: expected {}, got {} (diff: {}, tolerance: {})",
        field_name,
        expected,
        actual,
        diff,
        tolerance
    );
}

/// Compare points coordinate-wise with tolerance
pub fn assert_point_close(actual: &Point3<f64>, expected: &Point3<f64>, tolerance: f64, field_name: &str) {
    for (k, axis) in ["x", "y", "z"].iter().enumerate() {
        assert_scalar_close(
            actual[k],
            expected[k],
            tolerance,
            &format!("{}.{}", field_name, axis),
        );
    }
}

/// Compare fixed-size matrices element-wise with tolerance
pub fn assert_matrix_close<const R: usize, const C: usize>(
    actual: &SMatrix<f64, R, C>,
    expected: &SMatrix<f64, R, C>,
    tolerance: f64,
    field_name: &str,
) {
    for i in 0..R {
        for j in 0..C {
            let diff = (actual[(i, j)] - expected[(i, j)]).abs();
            assert!(
                diff <= tolerance,
                "{}[{},{}]: expected {}, got {} (diff: {}, tolerance: {})",
                field_name,
                i,
                j,
                expected[(i, j)],
                actual[(i, j)],
                diff,
                tolerance
            );
        }
    }
}

/// Check a square matrix is symmetric with a non-negative diagonal
pub fn assert_covariance_like<const N: usize>(m: &SMatrix<f64, N, N>, tolerance: f64, field_name: &str) {
    assert_matrix_close(m, &m.transpose(), tolerance, &format!("{} symmetry", field_name));
    for i in 0..N {
        assert!(
            m[(i, i)] >= -tolerance,
            "{}[{},{}]: negative variance {}",
            field_name,
            i,
            i,
            m[(i, i)]
        );
    }
}
