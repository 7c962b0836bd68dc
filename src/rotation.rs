//! Conversions between rotation matrices and unit quaternions.

use cgmath::prelude::*;
use cgmath::{Matrix3, Quaternion};

/// Convert a rotation matrix into a unit quaternion `(w, x, y, z)` with `w >= 0`.
///
/// `q` and `-q` encode the same rotation, COLMAP files conventionally carry the one with a
/// non-negative scalar part.
pub fn matrix_to_quaternion(m: &Matrix3<f64>) -> Quaternion<f64> {
    let q = Quaternion::from(*m).normalize();
    if q.s < 0.0 {
        -q
    } else {
        q
    }
}

/// Convert a (not necessarily normalized) quaternion into a rotation matrix.
pub fn quaternion_to_matrix(q: Quaternion<f64>) -> Matrix3<f64> {
    Matrix3::from(q.normalize())
}

/// Flatten a rotation matrix in column-major order.
pub fn column_major(m: &Matrix3<f64>) -> [f64; 9] {
    [
        m.x.x, m.x.y, m.x.z, m.y.x, m.y.y, m.y.z, m.z.x, m.z.y, m.z.z,
    ]
}

/// Build a matrix from rows.
pub fn from_rows(rows: [[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        rows[0][0], rows[1][0], rows[2][0], rows[0][1], rows[1][1], rows[2][1], rows[0][2],
        rows[1][2], rows[2][2],
    )
}
