// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared affine transform helpers.
//!
//! All scene transforms are 4x4 homogeneous matrices in f64. Normals are
//! mapped by the inverse transpose of the linear part so that per-axis
//! scaling does not skew them.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// Extract the linear (upper-left 3x3) part of a homogeneous transform.
#[inline]
pub fn linear_part(m: &Matrix4<f64>) -> Matrix3<f64> {
    m.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Extract the translation column of a homogeneous transform.
#[inline]
pub fn translation_of(m: &Matrix4<f64>) -> Vector3<f64> {
    Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

/// Build a pure translation matrix.
#[inline]
pub fn translation_matrix(t: Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_translation(&t)
}

/// Build a per-axis scaling matrix.
#[inline]
pub fn scale_matrix(s: Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_nonuniform_scaling(&s)
}

/// Transform a point by a homogeneous matrix.
#[inline]
pub fn transform_point(m: &Matrix4<f64>, p: &Point3<f64>) -> Point3<f64> {
    m.transform_point(p)
}

/// Transform a normal by the inverse transpose of the linear part,
/// renormalized. Returns the input unchanged when the linear part is
/// singular or the result degenerates to zero.
pub fn transform_normal(m: &Matrix4<f64>, n: &Vector3<f64>) -> Vector3<f64> {
    let linear = linear_part(m);
    let mapped = match linear.try_inverse() {
        Some(inv) => inv.transpose() * n,
        None => return *n,
    };
    let norm = mapped.norm();
    if norm > 0.0 {
        mapped / norm
    } else {
        *n
    }
}
