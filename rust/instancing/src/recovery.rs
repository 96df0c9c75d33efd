// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Affine transform recovery from point correspondences.
//!
//! Given two structurally identical facet groups, recovers the affine map
//! (per-axis scale, rotation, translation) aligning the first onto the
//! second, or fails. Failure is a normal matcher outcome, never a panic:
//! degenerate geometry (collinear or duplicate correspondences, singular
//! scale systems) simply yields `None`.

use nalgebra::{Matrix3, Matrix4, Point3, Unit, UnitQuaternion, Vector3};
use smallvec::SmallVec;

use cadscene_model::transform::{scale_matrix, translation_matrix};
use cadscene_model::FacetGroup;

/// Absolute tolerance for verifying recovered transforms (1mm in model units).
pub const VERIFY_TOLERANCE: f64 = 1e-3;

/// Relative tolerance used when selecting distinct correspondence points and
/// when deciding that edge lengths already agree (0.1%).
pub const RELATIVE_TOLERANCE: f64 = 1e-3;

/// Sine-of-angle threshold below which a correspondence triple is treated
/// as collinear.
const COLLINEAR_SIN_THRESHOLD: f64 = 1e-3;

/// Recover the affine transform `T` with `T * a[i] ≈ b[i]` from the first
/// four usable vertex correspondences, verifying all four within
/// [`VERIFY_TOLERANCE`]. Both groups must have identical structure (the
/// caller guarantees this via the structural key).
pub fn recover_transform(a: &FacetGroup, b: &FacetGroup) -> Option<Matrix4<f64>> {
    let picks = select_correspondences(a)?;

    let pa: SmallVec<[Point3<f64>; 4]> = picks
        .iter()
        .map(|&i| nth_vertex(a, i))
        .collect::<Option<_>>()?;
    let pb: SmallVec<[Point3<f64>; 4]> = picks
        .iter()
        .map(|&i| nth_vertex(b, i))
        .collect::<Option<_>>()?;

    let scale = recover_scale(&pa, &pb)?;
    let sa: SmallVec<[Point3<f64>; 4]> = pa
        .iter()
        .map(|p| Point3::from(p.coords.component_mul(&scale)))
        .collect();

    let rotation = recover_rotation(&sa, &pb)?;
    let translation = pb[0].coords - rotation * sa[0].coords;

    let transform =
        translation_matrix(translation) * rotation.to_homogeneous() * scale_matrix(scale);

    // All four correspondences must map within tolerance, including the
    // fourth point that took no part in the solve.
    for (p, q) in pa.iter().zip(pb.iter()) {
        if (transform.transform_point(p) - q).norm() > VERIFY_TOLERANCE {
            return None;
        }
    }

    Some(transform)
}

/// Verify that `transform` maps every vertex and normal of `a` onto the
/// corresponding vertex and normal of `b` within `tolerance`. Counts are
/// guaranteed equal by the structural key, so the walk is purely positional.
pub fn verify_facets(
    a: &FacetGroup,
    b: &FacetGroup,
    transform: &Matrix4<f64>,
    tolerance: f64,
) -> bool {
    if a.vertex_count() != b.vertex_count() {
        return false;
    }

    let linear = transform.fixed_view::<3, 3>(0, 0).into_owned();
    let normal_map = match linear.try_inverse() {
        Some(inv) => inv.transpose(),
        None => return false,
    };

    for ((pa, na), (pb, nb)) in a.iter_vertices().zip(b.iter_vertices()) {
        if (transform.transform_point(pa) - pb).norm() > tolerance {
            return false;
        }
        let mapped = normal_map * na;
        let norm = mapped.norm();
        if norm > 0.0 {
            if (mapped / norm - nb).norm() > tolerance {
                return false;
            }
        } else if nb.norm() > tolerance {
            return false;
        }
    }
    true
}

/// Pick the flat indices of the first three non-collinear, non-duplicate
/// vertices plus a fourth distinct vertex for verification.
fn select_correspondences(group: &FacetGroup) -> Option<[usize; 4]> {
    let mut chosen: SmallVec<[(usize, Point3<f64>); 4]> = SmallVec::new();

    for (i, (p, _)) in group.iter_vertices().enumerate() {
        let distinct = chosen.iter().all(|(_, q)| is_distinct(p, q));
        if !distinct {
            continue;
        }

        if chosen.len() == 2 {
            // Reject near-collinear thirds: the triangle they span must
            // have a usable normal.
            let e1 = chosen[1].1 - chosen[0].1;
            let e2 = p - chosen[0].1;
            let cross = e1.cross(&e2);
            if cross.norm() <= COLLINEAR_SIN_THRESHOLD * e1.norm() * e2.norm() {
                continue;
            }
        }

        chosen.push((i, *p));
        if chosen.len() == 4 {
            return Some([chosen[0].0, chosen[1].0, chosen[2].0, chosen[3].0]);
        }
    }

    None
}

#[inline]
fn is_distinct(p: &Point3<f64>, q: &Point3<f64>) -> bool {
    let scale = p.coords.norm().max(q.coords.norm()).max(1.0);
    (p - q).norm() > RELATIVE_TOLERANCE * scale
}

fn nth_vertex(group: &FacetGroup, n: usize) -> Option<Point3<f64>> {
    group.iter_vertices().nth(n).map(|(p, _)| *p)
}

/// Recover per-axis scale from the squared edge lengths of the
/// correspondence triangle. With edges e01, e02, e12 this is a 3x3 linear
/// system in (sx², sy², sz²). When all edge lengths already agree within
/// tolerance the scale is identity, which also covers shapes that are flat
/// along an axis (zero-length components would otherwise make the system
/// singular).
///
/// An axis along which the triangle has no extent leaves that scale
/// unobservable; it defaults to the mean of the observable axes so that
/// uniform scaling of flat-first-facet shapes still recovers. The final
/// verification rejects any wrong guess.
fn recover_scale(
    pa: &[Point3<f64>],
    pb: &[Point3<f64>],
) -> Option<Vector3<f64>> {
    let edges = [(0usize, 1usize), (0, 2), (1, 2)];

    let mut lengths_match = true;
    for &(i, j) in &edges {
        let la = (pa[j] - pa[i]).norm();
        let lb = (pb[j] - pb[i]).norm();
        if (la - lb).abs() > RELATIVE_TOLERANCE * la.max(lb).max(1.0) {
            lengths_match = false;
            break;
        }
    }
    if lengths_match {
        return Some(Vector3::new(1.0, 1.0, 1.0));
    }

    let mut coeffs = Matrix3::zeros();
    let mut rhs = Vector3::zeros();
    for (row, &(i, j)) in edges.iter().enumerate() {
        let ea = pa[j] - pa[i];
        let eb = pb[j] - pb[i];
        coeffs[(row, 0)] = ea.x * ea.x;
        coeffs[(row, 1)] = ea.y * ea.y;
        coeffs[(row, 2)] = ea.z * ea.z;
        rhs[row] = eb.norm_squared();
    }

    let col_norms = [
        coeffs.column(0).norm(),
        coeffs.column(1).norm(),
        coeffs.column(2).norm(),
    ];
    let max_col = col_norms.iter().cloned().fold(0.0, f64::max);
    if max_col <= 0.0 {
        return None;
    }

    // Minimum-norm least squares; zero columns (flat axes) solve to ~0 and
    // are replaced below.
    let squared = coeffs.svd(true, true).solve(&rhs, 1e-12).ok()?;

    let mut scale = Vector3::zeros();
    let mut observed_sum = 0.0;
    let mut observed_count = 0usize;
    for axis in 0..3 {
        if col_norms[axis] > 1e-9 * max_col {
            let s = squared[axis];
            if !s.is_finite() || s <= 0.0 {
                return None;
            }
            scale[axis] = s.sqrt();
            observed_sum += scale[axis];
            observed_count += 1;
        }
    }
    let fallback = if observed_count > 0 {
        observed_sum / observed_count as f64
    } else {
        return None;
    };
    for axis in 0..3 {
        if col_norms[axis] <= 1e-9 * max_col {
            scale[axis] = fallback;
        }
    }
    Some(scale)
}

/// Recover the rotation aligning the scaled correspondence triangle `sa`
/// onto `pb`: first a shortest-arc rotation bringing the triangle normals
/// together, then an in-plane twist about the aligned normal that lines up
/// the first edge.
fn recover_rotation(
    sa: &[Point3<f64>],
    pb: &[Point3<f64>],
) -> Option<UnitQuaternion<f64>> {
    let na = triangle_normal(&sa[0], &sa[1], &sa[2])?;
    let nb = triangle_normal(&pb[0], &pb[1], &pb[2])?;

    let align = rotation_between(&na, &nb)?;

    let u = align * (sa[1] - sa[0]);
    let v = pb[1] - pb[0];
    let axis = Unit::new_normalize(nb);

    // Project both edges into the plane normal to nb and measure the
    // signed twist between them.
    let u_planar = u - nb * u.dot(&nb);
    let v_planar = v - nb * v.dot(&nb);
    if u_planar.norm() <= f64::EPSILON || v_planar.norm() <= f64::EPSILON {
        return None;
    }
    let angle = u_planar.cross(&v_planar).dot(&nb).atan2(u_planar.dot(&v_planar));
    let twist = UnitQuaternion::from_axis_angle(&axis, angle);

    Some(twist * align)
}

/// Shortest-arc rotation between two unit vectors, with an explicit
/// half-turn fallback for the antiparallel case.
fn rotation_between(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<UnitQuaternion<f64>> {
    if let Some(q) = UnitQuaternion::rotation_between(from, to) {
        return Some(q);
    }
    // Antiparallel vectors: rotate half a turn about any perpendicular axis.
    let perp = perpendicular(from)?;
    Some(UnitQuaternion::from_axis_angle(
        &Unit::new_normalize(perp),
        std::f64::consts::PI,
    ))
}

fn perpendicular(v: &Vector3<f64>) -> Option<Vector3<f64>> {
    let candidate = if v.x.abs() < 0.9 {
        v.cross(&Vector3::x())
    } else {
        v.cross(&Vector3::y())
    };
    if candidate.norm() > 0.0 {
        Some(candidate)
    } else {
        None
    }
}

fn triangle_normal(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    p2: &Point3<f64>,
) -> Option<Vector3<f64>> {
    let n = (p1 - p0).cross(&(p2 - p0));
    let norm = n.norm();
    if norm > 0.0 {
        Some(n / norm)
    } else {
        None
    }
}
