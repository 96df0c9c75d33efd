// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structural keys: cheap necessary-but-not-sufficient hashes over a
//! shape's nested count structure.
//!
//! Two shapes with different keys are never compared by the matcher.
//! Equal keys guarantee equal polygon/contour/vertex counts, so the
//! expensive geometric comparison can walk both shapes position by
//! position without re-sorting anything.

use cadscene_model::FacetGroup;

const HASH_SEED: i64 = 17;
const HASH_PRIME: i64 = 31;

/// Angle bucket width for the degenerate volume-tetrahedron pattern.
const ANGLE_BUCKET_DEGREES: f64 = 15.0;

/// Compute the structural key of a facet group.
///
/// A multiplicative rolling hash over polygon count, per-polygon contour
/// counts and per-contour vertex counts. The degenerate five-polygon
/// "volume tetrahedron" pattern (two triangles plus three quads, all
/// single-contour) is additionally bucketed by its first triangle's
/// interior angle in 15-degree steps; plant models contain hundreds of
/// thousands of nearly identical micro-volumes of this shape, and one
/// uniform bucket would force a quadratic comparison pass.
pub fn structural_key(group: &FacetGroup) -> i64 {
    let mut hash = HASH_SEED;
    hash = mix(hash, group.polygons.len() as i64);

    for polygon in &group.polygons {
        hash = mix(hash, polygon.contours.len() as i64);
        for contour in &polygon.contours {
            hash = mix(hash, contour.vertices.len() as i64);
        }
    }

    if is_volume_tetrahedron(group) {
        if let Some(bucket) = first_triangle_angle_bucket(group) {
            hash = mix(hash, bucket);
        }
    }

    hash
}

#[inline]
fn mix(hash: i64, value: i64) -> i64 {
    hash.wrapping_mul(HASH_PRIME).wrapping_add(value)
}

/// The pathological micro-volume pattern: exactly five single-contour
/// polygons, two triangles followed by three quads.
fn is_volume_tetrahedron(group: &FacetGroup) -> bool {
    if group.polygons.len() != 5 {
        return false;
    }
    let mut counts = [0usize; 5];
    for (i, polygon) in group.polygons.iter().enumerate() {
        if polygon.contours.len() != 1 {
            return false;
        }
        counts[i] = polygon.contours[0].vertices.len();
    }
    counts == [3, 3, 4, 4, 4]
}

/// Interior angle at the first vertex of the first triangle, rounded to
/// 15-degree buckets. `None` for degenerate zero-length edges.
fn first_triangle_angle_bucket(group: &FacetGroup) -> Option<i64> {
    let vertices = &group.polygons.first()?.contours.first()?.vertices;
    if vertices.len() < 3 {
        return None;
    }
    let a = vertices[1].0 - vertices[0].0;
    let b = vertices[2].0 - vertices[0].0;
    let denom = a.norm() * b.norm();
    if denom <= 0.0 {
        return None;
    }
    let cos = (a.dot(&b) / denom).clamp(-1.0, 1.0);
    let degrees = cos.acos().to_degrees();
    Some((degrees / ANGLE_BUCKET_DEGREES).round() as i64)
}
