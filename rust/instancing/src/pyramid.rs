// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Closed-form frustum matching.
//!
//! Frusta never go through general transform recovery. A rectangular
//! frustum has eight orientation-preserving symmetry candidates: the
//! identity, three 90° rotations about Z, and each of those composed with
//! a 180° flip about X. For every variation a per-axis scale reconciling
//! bottom/top extents, offset and height either exists or it does not; the
//! first variation that works wins.

use nalgebra::{Matrix4, Rotation3, Vector2, Vector3};

use cadscene_model::transform::{scale_matrix, translation_matrix};
use cadscene_model::Frustum;

use crate::matcher::Matchable;

/// Relative tolerance for reconciling frustum parameters (0.1%).
const RELATIVE_TOLERANCE: f64 = 1e-3;

/// Parameters this close to zero are treated as absent (no constraint on
/// the scale along their axis).
const PARAM_EPSILON: f64 = 1e-9;

/// A frustum paired with its local-to-world transform.
#[derive(Debug, Clone)]
pub struct WorldFrustum {
    pub frustum: Frustum,
    pub world: Matrix4<f64>,
}

impl Matchable for WorldFrustum {
    /// Parameter-space comparison; the absolute vertex tolerance used for
    /// facet matching does not apply here.
    fn try_match(template: &Self, shape: &Self, _tolerance: f64) -> Option<Matrix4<f64>> {
        for variation in 0..8 {
            let (params, basis) = apply_variation(&template.frustum, variation);
            if let Some(scale) = solve_scale(&params, &shape.frustum) {
                return Some(shape.world * scale_matrix(scale) * basis);
            }
        }
        None
    }

    fn make_template(shape: &Self) -> (Self, Matrix4<f64>) {
        (
            Self {
                frustum: shape.frustum,
                world: Matrix4::identity(),
            },
            shape.world,
        )
    }
}

/// Apply one of the eight symmetry variations to a frustum's parameters.
/// Returns the transformed parameters together with the rigid transform
/// mapping the original local geometry onto the renormalized one.
fn apply_variation(f: &Frustum, variation: usize) -> (Frustum, Matrix4<f64>) {
    let quarter_turns = variation & 3;
    let flipped = variation >= 4;

    let (rotated, rotation) = rotate_z(f, quarter_turns);
    if !flipped {
        return (rotated, rotation);
    }
    let (final_params, flip) = flip_x(&rotated);
    (final_params, flip * rotation)
}

/// Rotate the frustum by `k` quarter turns about Z. Extents are symmetric
/// magnitudes, so they swap axes; the offset rotates as a vector.
fn rotate_z(f: &Frustum, k: usize) -> (Frustum, Matrix4<f64>) {
    let (bottom, top, offset) = match k {
        0 => (f.bottom, f.top, f.offset),
        1 => (
            Vector2::new(f.bottom.y, f.bottom.x),
            Vector2::new(f.top.y, f.top.x),
            Vector2::new(-f.offset.y, f.offset.x),
        ),
        2 => (f.bottom, f.top, -f.offset),
        3 => (
            Vector2::new(f.bottom.y, f.bottom.x),
            Vector2::new(f.top.y, f.top.x),
            Vector2::new(f.offset.y, -f.offset.x),
        ),
        _ => unreachable!("quarter turns are masked to 0..=3"),
    };
    let params = Frustum {
        bottom,
        top,
        offset,
        height: f.height,
    };
    let rotation = Rotation3::from_axis_angle(
        &Vector3::z_axis(),
        k as f64 * std::f64::consts::FRAC_PI_2,
    )
    .to_homogeneous();
    (params, rotation)
}

/// Flip the frustum upside down (180° about X), then renormalize so the
/// former top becomes a bottom rectangle centered at the origin.
fn flip_x(f: &Frustum) -> (Frustum, Matrix4<f64>) {
    let params = Frustum {
        bottom: f.top,
        top: f.bottom,
        offset: Vector2::new(-f.offset.x, f.offset.y),
        height: f.height,
    };
    let rotation = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
        .to_homogeneous();
    let recenter = translation_matrix(Vector3::new(-f.offset.x, f.offset.y, f.height));
    (params, recenter * rotation)
}

/// Solve the per-axis scale mapping `from` onto `to`, or fail if the
/// parameters cannot be reconciled within relative tolerance.
fn solve_scale(from: &Frustum, to: &Frustum) -> Option<Vector3<f64>> {
    let sx = axis_scale(&[
        (from.bottom.x, to.bottom.x),
        (from.top.x, to.top.x),
        (from.offset.x, to.offset.x),
    ])?;
    let sy = axis_scale(&[
        (from.bottom.y, to.bottom.y),
        (from.top.y, to.top.y),
        (from.offset.y, to.offset.y),
    ])?;
    let sz = axis_scale(&[(from.height, to.height)])?;
    Some(Vector3::new(sx, sy, sz))
}

/// A single positive scale consistent across all constrained pairs.
/// Pairs where both sides vanish are unconstrained; a vanishing side
/// opposite a non-vanishing one is a mismatch.
fn axis_scale(pairs: &[(f64, f64)]) -> Option<f64> {
    let mut scale: Option<f64> = None;
    for &(from, to) in pairs {
        let from_zero = from.abs() <= PARAM_EPSILON;
        let to_zero = to.abs() <= PARAM_EPSILON;
        if from_zero && to_zero {
            continue;
        }
        if from_zero || to_zero {
            return None;
        }
        let s = to / from;
        if s <= 0.0 {
            return None;
        }
        match scale {
            None => scale = Some(s),
            Some(prev) => {
                if (s - prev).abs() > RELATIVE_TOLERANCE * prev.abs().max(s.abs()) {
                    return None;
                }
            }
        }
    }
    Some(scale.unwrap_or(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn base() -> Frustum {
        Frustum::new(
            Vector2::new(2.0, 1.0),
            Vector2::new(1.0, 0.5),
            Vector2::new(0.3, 0.1),
            2.0,
        )
        .unwrap()
    }

    fn world_at(f: Frustum, t: Vector3<f64>) -> WorldFrustum {
        WorldFrustum {
            frustum: f,
            world: translation_matrix(t),
        }
    }

    /// Sample the eight corner points of a frustum's local geometry.
    fn corners(f: &Frustum) -> Vec<Point3<f64>> {
        let mut points = Vec::with_capacity(8);
        for &(sx, sy) in &[(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            points.push(Point3::new(sx * f.bottom.x, sy * f.bottom.y, 0.0));
        }
        for &(sx, sy) in &[(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            points.push(Point3::new(
                f.offset.x + sx * f.top.x,
                f.offset.y + sy * f.top.y,
                f.height,
            ));
        }
        points
    }

    /// The corner multiset of `template` under `t` must equal the corner
    /// multiset of `shape` in world space.
    fn assert_geometry_matches(template: &Frustum, t: &Matrix4<f64>, shape: &WorldFrustum) {
        let mapped: Vec<_> = corners(template)
            .iter()
            .map(|p| t.transform_point(p))
            .collect();
        let target: Vec<_> = corners(&shape.frustum)
            .iter()
            .map(|p| shape.world.transform_point(p))
            .collect();
        for q in &target {
            assert!(
                mapped.iter().any(|p| (p - q).norm() < 1e-9),
                "corner {:?} not reproduced; mapped = {:?}",
                q,
                mapped
            );
        }
    }

    #[test]
    fn identical_frustum_matches_identity_variation() {
        let (template, restore) = WorldFrustum::make_template(&world_at(
            base(),
            Vector3::new(1.0, 2.0, 3.0),
        ));
        assert_eq!(restore, translation_matrix(Vector3::new(1.0, 2.0, 3.0)));

        let shape = world_at(base(), Vector3::new(-5.0, 0.0, 4.0));
        let t = WorldFrustum::try_match(&template, &shape, 1e-3).expect("must match");
        assert_geometry_matches(&template.frustum, &t, &shape);
    }

    #[test]
    fn uniformly_scaled_frustum_matches() {
        let (template, _) = WorldFrustum::make_template(&world_at(base(), Vector3::zeros()));

        let scaled = Frustum::new(
            Vector2::new(4.0, 2.0),
            Vector2::new(2.0, 1.0),
            Vector2::new(0.6, 0.2),
            4.0,
        )
        .unwrap();
        let shape = world_at(scaled, Vector3::new(7.0, 0.0, 0.0));

        let t = WorldFrustum::try_match(&template, &shape, 1e-3).expect("must match");
        assert_geometry_matches(&template.frustum, &t, &shape);
    }

    #[test]
    fn quarter_turned_frustum_matches() {
        let (template, _) = WorldFrustum::make_template(&world_at(base(), Vector3::zeros()));

        // Candidate parameters are the template's rotated 90° about Z.
        let f = base();
        let rotated = Frustum {
            bottom: Vector2::new(f.bottom.y, f.bottom.x),
            top: Vector2::new(f.top.y, f.top.x),
            offset: Vector2::new(-f.offset.y, f.offset.x),
            height: f.height,
        };
        let shape = world_at(rotated, Vector3::new(0.0, 9.0, 0.0));

        let t = WorldFrustum::try_match(&template, &shape, 1e-3).expect("must match");
        assert_geometry_matches(&template.frustum, &t, &shape);
    }

    #[test]
    fn flipped_frustum_matches() {
        let (template, _) = WorldFrustum::make_template(&world_at(base(), Vector3::zeros()));

        let f = base();
        let flipped = Frustum {
            bottom: f.top,
            top: f.bottom,
            offset: Vector2::new(-f.offset.x, f.offset.y),
            height: f.height,
        };
        let shape = world_at(flipped, Vector3::new(2.0, 2.0, 2.0));

        let t = WorldFrustum::try_match(&template, &shape, 1e-3).expect("must match");
        assert_geometry_matches(&template.frustum, &t, &shape);
    }

    #[test]
    fn incompatible_taper_fails() {
        let (template, _) = WorldFrustum::make_template(&world_at(base(), Vector3::zeros()));

        // Same bottom, disproportionate top: no per-axis scale reconciles.
        let other = Frustum::new(
            Vector2::new(2.0, 1.0),
            Vector2::new(1.5, 0.5),
            Vector2::new(0.3, 0.1),
            2.0,
        )
        .unwrap();
        let shape = world_at(other, Vector3::zeros());

        assert!(WorldFrustum::try_match(&template, &shape, 1e-3).is_none());
    }

    #[test]
    fn zero_offset_is_unconstrained() {
        let f = Frustum::new(
            Vector2::new(2.0, 2.0),
            Vector2::new(1.0, 1.0),
            Vector2::zeros(),
            3.0,
        )
        .unwrap();
        let (template, _) = WorldFrustum::make_template(&world_at(f, Vector3::zeros()));

        let scaled = Frustum::new(
            Vector2::new(3.0, 3.0),
            Vector2::new(1.5, 1.5),
            Vector2::zeros(),
            3.0,
        )
        .unwrap();
        let shape = world_at(scaled, Vector3::zeros());

        let t = WorldFrustum::try_match(&template, &shape, 1e-3).expect("must match");
        assert_geometry_matches(&template.frustum, &t, &shape);
        assert_relative_eq!(t[(2, 2)], 1.0, epsilon = 1e-12);
    }
}
