// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Axis-aligned bounding boxes in f64 precision.
//!
//! Plant models routinely place geometry several kilometers from the origin,
//! so all bounds bookkeeping stays in f64 until the downstream exporter
//! decides on a coordinate shift.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Axis-aligned bounding box with f64 corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a box from explicit corners. Fails if any max component is
    /// below the corresponding min component.
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Result<Self> {
        if max.x < min.x || max.y < min.y || max.z < min.z {
            return Err(Error::InvalidBounds(format!(
                "max {:?} below min {:?}",
                max, min
            )));
        }
        Ok(Self { min, max })
    }

    /// Create an empty box, ready to be expanded point by point.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    /// Check if at least one point has been added.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x
    }

    /// Expand bounds to include a point.
    #[inline]
    pub fn expand(&mut self, p: Point3<f64>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    /// Expand bounds to include another box.
    #[inline]
    pub fn union(&mut self, other: &Aabb) {
        if other.is_valid() {
            self.expand(other.min);
            self.expand(other.max);
        }
    }

    /// Build bounds from an iterator of points.
    pub fn from_points<I: IntoIterator<Item = Point3<f64>>>(points: I) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.expand(p);
        }
        bounds
    }

    /// Center of the box (origin for an empty box).
    #[inline]
    pub fn center(&self) -> Point3<f64> {
        if !self.is_valid() {
            return Point3::origin();
        }
        Point3::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    /// Length of the box diagonal (0 for an empty box).
    #[inline]
    pub fn diagonal(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        (self.max - self.min).norm()
    }

    /// Check whether a point lies inside the box (inclusive).
    #[inline]
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        self.is_valid()
            && p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_is_invalid() {
        let b = Aabb::empty();
        assert!(!b.is_valid());
        assert_eq!(b.diagonal(), 0.0);
        assert_eq!(b.center(), Point3::origin());
    }

    #[test]
    fn expand_and_center() {
        let mut b = Aabb::empty();
        b.expand(Point3::new(0.0, 0.0, 0.0));
        b.expand(Point3::new(10.0, 20.0, 30.0));

        assert!(b.is_valid());
        assert_eq!(b.center(), Point3::new(5.0, 10.0, 15.0));
        assert!((b.diagonal() - (100.0f64 + 400.0 + 900.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn union_merges_boxes() {
        let mut a = Aabb::from_points([Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)]);
        let b = Aabb::from_points([Point3::new(-1.0, 5.0, 0.5)]);
        a.union(&b);

        assert_eq!(a.min, Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(a.max, Point3::new(1.0, 5.0, 1.0));
    }

    #[test]
    fn union_with_empty_is_noop() {
        let mut a = Aabb::from_points([Point3::new(1.0, 2.0, 3.0)]);
        let before = a;
        a.union(&Aabb::empty());
        assert_eq!(a, before);
    }

    #[test]
    fn new_rejects_inverted_corners() {
        let r = Aabb::new(Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 1.0));
        assert!(r.is_err());
    }

    #[test]
    fn contains_point() {
        let b = Aabb::from_points([Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0)]);
        assert!(b.contains(&Point3::new(1.0, 1.0, 1.0)));
        assert!(!b.contains(&Point3::new(3.0, 1.0, 1.0)));
    }
}
