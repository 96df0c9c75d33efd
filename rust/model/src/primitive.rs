// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scene primitives: the tagged shape variants flowing through the pipeline.
//!
//! The kind set is closed. Every stage dispatches on [`PrimitiveKind`] with
//! an exhaustive `match`, so an unhandled kind is a compile error rather
//! than a silently skipped shape.

use nalgebra::{Matrix4, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::bounds::Aabb;
use crate::color::Color;
use crate::error::{Error, Result};
use crate::facets::FacetGroup;

/// Stable identifier of the logical CAD part that owns a primitive.
/// Several primitives may share one tree index; the sector splitter
/// guarantees they are never separated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TreeIndex(pub u32);

impl std::fmt::Display for TreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parametric rectangular frustum: a bottom rectangle at z = 0, a top
/// rectangle at z = `height` whose center is displaced by `offset` in the
/// XY plane. Extents are full side lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub bottom: Vector2<f64>,
    pub top: Vector2<f64>,
    pub offset: Vector2<f64>,
    pub height: f64,
}

impl Frustum {
    /// Validating constructor. Extents must be non-negative and the height
    /// strictly positive.
    pub fn new(
        bottom: Vector2<f64>,
        top: Vector2<f64>,
        offset: Vector2<f64>,
        height: f64,
    ) -> Result<Self> {
        if bottom.x < 0.0 || bottom.y < 0.0 || top.x < 0.0 || top.y < 0.0 {
            return Err(Error::InvalidFrustum(format!(
                "negative extents: bottom {:?}, top {:?}",
                bottom, top
            )));
        }
        if !(height > 0.0) {
            return Err(Error::InvalidFrustum(format!(
                "height must be positive, got {}",
                height
            )));
        }
        Ok(Self {
            bottom,
            top,
            offset,
            height,
        })
    }

    /// Local-space bounding box of the frustum geometry.
    pub fn local_bounds(&self) -> Aabb {
        let bx = self.bottom.x / 2.0;
        let by = self.bottom.y / 2.0;
        let tx = self.top.x / 2.0;
        let ty = self.top.y / 2.0;

        let min_x = (-bx).min(self.offset.x - tx);
        let min_y = (-by).min(self.offset.y - ty);
        let max_x = bx.max(self.offset.x + tx);
        let max_y = by.max(self.offset.y + ty);

        Aabb {
            min: nalgebra::Point3::new(min_x, min_y, 0.0),
            max: nalgebra::Point3::new(max_x, max_y, self.height),
        }
    }
}

/// The closed set of primitive shape kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveKind {
    /// Explicit tessellated shape; candidate for general instance matching.
    FacetGroup(FacetGroup),
    /// Parametric frustum; candidate for closed-form pyramid matching.
    Frustum(Frustum),
    /// Parametric box with full side lengths.
    Box { lengths: Vector3<f64> },
    /// Parametric cylinder along local Z.
    Cylinder { radius: f64, height: f64 },
    /// Pre-triangulated mesh carried through by reference; only the
    /// triangle count matters to this pipeline.
    TriangleMesh { triangle_count: u32 },
}

impl PrimitiveKind {
    /// True for kinds whose serialized size scales with triangle count.
    #[inline]
    pub fn is_mesh_like(&self) -> bool {
        matches!(
            self,
            PrimitiveKind::FacetGroup(_) | PrimitiveKind::TriangleMesh { .. }
        )
    }

    /// True only for real triangle meshes (not facet groups awaiting
    /// instancing). The sector splitter weights these differently.
    #[inline]
    pub fn is_triangle_mesh(&self) -> bool {
        matches!(self, PrimitiveKind::TriangleMesh { .. })
    }
}

/// One geometric primitive as delivered by the upstream producer.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub tree_index: TreeIndex,
    /// Local-to-world transform.
    pub transform: Matrix4<f64>,
    pub color: Color,
    pub kind: PrimitiveKind,
    /// World-space bounding box.
    pub bounds: Aabb,
}

impl Primitive {
    pub fn new(
        tree_index: TreeIndex,
        transform: Matrix4<f64>,
        color: Color,
        kind: PrimitiveKind,
        bounds: Aabb,
    ) -> Self {
        Self {
            tree_index,
            transform,
            color,
            kind,
            bounds,
        }
    }

    /// Convenience constructor for facet-group primitives: computes the
    /// world bounds from the transformed vertices.
    pub fn from_facets(
        tree_index: TreeIndex,
        transform: Matrix4<f64>,
        color: Color,
        facets: FacetGroup,
    ) -> Self {
        let bounds = facets.transformed(&transform).bounding_box();
        Self::new(
            tree_index,
            transform,
            color,
            PrimitiveKind::FacetGroup(facets),
            bounds,
        )
    }

    /// Convenience constructor for frustum primitives: world bounds are the
    /// transformed corners of the local frustum box.
    pub fn from_frustum(
        tree_index: TreeIndex,
        transform: Matrix4<f64>,
        color: Color,
        frustum: Frustum,
    ) -> Self {
        let local = frustum.local_bounds();
        let corners = [
            local.min,
            nalgebra::Point3::new(local.max.x, local.min.y, local.min.z),
            nalgebra::Point3::new(local.min.x, local.max.y, local.min.z),
            nalgebra::Point3::new(local.min.x, local.min.y, local.max.z),
            nalgebra::Point3::new(local.max.x, local.max.y, local.min.z),
            nalgebra::Point3::new(local.max.x, local.min.y, local.max.z),
            nalgebra::Point3::new(local.min.x, local.max.y, local.max.z),
            local.max,
        ];
        let bounds = Aabb::from_points(corners.iter().map(|c| transform.transform_point(c)));
        Self::new(
            tree_index,
            transform,
            color,
            PrimitiveKind::Frustum(frustum),
            bounds,
        )
    }
}
