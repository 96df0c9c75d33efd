// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Explicit facet geometry: polygons, contours, vertex/normal pairs.
//!
//! A facet group is the mesh-like shape representation produced by the
//! upstream tessellator. The nesting (group → polygon → contour → vertex)
//! is ordered and preserved exactly; the instance matcher relies on
//! corresponding vertices appearing at the same position in two groups.

use nalgebra::{Matrix4, Point3, Vector3};
use smallvec::SmallVec;

use crate::bounds::Aabb;
use crate::transform::{transform_normal, transform_point, translation_matrix};

/// One closed contour: an ordered ring of vertex/normal pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub vertices: Vec<(Point3<f64>, Vector3<f64>)>,
}

impl Contour {
    pub fn new(vertices: Vec<(Point3<f64>, Vector3<f64>)>) -> Self {
        Self { vertices }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// One polygon: an outer contour plus optional hole contours.
/// Most polygons have a single contour, hence the small-vector storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub contours: SmallVec<[Contour; 1]>,
}

impl Polygon {
    pub fn new(contours: impl IntoIterator<Item = Contour>) -> Self {
        Self {
            contours: contours.into_iter().collect(),
        }
    }

    /// Polygon with a single contour (the common case).
    pub fn simple(vertices: Vec<(Point3<f64>, Vector3<f64>)>) -> Self {
        Self::new([Contour::new(vertices)])
    }
}

/// An ordered collection of polygons forming one shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FacetGroup {
    pub polygons: Vec<Polygon>,
}

impl FacetGroup {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    /// Total number of vertices across all contours.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.polygons
            .iter()
            .flat_map(|p| p.contours.iter())
            .map(|c| c.vertices.len())
            .sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Iterate vertex/normal pairs in structure order.
    pub fn iter_vertices(&self) -> impl Iterator<Item = &(Point3<f64>, Vector3<f64>)> {
        self.polygons
            .iter()
            .flat_map(|p| p.contours.iter())
            .flat_map(|c| c.vertices.iter())
    }

    /// Conservative triangle count estimate: a contour of n vertices
    /// triangulates into n - 2 triangles.
    pub fn triangle_estimate(&self) -> usize {
        self.polygons
            .iter()
            .flat_map(|p| p.contours.iter())
            .map(|c| c.vertices.len().saturating_sub(2))
            .sum()
    }

    /// Bounding box of all vertices.
    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_points(self.iter_vertices().map(|(p, _)| *p))
    }

    /// Apply an affine transform to every vertex and normal, preserving
    /// structure. Normals are mapped by the inverse transpose of the linear
    /// part and renormalized.
    pub fn transformed(&self, m: &Matrix4<f64>) -> FacetGroup {
        let polygons = self
            .polygons
            .iter()
            .map(|polygon| Polygon {
                contours: polygon
                    .contours
                    .iter()
                    .map(|contour| Contour {
                        vertices: contour
                            .vertices
                            .iter()
                            .map(|(p, n)| (transform_point(m, p), transform_normal(m, n)))
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        FacetGroup { polygons }
    }

    /// Translate the group so its bounding-box center lands at the origin.
    /// Returns the centered group and the translation that restores the
    /// original position.
    pub fn centered(&self) -> (FacetGroup, Matrix4<f64>) {
        let center = self.bounding_box().center();
        let to_origin = translation_matrix(-center.coords);
        (self.transformed(&to_origin), translation_matrix(center.coords))
    }
}
