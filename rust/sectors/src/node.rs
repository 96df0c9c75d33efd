// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node aggregation: one node per logical CAD part.
//!
//! A node bundles every primitive sharing a tree index, with the union
//! bounding box, an estimated serialized byte size and the bounding
//! diagonal. Nodes are transient: rebuilt for each splitting pass and
//! discarded afterwards.

use nalgebra::Point3;
use rustc_hash::FxHashMap;

use cadscene_model::{Aabb, Primitive, PrimitiveKind, TreeIndex};

/// Estimated serialized bytes for parametric primitives. The downstream
/// format stores these as fixed attribute records.
const BYTES_PER_BOX: u64 = 76;
const BYTES_PER_CYLINDER: u64 = 84;
const BYTES_PER_FRUSTUM: u64 = 104;

/// Mesh kinds scale with triangle count: position + normal + index data
/// per triangle, plus a fixed header.
const BYTES_PER_TRIANGLE: u64 = 60;
const MESH_HEADER_BYTES: u64 = 16;

/// Estimate the serialized byte size of one primitive.
///
/// The kind set is closed; adding a kind without a size rule here is a
/// compile error.
pub fn estimated_byte_size(kind: &PrimitiveKind) -> u64 {
    match kind {
        PrimitiveKind::Box { .. } => BYTES_PER_BOX,
        PrimitiveKind::Cylinder { .. } => BYTES_PER_CYLINDER,
        PrimitiveKind::Frustum(_) => BYTES_PER_FRUSTUM,
        PrimitiveKind::FacetGroup(group) => {
            MESH_HEADER_BYTES + group.triangle_estimate() as u64 * BYTES_PER_TRIANGLE
        }
        PrimitiveKind::TriangleMesh { triangle_count } => {
            MESH_HEADER_BYTES + *triangle_count as u64 * BYTES_PER_TRIANGLE
        }
    }
}

/// Aggregate of all primitives sharing one tree index.
#[derive(Debug, Clone)]
pub struct Node {
    pub tree_index: TreeIndex,
    /// Union of the primitives' world bounding boxes.
    pub bounds: Aabb,
    /// Summed size estimate over all primitives.
    pub estimated_bytes: u64,
    /// Bounding-box diagonal length, cached for ranking.
    pub diagonal: f64,
    /// Whether any primitive is a true triangle mesh (affects the
    /// splitter's cost weighting).
    pub has_triangle_mesh: bool,
    /// World-space box centers of the primitives, used for octant voting.
    pub primitive_centers: Vec<Point3<f64>>,
}

/// Group primitives by tree index. Groups are returned in ascending
/// tree-index order so downstream sector contents are reproducible
/// regardless of hash-map iteration order.
pub fn aggregate_nodes<'a>(primitives: impl IntoIterator<Item = &'a Primitive>) -> Vec<Node> {
    let mut groups: FxHashMap<TreeIndex, Vec<&Primitive>> = FxHashMap::default();
    for primitive in primitives {
        groups.entry(primitive.tree_index).or_default().push(primitive);
    }

    let mut nodes: Vec<Node> = groups
        .into_iter()
        .map(|(tree_index, members)| {
            let mut bounds = Aabb::empty();
            let mut estimated_bytes = 0u64;
            let mut has_triangle_mesh = false;
            let mut primitive_centers = Vec::with_capacity(members.len());

            for primitive in members {
                bounds.union(&primitive.bounds);
                estimated_bytes += estimated_byte_size(&primitive.kind);
                has_triangle_mesh |= primitive.kind.is_triangle_mesh();
                primitive_centers.push(primitive.bounds.center());
            }

            Node {
                tree_index,
                diagonal: bounds.diagonal(),
                bounds,
                estimated_bytes,
                has_triangle_mesh,
                primitive_centers,
            }
        })
        .collect();

    nodes.sort_by_key(|n| n.tree_index);
    nodes
}
