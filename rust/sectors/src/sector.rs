// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The terminal sector artifact handed to downstream serialization.

use serde::{Deserialize, Serialize};

use cadscene_model::{Aabb, TreeIndex};

/// Identifier of a sector within one splitting pass, assigned in
/// depth-first emission order.
pub type SectorId = u32;

/// One node of the output spatial-partition tree: the streaming/LOD
/// granularity unit.
///
/// The sector set forms a tree with one or more parentless roots. Every
/// aggregated node belongs to exactly one sector. The declared bounding
/// box contains this sector's own geometry; sibling boxes may overlap,
/// because a node voted into one octant can geometrically straddle the
/// midpoint. The splitter never splits a node's primitives to fix that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoSector {
    pub id: SectorId,
    /// `None` for root sectors.
    pub parent: Option<SectorId>,
    /// Recursion depth; roots are at depth 0.
    pub depth: u32,
    /// Octant path from the root, e.g. `"0/3/7"`.
    pub path: String,
    /// Tree indices of the nodes assigned to this sector.
    pub tree_indices: Vec<TreeIndex>,
    /// Union bounding box of the assigned nodes.
    pub bounds: Aabb,
    /// Summed byte estimate of the assigned nodes.
    pub estimated_bytes: u64,
}

impl ProtoSector {
    /// Number of nodes assigned to this sector.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.tree_indices.len()
    }
}
