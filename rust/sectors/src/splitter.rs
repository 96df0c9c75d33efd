// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive byte-budgeted octree splitting.
//!
//! Each recursion level packs the most valuable nodes (largest diagonal
//! per estimated byte) into a "main voxel" sector up to the byte budget,
//! then votes the remaining nodes into eight sub-voxels by their
//! primitives' box centers. Recursion is an explicit worklist, so
//! pathological inputs (many nodes clustered exactly at successive
//! midpoints) cannot overflow the stack.
//!
//! Octant ties are pinned to the lower side per axis, making sector
//! contents reproducible across runs.

use nalgebra::Point3;

use cadscene_model::Aabb;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::sector::{ProtoSector, SectorId};

/// Cost weight for nodes without real triangle meshes: parametric
/// primitives carry proportionally higher per-primitive overhead than
/// their byte estimate suggests.
const PARAMETRIC_WEIGHT: f64 = 10.0;
const TRIANGLE_MESH_WEIGHT: f64 = 1.0;

/// Splits aggregated nodes into a sector tree.
#[derive(Debug, Clone)]
pub struct SectorSplitter {
    byte_budget: u64,
    min_diameter: f64,
}

struct WorkItem {
    nodes: Vec<Node>,
    depth: u32,
    parent: Option<SectorId>,
    path: String,
}

impl SectorSplitter {
    /// Default byte budget per sector.
    pub const DEFAULT_BYTE_BUDGET: u64 = 1_000_000;
    /// Default minimum bounding diameter below which a node set becomes a
    /// single leaf sector.
    pub const DEFAULT_MIN_DIAMETER: f64 = 20.0;

    pub fn new(byte_budget: u64, min_diameter: f64) -> Result<Self> {
        if byte_budget == 0 {
            return Err(Error::InvalidParameters("byte budget must be > 0".into()));
        }
        if !(min_diameter >= 0.0) {
            return Err(Error::InvalidParameters(format!(
                "minimum diameter must be non-negative, got {}",
                min_diameter
            )));
        }
        Ok(Self {
            byte_budget,
            min_diameter,
        })
    }

    /// Partition `nodes` into a flat, depth-first list of sectors.
    ///
    /// Every node lands in exactly one sector; the function asserts this
    /// accounting invariant because a violation means the algorithm's
    /// bookkeeping is broken, not that the input was bad.
    pub fn split(&self, nodes: Vec<Node>) -> Vec<ProtoSector> {
        let input_count = nodes.len();
        let mut sectors: Vec<ProtoSector> = Vec::new();
        let mut next_id: SectorId = 0;
        let mut assigned = 0usize;

        let mut stack = vec![WorkItem {
            nodes,
            depth: 0,
            parent: None,
            path: "0".to_string(),
        }];

        while let Some(item) = stack.pop() {
            if item.nodes.is_empty() {
                continue;
            }

            let bounds = union_bounds(&item.nodes);

            if bounds.diagonal() < self.min_diameter {
                // Small dense cluster: one leaf regardless of byte size.
                assigned += item.nodes.len();
                sectors.push(make_sector(
                    next_id,
                    item.parent,
                    item.depth,
                    item.path,
                    &item.nodes,
                ));
                next_id += 1;
                continue;
            }

            let (main, rest) = self.select_main_voxel(item.nodes);

            let parent_for_children = if main.is_empty() {
                item.parent
            } else {
                let id = next_id;
                assigned += main.len();
                sectors.push(make_sector(id, item.parent, item.depth, item.path.clone(), &main));
                next_id += 1;
                Some(id)
            };

            let mid = bounds.center();
            let mut octants: [Vec<Node>; 8] = Default::default();
            for node in rest {
                let octant = octant_of(&node, &mid);
                octants[octant].push(node);
            }

            // Reverse push keeps the emitted list depth-first in octant
            // index order.
            for (octant, child_nodes) in octants.into_iter().enumerate().rev() {
                if !child_nodes.is_empty() {
                    stack.push(WorkItem {
                        nodes: child_nodes,
                        depth: item.depth + 1,
                        parent: parent_for_children,
                        path: format!("{}/{}", item.path, octant),
                    });
                }
            }
        }

        assert_eq!(
            assigned, input_count,
            "sector splitting lost or duplicated nodes"
        );
        sectors
    }

    /// Greedy budget fill: rank nodes by diagonal per weighted byte,
    /// descending, and admit them while they fit. The first-ranked node is
    /// always admitted, even alone over budget, so one dominating node can
    /// never starve the level. A node that no longer fits is skipped, not a
    /// stop signal; smaller nodes further down the ranking may still fill
    /// the remainder.
    fn select_main_voxel(&self, mut nodes: Vec<Node>) -> (Vec<Node>, Vec<Node>) {
        nodes.sort_by(|a, b| {
            rank(b)
                .partial_cmp(&rank(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tree_index.cmp(&b.tree_index))
        });

        let mut main: Vec<Node> = Vec::new();
        let mut rest: Vec<Node> = Vec::new();
        let mut total: u64 = 0;

        for node in nodes {
            if main.is_empty() || total + node.estimated_bytes <= self.byte_budget {
                total += node.estimated_bytes;
                main.push(node);
            } else {
                rest.push(node);
            }
        }

        (main, rest)
    }
}

impl Default for SectorSplitter {
    fn default() -> Self {
        Self {
            byte_budget: Self::DEFAULT_BYTE_BUDGET,
            min_diameter: Self::DEFAULT_MIN_DIAMETER,
        }
    }
}

#[inline]
fn rank(node: &Node) -> f64 {
    let weight = if node.has_triangle_mesh {
        TRIANGLE_MESH_WEIGHT
    } else {
        PARAMETRIC_WEIGHT
    };
    node.diagonal / (node.estimated_bytes.max(1) as f64 * weight)
}

fn union_bounds(nodes: &[Node]) -> Aabb {
    let mut bounds = Aabb::empty();
    for node in nodes {
        bounds.union(&node.bounds);
    }
    bounds
}

/// Vote a node into one of eight octants: per axis, the side holding the
/// majority of the node's primitive box centers wins; an even split pins
/// to the lower side. A center exactly on the midpoint counts as lower.
fn octant_of(node: &Node, mid: &Point3<f64>) -> usize {
    let total = node.primitive_centers.len();
    let mut upper = [0usize; 3];
    for center in &node.primitive_centers {
        if center.x > mid.x {
            upper[0] += 1;
        }
        if center.y > mid.y {
            upper[1] += 1;
        }
        if center.z > mid.z {
            upper[2] += 1;
        }
    }

    let mut octant = 0usize;
    for (axis, &count) in upper.iter().enumerate() {
        if count * 2 > total {
            octant |= 1 << axis;
        }
    }
    octant
}

fn make_sector(
    id: SectorId,
    parent: Option<SectorId>,
    depth: u32,
    path: String,
    nodes: &[Node],
) -> ProtoSector {
    let mut tree_indices: Vec<_> = nodes.iter().map(|n| n.tree_index).collect();
    tree_indices.sort_unstable();
    ProtoSector {
        id,
        parent,
        depth,
        path,
        tree_indices,
        bounds: union_bounds(nodes),
        estimated_bytes: nodes.iter().map(|n| n.estimated_bytes).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadscene_model::TreeIndex;
    use rustc_hash::FxHashSet;

    fn node(tree: u32, center: Point3<f64>, half: f64, bytes: u64, mesh: bool) -> Node {
        let half = nalgebra::Vector3::new(half, half, half);
        let bounds = Aabb::new(center - half, center + half).unwrap();
        Node {
            tree_index: TreeIndex(tree),
            diagonal: bounds.diagonal(),
            bounds,
            estimated_bytes: bytes,
            has_triangle_mesh: mesh,
            primitive_centers: vec![center],
        }
    }

    fn assert_partition(sectors: &[ProtoSector], expected: usize) {
        let mut seen: FxHashSet<TreeIndex> = FxHashSet::default();
        for sector in sectors {
            for &tree in &sector.tree_indices {
                assert!(seen.insert(tree), "node {} in more than one sector", tree);
            }
        }
        assert_eq!(seen.len(), expected);
    }

    fn assert_valid_tree(sectors: &[ProtoSector]) {
        let roots = sectors.iter().filter(|s| s.parent.is_none()).count();
        assert!(roots >= 1, "at least one parentless root required");
        for sector in sectors {
            if let Some(parent) = sector.parent {
                assert!(
                    sectors.iter().any(|s| s.id == parent),
                    "dangling parent id {}",
                    parent
                );
                assert!(parent < sector.id, "parents are emitted before children");
            }
        }
    }

    #[test]
    fn small_diagonal_yields_single_leaf() {
        // Two nodes, combined diagonal well under the default 20.0: one
        // leaf sector regardless of byte size.
        let nodes = vec![
            node(1, Point3::new(0.0, 0.0, 0.0), 1.0, 50_000_000, false),
            node(2, Point3::new(3.0, 0.0, 0.0), 1.0, 50_000_000, false),
        ];

        let sectors = SectorSplitter::default().split(nodes);
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].node_count(), 2);
        assert!(sectors[0].parent.is_none());
        assert_eq!(sectors[0].depth, 0);
        assert_partition(&sectors, 2);
    }

    #[test]
    fn oversized_node_takes_main_voxel() {
        // One node exceeding the budget alone, ranked first by its huge
        // diagonal; eight heavy satellites spread across the octants.
        let mut nodes = vec![node(0, Point3::origin(), 50.0, 1_500_000, true)];
        let mut tree = 1;
        for dx in [-1.0f64, 1.0] {
            for dy in [-1.0f64, 1.0] {
                for dz in [-1.0f64, 1.0] {
                    nodes.push(node(
                        tree,
                        Point3::new(dx * 30.0, dy * 30.0, dz * 30.0),
                        1.0,
                        300_000,
                        true,
                    ));
                    tree += 1;
                }
            }
        }

        let sectors = SectorSplitter::default().split(nodes);
        assert_partition(&sectors, 9);
        assert_valid_tree(&sectors);

        // The root main voxel holds exactly the oversized node.
        let root = &sectors[0];
        assert!(root.parent.is_none());
        assert_eq!(root.tree_indices, vec![TreeIndex(0)]);

        // Satellites partition into child sectors under the root.
        let children: Vec<_> = sectors.iter().filter(|s| s.parent == Some(root.id)).collect();
        assert!(!children.is_empty());
        assert!(children.len() <= 8);
    }

    #[test]
    fn budget_is_respected_except_single_oversize() {
        let mut nodes = Vec::new();
        for i in 0..40 {
            let x = (i % 8) as f64 * 10.0;
            let y = (i / 8) as f64 * 10.0;
            nodes.push(node(i, Point3::new(x, y, 0.0), 2.0, 200_000, true));
        }

        let splitter = SectorSplitter::new(500_000, 20.0).unwrap();
        let sectors = splitter.split(nodes);
        assert_partition(&sectors, 40);
        assert_valid_tree(&sectors);

        for sector in &sectors {
            // Leaves may exceed the budget; everything else only when a
            // single node alone is over it.
            if sector.estimated_bytes > 500_000 {
                let oversize_or_leaf = sector.node_count() == 1
                    || sector.bounds.diagonal() < 20.0;
                assert!(
                    oversize_or_leaf,
                    "sector {} over budget with {} nodes and diagonal {}",
                    sector.id,
                    sector.node_count(),
                    sector.bounds.diagonal()
                );
            }
        }
    }

    #[test]
    fn fill_continues_past_nodes_that_no_longer_fit() {
        // Ranks order the nodes a, b, c. After a (600 bytes) is admitted,
        // b (600 bytes) no longer fits the 1000-byte budget, but c
        // (300 bytes) further down the ranking does and must still be
        // admitted.
        let nodes = vec![
            node(0, Point3::new(0.0, 0.0, 0.0), 5.0, 600, true),
            node(1, Point3::new(20.0, 0.0, 0.0), 4.0, 600, true),
            node(2, Point3::new(40.0, 0.0, 0.0), 1.5, 300, true),
        ];

        let splitter = SectorSplitter::new(1_000, 1.0).unwrap();
        let sectors = splitter.split(nodes);
        assert_partition(&sectors, 3);

        let root = &sectors[0];
        assert_eq!(root.tree_indices, vec![TreeIndex(0), TreeIndex(2)]);
        assert_eq!(root.estimated_bytes, 900);
        assert!(sectors[1..]
            .iter()
            .any(|s| s.tree_indices == vec![TreeIndex(1)]));
    }

    #[test]
    fn every_node_in_exactly_one_sector() {
        let mut nodes = Vec::new();
        for i in 0..200 {
            let x = (i % 10) as f64 * 7.0;
            let y = ((i / 10) % 10) as f64 * 7.0;
            let z = (i / 100) as f64 * 7.0;
            nodes.push(node(i, Point3::new(x, y, z), 1.5, 40_000, i % 3 == 0));
        }

        let sectors = SectorSplitter::default().split(nodes);
        assert_partition(&sectors, 200);
        assert_valid_tree(&sectors);
    }

    #[test]
    fn empty_input_produces_no_sectors() {
        let sectors = SectorSplitter::default().split(Vec::new());
        assert!(sectors.is_empty());
    }

    #[test]
    fn octant_vote_majority_and_ties() {
        let mid = Point3::origin();

        // Majority on the upper side of X only.
        let mut n = node(1, Point3::new(5.0, -5.0, -5.0), 1.0, 100, false);
        n.primitive_centers = vec![
            Point3::new(4.0, -1.0, -1.0),
            Point3::new(6.0, -1.0, -1.0),
            Point3::new(-2.0, -1.0, -1.0),
        ];
        assert_eq!(octant_of(&n, &mid), 0b001);

        // Even split pins to the lower side.
        n.primitive_centers = vec![Point3::new(3.0, 1.0, 1.0), Point3::new(-3.0, 1.0, 1.0)];
        assert_eq!(octant_of(&n, &mid), 0b110);

        // A center exactly on the midpoint counts as lower.
        n.primitive_centers = vec![Point3::new(0.0, 0.0, 1.0)];
        assert_eq!(octant_of(&n, &mid), 0b100);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(SectorSplitter::new(0, 20.0).is_err());
        assert!(SectorSplitter::new(1, -1.0).is_err());
    }

    #[test]
    fn midpoint_clustered_nodes_terminate() {
        // Identical nodes stacked on the midpoint all vote into the same
        // octant with unchanged bounds. Termination relies on every level
        // admitting at least one node into its main voxel.
        let mut nodes = Vec::new();
        for i in 0..50 {
            nodes.push(node(i, Point3::new(0.0, 0.0, 0.0), 30.0, 600_000, false));
        }

        let sectors = SectorSplitter::default().split(nodes);
        assert_partition(&sectors, 50);
        assert_valid_tree(&sectors);
    }
}
