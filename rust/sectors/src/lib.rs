// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CadScene Sector Splitting
//!
//! Partitions the deduplicated node graph into a byte-budgeted octree of
//! sectors for progressive streaming. Primitives are first aggregated into
//! [nodes](node), one per logical CAD part, and nodes are never split
//! across sectors.

pub mod error;
pub mod node;
pub mod sector;
pub mod splitter;

pub use error::{Error, Result};
pub use node::{aggregate_nodes, estimated_byte_size, Node};
pub use sector::{ProtoSector, SectorId};
pub use splitter::SectorSplitter;
