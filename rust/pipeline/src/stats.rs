// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

/// Summary counters of one optimization run, for logs and callers.
#[derive(Debug, Clone, Default)]
pub struct SceneStats {
    /// Primitives handed to the pipeline.
    pub input_primitives: usize,
    /// Primitives that entered instance matching (facet groups and frusta).
    pub matchable_shapes: usize,
    /// Surviving templates after the group-size veto.
    pub templates: usize,
    /// Shapes replaced by a (template, transform) pair.
    pub instanced: usize,
    /// Shapes that spawned a surviving template.
    pub template_designated: usize,
    /// Shapes kept as-is.
    pub not_instanced: usize,
    pub sectors: usize,
    /// Summed byte estimate over all sectors.
    pub total_estimated_bytes: u64,
    pub elapsed: Duration,
}
