// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline tuning parameters.

use std::time::Duration;

use cadscene_instancing::MatcherParams;
use cadscene_sectors::SectorSplitter;

/// All knobs of one optimization run. The defaults are production values
/// tuned on large plant models; tests override individual fields.
#[derive(Debug, Clone, Copy)]
pub struct SceneConfig {
    /// Soft byte budget per sector.
    pub sector_byte_budget: u64,
    /// Node sets with a bounding diagonal below this become single leaf
    /// sectors.
    pub sector_min_diameter: f64,
    /// Instance-matcher tolerances and cleanup thresholds.
    pub matcher: MatcherParams,
    /// Template groups (template plus instances) smaller than this are
    /// demoted back to plain shapes by the default veto of
    /// `optimize_scene`; `optimize_scene_with` accepts any predicate.
    /// Instancing a group of one trades indirection for nothing.
    pub min_instance_group: usize,
    /// Wall-time interval between progress log lines during matching.
    pub progress_interval: Duration,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            sector_byte_budget: SectorSplitter::DEFAULT_BYTE_BUDGET,
            sector_min_diameter: SectorSplitter::DEFAULT_MIN_DIAMETER,
            matcher: MatcherParams::default(),
            min_instance_group: 2,
            progress_interval: Duration::from_secs(300),
        }
    }
}
