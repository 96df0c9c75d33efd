// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CadScene Pipeline
//!
//! End-to-end scene optimization: bucket matchable primitives by structural
//! key, run sequential per-bucket instance matching in parallel across
//! buckets, veto too-small template groups, then aggregate the classified
//! primitives into nodes and split them into streamable sectors.
//!
//! Bucket order and in-bucket processing order are deterministic, so the
//! same input always yields the same compiled scene.

pub mod config;
pub mod error;
pub mod stats;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use cadscene_instancing::{
    structural_key, InstanceMatcher, MatchItem, MatchOutcome, MatchResult, WorldFacets,
    WorldFrustum,
};
use cadscene_model::{FacetGroup, Frustum, Primitive, PrimitiveKind};
use cadscene_sectors::{aggregate_nodes, ProtoSector, SectorSplitter};

pub use config::SceneConfig;
pub use error::{Error, Result};
pub use stats::SceneStats;

/// Geometry of one surviving template, in template-local coordinates.
#[derive(Debug, Clone)]
pub enum TemplateShape {
    Facets(FacetGroup),
    Frustum(Frustum),
}

/// A template referenced by the results, with its final instance count.
#[derive(Debug, Clone)]
pub struct SceneTemplate {
    pub shape: TemplateShape,
    pub match_count: usize,
}

/// The compiled scene: one result per input primitive, the template table
/// the results index into, and the sector tree.
#[derive(Debug)]
pub struct CompiledScene {
    pub results: Vec<MatchResult>,
    pub templates: Vec<SceneTemplate>,
    pub sectors: Vec<ProtoSector>,
    pub stats: SceneStats,
}

/// One candidate template group as presented to the instancing veto: the
/// template geometry plus the number of results referencing it (the
/// designated shape and all its instances).
#[derive(Debug, Clone, Copy)]
pub struct InstanceGroup<'a> {
    pub shape: &'a TemplateShape,
    pub size: usize,
}

/// Shared progress reporting across parallel bucket workers. Purely for
/// operator visibility on multi-hour runs; no pipeline decision reads it.
struct Progress {
    processed: AtomicUsize,
    total: usize,
    started: Instant,
    last_report: Mutex<Instant>,
    interval: Duration,
}

impl Progress {
    fn new(total: usize, interval: Duration) -> Self {
        Self {
            processed: AtomicUsize::new(0),
            total,
            started: Instant::now(),
            last_report: Mutex::new(Instant::now()),
            interval,
        }
    }

    fn add(&self, shapes: usize) {
        let done = self.processed.fetch_add(shapes, Ordering::Relaxed) + shapes;
        if let Ok(mut last) = self.last_report.lock() {
            if last.elapsed() >= self.interval {
                *last = Instant::now();
                info!(
                    processed = done,
                    total = self.total,
                    elapsed_s = self.started.elapsed().as_secs(),
                    "instance matching progress"
                );
            }
        }
    }
}

/// Run the full optimization over a scene's primitives, vetoing template
/// groups smaller than [`SceneConfig::min_instance_group`].
///
/// Every input primitive reappears in exactly one [`MatchResult`]; the
/// function asserts this accounting invariant. Facet groups and frusta go
/// through instance matching; boxes, cylinders and pre-triangulated meshes
/// pass straight through as [`MatchResult::NotInstanced`].
pub fn optimize_scene(primitives: Vec<Primitive>, config: &SceneConfig) -> Result<CompiledScene> {
    let min_group = config.min_instance_group;
    optimize_scene_with(primitives, config, |group: &InstanceGroup<'_>| {
        group.size >= min_group
    })
}

/// Like [`optimize_scene`], but with a caller-supplied veto over template
/// groups. Groups for which `should_instance` returns false are demoted:
/// their shapes become [`MatchResult::NotInstanced`] and their template is
/// dropped from the output table.
pub fn optimize_scene_with<F>(
    primitives: Vec<Primitive>,
    config: &SceneConfig,
    should_instance: F,
) -> Result<CompiledScene>
where
    F: Fn(&InstanceGroup<'_>) -> bool,
{
    let started = Instant::now();
    let input_count = primitives.len();
    let splitter = SectorSplitter::new(config.sector_byte_budget, config.sector_min_diameter)?;

    // Phase 1: bucket by structural key. Frusta form one bucket of their
    // own; their closed-form matcher needs no structural pre-filter.
    let mut facet_buckets: FxHashMap<i64, Vec<MatchItem<WorldFacets>>> = FxHashMap::default();
    let mut frustum_items: Vec<MatchItem<WorldFrustum>> = Vec::new();
    let mut passthrough: Vec<Primitive> = Vec::new();

    for primitive in primitives {
        match &primitive.kind {
            PrimitiveKind::FacetGroup(facets) => {
                let key = structural_key(facets);
                let shape = WorldFacets::bake(facets, &primitive.transform);
                facet_buckets
                    .entry(key)
                    .or_default()
                    .push(MatchItem { primitive, shape });
            }
            PrimitiveKind::Frustum(frustum) => {
                let shape = WorldFrustum {
                    frustum: *frustum,
                    world: primitive.transform,
                };
                frustum_items.push(MatchItem { primitive, shape });
            }
            PrimitiveKind::Box { .. }
            | PrimitiveKind::Cylinder { .. }
            | PrimitiveKind::TriangleMesh { .. } => passthrough.push(primitive),
        }
    }

    // Sorted bucket order makes the merged result order reproducible
    // regardless of hash-map iteration and rayon scheduling.
    let mut buckets: Vec<(i64, Vec<MatchItem<WorldFacets>>)> = facet_buckets.into_iter().collect();
    buckets.sort_by_key(|(key, _)| *key);
    for (_, items) in &mut buckets {
        sort_by_descending_diagonal(items);
    }
    sort_by_descending_diagonal(&mut frustum_items);

    let matchable = buckets.iter().map(|(_, b)| b.len()).sum::<usize>() + frustum_items.len();
    info!(
        shapes = input_count,
        matchable,
        facet_buckets = buckets.len(),
        frusta = frustum_items.len(),
        passthrough = passthrough.len(),
        "bucketed primitives for instance matching"
    );

    // Phase 2: match. Buckets are independent; each one is sequential
    // inside (the candidate arena mutates as shapes are classified).
    let progress = Progress::new(matchable, config.progress_interval);
    let matcher_params = config.matcher;

    let facet_outcomes: Vec<MatchOutcome<WorldFacets>> = buckets
        .into_par_iter()
        .map(|(key, items)| {
            let len = items.len();
            let outcome = InstanceMatcher::new(matcher_params, len).match_bucket(items);
            debug!(
                key,
                shapes = len,
                templates = outcome.templates.len(),
                "bucket matched"
            );
            progress.add(len);
            outcome
        })
        .collect();

    let frustum_outcome = if frustum_items.is_empty() {
        None
    } else {
        let len = frustum_items.len();
        let outcome = InstanceMatcher::new(matcher_params, len).match_bucket(frustum_items);
        progress.add(len);
        Some(outcome)
    };

    // Phase 3: merge, remapping per-bucket template indices into one global
    // table and demoting groups below the minimum size.
    let mut results: Vec<MatchResult> = Vec::with_capacity(input_count);
    let mut templates: Vec<SceneTemplate> = Vec::new();

    for outcome in facet_outcomes {
        merge_outcome(
            outcome,
            &should_instance,
            &mut templates,
            &mut results,
            |shape| TemplateShape::Facets(shape.0),
        );
    }
    if let Some(outcome) = frustum_outcome {
        merge_outcome(
            outcome,
            &should_instance,
            &mut templates,
            &mut results,
            |shape| TemplateShape::Frustum(shape.frustum),
        );
    }
    for primitive in passthrough {
        results.push(MatchResult::NotInstanced { primitive });
    }

    assert_eq!(
        results.len(),
        input_count,
        "pipeline lost or duplicated primitives"
    );

    let mut stats = SceneStats {
        input_primitives: input_count,
        matchable_shapes: matchable,
        templates: templates.len(),
        ..SceneStats::default()
    };
    for result in &results {
        match result {
            MatchResult::NotInstanced { .. } => stats.not_instanced += 1,
            MatchResult::Instanced { .. } => stats.instanced += 1,
            MatchResult::TemplateDesignated { .. } => stats.template_designated += 1,
        }
    }
    info!(
        templates = stats.templates,
        instanced = stats.instanced,
        designated = stats.template_designated,
        not_instanced = stats.not_instanced,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "instance matching complete"
    );

    // Phase 4: aggregate and split. Every result keeps its primitive, so
    // the sector tree covers the whole scene including instanced shapes.
    let nodes = aggregate_nodes(results.iter().map(|r| r.primitive()));
    let node_count = nodes.len();
    let sectors = splitter.split(nodes);

    stats.sectors = sectors.len();
    stats.total_estimated_bytes = sectors.iter().map(|s| s.estimated_bytes).sum();
    stats.elapsed = started.elapsed();
    info!(
        nodes = node_count,
        sectors = stats.sectors,
        estimated_bytes = stats.total_estimated_bytes,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "sector splitting complete"
    );

    Ok(CompiledScene {
        results,
        templates,
        sectors,
        stats,
    })
}

fn sort_by_descending_diagonal<S>(items: &mut [MatchItem<S>]) {
    items.sort_by(|a, b| {
        b.primitive
            .bounds
            .diagonal()
            .partial_cmp(&a.primitive.bounds.diagonal())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Fold one bucket outcome into the global result and template tables.
///
/// A template survives only if the results actually reference it and the
/// veto predicate accepts its group. Vetoed groups fall back to
/// NotInstanced.
fn merge_outcome<S>(
    outcome: MatchOutcome<S>,
    should_instance: &impl Fn(&InstanceGroup<'_>) -> bool,
    templates: &mut Vec<SceneTemplate>,
    results: &mut Vec<MatchResult>,
    to_shape: impl Fn(S) -> TemplateShape,
) {
    let mut group_size = vec![0usize; outcome.templates.len()];
    for result in &outcome.results {
        if let Some(idx) = result.template() {
            group_size[idx] += 1;
        }
    }

    let mut remap: Vec<Option<usize>> = vec![None; outcome.templates.len()];
    for (idx, template) in outcome.templates.into_iter().enumerate() {
        if group_size[idx] == 0 {
            continue;
        }
        let shape = to_shape(template.shape);
        let keep = should_instance(&InstanceGroup {
            shape: &shape,
            size: group_size[idx],
        });
        if keep {
            remap[idx] = Some(templates.len());
            templates.push(SceneTemplate {
                shape,
                match_count: template.match_count,
            });
        }
    }

    for result in outcome.results {
        results.push(match result {
            MatchResult::NotInstanced { primitive } => MatchResult::NotInstanced { primitive },
            MatchResult::Instanced {
                primitive,
                template,
                transform,
            } => match remap[template] {
                Some(global) => MatchResult::Instanced {
                    primitive,
                    template: global,
                    transform,
                },
                None => MatchResult::NotInstanced { primitive },
            },
            MatchResult::TemplateDesignated {
                primitive,
                template,
                transform,
            } => match remap[template] {
                Some(global) => MatchResult::TemplateDesignated {
                    primitive,
                    template: global,
                    transform,
                },
                None => MatchResult::NotInstanced { primitive },
            },
        });
    }
}
