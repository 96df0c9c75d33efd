// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-bucket instance matcher.
//!
//! All shapes in a bucket share one structural key and arrive pre-sorted by
//! descending bounding diagonal, so large shapes become templates first.
//! Templates live in an arena (`Vec` of records addressed by index); a
//! separately maintained order array, kept sorted by descending match count,
//! decides in which order candidates are tried. Frequently matched templates
//! bubble to the front, which bounds the amortized cost of the worst-case
//! O(n²) scan.
//!
//! Matching within one bucket is strictly sequential: the candidate list is
//! mutated as shapes are processed and the outcome is order-dependent.
//! Buckets themselves are independent and run in parallel upstream.

use nalgebra::Matrix4;
use rustc_hash::FxHashMap;

use cadscene_model::{FacetGroup, Primitive};

use crate::recovery::{recover_transform, verify_facets};

/// A shape kind the matcher can deduplicate.
///
/// `try_match` returns the full template-local → world transform on
/// success. `make_template` normalizes a shape into template form and
/// returns the transform restoring the original placement.
pub trait Matchable: Sized {
    fn try_match(template: &Self, shape: &Self, tolerance: f64) -> Option<Matrix4<f64>>;
    fn make_template(shape: &Self) -> (Self, Matrix4<f64>);
}

/// A facet group baked into absolute (world) coordinates.
#[derive(Debug, Clone)]
pub struct WorldFacets(pub FacetGroup);

impl WorldFacets {
    /// Bake a primitive's transform into its facet geometry.
    pub fn bake(facets: &FacetGroup, world: &Matrix4<f64>) -> Self {
        Self(facets.transformed(world))
    }
}

impl Matchable for WorldFacets {
    fn try_match(template: &Self, shape: &Self, tolerance: f64) -> Option<Matrix4<f64>> {
        let transform = recover_transform(&template.0, &shape.0)?;
        if verify_facets(&template.0, &shape.0, &transform, tolerance) {
            Some(transform)
        } else {
            None
        }
    }

    fn make_template(shape: &Self) -> (Self, Matrix4<f64>) {
        let (centered, restore) = shape.0.centered();
        (Self(centered), restore)
    }
}

/// One input to the matcher: the primitive plus its matchable world shape.
#[derive(Debug)]
pub struct MatchItem<S> {
    pub primitive: Primitive,
    pub shape: S,
}

/// Classification of one input shape. Exactly one result per input.
#[derive(Debug, Clone)]
pub enum MatchResult {
    /// No template matched and the shape never earned template status.
    NotInstanced { primitive: Primitive },
    /// The shape is an instance of a template: template geometry times
    /// `transform` reproduces the shape's world geometry.
    Instanced {
        primitive: Primitive,
        template: usize,
        transform: Matrix4<f64>,
    },
    /// The shape spawned a template that matched at least one other shape.
    TemplateDesignated {
        primitive: Primitive,
        template: usize,
        transform: Matrix4<f64>,
    },
}

impl MatchResult {
    pub fn primitive(&self) -> &Primitive {
        match self {
            MatchResult::NotInstanced { primitive }
            | MatchResult::Instanced { primitive, .. }
            | MatchResult::TemplateDesignated { primitive, .. } => primitive,
        }
    }

    pub fn into_primitive(self) -> Primitive {
        match self {
            MatchResult::NotInstanced { primitive }
            | MatchResult::Instanced { primitive, .. }
            | MatchResult::TemplateDesignated { primitive, .. } => primitive,
        }
    }

    /// Template arena index, if this result references one.
    pub fn template(&self) -> Option<usize> {
        match self {
            MatchResult::NotInstanced { .. } => None,
            MatchResult::Instanced { template, .. }
            | MatchResult::TemplateDesignated { template, .. } => Some(*template),
        }
    }
}

/// A finished template with its match statistics.
#[derive(Debug, Clone)]
pub struct Template<S> {
    pub shape: S,
    pub match_count: usize,
    pub match_attempts: usize,
}

/// Everything one bucket produces: one result per input shape plus the
/// template arena the results index into.
#[derive(Debug)]
pub struct MatchOutcome<S> {
    pub results: Vec<MatchResult>,
    pub templates: Vec<Template<S>>,
}

/// Tuning knobs for the matcher. The defaults are the load-bearing
/// constants: the cleanup interval and demotion thresholds bound
/// candidate-list growth on buckets full of near-unique shapes.
#[derive(Debug, Clone, Copy)]
pub struct MatcherParams {
    /// Run a template cleanup pass every this many processed shapes.
    pub cleanup_interval: usize,
    /// Demotion considers templates with more attempts than
    /// `clamp(bucket_len / attempt_divisor, attempt_floor, attempt_ceiling)`.
    pub attempt_floor: usize,
    pub attempt_ceiling: usize,
    pub attempt_divisor: usize,
    /// Templates whose match rate stays below this fraction are demoted.
    pub min_match_rate: f64,
    /// Absolute vertex/normal comparison tolerance.
    pub tolerance: f64,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            cleanup_interval: 500,
            attempt_floor: 500,
            attempt_ceiling: 3000,
            attempt_divisor: 300,
            min_match_rate: 0.001,
            tolerance: 1e-3,
        }
    }
}

struct TemplateRecord<S> {
    shape: S,
    /// Restores the spawning shape's placement from template space.
    restore: Matrix4<f64>,
    match_count: usize,
    attempts: usize,
    /// Result slots that reference this template; slot 0 is the spawner.
    slots: Vec<usize>,
    demoted: bool,
}

/// Sequential matcher over one structural-key bucket.
pub struct InstanceMatcher<S> {
    params: MatcherParams,
    attempt_limit: usize,
    arena: Vec<TemplateRecord<S>>,
    /// Candidate try-order: arena indices sorted by descending match count.
    order: Vec<usize>,
    /// Spawner primitives awaiting their final classification.
    pending: FxHashMap<usize, Primitive>,
}

impl<S: Matchable> InstanceMatcher<S> {
    pub fn new(params: MatcherParams, bucket_len: usize) -> Self {
        let attempt_limit = (bucket_len / params.attempt_divisor.max(1))
            .clamp(params.attempt_floor, params.attempt_ceiling);
        Self {
            params,
            attempt_limit,
            arena: Vec::new(),
            order: Vec::new(),
            pending: FxHashMap::default(),
        }
    }

    /// Match every shape in the bucket. Items must be pre-sorted by
    /// descending bounding diagonal; the outcome is order-dependent.
    pub fn match_bucket(mut self, items: Vec<MatchItem<S>>) -> MatchOutcome<S> {
        let total = items.len();
        let mut results: Vec<Option<MatchResult>> = Vec::with_capacity(total);

        for (slot, item) in items.into_iter().enumerate() {
            let result = self.classify(slot, item);
            results.push(result);

            if (slot + 1) % self.params.cleanup_interval == 0 {
                self.cleanup(&mut results);
            }
        }

        self.finish(&mut results);
        assert!(
            self.pending.is_empty(),
            "matcher left unresolved template spawners"
        );

        let results: Vec<MatchResult> = results
            .into_iter()
            .map(|r| r.expect("every input shape must have exactly one result"))
            .collect();
        assert_eq!(results.len(), total, "matcher lost or duplicated shapes");

        let templates = self
            .arena
            .into_iter()
            .map(|record| Template {
                shape: record.shape,
                match_count: record.match_count,
                match_attempts: record.attempts,
            })
            .collect();

        MatchOutcome { results, templates }
    }

    /// Try the shape against all live candidates in order; on a miss it
    /// becomes a new template. Returns `Some` for matched shapes and `None`
    /// for pending template spawners (resolved in `finish`).
    fn classify(&mut self, slot: usize, item: MatchItem<S>) -> Option<MatchResult> {
        for pos in 0..self.order.len() {
            let idx = self.order[pos];
            self.arena[idx].attempts += 1;
            let matched =
                S::try_match(&self.arena[idx].shape, &item.shape, self.params.tolerance);
            if let Some(transform) = matched {
                self.arena[idx].match_count += 1;
                self.arena[idx].slots.push(slot);
                self.promote(pos);
                return Some(MatchResult::Instanced {
                    primitive: item.primitive,
                    template: idx,
                    transform,
                });
            }
        }

        let (template_shape, restore) = S::make_template(&item.shape);
        let idx = self.arena.len();
        self.arena.push(TemplateRecord {
            shape: template_shape,
            restore,
            match_count: 0,
            attempts: 0,
            slots: vec![slot],
            demoted: false,
        });
        self.order.push(idx);
        self.pending.insert(slot, item.primitive);
        None
    }

    /// Single insertion step of the self-organizing order: move the
    /// candidate at `pos` forward past entries with a smaller match count.
    fn promote(&mut self, pos: usize) {
        let mut pos = pos;
        while pos > 0 {
            let here = self.order[pos];
            let prev = self.order[pos - 1];
            if self.arena[prev].match_count >= self.arena[here].match_count {
                break;
            }
            self.order.swap(pos - 1, pos);
            pos -= 1;
        }
    }

    /// Periodic cleanup: demote templates that have been tried many times
    /// and almost never match. Their spawner and any instances become
    /// NotInstanced, and the template leaves the candidate order.
    fn cleanup(&mut self, results: &mut [Option<MatchResult>]) {
        let attempt_limit = self.attempt_limit;
        let min_rate = self.params.min_match_rate;

        let demote: Vec<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&idx| {
                let record = &self.arena[idx];
                let rate = if record.attempts > 0 {
                    record.match_count as f64 / record.attempts as f64
                } else {
                    0.0
                };
                record.attempts > attempt_limit && rate < min_rate
            })
            .collect();

        for idx in demote {
            self.demote_template(idx, results);
        }
    }

    fn demote_template(&mut self, idx: usize, results: &mut [Option<MatchResult>]) {
        self.order.retain(|&i| i != idx);
        self.arena[idx].demoted = true;
        let slots = std::mem::take(&mut self.arena[idx].slots);

        for slot in slots {
            let primitive = match results[slot].take() {
                Some(result) => result.into_primitive(),
                None => self
                    .pending
                    .remove(&slot)
                    .expect("template slot without primitive"),
            };
            results[slot] = Some(MatchResult::NotInstanced { primitive });
        }
    }

    /// Resolve pending template spawners: templates with at least one match
    /// become TemplateDesignated, the rest NotInstanced.
    fn finish(&mut self, results: &mut [Option<MatchResult>]) {
        for idx in 0..self.arena.len() {
            if self.arena[idx].demoted {
                continue;
            }
            let slot = self.arena[idx].slots[0];
            let restore = self.arena[idx].restore;
            let match_count = self.arena[idx].match_count;
            let primitive = self
                .pending
                .remove(&slot)
                .expect("template spawner primitive must be pending");
            results[slot] = Some(if match_count > 0 {
                MatchResult::TemplateDesignated {
                    primitive,
                    template: idx,
                    transform: restore,
                }
            } else {
                MatchResult::NotInstanced { primitive }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadscene_model::facets::Polygon;
    use cadscene_model::transform::translation_matrix;
    use cadscene_model::{Color, TreeIndex};
    use nalgebra::{Point3, Vector3};

    fn unit_cube() -> FacetGroup {
        let n = Vector3::z();
        let quad = |pts: [[f64; 3]; 4]| {
            Polygon::simple(
                pts.iter()
                    .map(|p| (Point3::new(p[0], p[1], p[2]), n))
                    .collect(),
            )
        };
        FacetGroup::new(vec![
            quad([[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]]),
            quad([[0., 0., 1.], [1., 0., 1.], [1., 1., 1.], [0., 1., 1.]]),
            quad([[0., 0., 0.], [1., 0., 0.], [1., 0., 1.], [0., 0., 1.]]),
            quad([[0., 1., 0.], [1., 1., 0.], [1., 1., 1.], [0., 1., 1.]]),
            quad([[0., 0., 0.], [0., 1., 0.], [0., 1., 1.], [0., 0., 1.]]),
            quad([[1., 0., 0.], [1., 1., 0.], [1., 1., 1.], [1., 0., 1.]]),
        ])
    }

    fn cube_item(i: u32, offset: Vector3<f64>) -> MatchItem<WorldFacets> {
        let facets = unit_cube();
        let world = translation_matrix(offset);
        let primitive =
            Primitive::from_facets(TreeIndex(i), world, Color::default(), facets.clone());
        MatchItem {
            shape: WorldFacets::bake(&facets, &world),
            primitive,
        }
    }

    #[test]
    fn ten_translated_cubes_yield_one_template() {
        let items: Vec<_> = (0..10)
            .map(|i| cube_item(i, Vector3::new(3.0 * i as f64, 0.0, 0.0)))
            .collect();

        let outcome =
            InstanceMatcher::new(MatcherParams::default(), items.len()).match_bucket(items);

        assert_eq!(outcome.results.len(), 10);
        let designated = outcome
            .results
            .iter()
            .filter(|r| matches!(r, MatchResult::TemplateDesignated { .. }))
            .count();
        let instanced = outcome
            .results
            .iter()
            .filter(|r| matches!(r, MatchResult::Instanced { .. }))
            .count();
        assert_eq!(designated, 1);
        assert_eq!(instanced, 9);

        // Reconstructing every result from the template must reproduce the
        // original world geometry within tolerance.
        for result in &outcome.results {
            let (template, transform) = match result {
                MatchResult::Instanced {
                    template,
                    transform,
                    ..
                }
                | MatchResult::TemplateDesignated {
                    template,
                    transform,
                    ..
                } => (&outcome.templates[*template].shape.0, transform),
                MatchResult::NotInstanced { .. } => panic!("all cubes should instance"),
            };
            let rebuilt = template.transformed(transform);
            let original = match result.primitive().kind {
                cadscene_model::PrimitiveKind::FacetGroup(ref f) => {
                    f.transformed(&result.primitive().transform)
                }
                _ => unreachable!(),
            };
            for ((p, _), (q, _)) in rebuilt.iter_vertices().zip(original.iter_vertices()) {
                assert!((p - q).norm() <= 1e-3, "{:?} vs {:?}", p, q);
            }
        }
    }

    #[test]
    fn results_are_complete_for_mixed_sizes() {
        // Every cube a different size; affine recovery may or may not pair
        // them up, but completeness must hold regardless.
        let items: Vec<_> = (0..5)
            .map(|i| {
                let scale = 1.0 + i as f64;
                let facets = unit_cube()
                    .transformed(&Matrix4::new_scaling(scale));
                let world = Matrix4::identity();
                let primitive = Primitive::from_facets(
                    TreeIndex(i),
                    world,
                    Color::default(),
                    facets.clone(),
                );
                MatchItem {
                    shape: WorldFacets::bake(&facets, &world),
                    primitive,
                }
            })
            .collect();

        let outcome =
            InstanceMatcher::new(MatcherParams::default(), items.len()).match_bucket(items);
        assert_eq!(outcome.results.len(), 5);
        // Scaled copies of a cube do match each other (affine recovery),
        // so allow either outcome but demand completeness and consistency.
        for result in &outcome.results {
            if let Some(idx) = result.template() {
                assert!(idx < outcome.templates.len());
            }
        }
    }

    #[test]
    fn cleanup_demotes_stale_templates() {
        // Tight thresholds: any template tried more than once without a
        // match is demoted at the next cleanup.
        let params = MatcherParams {
            cleanup_interval: 2,
            attempt_floor: 1,
            attempt_ceiling: 1,
            attempt_divisor: 1,
            ..MatcherParams::default()
        };

        // Mutually non-matching shapes: different vertex spreads.
        let items: Vec<_> = (0..6)
            .map(|i| {
                let stretch = Matrix4::new_nonuniform_scaling(&Vector3::new(
                    1.0 + i as f64 * 10.0,
                    1.0,
                    1.0 + (i % 2) as f64 * 3.0,
                ));
                let facets = unit_cube().transformed(&stretch);
                let primitive = Primitive::from_facets(
                    TreeIndex(i),
                    Matrix4::identity(),
                    Color::default(),
                    facets.clone(),
                );
                MatchItem {
                    shape: WorldFacets(facets),
                    primitive,
                }
            })
            .collect();

        let outcome = InstanceMatcher::new(params, items.len()).match_bucket(items);
        assert_eq!(outcome.results.len(), 6);
        assert!(outcome
            .results
            .iter()
            .all(|r| matches!(r, MatchResult::NotInstanced { .. })));
    }
}
