// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CadScene Instance Matching
//!
//! Detects that many shapes are rigid/affine copies of a common template and
//! replaces the duplicates with (template, transform) pairs.
//!
//! The pipeline is: bucket shapes by a cheap [structural key](key), sort
//! each bucket by descending size, then run the [matcher](matcher) which
//! recovers affine transforms ([recovery]) for facet shapes or uses
//! closed-form symmetry solutions for frusta ([pyramid]).

pub mod key;
pub mod matcher;
pub mod pyramid;
pub mod recovery;

pub use key::structural_key;
pub use matcher::{
    InstanceMatcher, MatchItem, MatchOutcome, MatchResult, Matchable, MatcherParams, Template,
    WorldFacets,
};
pub use pyramid::WorldFrustum;
pub use recovery::{recover_transform, verify_facets};
