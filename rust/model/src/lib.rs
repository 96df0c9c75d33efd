// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CadScene Data Model
//!
//! Primitive and shape types shared by the instancing and sector-splitting
//! stages of the scene compiler. Upstream tessellation produces these types;
//! downstream serialization consumes them.

pub mod bounds;
pub mod color;
pub mod error;
pub mod facets;
pub mod primitive;
pub mod transform;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix3, Matrix4, Point2, Point3, Vector2, Vector3};

pub use bounds::Aabb;
pub use color::Color;
pub use error::{Error, Result};
pub use facets::{Contour, FacetGroup, Polygon};
pub use primitive::{Frustum, Primitive, PrimitiveKind, TreeIndex};
