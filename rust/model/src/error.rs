// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for model construction
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing model primitives
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid frustum: {0}")]
    InvalidFrustum(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBounds(String),
}
