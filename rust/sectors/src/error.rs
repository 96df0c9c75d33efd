// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for sector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring sector splitting
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid splitter parameters: {0}")]
    InvalidParameters(String),
}
