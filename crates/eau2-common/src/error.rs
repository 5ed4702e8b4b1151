// Copyright 2024 The eau2 Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The non-fatal error taxonomy.
//!
//! Per the design, most failure modes in this system (wrong-type column
//! access, out-of-bounds row access, a short socket read, a deserialization
//! mismatch) are programmer or transport errors and are fatal: they abort
//! the process via `panic!`/`expect` rather than flowing through a `Result`.
//! This type exists for the smaller set of *recoverable* failures: malformed
//! configuration, and wrapping lower-level I/O errors encountered while
//! loading it.

use std::path::PathBuf;

use thiserror::Error;

pub type Eau2Result<T> = std::result::Result<T, Eau2Error>;

#[derive(Error, Debug)]
pub enum Eau2Error {
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is missing required key `{key}`")]
    ConfigMissingKey { path: PathBuf, key: &'static str },

    #[error("config file {path} has invalid value for `{key}`: {value}")]
    ConfigInvalidValue {
        path: PathBuf,
        key: &'static str,
        value: String,
    },
}
