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

//! Configuration, byte-level codec helpers, and the error taxonomy shared by
//! every other `eau2` crate.

pub mod bytes;
pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Eau2Error, Eau2Result};

/// A node's position in the fixed peer directory, `0..CLIENT_NUM`.
pub type NodeIndex = usize;
