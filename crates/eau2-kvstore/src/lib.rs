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

//! The distributed key/value layer: a node-local map, the length-prefixed
//! wire protocol peers and the registry speak, the registry itself, the
//! peer's transport and dispatch loop, and the `KVStore` facade that routes
//! `get`/`get_and_wait`/`put` to a local or remote owner transparently.

pub mod key;
pub mod map;
pub mod peer;
pub mod registry;
pub mod store;
pub mod value;
pub mod wire;

pub use key::Key;
pub use map::LocalMap;
pub use peer::Peer;
pub use registry::Registry;
pub use store::KVStore;
pub use value::Value;
