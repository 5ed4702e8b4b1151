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

//! The dataframe layer: typed chunked columns, the row-at-a-time visitor
//! protocol, schemas, the distributed `DataFrame` itself, and the SoR file
//! ingester — everything built on top of `eau2_kvstore::KVStore`.

pub mod column;
pub mod dataframe;
pub mod row;
pub mod schema;
pub mod sorer;

pub use column::{Column, FieldValue};
pub use dataframe::DataFrame;
pub use row::{Fielder, Reader, Row, Rower, Writer};
pub use schema::{ColumnType, Schema};
pub use sorer::{infer_schema, ingest, INFER_LINE_COUNT};
