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

//! Example applications built entirely out of `eau2_dataframe`'s generic
//! traversal operations, standing in for the degrees-of-separation/
//! word-count programs the design sketches as end-to-end scenarios rather
//! than as shipped binaries.

use std::collections::HashMap;
use std::sync::Arc;

use eau2_dataframe::{DataFrame, Row, Rower};
use eau2_kvstore::{Key, KVStore};
use parking_lot::Mutex;

#[derive(Clone)]
struct CountingRower {
    counts: Arc<Mutex<HashMap<String, i64>>>,
}

impl Rower for CountingRower {
    fn accept(&mut self, row: &Row) -> bool {
        *self.counts.lock().entry(row.get_string(0).to_string()).or_insert(0) += 1;
        true
    }

    fn clone_rower(&self) -> Box<dyn Rower> {
        Box::new(self.clone())
    }
}

/// Counts occurrences of each string in `lines`, distributing the scan
/// across `available_parallelism()` bands via `DataFrame::pmap`.
pub async fn word_count(lines: &[String], key: Key, store: KVStore, chunk_size: usize) -> HashMap<String, i64> {
    let df = DataFrame::from_strings(key, store, chunk_size, lines).await;

    let counts = Arc::new(Mutex::new(HashMap::new()));
    let mut rower = CountingRower { counts: counts.clone() };
    df.pmap(&mut rower).await;

    match Arc::try_unwrap(counts) {
        Ok(mutex) => mutex.into_inner(),
        Err(shared) => shared.lock().clone(),
    }
}
