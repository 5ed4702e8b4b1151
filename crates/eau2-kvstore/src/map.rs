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

//! The node-local `Key -> Value` table.
//!
//! This is a plain separate-chaining hash table: a bucket array of
//! `Vec<(Key, Value)>` chains, doubled whenever the load factor would
//! exceed 0.75. `get` always returns an owned clone of the stored value —
//! callers never see a reference into map-owned storage — and `put` clones
//! both the key and the value it is handed, so the map exclusively owns
//! everything it stores (the source's "KV store borrows, returns clones"
//! ownership discipline).
//!
//! `get_and_wait` is the cross-node rendezvous primitive: rather than the
//! original design's busy-poll loop, every successful `put` wakes anyone
//! blocked in `get_and_wait` via a [`tokio::sync::Notify`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::key::Key;
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_BUCKETS: usize = 16;

struct Buckets {
    slots: Vec<Vec<(Key, Value)>>,
    len: usize,
}

impl Buckets {
    fn new() -> Self {
        Buckets {
            slots: (0..INITIAL_BUCKETS).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    fn bucket_index(&self, key: &Key) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    fn put(&mut self, key: Key, value: Value) {
        let idx = self.bucket_index(&key);
        if let Some(slot) = self.slots[idx].iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }
        self.slots[idx].push((key, value));
        self.len += 1;
        if self.len as f64 / self.slots.len() as f64 > MAX_LOAD_FACTOR {
            self.rehash();
        }
    }

    fn get(&self, key: &Key) -> Option<Value> {
        let idx = self.bucket_index(key);
        self.slots[idx]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn contains(&self, key: &Key) -> bool {
        let idx = self.bucket_index(key);
        self.slots[idx].iter().any(|(k, _)| k == key)
    }

    fn rehash(&mut self) {
        let old = std::mem::replace(
            &mut self.slots,
            (0..self.slots.len() * 2).map(|_| Vec::new()).collect(),
        );
        for chain in old {
            for (key, value) in chain {
                let idx = self.bucket_index(&key);
                self.slots[idx].push((key, value));
            }
        }
    }
}

/// A node's local `Key -> Value` table, shared by every thread/task
/// handling requests for this node.
pub struct LocalMap {
    buckets: Mutex<Buckets>,
    notify: Notify,
}

impl Default for LocalMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalMap {
    pub fn new() -> Self {
        LocalMap {
            buckets: Mutex::new(Buckets::new()),
            notify: Notify::new(),
        }
    }

    /// Inserts or overwrites `key`. Last write wins. Wakes every task
    /// blocked in [`LocalMap::get_and_wait`].
    pub fn put(&self, key: Key, value: Value) {
        self.buckets.lock().put(key, value);
        self.notify.notify_waiters();
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        self.buckets.lock().get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.buckets.lock().contains(key)
    }

    /// Blocks until `key` is present, then returns its value. There is no
    /// timeout: this is the rendezvous primitive two peers use to hand off
    /// a dataframe, and the design leaves it unbounded.
    pub async fn get_and_wait(&self, key: &Key) -> Value {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.get(key) {
                return value;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let map = LocalMap::new();
        map.put(Key::new(0, "a"), Value::new(vec![1, 2, 3]));
        assert_eq!(map.get(&Key::new(0, "a")), Some(Value::new(vec![1, 2, 3])));
        assert_eq!(map.get(&Key::new(0, "missing")), None);
    }

    #[test]
    fn last_write_wins() {
        let map = LocalMap::new();
        let k = Key::new(0, "a");
        map.put(k.clone(), Value::new(vec![1]));
        map.put(k.clone(), Value::new(vec![2]));
        assert_eq!(map.get(&k), Some(Value::new(vec![2])));
    }

    #[test]
    fn rehashes_past_load_factor() {
        let map = LocalMap::new();
        for i in 0..200 {
            map.put(Key::new(0, format!("k{i}")), Value::new(vec![i as u8]));
        }
        assert!(map.bucket_count() > INITIAL_BUCKETS);
        for i in 0..200 {
            assert_eq!(
                map.get(&Key::new(0, format!("k{i}"))),
                Some(Value::new(vec![i as u8]))
            );
        }
    }

    #[tokio::test]
    async fn get_and_wait_unblocks_on_put() {
        let map = std::sync::Arc::new(LocalMap::new());
        let waiter = {
            let map = map.clone();
            tokio::spawn(async move { map.get_and_wait(&Key::new(0, "k")).await })
        };
        tokio::task::yield_now().await;
        map.put(Key::new(0, "k"), Value::new(vec![42]));
        let got = waiter.await.unwrap();
        assert_eq!(got, Value::new(vec![42]));
    }
}
