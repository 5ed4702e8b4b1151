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

//! Typed, append-only, chunked columns.
//!
//! A column physically splits its data into fixed-size chunks, each stored
//! as a serialized [`eau2_kvstore::Value`] under a deterministic chunk key
//! (`"<col-name>:0x<chunk_idx>"`, owner node 0). Every chunk but the last
//! holds exactly `chunk_size` elements and is "sealed" — safe to cache,
//! since only the dataframe's owning node ever appends, and appends only
//! ever touch the last chunk. The last chunk is always re-fetched, since a
//! concurrent reader can't assume it has seen the latest append.
//!
//! The original design realizes this as a `Column` base class with one
//! subclass per element type and virtual dispatch. Per the redesign notes,
//! this is instead a tagged sum over a small closed type set with no
//! virtual-call tower: one [`Column`] enum, four thin per-type structs that
//! share the chunk bookkeeping through free functions.

use eau2_common::bytes::{BufMutExt, Reader};
use eau2_kvstore::{Key, KVStore, Value};
use parking_lot::Mutex;
use tracing::trace;

use crate::schema::ColumnType;

/// Element count per chunk for every column type — fixed-width columns
/// store exactly this many elements per chunk (zero-padded while the last
/// chunk fills); string and boolean columns use the same count as their
/// *logical* chunk boundary even though their physical encoding isn't a
/// flat `chunk_size * sizeof(T)` buffer.
const WORD_BITS: usize = 64;

/// One value read out of, or pushed into, a column — the sum type that
/// replaces the original's `Box`/`BoolBox`/`IntBox`/`DoubleBox`/`StringBox`
/// tower.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    /// String columns never hold a Rust `None`; a missing field from file
    /// ingestion defaults to the empty string, per §4.10's "missing fields
    /// use zero/empty default" rule (see `DESIGN.md`).
    String(String),
}

impl FieldValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            FieldValue::Bool(_) => ColumnType::Bool,
            FieldValue::Int(_) => ColumnType::Int,
            FieldValue::Double(_) => ColumnType::Double,
            FieldValue::String(_) => ColumnType::String,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            FieldValue::Bool(b) => *b,
            other => panic!("fatal: expected a bool field, got {other:?}"),
        }
    }

    pub fn as_int(&self) -> i32 {
        match self {
            FieldValue::Int(i) => *i,
            other => panic!("fatal: expected an int field, got {other:?}"),
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            FieldValue::Double(d) => *d,
            other => panic!("fatal: expected a double field, got {other:?}"),
        }
    }

    pub fn as_string(&self) -> &str {
        match self {
            FieldValue::String(s) => s,
            other => panic!("fatal: expected a string field, got {other:?}"),
        }
    }
}

struct CachedChunk {
    idx: usize,
    bytes: Vec<u8>,
}

/// A typed, chunked, append-only column. `push`/`get` round-trip through
/// the `KVStore`, so both are `async`; `push` additionally requires
/// exclusive access, reflecting the single-writer-per-dataframe discipline
/// (§5) — concurrent `get`s are safe and are exactly what `pmap` relies on.
pub struct Column {
    name: String,
    ty: ColumnType,
    store: KVStore,
    chunk_size: usize,
    chunk_keys: Vec<Key>,
    len: usize,
    cache: Mutex<Option<CachedChunk>>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, store: KVStore, chunk_size: usize) -> Self {
        Column {
            name: name.into(),
            ty,
            store,
            chunk_size,
            chunk_keys: Vec::new(),
            len: 0,
            cache: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn fixed_chunk_capacity_bytes(ty: ColumnType, chunk_size: usize) -> usize {
        match ty {
            ColumnType::Bool => chunk_size.div_ceil(WORD_BITS) * (WORD_BITS / 8),
            ColumnType::Int => chunk_size * 4,
            ColumnType::Double => chunk_size * 8,
            ColumnType::String => panic!("fatal: strings have no fixed chunk capacity"),
        }
    }

    /// Appends one element. If the current last chunk is full (or none
    /// exists yet), allocates a new chunk first.
    pub async fn push(&mut self, value: FieldValue) {
        assert_eq!(
            value.column_type(),
            self.ty,
            "fatal: push of a {:?} value onto a {:?} column",
            value.column_type(),
            self.ty
        );
        let starts_new_chunk = self.len % self.chunk_size == 0;
        let chunk_idx = self.len / self.chunk_size;
        if starts_new_chunk {
            self.allocate_chunk(chunk_idx).await;
        }
        let item_idx = self.len % self.chunk_size;
        let key = self.chunk_keys[chunk_idx].clone();

        match &value {
            FieldValue::Bool(b) => {
                let mut bytes = self.store.get(&key).await.expect("fatal: chunk key vanished").into_bytes();
                let word_idx = item_idx / WORD_BITS;
                let bit_idx = item_idx % WORD_BITS;
                let mut word = u64::from_le_bytes(bytes[word_idx * 8..word_idx * 8 + 8].try_into().unwrap());
                if *b {
                    word |= 1 << bit_idx;
                } else {
                    word &= !(1 << bit_idx);
                }
                bytes[word_idx * 8..word_idx * 8 + 8].copy_from_slice(&word.to_le_bytes());
                self.store.put(&key, Value::new(bytes)).await;
            }
            FieldValue::Int(i) => {
                let mut bytes = self.store.get(&key).await.expect("fatal: chunk key vanished").into_bytes();
                bytes[item_idx * 4..item_idx * 4 + 4].copy_from_slice(&i.to_le_bytes());
                self.store.put(&key, Value::new(bytes)).await;
            }
            FieldValue::Double(d) => {
                let mut bytes = self.store.get(&key).await.expect("fatal: chunk key vanished").into_bytes();
                bytes[item_idx * 8..item_idx * 8 + 8].copy_from_slice(&d.to_le_bytes());
                self.store.put(&key, Value::new(bytes)).await;
            }
            FieldValue::String(s) => {
                let mut bytes = self.store.get(&key).await.expect("fatal: chunk key vanished").into_bytes();
                bytes.put_cstring(s);
                self.store.put(&key, Value::new(bytes)).await;
            }
        }
        self.len += 1;
    }

    async fn allocate_chunk(&mut self, chunk_idx: usize) {
        let key = Key::chunk_key(&self.name, chunk_idx);
        let initial = match self.ty {
            ColumnType::String => Vec::new(),
            fixed => vec![0u8; Self::fixed_chunk_capacity_bytes(fixed, self.chunk_size)],
        };
        trace!(column = %self.name, chunk_idx, "allocating new chunk");
        self.store.put(&key, Value::new(initial)).await;
        self.chunk_keys.push(key);
    }

    /// The chunk an append would currently land in, if any chunk has been
    /// allocated but not yet filled. `None` means every allocated chunk is
    /// full and a fresh one will be allocated on the next push.
    fn in_progress_chunk_idx(&self) -> Option<usize> {
        if self.len == 0 || self.len % self.chunk_size != 0 {
            Some(self.len / self.chunk_size)
        } else {
            None
        }
    }

    /// Fetches chunk `idx`'s bytes, serving sealed chunks from the
    /// single-slot cache and always re-reading the in-progress chunk,
    /// since it may have been appended to since it was last read.
    async fn chunk_bytes(&self, idx: usize) -> Vec<u8> {
        let sealed = self.in_progress_chunk_idx() != Some(idx);
        if sealed {
            if let Some(cached) = self.cache.lock().as_ref() {
                if cached.idx == idx {
                    return cached.bytes.clone();
                }
            }
            let bytes = self.store.get(&self.chunk_keys[idx]).await.expect("fatal: missing chunk").into_bytes();
            *self.cache.lock() = Some(CachedChunk { idx, bytes: bytes.clone() });
            bytes
        } else {
            self.store.get(&self.chunk_keys[idx]).await.expect("fatal: missing chunk").into_bytes()
        }
    }

    pub async fn get(&self, idx: usize) -> FieldValue {
        assert!(idx < self.len, "fatal: column index {idx} out of bounds (len {})", self.len);
        let chunk_idx = idx / self.chunk_size;
        let item_idx = idx % self.chunk_size;
        let bytes = self.chunk_bytes(chunk_idx).await;
        match self.ty {
            ColumnType::Bool => {
                let word_idx = item_idx / WORD_BITS;
                let bit_idx = item_idx % WORD_BITS;
                let word = u64::from_le_bytes(bytes[word_idx * 8..word_idx * 8 + 8].try_into().unwrap());
                FieldValue::Bool((word >> bit_idx) & 1 == 1)
            }
            ColumnType::Int => {
                FieldValue::Int(i32::from_le_bytes(bytes[item_idx * 4..item_idx * 4 + 4].try_into().unwrap()))
            }
            ColumnType::Double => {
                FieldValue::Double(f64::from_le_bytes(bytes[item_idx * 8..item_idx * 8 + 8].try_into().unwrap()))
            }
            ColumnType::String => {
                let mut r = Reader::new(&bytes);
                for _ in 0..item_idx {
                    r.read_cstring();
                }
                FieldValue::String(r.read_cstring())
            }
        }
    }

    pub async fn get_bool(&self, idx: usize) -> bool {
        self.get(idx).await.as_bool()
    }

    pub async fn get_int(&self, idx: usize) -> i32 {
        self.get(idx).await.as_int()
    }

    pub async fn get_double(&self, idx: usize) -> f64 {
        self.get(idx).await.as_double()
    }

    pub async fn get_string(&self, idx: usize) -> String {
        self.get(idx).await.as_string().to_string()
    }

    /// `<type><len><name>[n_chunks][chunk_key...]`. The chunk-key count is
    /// written explicitly rather than recomputed from `len`, fixing the
    /// original design's ambiguous `len / CHUNK_SIZE + 1` formula (see
    /// `DESIGN.md`).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.name.len() + self.chunk_keys.len() * 16);
        buf.put_u8_byte(match self.ty {
            ColumnType::Bool => b'B',
            ColumnType::Int => b'I',
            ColumnType::Double => b'D',
            ColumnType::String => b'S',
        });
        buf.put_usize(self.len);
        buf.put_cstring(&self.name);
        buf.put_usize(self.chunk_keys.len());
        for key in &self.chunk_keys {
            key.write_to(&mut buf);
        }
        buf
    }

    pub fn deserialize(bytes: &[u8], store: KVStore, chunk_size: usize) -> Self {
        let mut r = Reader::new(bytes);
        let ty = match r.read_u8() {
            b'B' => ColumnType::Bool,
            b'I' => ColumnType::Int,
            b'D' => ColumnType::Double,
            b'S' => ColumnType::String,
            other => panic!("fatal: unknown column type tag {other:?} while deserializing"),
        };
        let len = r.read_usize();
        let name = r.read_cstring();
        let n_chunks = r.read_usize();
        let chunk_keys = (0..n_chunks).map(|_| Key::read_from(&mut r)).collect();
        Column {
            name,
            ty,
            store,
            chunk_size,
            chunk_keys,
            len,
            cache: Mutex::new(None),
        }
    }
}
