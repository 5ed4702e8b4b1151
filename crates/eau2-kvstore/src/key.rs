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

use eau2_common::bytes::{BufMutExt, Reader};
use eau2_common::NodeIndex;

/// The address of a value in the fabric: which node's local map is
/// authoritative for it, and the name within that map.
///
/// Keys are immutable once constructed and are cheap to clone; the local
/// map clones a `Key` on every insert so that callers never retain an alias
/// into map-owned storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub owner: NodeIndex,
    pub name: String,
}

impl Key {
    pub fn new(owner: NodeIndex, name: impl Into<String>) -> Self {
        Key {
            owner,
            name: name.into(),
        }
    }

    /// A key for data owned by node 0, the convention chunk keys and
    /// dataframe metadata keys both use.
    pub fn on_node_zero(name: impl Into<String>) -> Self {
        Key::new(0, name)
    }

    /// `"<column_name>:0x<chunk_idx_hex>"`, owner index 0 — the chunk key
    /// format.
    pub fn chunk_key(column_name: &str, chunk_idx: usize) -> Self {
        Key::on_node_zero(format!("{column_name}:0x{chunk_idx:x}"))
    }

    /// `owner: usize | name: c-string`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.name.len() + 1);
        self.write_to(&mut buf);
        buf
    }

    /// Appends this key's wire encoding to an existing buffer, so callers
    /// that concatenate a key with a trailing opaque tail (e.g. `Put`'s
    /// value bytes) don't need an intermediate allocation.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_usize(self.owner);
        buf.put_cstring(&self.name);
    }

    pub fn deserialize(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self::read_from(&mut r)
    }

    /// Reads a key off a cursor shared with a trailing payload, leaving the
    /// cursor positioned just past the key so the remainder can be read as
    /// an opaque tail.
    pub fn read_from(r: &mut Reader<'_>) -> Self {
        let owner = r.read_usize();
        let name = r.read_cstring();
        Key { owner, name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let k = Key::new(2, "main");
        assert_eq!(Key::deserialize(&k.serialize()), k);
    }

    #[test]
    fn double_serialize_is_idempotent() {
        let k = Key::new(0, "wc-map-1");
        let once = k.serialize();
        let twice = Key::deserialize(&once).serialize();
        assert_eq!(once, twice);
    }

    #[test]
    fn chunk_key_format() {
        let k = Key::chunk_key("vals", 255);
        assert_eq!(k.owner, 0);
        assert_eq!(k.name, "vals:0xff");
    }
}
