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

//! A dataframe's schema: an ordered sequence of column types plus the
//! dataframe's row count.

use eau2_common::bytes::{BufMutExt, Reader};

/// The closed set of column element types this system understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Double,
    String,
}

impl ColumnType {
    fn to_u8(self) -> u8 {
        match self {
            ColumnType::Bool => b'B',
            ColumnType::Int => b'I',
            ColumnType::Double => b'D',
            ColumnType::String => b'S',
        }
    }

    fn from_u8(tag: u8) -> Self {
        match tag {
            b'B' => ColumnType::Bool,
            b'I' => ColumnType::Int,
            b'D' => ColumnType::Double,
            b'S' => ColumnType::String,
            other => panic!("fatal: unknown column type tag {other:?}"),
        }
    }

    /// Promotion order for type inference: `Bool < Int < Double < String`.
    pub fn rank(self) -> u8 {
        match self {
            ColumnType::Bool => 0,
            ColumnType::Int => 1,
            ColumnType::Double => 2,
            ColumnType::String => 3,
        }
    }
}

/// A schema string like `"IDS"` parses to `[Int, Double, String]` —
/// convenient for `from_scalar`/`from_array` single-column construction and
/// for tests.
impl From<char> for ColumnType {
    fn from(c: char) -> Self {
        ColumnType::from_u8(c as u8)
    }
}

/// Ordered column types plus a row count. Schemas are immutable after a
/// dataframe is first published — `add_column`/`add_row` only ever extend,
/// never mutate in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    types: Vec<ColumnType>,
    nrows: usize,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn from_types(types: impl IntoIterator<Item = ColumnType>) -> Self {
        Schema {
            types: types.into_iter().collect(),
            nrows: 0,
        }
    }

    /// Parses a type-tag string such as `"BIDS"`.
    pub fn from_str(types: &str) -> Self {
        Schema::from_types(types.chars().map(ColumnType::from))
    }

    pub fn add_column(&mut self, ty: ColumnType) {
        self.types.push(ty);
    }

    pub fn add_row(&mut self) {
        self.nrows += 1;
    }

    pub fn col_type(&self, idx: usize) -> ColumnType {
        self.types[idx]
    }

    pub fn width(&self) -> usize {
        self.types.len()
    }

    pub fn length(&self) -> usize {
        self.nrows
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    /// `n_cols: usize | n_rows: usize | types: [u8; n_cols]`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.types.len());
        buf.put_usize(self.types.len());
        buf.put_usize(self.nrows);
        for ty in &self.types {
            buf.put_u8_byte(ty.to_u8());
        }
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        let n_cols = r.read_usize();
        let nrows = r.read_usize();
        let types = (0..n_cols).map(|_| ColumnType::from_u8(r.read_u8())).collect();
        Schema { types, nrows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut s = Schema::from_str("BIDS");
        s.add_row();
        s.add_row();
        let bytes = s.serialize();
        assert_eq!(Schema::deserialize(&bytes), s);
    }

    #[test]
    fn double_serialize_is_idempotent() {
        let s = Schema::from_str("I");
        let once = s.serialize();
        let twice = Schema::deserialize(&once).serialize();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_schema_round_trips() {
        let s = Schema::new();
        assert_eq!(Schema::deserialize(&s.serialize()), s);
    }

    #[test]
    fn rank_orders_by_promotion() {
        assert!(ColumnType::Bool.rank() < ColumnType::Int.rank());
        assert!(ColumnType::Int.rank() < ColumnType::Double.rank());
        assert!(ColumnType::Double.rank() < ColumnType::String.rank());
    }
}
