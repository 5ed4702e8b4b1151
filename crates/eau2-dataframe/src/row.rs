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

//! The row-at-a-time visitor protocol: [`Row`] carries one row's worth of
//! typed fields; [`Fielder`] is visited field-by-field; [`Rower`] is
//! visited row-by-row by `map`/`pmap`/`filter`; [`Writer`]/[`Reader`]
//! produce and consume rows for bulk construction.
//!
//! The original design realizes this with a `Box`/`BoolBox`/`IntBox`/
//! `DoubleBox`/`StringBox` class tower to hold one untyped field. Per the
//! redesign notes, a [`FieldValue`] sum type replaces the tower, and
//! `Fielder`/`Rower`/`Writer`/`Reader` are plain `dyn`-compatible traits
//! rather than a virtual hierarchy.

use crate::column::FieldValue;
use crate::schema::{ColumnType, Schema};

/// A single row, populated according to a schema. Dataframes reuse one
/// `Row` across a whole traversal — like the original, a `Row` is "on loan"
/// to a `Rower`'s `accept` call and shouldn't be retained past it.
#[derive(Debug, Clone)]
pub struct Row {
    schema: Schema,
    idx: usize,
    data: Vec<Option<FieldValue>>,
}

impl Row {
    pub fn new(schema: Schema) -> Self {
        let width = schema.width();
        Row {
            schema,
            idx: 0,
            data: vec![None; width],
        }
    }

    pub fn width(&self) -> usize {
        self.schema.width()
    }

    pub fn col_type(&self, idx: usize) -> ColumnType {
        self.schema.col_type(idx)
    }

    pub fn set_idx(&mut self, idx: usize) {
        self.idx = idx;
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Sets column `col`. Setting a column with a value of the wrong type
    /// for the schema is fatal, per the design's error taxonomy.
    pub fn set(&mut self, col: usize, value: FieldValue) {
        assert!(col < self.width(), "fatal: Row::set column {col} out of bounds");
        assert_eq!(
            value.column_type(),
            self.schema.col_type(col),
            "fatal: Row::set type mismatch at column {col}"
        );
        self.data[col] = Some(value);
    }

    pub fn set_bool(&mut self, col: usize, v: bool) {
        self.set(col, FieldValue::Bool(v));
    }

    pub fn set_int(&mut self, col: usize, v: i32) {
        self.set(col, FieldValue::Int(v));
    }

    pub fn set_double(&mut self, col: usize, v: f64) {
        self.set(col, FieldValue::Double(v));
    }

    pub fn set_string(&mut self, col: usize, v: impl Into<String>) {
        self.set(col, FieldValue::String(v.into()));
    }

    fn get(&self, col: usize) -> &FieldValue {
        assert!(col < self.width(), "fatal: Row::get column {col} out of bounds");
        self.data[col]
            .as_ref()
            .unwrap_or_else(|| panic!("fatal: Row::get column {col} has not been set"))
    }

    /// A clone of the raw field value at `col`, used by `DataFrame::add_row`
    /// to dispatch each field to its column's `push` without knowing the
    /// concrete type ahead of time.
    pub(crate) fn field(&self, col: usize) -> FieldValue {
        self.get(col).clone()
    }

    pub fn get_bool(&self, col: usize) -> bool {
        self.get(col).as_bool()
    }

    pub fn get_int(&self, col: usize) -> i32 {
        self.get(col).as_int()
    }

    pub fn get_double(&self, col: usize) -> f64 {
        self.get(col).as_double()
    }

    pub fn get_string(&self, col: usize) -> &str {
        self.get(col).as_string()
    }

    /// Visits every field of this row in schema order, bracketed by
    /// `start`/`done` on the fielder.
    pub fn visit(&self, idx: usize, fielder: &mut dyn Fielder) {
        fielder.start(idx);
        for i in 0..self.width() {
            match self.get(i) {
                FieldValue::Bool(b) => fielder.accept_bool(*b),
                FieldValue::Int(v) => fielder.accept_int(*v),
                FieldValue::Double(v) => fielder.accept_double(*v),
                FieldValue::String(s) => fielder.accept_string(s),
            }
        }
        fielder.done();
    }
}

/// A field visitor invoked once per field by [`Row::visit`].
pub trait Fielder {
    /// Called before visiting a row, with the row's offset in the
    /// dataframe.
    fn start(&mut self, _row_idx: usize) {}
    fn accept_bool(&mut self, _v: bool) {}
    fn accept_int(&mut self, _v: i32) {}
    fn accept_double(&mut self, _v: f64) {}
    fn accept_string(&mut self, _v: &str) {}
    /// Called once all fields have been visited.
    fn done(&mut self) {}
}

/// A row-at-a-time visitor used by `map`/`local_map`/`pmap`/`filter`.
/// `accept` returns `true` to keep the row during a `filter`.
///
/// Rowers are cloned for `pmap` (one clone per worker band) and folded back
/// together with `join_delete`, mirroring the original's clone/join
/// contract; the clone is what makes `Send` necessary here, since each
/// clone's band runs as its own concurrently-polled future. `Any` lets a
/// `join_delete` override downcast `other` back to its own concrete type,
/// which is the only way to read another band's private fields when they
/// aren't already shared through something like `Arc<Mutex<_>>`.
pub trait Rower: Send + std::any::Any {
    fn accept(&mut self, row: &Row) -> bool;

    /// Clones this rower for a `pmap` worker band. Returns `None` if this
    /// rower can't meaningfully run in parallel (falls back to a serial
    /// `map`).
    fn clone_rower(&self) -> Box<dyn Rower>;

    /// Folds a worker band's rower (already done running) into `self`,
    /// which is always the last rower to receive a `join_delete` call.
    fn join_delete(&mut self, _other: Box<dyn Rower>) {}
}

/// Produces rows to bulk-populate a new dataframe (`DataFrame::from_visitor`).
/// `visit` fills the next row; `done` reports whether the writer is
/// exhausted.
pub trait Writer {
    fn visit(&mut self, row: &mut Row);
    fn done(&self) -> bool;
}

/// Consumes rows one at a time, without the keep/discard semantics of
/// [`Rower`] — the read side of the visitor protocol named in the design's
/// glossary.
pub trait Reader: Send {
    fn accept(&mut self, row: &Row);
}
