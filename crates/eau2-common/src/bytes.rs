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

//! Primitive byte-level encoding shared by the wire protocol and every
//! `serialize`/`deserialize` pair in the key/value and dataframe layers.
//!
//! Every node in a cluster is assumed homogeneous (see the design's
//! cross-platform non-goal), so these helpers use the host's native
//! little-endian `usize`/`u64` width rather than a portable varint scheme.

/// A cursor over an immutable byte slice, used to deserialize the fixed
/// little-endian layouts described throughout the wire format.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The cursor's current byte offset, useful when a payload concatenates
    /// a self-delimiting prefix (e.g. a serialized `Key`) with a trailing
    /// opaque tail (e.g. a `Put`'s value bytes).
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> u8 {
        let b = self.buf[self.pos];
        self.pos += 1;
        b
    }

    pub fn read_usize(&mut self) -> usize {
        let bytes: [u8; 8] = self.buf[self.pos..self.pos + 8].try_into().unwrap();
        self.pos += 8;
        u64::from_le_bytes(bytes) as usize
    }

    pub fn read_u16(&mut self) -> u16 {
        let bytes: [u8; 2] = self.buf[self.pos..self.pos + 2].try_into().unwrap();
        self.pos += 2;
        u16::from_le_bytes(bytes)
    }

    pub fn read_i32(&mut self) -> i32 {
        let bytes: [u8; 4] = self.buf[self.pos..self.pos + 4].try_into().unwrap();
        self.pos += 4;
        i32::from_le_bytes(bytes)
    }

    pub fn read_f64(&mut self) -> f64 {
        let bytes: [u8; 8] = self.buf[self.pos..self.pos + 8].try_into().unwrap();
        self.pos += 8;
        f64::from_le_bytes(bytes)
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_bytes(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    /// Reads a null-terminated string, per the key/column serialization
    /// formats (`name: c-string`).
    pub fn read_cstring(&mut self) -> String {
        let start = self.pos;
        while self.buf[self.pos] != 0 {
            self.pos += 1;
        }
        let s = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
        self.pos += 1; // skip the null terminator
        s
    }
}

/// Appends the fixed little-endian encodings used by the wire format to a
/// growable byte buffer.
pub trait BufMutExt {
    fn put_u8_byte(&mut self, v: u8);
    fn put_usize(&mut self, v: usize);
    fn put_u16(&mut self, v: u16);
    fn put_i32(&mut self, v: i32);
    fn put_f64(&mut self, v: f64);
    fn put_bool(&mut self, v: bool);
    fn put_cstring(&mut self, s: &str);
}

impl BufMutExt for Vec<u8> {
    fn put_u8_byte(&mut self, v: u8) {
        self.push(v);
    }

    fn put_usize(&mut self, v: usize) {
        self.extend_from_slice(&(v as u64).to_le_bytes());
    }

    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bool(&mut self, v: bool) {
        self.push(v as u8);
    }

    fn put_cstring(&mut self, s: &str) {
        self.extend_from_slice(s.as_bytes());
        self.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_primitives() {
        let mut buf = Vec::new();
        buf.put_u8_byte(7);
        buf.put_usize(1234);
        buf.put_f64(3.25);
        buf.put_bool(true);
        buf.put_cstring("hello");

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u8(), 7);
        assert_eq!(r.read_usize(), 1234);
        assert_eq!(r.read_f64(), 3.25);
        assert!(r.read_bool());
        assert_eq!(r.read_cstring(), "hello");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn cstring_handles_empty_string() {
        let mut buf = Vec::new();
        buf.put_cstring("");
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_cstring(), "");
    }
}
