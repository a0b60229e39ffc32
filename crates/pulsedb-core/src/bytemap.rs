//! Immutable, self-describing string-keyed maps
//!
//! A [`ByteMap`] carries both the dimensions and the values of a point. The
//! encoding is a flat sequence of entries sorted by key:
//!
//! ```text
//! ┌──────────┬───────┬───────┬─────────┐
//! │ key len  │ key   │ tag   │ payload │
//! │ (2, BE)  │ (N)   │ (1)   │ (...)   │
//! └──────────┴───────┴───────┴─────────┘
//! ```
//!
//! Bool/int/float payloads are fixed width; str/bytes payloads carry a u16
//! length prefix. Equality, ordering and hashing are all over the raw bytes,
//! so two maps built from the same pairs are byte-identical.

use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A primitive ByteMap entry payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
}

impl Value {
    /// Numeric view, for aggregate updates and comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical `tag ‖ payload` bytes. Stable across builds, so it is safe
    /// to use for hashing (partitioning) and set membership (sub-queries).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9);
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Bool(v) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*v));
            }
            Value::Int(v) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float(v) => {
                buf.push(TAG_FLOAT);
                buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Str(v) => {
                buf.push(TAG_STR);
                buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            Value::Bytes(v) => {
                buf.push(TAG_BYTES);
                buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
                buf.extend_from_slice(v);
            }
        }
    }

    /// Decode one value starting at `data`, returning it and the rest.
    fn decode(data: &[u8]) -> Result<(Value, &[u8])> {
        let (&tag, rest) = data.split_first().ok_or(Error::Truncated { needed: 1, had: 0 })?;
        match tag {
            TAG_BOOL => {
                let (&raw, rest) =
                    rest.split_first().ok_or(Error::Truncated { needed: 1, had: 0 })?;
                Ok((Value::Bool(raw != 0), rest))
            }
            TAG_INT => {
                let raw = take(rest, 8)?;
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                Ok((Value::Int(i64::from_be_bytes(b)), &rest[8..]))
            }
            TAG_FLOAT => {
                let raw = take(rest, 8)?;
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                Ok((Value::Float(f64::from_bits(u64::from_be_bytes(b))), &rest[8..]))
            }
            TAG_STR => {
                let (payload, rest) = take_prefixed(rest)?;
                let s = std::str::from_utf8(payload).map_err(|_| Error::InvalidKey)?;
                Ok((Value::Str(s.to_string()), rest))
            }
            TAG_BYTES => {
                let (payload, rest) = take_prefixed(rest)?;
                Ok((Value::Bytes(Bytes::copy_from_slice(payload)), rest))
            }
            other => Err(Error::InvalidTag(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{v:?}"),
        }
    }
}

fn take(data: &[u8], n: usize) -> Result<&[u8]> {
    if data.len() < n {
        return Err(Error::Truncated { needed: n, had: data.len() });
    }
    Ok(&data[..n])
}

fn take_prefixed(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let raw = take(data, 2)?;
    let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let rest = &data[2..];
    let payload = take(rest, len)?;
    Ok((payload, &rest[len..]))
}

// ---------------------------------------------------------------------------
// ByteMap
// ---------------------------------------------------------------------------

/// An immutable encoded map. Cheap to clone; equality is byte-equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteMap(Bytes);

impl ByteMap {
    /// Build from arbitrary pairs; entries are sorted by key first.
    pub fn new(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut pairs: Vec<(String, Value)> = pairs.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_sorted(pairs.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Build from pairs already sorted by key. The order is trusted and
    /// preserved verbatim.
    pub fn from_sorted_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let pairs: Vec<(&str, Value)> = pairs.into_iter().collect();
        Self::from_sorted(pairs.iter().map(|(k, v)| (*k, v)))
    }

    fn from_sorted<'a>(pairs: impl Iterator<Item = (&'a str, &'a Value)>) -> Self {
        let mut buf = Vec::new();
        for (key, value) in pairs {
            buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
            buf.extend_from_slice(key.as_bytes());
            value.encode_into(&mut buf);
        }
        ByteMap(Bytes::from(buf))
    }

    pub fn empty() -> Self {
        ByteMap(Bytes::new())
    }

    /// Wrap already-encoded bytes. No validation happens here; iteration
    /// stops at the first malformed entry.
    pub fn from_bytes(data: Bytes) -> Self {
        ByteMap(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Linear-scan point lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Iterate entries in stored (key-sorted) order.
    pub fn entries(&self) -> Entries<'_> {
        Entries { rest: &self.0 }
    }
}

/// Iterator over ByteMap entries. Stops at the first malformed entry.
pub struct Entries<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Entries<'a> {
    type Item = (&'a str, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let raw = take(self.rest, 2).ok()?;
        let key_len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        let after_len = &self.rest[2..];
        let key_raw = take(after_len, key_len).ok()?;
        let key = std::str::from_utf8(key_raw).ok()?;
        let (value, rest) = Value::decode(&after_len[key_len..]).ok()?;
        self.rest = rest;
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ByteMap {
        ByteMap::new(vec![
            ("region".to_string(), Value::Str("eu".to_string())),
            ("host".to_string(), Value::Str("web-1".to_string())),
            ("port".to_string(), Value::Int(443)),
        ])
    }

    // ---------------------------------------------------------------
    // Construction + lookup
    // ---------------------------------------------------------------

    #[test]
    fn test_new_sorts_by_key() {
        let map = sample();
        let keys: Vec<&str> = map.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["host", "port", "region"]);
    }

    #[test]
    fn test_get() {
        let bm = sample();
        assert_eq!(bm.get("port"), Some(Value::Int(443)));
        assert_eq!(bm.get("host"), Some(Value::Str("web-1".to_string())));
        assert_eq!(bm.get("missing"), None);
    }

    #[test]
    fn test_empty() {
        let bm = ByteMap::empty();
        assert!(bm.is_empty());
        assert_eq!(bm.entries().count(), 0);
        assert_eq!(bm.get("x"), None);
    }

    #[test]
    fn test_all_value_kinds_roundtrip() {
        let bm = ByteMap::new(vec![
            ("b".to_string(), Value::Bool(true)),
            ("i".to_string(), Value::Int(-7)),
            ("f".to_string(), Value::Float(2.5)),
            ("s".to_string(), Value::Str("hi".to_string())),
            ("r".to_string(), Value::Bytes(Bytes::from_static(&[0, 255]))),
        ]);
        assert_eq!(bm.get("b"), Some(Value::Bool(true)));
        assert_eq!(bm.get("i"), Some(Value::Int(-7)));
        assert_eq!(bm.get("f"), Some(Value::Float(2.5)));
        assert_eq!(bm.get("s"), Some(Value::Str("hi".to_string())));
        assert_eq!(bm.get("r"), Some(Value::Bytes(Bytes::from_static(&[0, 255]))));
    }

    // ---------------------------------------------------------------
    // Byte equality
    // ---------------------------------------------------------------

    #[test]
    fn test_equality_is_byte_equality() {
        let a = ByteMap::new(vec![
            ("x".to_string(), Value::Int(1)),
            ("y".to_string(), Value::Int(2)),
        ]);
        let b = ByteMap::new(vec![
            ("y".to_string(), Value::Int(2)),
            ("x".to_string(), Value::Int(1)),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_inequality() {
        let a = ByteMap::new(vec![("x".to_string(), Value::Int(1))]);
        let b = ByteMap::new(vec![("x".to_string(), Value::Int(2))]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_bytes_preserves_encoding() {
        let a = sample();
        let b = ByteMap::from_bytes(Bytes::copy_from_slice(a.as_bytes()));
        assert_eq!(a, b);
    }

    // ---------------------------------------------------------------
    // from_sorted_pairs
    // ---------------------------------------------------------------

    #[test]
    fn test_from_sorted_pairs_trusts_order() {
        let bm = ByteMap::from_sorted_pairs(vec![
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
        ]);
        let keys: Vec<&str> = bm.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_from_sorted_pairs_matches_new() {
        let a = ByteMap::from_sorted_pairs(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let b = ByteMap::new(vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(1)),
        ]);
        assert_eq!(a, b);
    }

    // ---------------------------------------------------------------
    // Value helpers
    // ---------------------------------------------------------------

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Str("x".to_string()).as_f64(), None);
        assert_eq!(Value::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_canonical_bytes_distinguish_types() {
        // Int 1 and Float 1.0 must not collide in sub-query result sets.
        assert_ne!(Value::Int(1).canonical_bytes(), Value::Float(1.0).canonical_bytes());
        assert_eq!(Value::Int(1).canonical_bytes(), Value::Int(1).canonical_bytes());
    }

    #[test]
    fn test_malformed_entries_stop_iteration() {
        let bm = ByteMap::from_bytes(Bytes::from_static(&[0, 5, b'x']));
        assert_eq!(bm.entries().count(), 0);
    }
}
