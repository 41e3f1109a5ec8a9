// ============================================
// File: crates/nyxpath-core/src/protocol/bencode.rs
// ============================================
//! # Bencode Value Model
//!
//! ## Creation Reason
//! Routing messages are bencoded dictionaries keyed by single letters. The
//! codec only needs the four bencode shapes and canonical (sorted-key)
//! output so that exit signatures cover identical bytes on both ends.
//!
//! ## Wire Grammar
//! ```text
//! int   := 'i' digits 'e'          (non-negative only)
//! bytes := len ':' raw
//! list  := 'l' value* 'e'
//! dict  := 'd' (bytes value)* 'e'  (keys strictly ascending)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `decode` returns how many bytes it consumed; routing payloads arrive
//!   padded to a multiple of 128, and the padding after the top-level
//!   dictionary is ignored
//! - Nesting is capped at `MAX_DEPTH` to bound recursion on hostile input
//!
//! ## Last Modified
//! v0.1.0 - Initial bencode implementation

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Maximum list/dict nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 16;

/// Bencode dictionary with byte-string keys in canonical order.
pub type Dict = BTreeMap<Vec<u8>, Value>;

// ============================================
// Value
// ============================================

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Non-negative integer.
    Int(u64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list.
    List(Vec<Value>),
    /// Dictionary.
    Dict(Dict),
}

impl Value {
    /// Empty dictionary, ready for the `with_*` builders.
    #[must_use]
    pub fn dict() -> Self {
        Self::Dict(Dict::new())
    }

    /// Adds an integer entry (no-op on non-dicts).
    #[must_use]
    pub fn with_int(mut self, key: &str, v: u64) -> Self {
        self.insert(key, Self::Int(v));
        self
    }

    /// Adds a byte-string entry.
    #[must_use]
    pub fn with_bytes(mut self, key: &str, v: impl Into<Vec<u8>>) -> Self {
        self.insert(key, Self::Bytes(v.into()));
        self
    }

    /// Adds an arbitrary entry.
    #[must_use]
    pub fn with(mut self, key: &str, v: Self) -> Self {
        self.insert(key, v);
        self
    }

    /// Inserts into a dictionary value.
    pub fn insert(&mut self, key: &str, v: Self) {
        if let Self::Dict(d) = self {
            d.insert(key.as_bytes().to_vec(), v);
        }
    }

    /// Looks up a dictionary key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(d) => d.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Required integer field.
    ///
    /// # Errors
    /// `MissingField` if absent, `Malformed` if not an integer.
    pub fn int(&self, key: &str) -> Result<u64> {
        match self.get(key) {
            Some(Self::Int(v)) => Ok(*v),
            Some(_) => Err(CoreError::malformed(format!("field {key} is not an integer"))),
            None => Err(CoreError::missing(key)),
        }
    }

    /// Optional integer field; wrong type counts as absent.
    #[must_use]
    pub fn int_or(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(Self::Int(v)) => *v,
            _ => default,
        }
    }

    /// Required byte-string field.
    ///
    /// # Errors
    /// `MissingField` if absent, `Malformed` if not a string.
    pub fn bytes(&self, key: &str) -> Result<&[u8]> {
        match self.get(key) {
            Some(Self::Bytes(v)) => Ok(v),
            Some(_) => Err(CoreError::malformed(format!("field {key} is not a string"))),
            None => Err(CoreError::missing(key)),
        }
    }

    /// Required fixed-size byte-string field.
    ///
    /// # Errors
    /// As [`Value::bytes`], plus `Malformed` on a length mismatch.
    pub fn fixed<const N: usize>(&self, key: &str) -> Result<[u8; N]> {
        let raw = self.bytes(key)?;
        raw.try_into().map_err(|_| {
            CoreError::malformed(format!("field {key} must be {N} bytes, got {}", raw.len()))
        })
    }

    /// Required list field.
    ///
    /// # Errors
    /// `MissingField` if absent, `Malformed` if not a list.
    pub fn list(&self, key: &str) -> Result<&[Self]> {
        match self.get(key) {
            Some(Self::List(v)) => Ok(v),
            Some(_) => Err(CoreError::malformed(format!("field {key} is not a list"))),
            None => Err(CoreError::missing(key)),
        }
    }

    /// Canonical encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        self.encode_into(&mut out);
        out
    }

    /// Appends the canonical encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(v) => {
                out.push(b'i');
                out.extend_from_slice(v.to_string().as_bytes());
                out.push(b'e');
            }
            Self::Bytes(b) => encode_bytes(b, out),
            Self::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Self::Dict(d) => {
                out.push(b'd');
                for (k, v) in d {
                    encode_bytes(k, out);
                    v.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Decodes one value from the front of `buf`.
    ///
    /// Returns the value and the number of bytes consumed.
    ///
    /// # Errors
    /// `Malformed` on any grammar violation.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut parser = Parser { buf, pos: 0 };
        let value = parser.value(0)?;
        Ok((value, parser.pos))
    }
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(b);
}

// ============================================
// Parser
// ============================================

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| CoreError::malformed("unexpected end of bencode"))
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(CoreError::malformed("bencode nesting too deep"));
        }
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.number(b'e')?;
                Ok(Value::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = Dict::new();
                let mut last: Option<Vec<u8>> = None;
                while self.peek()? != b'e' {
                    let key = self.string()?;
                    if last.as_ref().is_some_and(|prev| *prev >= key) {
                        return Err(CoreError::malformed("bencode dict keys out of order"));
                    }
                    let v = self.value(depth + 1)?;
                    last = Some(key.clone());
                    dict.insert(key, v);
                }
                self.pos += 1;
                Ok(Value::Dict(dict))
            }
            b'0'..=b'9' => Ok(Value::Bytes(self.string()?)),
            other => Err(CoreError::malformed(format!(
                "unexpected bencode byte 0x{other:02x}"
            ))),
        }
    }

    /// Parses decimal digits up to `terminator` (consumed).
    fn number(&mut self, terminator: u8) -> Result<u64> {
        let start = self.pos;
        while self.peek()? != terminator {
            if !self.buf[self.pos].is_ascii_digit() {
                return Err(CoreError::malformed("invalid bencode integer"));
            }
            self.pos += 1;
        }
        let digits = &self.buf[start..self.pos];
        self.pos += 1;
        if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
            return Err(CoreError::malformed("non-canonical bencode integer"));
        }
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoreError::malformed("bencode integer overflow"))
    }

    fn string(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.number(b':')?)
            .map_err(|_| CoreError::malformed("bencode string too long"))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CoreError::malformed("bencode string overruns buffer"))?;
        let out = self.buf[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_canonical() {
        let v = Value::dict().with_int("V", 0).with_bytes("A", "L").with_int("S", 3);
        // Keys sorted regardless of insertion order
        assert_eq!(v.encode(), b"d1:A1:L1:Si3e1:Vi0ee");
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let mut buf = b"d1:A1:D1:Si0ee".to_vec();
        let encoded_len = buf.len();
        buf.extend_from_slice(&[0xAA; 117]);

        let (v, used) = Value::decode(&buf).unwrap();
        assert_eq!(used, encoded_len);
        assert_eq!(v.bytes("A").unwrap(), b"D");
        assert_eq!(v.int("S").unwrap(), 0);
    }

    #[test]
    fn test_decode_rejects_negative_and_leading_zero() {
        assert!(Value::decode(b"i-1e").is_err());
        assert!(Value::decode(b"i01e").is_err());
        assert!(Value::decode(b"ie").is_err());
        assert_eq!(Value::decode(b"i0e").unwrap().0, Value::Int(0));
    }

    #[test]
    fn test_decode_rejects_truncated_and_unsorted() {
        assert!(Value::decode(b"5:abc").is_err());
        assert!(Value::decode(b"d1:Bi1e1:Ai2ee").is_err());
        assert!(Value::decode(b"l").is_err());
    }

    #[test]
    fn test_decode_depth_limit() {
        let mut deep = vec![b'l'; MAX_DEPTH + 2];
        deep.extend(vec![b'e'; MAX_DEPTH + 2]);
        assert!(Value::decode(&deep).is_err());
    }

    #[test]
    fn test_field_accessors() {
        let v = Value::dict()
            .with_bytes("P", [1u8; 16].to_vec())
            .with(
                "X",
                Value::List(vec![Value::Bytes(b"a".to_vec()), Value::Bytes(b"b".to_vec())]),
            );
        assert_eq!(v.fixed::<16>("P").unwrap(), [1u8; 16]);
        assert!(v.fixed::<24>("P").is_err());
        assert_eq!(v.list("X").unwrap().len(), 2);
        assert!(matches!(v.int("T"), Err(CoreError::MissingField { .. })));
        assert_eq!(v.int_or("T", 7), 7);
    }
}
