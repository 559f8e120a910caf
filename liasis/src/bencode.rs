//! A small, self-contained bencode codec.
//!
//! Bencoding has four value kinds: signed integers, byte strings, lists and
//! dictionaries. This module implements both directions (decode and encode)
//! without pulling in `serde`: the control protocol needs byte-exact control
//! over canonical form (sorted dictionary keys, no leading zeros) and precise
//! error offsets, which a generic `Deserialize` impl doesn't give us.

use std::collections::BTreeMap;
use std::fmt;

/// A decoded bencode value.
///
/// Dictionary keys are raw byte strings (bencode keys need not be UTF-8),
/// stored in a `BTreeMap` so that re-encoding is always canonically sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Bytes(s.as_ref().as_bytes().to_vec())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// The kind of structural violation encountered while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    UnexpectedEof,
    UnexpectedByte,
    LeadingZero,
    NegativeZero,
    EmptyInteger,
    InvalidInteger,
    InvalidLength,
    UnorderedDictKeys,
    DuplicateDictKey,
    TrailingData,
}

/// A decode failure, with the byte offset of the first offending byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub offset: usize,
}

impl DecodeError {
    fn at(kind: DecodeErrorKind, offset: usize) -> Self {
        DecodeError { kind, offset }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at offset {}", self.kind, self.offset)
    }
}

impl std::error::Error for DecodeError {}

const INT_START: u8 = b'i';
const LIST_START: u8 = b'l';
const DICT_START: u8 = b'd';
const END: u8 = b'e';
const STR_SEP: u8 = b':';

/// Cursor over the input buffer. Tracks position for error offsets.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::at(DecodeErrorKind::UnexpectedEof, self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_until(&mut self, stop: u8) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        loop {
            match self.advance() {
                Some(b) if b == stop => return Ok(&self.buf[start..self.pos - 1]),
                Some(_) => continue,
                None => return Err(DecodeError::at(DecodeErrorKind::UnexpectedEof, start)),
            }
        }
    }
}

/// Decodes the ASCII-decimal digits of `raw` into a `u64`, rejecting leading
/// zeros (except the literal `0`).
fn parse_decimal(raw: &[u8], offset: usize) -> Result<u64, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::at(DecodeErrorKind::EmptyInteger, offset));
    }
    if raw[0] == b'0' && raw.len() > 1 {
        return Err(DecodeError::at(DecodeErrorKind::LeadingZero, offset));
    }
    if !raw.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::at(DecodeErrorKind::InvalidInteger, offset));
    }
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(DecodeError::at(DecodeErrorKind::InvalidInteger, offset))
}

fn decode_int(cur: &mut Cursor<'_>) -> Result<i64, DecodeError> {
    let offset = cur.pos;
    let raw = cur.read_until(END)?;
    if raw.first() == Some(&b'-') {
        let rest = &raw[1..];
        if rest.first() == Some(&b'0') {
            return Err(DecodeError::at(DecodeErrorKind::NegativeZero, offset));
        }
        let n = parse_decimal(rest, offset)?;
        Ok(-(n as i64))
    } else {
        let n = parse_decimal(raw, offset)?;
        i64::try_from(n).map_err(|_| DecodeError::at(DecodeErrorKind::InvalidInteger, offset))
    }
}

fn decode_bytes(cur: &mut Cursor<'_>, first_digit: u8) -> Result<Vec<u8>, DecodeError> {
    let offset = cur.pos - 1;
    let mut len_raw = vec![first_digit];
    len_raw.extend_from_slice(cur.read_until(STR_SEP)?);
    let len = parse_decimal(&len_raw, offset)?;
    let len = usize::try_from(len).map_err(|_| DecodeError::at(DecodeErrorKind::InvalidLength, offset))?;
    Ok(cur.take(len)?.to_vec())
}

fn decode_list(cur: &mut Cursor<'_>) -> Result<Vec<Value>, DecodeError> {
    let mut out = Vec::new();
    loop {
        match cur.peek() {
            Some(END) => {
                cur.advance();
                return Ok(out);
            }
            Some(_) => out.push(decode_value(cur)?),
            None => return Err(DecodeError::at(DecodeErrorKind::UnexpectedEof, cur.pos)),
        }
    }
}

fn decode_dict(cur: &mut Cursor<'_>) -> Result<BTreeMap<Vec<u8>, Value>, DecodeError> {
    let mut out = BTreeMap::new();
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        let key_offset = cur.pos;
        match cur.peek() {
            Some(END) => {
                cur.advance();
                return Ok(out);
            }
            Some(b) if b.is_ascii_digit() => {
                cur.advance();
                let key = decode_bytes(cur, b)?;
                if let Some(prev) = &last_key {
                    if key == *prev {
                        return Err(DecodeError::at(DecodeErrorKind::DuplicateDictKey, key_offset));
                    }
                    if key < *prev {
                        return Err(DecodeError::at(DecodeErrorKind::UnorderedDictKeys, key_offset));
                    }
                }
                let value = decode_value(cur)?;
                last_key = Some(key.clone());
                out.insert(key, value);
            }
            Some(_) => return Err(DecodeError::at(DecodeErrorKind::UnexpectedByte, key_offset)),
            None => return Err(DecodeError::at(DecodeErrorKind::UnexpectedEof, key_offset)),
        }
    }
}

fn decode_value(cur: &mut Cursor<'_>) -> Result<Value, DecodeError> {
    let offset = cur.pos;
    match cur.advance() {
        Some(INT_START) => Ok(Value::Int(decode_int(cur)?)),
        Some(LIST_START) => Ok(Value::List(decode_list(cur)?)),
        Some(DICT_START) => Ok(Value::Dict(decode_dict(cur)?)),
        Some(b) if b.is_ascii_digit() => Ok(Value::Bytes(decode_bytes(cur, b)?)),
        Some(_) => Err(DecodeError::at(DecodeErrorKind::UnexpectedByte, offset)),
        None => Err(DecodeError::at(DecodeErrorKind::UnexpectedEof, offset)),
    }
}

/// Decodes exactly one bencode value from `buf`. Trailing bytes are an error:
/// the wire protocol never concatenates bencode values inside one frame.
pub fn decode(buf: &[u8]) -> Result<Value, DecodeError> {
    let mut cur = Cursor::new(buf);
    let value = decode_value(&mut cur)?;
    if cur.pos != buf.len() {
        return Err(DecodeError::at(DecodeErrorKind::TrailingData, cur.pos));
    }
    Ok(value)
}

/// Encodes `value` in canonical form: sorted dict keys, no redundant digits.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(n) => {
            out.push(INT_START);
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(END);
        }
        Value::Bytes(b) => {
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.push(STR_SEP);
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(LIST_START);
            for item in items {
                encode_into(item, out);
            }
            out.push(END);
        }
        Value::Dict(map) => {
            out.push(DICT_START);
            // BTreeMap already iterates in ascending byte-string order.
            for (k, v) in map {
                encode_into(&Value::Bytes(k.clone()), out);
                encode_into(v, out);
            }
            out.push(END);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integers() {
        assert_eq!(decode(b"i50e"), Ok(Value::Int(50)));
        assert_eq!(decode(b"i0e"), Ok(Value::Int(0)));
        assert_eq!(decode(b"i-42e"), Ok(Value::Int(-42)));
        assert_eq!(
            decode(b"i00e").unwrap_err().kind,
            DecodeErrorKind::LeadingZero
        );
        assert_eq!(
            decode(b"i-0e").unwrap_err().kind,
            DecodeErrorKind::NegativeZero
        );
        assert_eq!(decode(b"ie").unwrap_err().kind, DecodeErrorKind::EmptyInteger);
    }

    #[test]
    fn decodes_byte_strings() {
        assert_eq!(decode(b"4:spam"), Ok(Value::bytes(*b"spam")));
        assert_eq!(decode(b"0:"), Ok(Value::bytes(Vec::new())));
        assert_eq!(
            decode(b"5:spam").unwrap_err().kind,
            DecodeErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn decodes_lists_and_dicts() {
        assert_eq!(decode(b"le"), Ok(Value::List(vec![])));
        assert_eq!(
            decode(b"l4:spam4:eggse"),
            Ok(Value::List(vec![Value::bytes(*b"spam"), Value::bytes(*b"eggs")]))
        );

        let mut map = BTreeMap::new();
        map.insert(b"cow".to_vec(), Value::bytes(*b"moo"));
        map.insert(b"spam".to_vec(), Value::bytes(*b"eggs"));
        assert_eq!(decode(b"d3:cow3:moo4:spam4:eggse"), Ok(Value::Dict(map)));
    }

    #[test]
    fn rejects_unordered_dict_keys() {
        let err = decode(b"d4:spam4:eggs3:cow3:mooe").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnorderedDictKeys);
    }

    #[test]
    fn rejects_trailing_data() {
        let err = decode(b"i1eei2e").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TrailingData);
    }

    #[test]
    fn round_trips_canonically() {
        let mut map = BTreeMap::new();
        map.insert(b"a".to_vec(), Value::Int(1));
        map.insert(b"b".to_vec(), Value::List(vec![Value::bytes(*b"x")]));
        let v = Value::Dict(map);
        let encoded = encode(&v);
        assert_eq!(decode(&encoded).unwrap(), v);
        // re-encoding an already-canonical value is a fixed point
        assert_eq!(encode(&decode(&encoded).unwrap()), encoded);
    }

    #[test]
    fn offsets_point_at_offending_byte() {
        let err = decode(b"i5ee").unwrap_err();
        // "i5e" decodes fine, the stray trailing "e" is the offender
        assert_eq!(err.kind, DecodeErrorKind::TrailingData);
        assert_eq!(err.offset, 3);
    }
}
