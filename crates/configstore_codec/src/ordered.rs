//! Order-preserving byte encodings.
//!
//! `encode_key(a) < encode_key(b)` bytewise exactly when `a < b` under the
//! key ordering. Layout:
//!
//! ```text
//! key      := string(namespace) element* 0x01
//! element  := 0x02 string(kind) (0x01 be64(id ^ 1<<63) | 0x02 string(name))
//! string   := (byte | 0x00 0xFF)* 0x00 0x01
//! ```
//!
//! The same primitives give a sortable encoding of scalar values, used as
//! field-index keys.

use crate::error::{CodecError, CodecResult};
use crate::key::{Key, PartitionId, PathElement, PathId};
use crate::value::{Timestamp, ValueData, ValueType};

const PATH_END: u8 = 0x01;
const ELEMENT_START: u8 = 0x02;
const TAG_ID: u8 = 0x01;
const TAG_NAME: u8 = 0x02;
const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const STRING_END: u8 = 0x01;
const SIGN_BIT: u64 = 1 << 63;

/// Encodes a complete key into its order-preserving form.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the path is empty or any element is
/// incomplete.
pub fn encode_key(key: &Key) -> CodecResult<Vec<u8>> {
    let mut encoder = OrderedEncoder::new();
    encoder.write_key(key)?;
    Ok(encoder.finish())
}

/// Decodes bytes produced by [`encode_key`].
///
/// # Errors
///
/// Fails on truncated input, unknown markers, invalid UTF-8 or trailing bytes.
pub fn decode_key(bytes: &[u8]) -> CodecResult<Key> {
    let mut decoder = OrderedDecoder::new(bytes);
    let key = decoder.read_key()?;
    if !decoder.is_empty() {
        return Err(CodecError::decoding_failed("trailing bytes after key"));
    }
    Ok(key)
}

/// Encodes a scalar value so that byte order follows value order within a type.
///
/// # Errors
///
/// Fails only for an incomplete key reference.
pub fn encode_value_sort_key(data: &ValueData) -> CodecResult<Vec<u8>> {
    let mut encoder = OrderedEncoder::new();
    encoder.write_value(data)?;
    Ok(encoder.finish())
}

/// Builder for order-preserving encodings.
#[derive(Debug, Default)]
pub struct OrderedEncoder {
    buf: Vec<u8>,
}

impl OrderedEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Appends an escaped, terminated string.
    pub fn write_bytes_escaped(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == ESCAPE {
                self.buf.push(ESCAPE);
                self.buf.push(ESCAPED_ZERO);
            } else {
                self.buf.push(b);
            }
        }
        self.buf.push(ESCAPE);
        self.buf.push(STRING_END);
    }

    /// Appends a signed integer as sign-flipped big-endian.
    pub fn write_i64(&mut self, v: i64) {
        self.buf
            .extend_from_slice(&((v as u64) ^ SIGN_BIT).to_be_bytes());
    }

    /// Appends an unsigned integer big-endian.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a key.
    pub fn write_key(&mut self, key: &Key) -> CodecResult<()> {
        if key.path.is_empty() {
            return Err(CodecError::invalid_key("key path must not be empty"));
        }
        self.write_bytes_escaped(key.partition_id.namespace.as_bytes());
        for element in &key.path {
            self.buf.push(ELEMENT_START);
            self.write_bytes_escaped(element.kind.as_bytes());
            match &element.id {
                Some(PathId::Id(id)) => {
                    self.buf.push(TAG_ID);
                    self.write_i64(*id);
                }
                Some(PathId::Name(name)) => {
                    self.buf.push(TAG_NAME);
                    self.write_bytes_escaped(name.as_bytes());
                }
                None => {
                    return Err(CodecError::invalid_key(format!(
                        "incomplete path element of kind {}",
                        element.kind
                    )));
                }
            }
        }
        self.buf.push(PATH_END);
        Ok(())
    }

    /// Appends a type-tagged scalar value.
    pub fn write_value(&mut self, data: &ValueData) -> CodecResult<()> {
        self.buf.push(data.value_type().code());
        match data {
            ValueData::Double(v) => {
                let bits = v.to_bits();
                let ordered = if bits & SIGN_BIT != 0 {
                    !bits
                } else {
                    bits ^ SIGN_BIT
                };
                self.write_u64(ordered);
            }
            ValueData::Int64(v) => self.write_i64(*v),
            ValueData::Uint64(v) => self.write_u64(*v),
            ValueData::String(s) => self.write_bytes_escaped(s.as_bytes()),
            ValueData::Bytes(b) => self.write_bytes_escaped(b),
            ValueData::Boolean(b) => self.buf.push(u8::from(*b)),
            ValueData::Timestamp(Timestamp { seconds, nanos }) => {
                self.write_i64(*seconds);
                self.buf
                    .extend_from_slice(&((*nanos as u32) ^ (1 << 31)).to_be_bytes());
            }
            ValueData::Key(None) => self.buf.push(0),
            ValueData::Key(Some(key)) => {
                self.buf.push(1);
                self.write_key(key)?;
            }
        }
        Ok(())
    }
}

/// Reader for [`OrderedEncoder`] output.
pub struct OrderedDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> OrderedDecoder<'a> {
    /// Creates a decoder over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns true if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let b = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let end = self.pos.checked_add(N).ok_or(CodecError::UnexpectedEof)?;
        let slice = self.data.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    /// Reads an escaped, terminated byte string.
    pub fn read_bytes_escaped(&mut self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = self.read_byte()?;
            if b != ESCAPE {
                out.push(b);
                continue;
            }
            match self.read_byte()? {
                ESCAPED_ZERO => out.push(0),
                STRING_END => return Ok(out),
                other => {
                    return Err(CodecError::decoding_failed(format!(
                        "invalid escape byte 0x{other:02x}"
                    )))
                }
            }
        }
    }

    fn read_string(&mut self) -> CodecResult<String> {
        String::from_utf8(self.read_bytes_escaped()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a sign-flipped big-endian integer.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        Ok((u64::from_be_bytes(self.read_array()?) ^ SIGN_BIT) as i64)
    }

    /// Reads a key.
    pub fn read_key(&mut self) -> CodecResult<Key> {
        let namespace = self.read_string()?;
        let mut path = Vec::new();
        loop {
            match self.read_byte()? {
                PATH_END => break,
                ELEMENT_START => {
                    let kind = self.read_string()?;
                    let id = match self.read_byte()? {
                        TAG_ID => PathId::Id(self.read_i64()?),
                        TAG_NAME => PathId::Name(self.read_string()?),
                        other => {
                            return Err(CodecError::decoding_failed(format!(
                                "invalid path id tag 0x{other:02x}"
                            )))
                        }
                    };
                    path.push(PathElement { kind, id: Some(id) });
                }
                other => {
                    return Err(CodecError::decoding_failed(format!(
                        "invalid path marker 0x{other:02x}"
                    )))
                }
            }
        }
        Key::new(PartitionId::new(namespace), path)
    }

    /// Reads a type-tagged scalar value.
    pub fn read_value(&mut self) -> CodecResult<ValueData> {
        let code = self.read_byte()?;
        let value_type = ValueType::from_code(code)
            .ok_or_else(|| CodecError::decoding_failed(format!("unknown value type {code}")))?;
        Ok(match value_type {
            ValueType::Double => {
                let ordered = u64::from_be_bytes(self.read_array()?);
                let bits = if ordered & SIGN_BIT != 0 {
                    ordered ^ SIGN_BIT
                } else {
                    !ordered
                };
                ValueData::Double(f64::from_bits(bits))
            }
            ValueType::Int64 => ValueData::Int64(self.read_i64()?),
            ValueType::Uint64 => ValueData::Uint64(u64::from_be_bytes(self.read_array()?)),
            ValueType::String => ValueData::String(self.read_string()?),
            ValueType::Bytes => ValueData::Bytes(self.read_bytes_escaped()?),
            ValueType::Boolean => ValueData::Boolean(self.read_byte()? != 0),
            ValueType::Timestamp => {
                let seconds = self.read_i64()?;
                let nanos = (u32::from_be_bytes(self.read_array()?) ^ (1 << 31)) as i32;
                ValueData::Timestamp(Timestamp { seconds, nanos })
            }
            ValueType::Key => match self.read_byte()? {
                0 => ValueData::Key(None),
                _ => ValueData::Key(Some(Box::new(self.read_key()?))),
            },
            ValueType::Unknown => {
                return Err(CodecError::decoding_failed("value of unknown type"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn path_id() -> impl Strategy<Value = PathId> {
        prop_oneof![
            any::<i64>().prop_map(PathId::Id),
            "[a-c\\x00]{0,4}".prop_map(PathId::Name),
        ]
    }

    fn key_strategy() -> impl Strategy<Value = Key> {
        (
            "[ab\\x00]{0,3}",
            prop::collection::vec(("[A-C\\x00]{1,3}", path_id()), 1..4),
        )
            .prop_map(|(ns, path)| Key {
                partition_id: PartitionId::new(ns),
                path: path
                    .into_iter()
                    .map(|(kind, id)| PathElement { kind, id: Some(id) })
                    .collect(),
            })
    }

    proptest! {
        #[test]
        fn key_roundtrip(key in key_strategy()) {
            let bytes = encode_key(&key).unwrap();
            prop_assert_eq!(decode_key(&bytes).unwrap(), key);
        }

        #[test]
        fn encoding_preserves_order(a in key_strategy(), b in key_strategy()) {
            let ea = encode_key(&a).unwrap();
            let eb = encode_key(&b).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn int_sort_keys_preserve_order(a in any::<i64>(), b in any::<i64>()) {
            let ea = encode_value_sort_key(&ValueData::Int64(a)).unwrap();
            let eb = encode_value_sort_key(&ValueData::Int64(b)).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn double_sort_keys_preserve_order(a in -1e12f64..1e12, b in -1e12f64..1e12) {
            let (a, b) = (a + 0.0, b + 0.0);
            let ea = encode_value_sort_key(&ValueData::Double(a)).unwrap();
            let eb = encode_value_sort_key(&ValueData::Double(b)).unwrap();
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ea.cmp(&eb));
        }
    }

    #[test]
    fn incomplete_key_not_encodable() {
        let key = Key::top_level(PartitionId::default(), PathElement::incomplete("User"));
        assert!(matches!(
            encode_key(&key),
            Err(CodecError::InvalidKey { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let key = Key::top_level(PartitionId::default(), PathElement::with_id("User", 1));
        let mut bytes = encode_key(&key).unwrap();
        bytes.push(0x00);
        assert!(decode_key(&bytes).is_err());
    }

    #[test]
    fn truncated_rejected() {
        let key = Key::top_level(PartitionId::default(), PathElement::with_name("User", "bob"));
        let bytes = encode_key(&key).unwrap();
        for len in 0..bytes.len() {
            assert!(decode_key(&bytes[..len]).is_err(), "prefix {len} decoded");
        }
    }

    #[test]
    fn value_sort_key_roundtrip() {
        let key = Key::top_level(PartitionId::new("ns"), PathElement::with_id("User", -4));
        let values = vec![
            ValueData::Double(-2.5),
            ValueData::Int64(i64::MIN),
            ValueData::Uint64(u64::MAX),
            ValueData::String("a\u{0}b".into()),
            ValueData::Bytes(vec![0, 255, 0]),
            ValueData::Boolean(true),
            ValueData::Timestamp(Timestamp::new(-1, 5)),
            ValueData::Key(None),
            ValueData::Key(Some(Box::new(key))),
        ];
        for value in values {
            let bytes = encode_value_sort_key(&value).unwrap();
            let mut decoder = OrderedDecoder::new(&bytes);
            assert_eq!(decoder.read_value().unwrap(), value);
            assert!(decoder.is_empty());
        }
    }
}
