//! FNV-1a hashing for computed indexes.

use crate::error::CodecResult;
use crate::ordered::encode_value_sort_key;
use crate::value::ValueData;

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 64-bit FNV-1a.
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

/// 32-bit FNV-1a.
#[must_use]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Bytes a value contributes to a computed-index hash.
///
/// Strings hash as UTF-8 and bytes as themselves, so a client can compute
/// `fnv1a_64(name.as_bytes())` without knowing the encoding. Other types
/// hash their sortable encoding.
pub fn index_bytes(data: &ValueData) -> CodecResult<Vec<u8>> {
    match data {
        ValueData::String(s) => Ok(s.as_bytes().to_vec()),
        ValueData::Bytes(b) => Ok(b.clone()),
        other => encode_value_sort_key(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv64_reference_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"hello"), 0xa430_d846_80aa_bd0b);
    }

    #[test]
    fn fnv32_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn strings_hash_as_utf8() {
        let bytes = index_bytes(&ValueData::String("hello".into())).unwrap();
        assert_eq!(fnv1a_64(&bytes), fnv1a_64(b"hello"));
    }
}
