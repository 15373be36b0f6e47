//! Key hashing and comparison shared by the hash table, the shared row index and sorting.
//!
//! - Rolling polynomial `h = h*9 + byte` over key bytes: fast, stable across platforms,
//!   NOT adversarially safe.
//! - Bucket index = старшие биты мультипликативного хэша (downshift + mask).
//! - key_compare — полное упорядочивание (не только равенство), используется и как общий
//!   строковый компаратор.

use std::cmp::Ordering;
use std::fmt;

use crate::consts::HASH_RANDOM_MULT;

/// Kind of key hash. Stored in the share header so readers and writer agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// result = result * 9 + byte (wrapping u32).
    Poly9 = 1,
}

impl HashKind {
    pub fn to_u32(self) -> u32 {
        match self {
            HashKind::Poly9 => 1,
        }
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1 => Some(HashKind::Poly9),
            _ => None,
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Poly9 => write!(f, "poly9"),
        }
    }
}

pub const HASH_KIND_DEFAULT: HashKind = HashKind::Poly9;

/// Hash of a key with the default kind.
#[inline]
pub fn key_hash(key: &[u8]) -> u32 {
    let mut result: u32 = 0;
    for &b in key {
        result = result.wrapping_mul(9).wrapping_add(b as u32);
    }
    result
}

/// Bucket index: старшие биты произведения hash * MULT.
#[inline]
pub fn random_index(hash: u32, down_shift: u32, mask: u32) -> usize {
    ((hash.wrapping_mul(HASH_RANDOM_MULT) >> down_shift) & mask) as usize
}

/// Bucket index for a power-of-two bucket count (shared index; mask only).
#[inline]
pub fn bucket_of(hash: u32, buckets: u32) -> u32 {
    debug_assert!(buckets.is_power_of_two(), "buckets must be power of two");
    hash.wrapping_mul(HASH_RANDOM_MULT) >> (32 - buckets.trailing_zeros().max(1)) & (buckets - 1)
}

/// Полное сравнение ключей (байтовое, как strcmp).
#[inline]
pub fn key_compare(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly9_matches_reference() {
        assert_eq!(key_hash(b""), 0);
        assert_eq!(key_hash(b"a"), 97);
        assert_eq!(key_hash(b"ab"), 97 * 9 + 98);
        // wrapping must not panic on long keys
        let long = vec![0xFFu8; 4096];
        let _ = key_hash(&long);
    }

    #[test]
    fn random_index_in_range() {
        for k in ["", "a", "k1", "some-longer-key", "zzz"] {
            let h = key_hash(k.as_bytes());
            assert!(random_index(h, 28, 15) < 16);
            assert!(random_index(h, 24, 255) < 256);
            assert!(bucket_of(h, 1024) < 1024);
            assert!(bucket_of(h, 1) < 1);
        }
    }

    #[test]
    fn compare_orders() {
        assert_eq!(key_compare("a", "b"), Ordering::Less);
        assert_eq!(key_compare("b", "a"), Ordering::Greater);
        assert_eq!(key_compare("ab", "ab"), Ordering::Equal);
        assert_eq!(key_compare("ab", "abc"), Ordering::Less);
    }
}
