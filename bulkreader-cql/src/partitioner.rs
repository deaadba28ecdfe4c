//! Cluster partitioners: the hash function placing partition keys on the
//! token ring, and the bounds of each ring's token span.

use std::num::Wrapping;
use std::str::FromStr;

use num_bigint::BigInt;
use strum_macros::{Display, EnumString};

/// The partitioner a cluster hashes partition keys with.
///
/// Token spans differ per partitioner and the Random span does not fit in
/// an `i64`, so bounds are handed out as big integers. Only Murmur3
/// tokens are computed locally (see [`murmur3_token`]); Random tokens are
/// MD5-based and always supplied by the caller alongside the key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Partitioner {
    Murmur3Partitioner,
    RandomPartitioner,
}

impl Partitioner {
    /// Smallest token of the ring.
    pub fn min_token(&self) -> BigInt {
        match self {
            Partitioner::Murmur3Partitioner => BigInt::from(i64::MIN),
            Partitioner::RandomPartitioner => BigInt::from(0),
        }
    }

    /// Largest token of the ring.
    pub fn max_token(&self) -> BigInt {
        match self {
            Partitioner::Murmur3Partitioner => BigInt::from(i64::MAX),
            Partitioner::RandomPartitioner => BigInt::from(1) << 127,
        }
    }
}

const C1: Wrapping<i64> = Wrapping(0x87c3_7b91_1142_53d5_u64 as i64);
const C2: Wrapping<i64> = Wrapping(0x4cf5_ad43_2745_937f_u64 as i64);

#[inline]
fn rotl64(v: Wrapping<i64>, n: u32) -> Wrapping<i64> {
    Wrapping((v.0 << n) | (v.0 as u64 >> (64 - n)) as i64)
}

#[inline]
fn fmix(mut k: Wrapping<i64>) -> Wrapping<i64> {
    k ^= Wrapping((k.0 as u64 >> 33) as i64);
    k *= Wrapping(0xff51afd7ed558ccd_u64 as i64);
    k ^= Wrapping((k.0 as u64 >> 33) as i64);
    k *= Wrapping(0xc4ceb9fe1a85ec53_u64 as i64);
    k ^= Wrapping((k.0 as u64 >> 33) as i64);

    k
}

/// Murmur3 token of a serialized partition key, bug-compatible with the
/// Cassandra implementation (signed tail bytes, `i64::MIN` normalized to
/// `i64::MAX`).
pub fn murmur3_token(key: &[u8]) -> i64 {
    let mut h1 = Wrapping(0_i64);
    let mut h2 = Wrapping(0_i64);

    let mut chunks = key.chunks_exact(16);
    for chunk in &mut chunks {
        // Infallible: chunks_exact yields 16-byte slices.
        let mut k1 = Wrapping(i64::from_le_bytes(chunk[..8].try_into().unwrap()));
        let mut k2 = Wrapping(i64::from_le_bytes(chunk[8..].try_into().unwrap()));

        k1 *= C1;
        k1 = rotl64(k1, 31);
        k1 *= C2;
        h1 ^= k1;

        h1 = rotl64(h1, 27);
        h1 += h2;
        h1 = h1 * Wrapping(5) + Wrapping(0x52dce729);

        k2 *= C2;
        k2 = rotl64(k2, 33);
        k2 *= C1;
        h2 ^= k2;

        h2 = rotl64(h2, 31);
        h2 += h1;
        h2 = h2 * Wrapping(5) + Wrapping(0x38495ab5);
    }

    let tail = chunks.remainder();
    let mut k1 = Wrapping(0_i64);
    let mut k2 = Wrapping(0_i64);

    if tail.len() > 8 {
        for i in (8..tail.len()).rev() {
            k2 ^= Wrapping(tail[i] as i8 as i64) << ((i - 8) * 8);
        }

        k2 *= C2;
        k2 = rotl64(k2, 33);
        k2 *= C1;
        h2 ^= k2;
    }

    if !tail.is_empty() {
        for i in (0..std::cmp::min(8, tail.len())).rev() {
            k1 ^= Wrapping(tail[i] as i8 as i64) << (i * 8);
        }

        k1 *= C1;
        k1 = rotl64(k1, 31);
        k1 *= C2;
        h1 ^= k1;
    }

    h1 ^= Wrapping(key.len() as i64);
    h2 ^= Wrapping(key.len() as i64);

    h1 += h2;
    h2 += h1;

    h1 = fmix(h1);
    h2 = fmix(h2);

    h1 += h2;

    // i64::MIN is reserved for "no token".
    if h1.0 == i64::MIN {
        i64::MAX
    } else {
        h1.0
    }
}

impl Partitioner {
    /// Parses a partitioner from either the bare enum name or the fully
    /// qualified class name found in cluster metadata.
    pub fn from_class_name(class: &str) -> Option<Partitioner> {
        class
            .rsplit('.')
            .next()
            .and_then(|name| Partitioner::from_str(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_spans() {
        let murmur3 = Partitioner::Murmur3Partitioner;
        assert_eq!(murmur3.min_token(), BigInt::from(i64::MIN));
        assert_eq!(murmur3.max_token(), BigInt::from(i64::MAX));

        let random = Partitioner::RandomPartitioner;
        assert_eq!(random.min_token(), BigInt::from(0));
        assert!(random.max_token() > murmur3.max_token());
    }

    #[test]
    fn test_from_class_name() {
        assert_eq!(
            Partitioner::from_class_name("org.apache.cassandra.dht.Murmur3Partitioner"),
            Some(Partitioner::Murmur3Partitioner)
        );
        assert_eq!(
            Partitioner::from_class_name("RandomPartitioner"),
            Some(Partitioner::RandomPartitioner)
        );
        assert_eq!(Partitioner::from_class_name("ByteOrderedPartitioner"), None);
    }

    fn assert_correct_murmur3_hash(pk: &'static str, expected_hash: i64) {
        assert_eq!(murmur3_token(pk.as_bytes()), expected_hash);
    }

    #[test]
    fn test_murmur3_known_hashes() {
        for s in [
            ("test", -6017608668500074083),
            ("xd", 4507812186440344727),
            ("primary_key", -1632642444691073360),
            ("kremówki", 4354931215268080151),
        ] {
            assert_correct_murmur3_hash(s.0, s.1);
        }
    }

    #[test]
    fn test_murmur3_is_deterministic() {
        let key = b"partition-key";
        assert_eq!(murmur3_token(key), murmur3_token(key));
        assert_ne!(murmur3_token(b"a"), murmur3_token(b"b"));
    }

    #[test]
    fn test_murmur3_empty_key() {
        assert_eq!(murmur3_token(&[]), 0);
    }

    #[test]
    fn test_murmur3_exercises_all_tail_lengths() {
        // Keys of length 0..=33 cover the block loop plus both tail
        // halves; mostly a guard against slicing panics.
        let bytes: Vec<u8> = (0u8..=33).collect();
        let tokens: Vec<i64> = (0..=33).map(|len| murmur3_token(&bytes[..len])).collect();
        for (i, a) in tokens.iter().enumerate() {
            for b in tokens.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
