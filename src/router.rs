//! Hash partitioning of state keys.
//!
//! The streaming engine shuffles rows into state partitions with
//! `pmod(murmur3(routing columns), numPartitions)`, where the Murmur3 x86
//! 32-bit hash is seeded with 42 and each column's hash seeds the next. This
//! module reproduces that function bit for bit so the `_partition_id` column
//! matches the partition a key actually lives in.
//!
//! Per-type hashing:
//! - `int` / `bool` (0 or 1): one 4-byte block
//! - `long`: low word then high word
//! - `double`: the IEEE bits as a long, with `-0.0` hashed as `0.0`
//! - `string`: UTF-8 bytes in 4-byte little-endian blocks, then each trailing
//!   byte mixed as its own sign-extended block
//! - `struct`: its fields folded in order
//! - `null`: leaves the running hash unchanged

use crate::datum::Datum;

/// Seed of the engine's hash partitioner.
pub const HASH_SEED: u32 = 42;

/// Every NaN hashes as this quiet NaN.
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

#[inline]
fn mix_k1(k1: u32) -> u32 {
    k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline]
fn mix_h1(h1: u32, k1: u32) -> u32 {
    (h1 ^ k1)
        .rotate_left(13)
        .wrapping_mul(5)
        .wrapping_add(0xe654_6b64)
}

#[inline]
fn fmix(mut h1: u32, len: u32) -> u32 {
    h1 ^= len;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^ (h1 >> 16)
}

#[must_use]
pub fn hash_int(v: i32, seed: u32) -> u32 {
    fmix(mix_h1(seed, mix_k1(v as u32)), 4)
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hash_long(v: i64, seed: u32) -> u32 {
    let bits = v as u64;
    let low = bits as u32;
    let high = (bits >> 32) as u32;
    let h1 = mix_h1(seed, mix_k1(low));
    fmix(mix_h1(h1, mix_k1(high)), 8)
}

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
pub fn hash_bytes(bytes: &[u8], seed: u32) -> u32 {
    let aligned = bytes.len() - bytes.len() % 4;
    let mut h1 = seed;
    for block in bytes[..aligned].chunks_exact(4) {
        let word = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 = mix_h1(h1, mix_k1(word));
    }
    for &b in &bytes[aligned..] {
        let half_word = i32::from(b as i8) as u32;
        h1 = mix_h1(h1, mix_k1(half_word));
    }
    fmix(h1, bytes.len() as u32)
}

/// Fold one value into the running hash.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn hash_datum(datum: &Datum, seed: u32) -> u32 {
    match datum {
        Datum::Null => seed,
        Datum::Bool(b) => hash_int(i32::from(*b), seed),
        Datum::Int(v) => hash_int(*v, seed),
        Datum::Long(v) => hash_long(*v, seed),
        Datum::Double(v) => {
            let bits = if v.0.is_nan() {
                CANONICAL_NAN_BITS
            } else if v.0 == 0.0 {
                0
            } else {
                v.0.to_bits()
            };
            hash_long(bits as i64, seed)
        }
        Datum::String(s) => hash_bytes(s.as_bytes(), seed),
        Datum::Struct(fields) => fields.iter().fold(seed, |h, f| hash_datum(f, h)),
    }
}

/// Computes the state partition of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionRouter {
    num_partitions: u32,
}

impl PartitionRouter {
    /// # Panics
    /// Panics if `num_partitions` is zero.
    #[must_use]
    pub fn new(num_partitions: u32) -> Self {
        assert!(num_partitions > 0, "num_partitions must be positive");
        Self { num_partitions }
    }

    /// Partition of the given routing column values.
    #[must_use]
    pub fn route(&self, key_columns: &[&Datum]) -> i32 {
        route(key_columns, self.num_partitions)
    }
}

/// `pmod(murmur3(key_columns), num_partitions)`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn route(key_columns: &[&Datum], num_partitions: u32) -> i32 {
    let hash = key_columns
        .iter()
        .fold(HASH_SEED, |h, d| hash_datum(d, h)) as i32;
    hash.rem_euclid(num_partitions as i32)
}
