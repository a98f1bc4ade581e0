//! Key hashing.

use ramvault_common::{ObjectId, TableId};

/// Deterministic 64-bit hash of a key.
///
/// Murmur-style finalizer over the two id words. Stable across runs and
/// platforms: the low 16 bits become the on-entry hash fragment and the
/// upper bits select the bucket, so the function must never change once
/// fragments have been stored.
#[must_use]
pub fn key_hash(table_id: TableId, object_id: ObjectId) -> u64 {
    let mut h = object_id ^ u64::from(table_id).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}
