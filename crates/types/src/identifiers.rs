// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Identifiers of partitions and of the entities living in a partition.

use std::fmt;

/// Identifying the partition
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Deref,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    derive_more::Debug,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
#[debug("{}", _0)]
pub struct PartitionId(u16);

impl From<PartitionId> for u64 {
    fn from(value: PartitionId) -> Self {
        u64::from(value.0)
    }
}

impl PartitionId {
    pub const MIN: Self = Self(u16::MIN);
    pub const MAX: Self = Self(u16::MAX);

    /// It's your responsibility to ensure the value is within the valid range.
    pub const fn new_unchecked(v: u16) -> Self {
        Self(v)
    }
}

/// Number of low bits of a [`Key`] used by the per-partition counter. The remaining high bits
/// carry the id of the partition that allocated the key.
pub const KEY_BITS: u32 = 51;
const COUNTER_MASK: u64 = (1 << KEY_BITS) - 1;

/// Partition ids which can be encoded in a [`Key`] are smaller than this bound.
pub const KEY_PARTITION_ID_BOUND: u32 = 1 << (u64::BITS - KEY_BITS);

/// Unique key of an entity (element instance, timer, subscription, distribution, ...).
///
/// Keys are allocated by the partition that owns the entity and encode that partition in their
/// high bits, which makes it possible to route a message back to the owner of a key.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::Debug,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[display("{}", _0)]
#[debug("{}", _0)]
pub struct Key(u64);

impl Key {
    pub const fn from_parts(partition_id: PartitionId, counter: u64) -> Self {
        Self(((partition_id.0 as u64) << KEY_BITS) | (counter & COUNTER_MASK))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The partition which allocated this key.
    pub const fn partition_id(&self) -> PartitionId {
        PartitionId((self.0 >> KEY_BITS) as u16)
    }

    pub const fn counter(&self) -> u64 {
        self.0 & COUNTER_MASK
    }
}

/// Static view on the partitions of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTopology {
    first_partition_id: PartitionId,
    partitions_count: u16,
}

impl PartitionTopology {
    pub fn new(first_partition_id: PartitionId, partitions_count: u16) -> Self {
        assert!(partitions_count > 0, "a cluster has at least one partition");
        Self {
            first_partition_id,
            partitions_count,
        }
    }

    pub fn partitions_count(&self) -> u16 {
        self.partitions_count
    }

    pub fn first_partition_id(&self) -> PartitionId {
        self.first_partition_id
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> {
        let first = *self.first_partition_id;
        (first..first + self.partitions_count).map(PartitionId::from)
    }

    /// All partitions except the given one, in ascending order.
    pub fn other_partitions(&self, current: PartitionId) -> impl Iterator<Item = PartitionId> {
        self.partition_ids().filter(move |id| *id != current)
    }

    /// The partition owning message subscriptions for the given correlation key.
    pub fn subscription_partition_id(&self, correlation_key: &str) -> PartitionId {
        let hash = partitioner::HashPartitioner::compute_hash(correlation_key);
        let offset = hash % u64::from(self.partitions_count);
        // offset < partitions_count, which is a u16
        PartitionId::from(*self.first_partition_id + offset as u16)
    }
}

impl fmt::Display for PartitionTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partitions [{}, {})",
            self.first_partition_id,
            u32::from(*self.first_partition_id) + u32::from(self.partitions_count)
        )
    }
}

pub mod partitioner {
    /// Computes routing hashes based on xxh3 hashing.
    pub struct HashPartitioner;

    impl HashPartitioner {
        /// Hashes the raw bytes of the value, so the result is stable across processes and
        /// platforms.
        pub fn compute_hash(value: impl AsRef<[u8]>) -> u64 {
            xxhash_rust::xxh3::xxh3_64(value.as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    #[test]
    fn key_encodes_partition_id() {
        let key = Key::from_parts(PartitionId::from(3), 42);

        assert_that!(key.partition_id(), eq(PartitionId::from(3)));
        assert_that!(key.counter(), eq(42));
    }

    #[test]
    fn key_counter_does_not_leak_into_partition_bits() {
        let key = Key::from_parts(PartitionId::from(1), u64::MAX);

        assert_that!(key.partition_id(), eq(PartitionId::from(1)));
    }

    #[test]
    fn other_partitions_excludes_current() {
        let topology = PartitionTopology::new(PartitionId::from(1), 4);

        let others: Vec<_> = topology.other_partitions(PartitionId::from(2)).collect();

        assert_that!(
            others,
            eq(vec![
                PartitionId::from(1),
                PartitionId::from(3),
                PartitionId::from(4)
            ])
        );
    }

    #[test]
    fn subscription_partition_is_deterministic_and_in_range() {
        let topology = PartitionTopology::new(PartitionId::from(1), 3);

        for correlation_key in ["bar", "order-123", "", "42", "ünïcödé"] {
            let partition = topology.subscription_partition_id(correlation_key);
            assert_that!(partition, eq(topology.subscription_partition_id(correlation_key)));
            assert!(*partition >= 1 && *partition < 4, "{partition} out of range");
        }
    }

    #[test]
    fn subscription_partition_matches_hash() {
        let topology = PartitionTopology::new(PartitionId::from(1), 3);
        let expected = 1 + (xxhash_rust::xxh3::xxh3_64(b"bar") % 3) as u16;

        assert_that!(
            topology.subscription_partition_id("bar"),
            eq(PartitionId::from(expected))
        );
    }

    #[test]
    fn single_partition_routes_everything_to_first() {
        let topology = PartitionTopology::new(PartitionId::from(7), 1);

        assert_that!(
            topology.subscription_partition_id("anything"),
            eq(PartitionId::from(7))
        );
        assert_that!(topology.other_partitions(PartitionId::from(7)).count(), eq(0));
    }
}
