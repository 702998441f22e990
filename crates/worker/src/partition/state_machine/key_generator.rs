// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::fsm_table::FsmTable;
use cadence_storage_api::StorageError;
use cadence_types::identifiers::{Key, PartitionId};

/// Allocates the keys of a partition. The counter is part of the partition state, so it is
/// rolled back together with the transaction that allocated a key.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyGenerator {
    partition_id: PartitionId,
}

impl KeyGenerator {
    pub(crate) fn new(partition_id: PartitionId) -> Self {
        Self { partition_id }
    }

    pub(crate) fn next_key<S: FsmTable>(&self, storage: &mut S) -> Result<Key, StorageError> {
        let counter = storage.get_next_key_counter()?;
        storage.put_next_key_counter(counter + 1)?;
        Ok(Key::from_parts(self.partition_id, counter))
    }

    /// Moves the counter past a key found in the log. Keys of other partitions are ignored.
    pub(crate) fn observe<S: FsmTable>(
        &self,
        storage: &mut S,
        key: Key,
    ) -> Result<(), StorageError> {
        if key.partition_id() != self.partition_id {
            return Ok(());
        }
        let next = key.counter() + 1;
        if next > storage.get_next_key_counter()? {
            storage.put_next_key_counter(next)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cadence_partition_store::PartitionStore;
    use cadence_storage_api::{Storage, Transaction};
    use googletest::prelude::*;

    type TestResult = std::result::Result<(), anyhow::Error>;

    #[test]
    fn keys_carry_the_partition() -> TestResult {
        let mut store = PartitionStore::new(PartitionId::from(3));
        let key_generator = KeyGenerator::new(PartitionId::from(3));

        let mut txn = store.transaction();
        let first = key_generator.next_key(&mut txn)?;
        let second = key_generator.next_key(&mut txn)?;
        txn.commit()?;

        assert_that!(first.partition_id(), eq(PartitionId::from(3)));
        assert_that!(second.counter(), eq(first.counter() + 1));
        Ok(())
    }

    #[test]
    fn observing_foreign_keys_does_not_move_the_counter() -> TestResult {
        let mut store = PartitionStore::new(PartitionId::from(1));
        let key_generator = KeyGenerator::new(PartitionId::from(1));

        let mut txn = store.transaction();
        key_generator.observe(&mut txn, Key::from_parts(PartitionId::from(2), 40))?;
        key_generator.observe(&mut txn, Key::from_parts(PartitionId::from(1), 7))?;
        key_generator.observe(&mut txn, Key::from_parts(PartitionId::from(1), 3))?;

        assert_that!(
            key_generator.next_key(&mut txn)?,
            eq(Key::from_parts(PartitionId::from(1), 8))
        );
        Ok(())
    }
}
