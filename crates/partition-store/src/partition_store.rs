// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use cadence_storage_api::{Result, Storage, StorageError, Transaction};
use cadence_types::identifiers::PartitionId;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum TableKind {
    PartitionStateMachine,
    ElementInstance,
    ElementInstanceChildren,
    EventScope,
    Timers,
    TimersByDueDate,
    TimersByElementInstance,
    ProcessMessageSubscription,
    MessageSubscription,
    MessageSubscriptionByCorrelation,
    SignalSubscription,
    SignalSubscriptionByName,
    PendingDistribution,
    ReceivedDistribution,
    Variable,
    VariableScope,
    Incident,
    IncidentByElementInstance,
    BannedInstance,
}

/// In-memory state of one partition. Every table is an ordered map from encoded keys to
/// serialized values, so two stores holding the same logical state are byte-for-byte equal.
#[derive(Debug)]
pub struct PartitionStore {
    partition_id: PartitionId,
    tables: BTreeMap<TableKind, Table>,
}

impl PartitionStore {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            tables: BTreeMap::new(),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Serialized content of each non empty table. Used to compare the state of two stores.
    pub fn column_snapshots(&self) -> Result<BTreeMap<TableKind, Vec<u8>>> {
        self.tables
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(kind, table)| {
                let entries: Vec<(&Vec<u8>, &Vec<u8>)> = table.iter().collect();
                serde_json::to_vec(&entries)
                    .map(|bytes| (*kind, bytes))
                    .map_err(|e| StorageError::Conversion(e.into()))
            })
            .collect()
    }
}

impl Storage for PartitionStore {
    type TransactionType<'a> = PartitionStoreTransaction<'a>;

    fn transaction(&mut self) -> Self::TransactionType<'_> {
        PartitionStoreTransaction {
            partition_id: self.partition_id,
            tables: &mut self.tables,
            write_batch: BTreeMap::new(),
        }
    }
}

/// Buffers all writes until it is committed. Reads see the buffered writes on top of the
/// committed state.
pub struct PartitionStoreTransaction<'a> {
    partition_id: PartitionId,
    tables: &'a mut BTreeMap<TableKind, Table>,
    write_batch: BTreeMap<(TableKind, Vec<u8>), Option<Vec<u8>>>,
}

impl PartitionStoreTransaction<'_> {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }
}

impl Transaction for PartitionStoreTransaction<'_> {
    fn commit(self) -> Result<()> {
        trace!(
            partition_id = %self.partition_id,
            writes = self.write_batch.len(),
            "Committing transaction"
        );
        for ((kind, key), value) in self.write_batch {
            let table = self.tables.entry(kind).or_default();
            match value {
                Some(value) => {
                    table.insert(key, value);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
        self.tables.retain(|_, table| !table.is_empty());
        Ok(())
    }
}

pub(crate) trait StorageAccess {
    fn get_raw(&self, table: TableKind, key: &[u8]) -> Option<Vec<u8>>;

    /// All entries of the table whose key starts with the prefix, ordered by key.
    fn scan_raw(&self, table: TableKind, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn put_raw(&mut self, table: TableKind, key: Vec<u8>, value: Vec<u8>);

    fn delete_raw(&mut self, table: TableKind, key: Vec<u8>);

    fn get_value<V: DeserializeOwned>(&self, table: TableKind, key: &[u8]) -> Result<Option<V>> {
        self.get_raw(table, key)
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn scan_values<V: DeserializeOwned>(
        &self,
        table: TableKind,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, V)>> {
        self.scan_raw(table, prefix)
            .into_iter()
            .map(|(k, v)| decode(&v).map(|v| (k, v)))
            .collect()
    }

    fn put_value<V: Serialize>(&mut self, table: TableKind, key: Vec<u8>, value: &V) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Conversion(e.into()))?;
        self.put_raw(table, key, bytes);
        Ok(())
    }
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Conversion(e.into()))
}

fn scan_table<'a>(
    table: Option<&'a Table>,
    prefix: &'a [u8],
) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
    table
        .into_iter()
        .flat_map(move |t| {
            t.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(move |(k, _)| k.starts_with(prefix))
        })
}

impl StorageAccess for PartitionStore {
    fn get_raw(&self, table: TableKind, key: &[u8]) -> Option<Vec<u8>> {
        self.tables.get(&table).and_then(|t| t.get(key)).cloned()
    }

    fn scan_raw(&self, table: TableKind, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        scan_table(self.tables.get(&table), prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn put_raw(&mut self, table: TableKind, key: Vec<u8>, value: Vec<u8>) {
        self.tables.entry(table).or_default().insert(key, value);
    }

    fn delete_raw(&mut self, table: TableKind, key: Vec<u8>) {
        if let Some(t) = self.tables.get_mut(&table) {
            t.remove(&key);
        }
    }
}

impl StorageAccess for PartitionStoreTransaction<'_> {
    fn get_raw(&self, table: TableKind, key: &[u8]) -> Option<Vec<u8>> {
        match self.write_batch.get(&(table, key.to_vec())) {
            Some(buffered) => buffered.clone(),
            None => self.tables.get(&table).and_then(|t| t.get(key)).cloned(),
        }
    }

    fn scan_raw(&self, table: TableKind, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = scan_table(self.tables.get(&table), prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let start = (table, prefix.to_vec());
        for ((_, key), value) in self
            .write_batch
            .range(start..)
            .take_while(|((kind, key), _)| *kind == table && key.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        merged.into_iter().collect()
    }

    fn put_raw(&mut self, table: TableKind, key: Vec<u8>, value: Vec<u8>) {
        self.write_batch.insert((table, key), Some(value));
    }

    fn delete_raw(&mut self, table: TableKind, key: Vec<u8>) {
        self.write_batch.insert((table, key), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    #[test]
    fn transaction_reads_its_own_writes() {
        let mut store = PartitionStore::new(PartitionId::from(1));
        store.put_raw(TableKind::Variable, b"a1".to_vec(), b"1".to_vec());
        store.put_raw(TableKind::Variable, b"a2".to_vec(), b"2".to_vec());
        store.put_raw(TableKind::Variable, b"b1".to_vec(), b"3".to_vec());

        let mut txn = store.transaction();
        txn.put_raw(TableKind::Variable, b"a3".to_vec(), b"4".to_vec());
        txn.delete_raw(TableKind::Variable, b"a1".to_vec());

        let keys: Vec<_> = txn
            .scan_raw(TableKind::Variable, b"a")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_that!(keys, eq(vec![b"a2".to_vec(), b"a3".to_vec()]));
        assert_that!(txn.get_raw(TableKind::Variable, b"a1"), none());
    }

    #[test]
    fn dropped_transaction_leaves_no_trace() {
        let mut store = PartitionStore::new(PartitionId::from(1));
        let before = store.column_snapshots().unwrap();

        {
            let mut txn = store.transaction();
            txn.put_raw(TableKind::Timers, b"k".to_vec(), b"v".to_vec());
        }

        assert_that!(store.column_snapshots().unwrap(), eq(before));
    }

    #[test]
    fn committed_writes_are_visible() {
        let mut store = PartitionStore::new(PartitionId::from(1));

        let mut txn = store.transaction();
        txn.put_raw(TableKind::Timers, b"k".to_vec(), b"v".to_vec());
        txn.commit().unwrap();

        assert_that!(store.get_raw(TableKind::Timers, b"k"), some(eq(b"v".to_vec())));
        assert_that!(store.column_snapshots().unwrap(), len(eq(1)));
    }

    #[test]
    fn deleting_everything_restores_empty_snapshot() {
        let mut store = PartitionStore::new(PartitionId::from(1));
        let mut txn = store.transaction();
        txn.put_raw(TableKind::Timers, b"k".to_vec(), b"v".to_vec());
        txn.commit().unwrap();

        let mut txn = store.transaction();
        txn.delete_raw(TableKind::Timers, b"k".to_vec());
        txn.commit().unwrap();

        assert_that!(store.column_snapshots().unwrap(), empty());
    }
}
