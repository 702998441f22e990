// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::distribution_table::{
    DistributionTable, PendingDistribution, ReadOnlyDistributionTable,
};
use cadence_storage_api::Result;
use cadence_types::identifiers::Key;

use crate::keys::KeyBuilder;
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn distribution_key(key: Key) -> Vec<u8> {
    KeyBuilder::new().key(key).build()
}

fn get_pending_distributions<S: StorageAccess>(storage: &S) -> Result<Vec<PendingDistribution>> {
    Ok(storage
        .scan_values(TableKind::PendingDistribution, &[])?
        .into_iter()
        .map(|(_, v)| v)
        .collect())
}

impl ReadOnlyDistributionTable for PartitionStore {
    fn get_pending_distribution(&self, key: Key) -> Result<Option<PendingDistribution>> {
        self.get_value(TableKind::PendingDistribution, &distribution_key(key))
    }

    fn get_pending_distributions(&self) -> Result<Vec<PendingDistribution>> {
        get_pending_distributions(self)
    }

    fn is_distribution_received(&self, key: Key) -> Result<bool> {
        Ok(self
            .get_raw(TableKind::ReceivedDistribution, &distribution_key(key))
            .is_some())
    }
}

impl ReadOnlyDistributionTable for PartitionStoreTransaction<'_> {
    fn get_pending_distribution(&self, key: Key) -> Result<Option<PendingDistribution>> {
        self.get_value(TableKind::PendingDistribution, &distribution_key(key))
    }

    fn get_pending_distributions(&self) -> Result<Vec<PendingDistribution>> {
        get_pending_distributions(self)
    }

    fn is_distribution_received(&self, key: Key) -> Result<bool> {
        Ok(self
            .get_raw(TableKind::ReceivedDistribution, &distribution_key(key))
            .is_some())
    }
}

impl DistributionTable for PartitionStoreTransaction<'_> {
    fn put_pending_distribution(&mut self, distribution: PendingDistribution) -> Result<()> {
        self.put_value(
            TableKind::PendingDistribution,
            distribution_key(distribution.key),
            &distribution,
        )
    }

    fn delete_pending_distribution(&mut self, key: Key) -> Result<()> {
        self.delete_raw(TableKind::PendingDistribution, distribution_key(key));
        Ok(())
    }

    fn put_received_distribution(&mut self, key: Key) -> Result<()> {
        self.put_value(TableKind::ReceivedDistribution, distribution_key(key), &())
    }

    fn delete_received_distribution(&mut self, key: Key) -> Result<()> {
        self.delete_raw(TableKind::ReceivedDistribution, distribution_key(key));
        Ok(())
    }
}
