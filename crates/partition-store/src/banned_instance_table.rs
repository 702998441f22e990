// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::banned_instance_table::{
    BannedInstanceTable, ReadOnlyBannedInstanceTable,
};
use cadence_storage_api::Result;
use cadence_types::identifiers::Key;

use crate::keys::KeyBuilder;
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn banned_key(key: Key) -> Vec<u8> {
    KeyBuilder::new().key(key).build()
}

impl ReadOnlyBannedInstanceTable for PartitionStore {
    fn is_banned(&self, process_instance_key: Key) -> Result<bool> {
        Ok(self
            .get_raw(TableKind::BannedInstance, &banned_key(process_instance_key))
            .is_some())
    }
}

impl ReadOnlyBannedInstanceTable for PartitionStoreTransaction<'_> {
    fn is_banned(&self, process_instance_key: Key) -> Result<bool> {
        Ok(self
            .get_raw(TableKind::BannedInstance, &banned_key(process_instance_key))
            .is_some())
    }
}

impl BannedInstanceTable for PartitionStoreTransaction<'_> {
    fn ban_instance(&mut self, process_instance_key: Key) -> Result<()> {
        self.put_value(TableKind::BannedInstance, banned_key(process_instance_key), &())
    }
}
