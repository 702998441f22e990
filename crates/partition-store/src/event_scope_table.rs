// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::event_scope_table::{
    EventScopeInstance, EventScopeTable, ReadOnlyEventScopeTable,
};
use cadence_storage_api::Result;
use cadence_types::identifiers::Key;

use crate::keys::KeyBuilder;
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn scope_key(key: Key) -> Vec<u8> {
    KeyBuilder::new().key(key).build()
}

impl ReadOnlyEventScopeTable for PartitionStore {
    fn get_event_scope(&self, key: Key) -> Result<Option<EventScopeInstance>> {
        self.get_value(TableKind::EventScope, &scope_key(key))
    }
}

impl ReadOnlyEventScopeTable for PartitionStoreTransaction<'_> {
    fn get_event_scope(&self, key: Key) -> Result<Option<EventScopeInstance>> {
        self.get_value(TableKind::EventScope, &scope_key(key))
    }
}

impl EventScopeTable for PartitionStoreTransaction<'_> {
    fn put_event_scope(&mut self, key: Key, scope: EventScopeInstance) -> Result<()> {
        self.put_value(TableKind::EventScope, scope_key(key), &scope)
    }

    fn delete_event_scope(&mut self, key: Key) -> Result<()> {
        self.delete_raw(TableKind::EventScope, scope_key(key));
        Ok(())
    }
}
