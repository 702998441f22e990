// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::fsm_table::{FsmTable, ReadOnlyFsmTable};
use cadence_storage_api::Result;
use cadence_wal_protocol::Position;

use crate::keys::KeyBuilder;
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

mod fsm_variable {
    pub(crate) const LAST_PROCESSED_POSITION: u64 = 0;
    pub(crate) const NEXT_KEY_COUNTER: u64 = 1;
}

fn fsm_key(variable: u64) -> Vec<u8> {
    KeyBuilder::new().u64(variable).build()
}

fn get_last_processed_position<S: StorageAccess>(storage: &S) -> Result<Option<Position>> {
    storage.get_value(
        TableKind::PartitionStateMachine,
        &fsm_key(fsm_variable::LAST_PROCESSED_POSITION),
    )
}

fn get_next_key_counter<S: StorageAccess>(storage: &S) -> Result<u64> {
    // counters start at 1, so that no key of a partition is equal to the bare partition prefix
    Ok(storage
        .get_value(
            TableKind::PartitionStateMachine,
            &fsm_key(fsm_variable::NEXT_KEY_COUNTER),
        )?
        .unwrap_or(1))
}

impl ReadOnlyFsmTable for PartitionStore {
    fn get_last_processed_position(&self) -> Result<Option<Position>> {
        get_last_processed_position(self)
    }

    fn get_next_key_counter(&self) -> Result<u64> {
        get_next_key_counter(self)
    }
}

impl ReadOnlyFsmTable for PartitionStoreTransaction<'_> {
    fn get_last_processed_position(&self) -> Result<Option<Position>> {
        get_last_processed_position(self)
    }

    fn get_next_key_counter(&self) -> Result<u64> {
        get_next_key_counter(self)
    }
}

impl FsmTable for PartitionStoreTransaction<'_> {
    fn put_last_processed_position(&mut self, position: Position) -> Result<()> {
        self.put_value(
            TableKind::PartitionStateMachine,
            fsm_key(fsm_variable::LAST_PROCESSED_POSITION),
            &position,
        )
    }

    fn put_next_key_counter(&mut self, counter: u64) -> Result<()> {
        self.put_value(
            TableKind::PartitionStateMachine,
            fsm_key(fsm_variable::NEXT_KEY_COUNTER),
            &counter,
        )
    }
}
