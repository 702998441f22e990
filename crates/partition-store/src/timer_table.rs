// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::timer_table::{ReadOnlyTimerTable, TimerInstance, TimerTable};
use cadence_storage_api::{Result, StorageError};
use cadence_types::identifiers::Key;
use cadence_types::time::MillisSinceEpoch;

use crate::keys::{KeyBuilder, KeyReader};
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn timer_key(key: Key) -> Vec<u8> {
    KeyBuilder::new().key(key).build()
}

fn due_date_key(due_date: MillisSinceEpoch, key: Key) -> Vec<u8> {
    KeyBuilder::new().u64(due_date.as_u64()).key(key).build()
}

fn element_instance_key(element_instance_key: Key, key: Key) -> Vec<u8> {
    KeyBuilder::new().key(element_instance_key).key(key).build()
}

fn get_timer<S: StorageAccess>(storage: &S, key: Key) -> Result<Option<TimerInstance>> {
    storage.get_value(TableKind::Timers, &timer_key(key))
}

fn resolve<S: StorageAccess>(storage: &S, key: Key) -> Result<TimerInstance> {
    get_timer(storage, key)?.ok_or_else(|| {
        StorageError::DataIntegrityError(format!("timer {key} is indexed but does not exist"))
    })
}

fn get_timers_for_element_instance<S: StorageAccess>(
    storage: &S,
    element_instance: Key,
) -> Result<Vec<TimerInstance>> {
    storage
        .scan_raw(
            TableKind::TimersByElementInstance,
            &KeyBuilder::new().key(element_instance).build(),
        )
        .into_iter()
        .map(|(k, _)| {
            let mut reader = KeyReader::new(&k);
            let _element_instance = reader.key()?;
            resolve(storage, reader.key()?)
        })
        .collect()
}

fn get_due_timers<S: StorageAccess>(
    storage: &S,
    now: MillisSinceEpoch,
    limit: usize,
) -> Result<Vec<TimerInstance>> {
    let mut due = Vec::new();
    for (k, _) in storage.scan_raw(TableKind::TimersByDueDate, &[]) {
        if due.len() >= limit {
            break;
        }
        let mut reader = KeyReader::new(&k);
        if MillisSinceEpoch::new(reader.u64()?) > now {
            break;
        }
        due.push(resolve(storage, reader.key()?)?);
    }
    Ok(due)
}

fn get_next_due_date<S: StorageAccess>(storage: &S) -> Result<Option<MillisSinceEpoch>> {
    storage
        .scan_raw(TableKind::TimersByDueDate, &[])
        .first()
        .map(|(k, _)| KeyReader::new(k).u64().map(MillisSinceEpoch::new))
        .transpose()
}

fn get_next_due_date_after<S: StorageAccess>(
    storage: &S,
    after: MillisSinceEpoch,
) -> Result<Option<MillisSinceEpoch>> {
    for (k, _) in storage.scan_raw(TableKind::TimersByDueDate, &[]) {
        let due_date = MillisSinceEpoch::new(KeyReader::new(&k).u64()?);
        if due_date > after {
            return Ok(Some(due_date));
        }
    }
    Ok(None)
}

impl ReadOnlyTimerTable for PartitionStore {
    fn get_timer(&self, key: Key) -> Result<Option<TimerInstance>> {
        get_timer(self, key)
    }

    fn get_timers_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Vec<TimerInstance>> {
        get_timers_for_element_instance(self, element_instance_key)
    }

    fn get_due_timers(&self, now: MillisSinceEpoch, limit: usize) -> Result<Vec<TimerInstance>> {
        get_due_timers(self, now, limit)
    }

    fn get_next_due_date(&self) -> Result<Option<MillisSinceEpoch>> {
        get_next_due_date(self)
    }

    fn get_next_due_date_after(
        &self,
        after: MillisSinceEpoch,
    ) -> Result<Option<MillisSinceEpoch>> {
        get_next_due_date_after(self, after)
    }
}

impl ReadOnlyTimerTable for PartitionStoreTransaction<'_> {
    fn get_timer(&self, key: Key) -> Result<Option<TimerInstance>> {
        get_timer(self, key)
    }

    fn get_timers_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Vec<TimerInstance>> {
        get_timers_for_element_instance(self, element_instance_key)
    }

    fn get_due_timers(&self, now: MillisSinceEpoch, limit: usize) -> Result<Vec<TimerInstance>> {
        get_due_timers(self, now, limit)
    }

    fn get_next_due_date(&self) -> Result<Option<MillisSinceEpoch>> {
        get_next_due_date(self)
    }

    fn get_next_due_date_after(
        &self,
        after: MillisSinceEpoch,
    ) -> Result<Option<MillisSinceEpoch>> {
        get_next_due_date_after(self, after)
    }
}

impl TimerTable for PartitionStoreTransaction<'_> {
    fn put_timer(&mut self, timer: TimerInstance) -> Result<()> {
        self.put_value(
            TableKind::TimersByDueDate,
            due_date_key(timer.due_date(), timer.key),
            &(),
        )?;
        self.put_value(
            TableKind::TimersByElementInstance,
            element_instance_key(timer.value.element_instance_key, timer.key),
            &(),
        )?;
        self.put_value(TableKind::Timers, timer_key(timer.key), &timer)
    }

    fn delete_timer(&mut self, key: Key) -> Result<()> {
        let Some(timer) = get_timer(self, key)? else {
            return Ok(());
        };
        self.delete_raw(TableKind::TimersByDueDate, due_date_key(timer.due_date(), key));
        self.delete_raw(
            TableKind::TimersByElementInstance,
            element_instance_key(timer.value.element_instance_key, key),
        );
        self.delete_raw(TableKind::Timers, timer_key(key));
        Ok(())
    }
}
