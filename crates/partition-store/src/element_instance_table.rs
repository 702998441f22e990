// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::element_instance_table::{
    ElementInstance, ElementInstanceTable, ReadOnlyElementInstanceTable,
};
use cadence_storage_api::{Result, StorageError};
use cadence_types::identifiers::Key;

use crate::keys::{KeyBuilder, KeyReader};
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn instance_key(key: Key) -> Vec<u8> {
    KeyBuilder::new().key(key).build()
}

fn child_key(parent: Key, child: Key) -> Vec<u8> {
    KeyBuilder::new().key(parent).key(child).build()
}

fn get_element_instance<S: StorageAccess>(
    storage: &S,
    key: Key,
) -> Result<Option<ElementInstance>> {
    storage.get_value(TableKind::ElementInstance, &instance_key(key))
}

fn get_children<S: StorageAccess>(storage: &S, parent_key: Key) -> Result<Vec<ElementInstance>> {
    storage
        .scan_raw(TableKind::ElementInstanceChildren, &instance_key(parent_key))
        .into_iter()
        .map(|(k, _)| {
            let mut reader = KeyReader::new(&k);
            let _parent = reader.key()?;
            let child = reader.key()?;
            get_element_instance(storage, child)?.ok_or_else(|| {
                StorageError::DataIntegrityError(format!(
                    "child {child} of element instance {parent_key} does not exist"
                ))
            })
        })
        .collect()
}

fn put_element_instance<S: StorageAccess>(
    storage: &mut S,
    instance: ElementInstance,
) -> Result<()> {
    if let Some(parent) = instance.parent_key() {
        if instance.state.is_retired() {
            storage.delete_raw(
                TableKind::ElementInstanceChildren,
                child_key(parent, instance.key),
            );
        } else {
            storage.put_value(
                TableKind::ElementInstanceChildren,
                child_key(parent, instance.key),
                &(),
            )?;
        }
    }
    storage.put_value(TableKind::ElementInstance, instance_key(instance.key), &instance)
}

impl ReadOnlyElementInstanceTable for PartitionStore {
    fn get_element_instance(&self, key: Key) -> Result<Option<ElementInstance>> {
        get_element_instance(self, key)
    }

    fn get_children(&self, parent_key: Key) -> Result<Vec<ElementInstance>> {
        get_children(self, parent_key)
    }
}

impl ReadOnlyElementInstanceTable for PartitionStoreTransaction<'_> {
    fn get_element_instance(&self, key: Key) -> Result<Option<ElementInstance>> {
        get_element_instance(self, key)
    }

    fn get_children(&self, parent_key: Key) -> Result<Vec<ElementInstance>> {
        get_children(self, parent_key)
    }
}

impl ElementInstanceTable for PartitionStoreTransaction<'_> {
    fn put_element_instance(&mut self, instance: ElementInstance) -> Result<()> {
        put_element_instance(self, instance)
    }
}
