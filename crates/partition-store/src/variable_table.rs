// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::variable_table::{ReadOnlyVariableTable, VariableTable};
use cadence_storage_api::Result;
use cadence_types::identifiers::Key;
use cadence_types::Variables;

use crate::keys::{KeyBuilder, KeyReader};
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn scope_key(scope: Key) -> Vec<u8> {
    KeyBuilder::new().key(scope).build()
}

fn variable_key(scope: Key, name: &str) -> Vec<u8> {
    KeyBuilder::new().key(scope).str(name).build()
}

fn get_local_variables<S: StorageAccess>(storage: &S, scope: Key) -> Result<Variables> {
    storage
        .scan_values::<serde_json::Value>(TableKind::Variable, &scope_key(scope))?
        .into_iter()
        .map(|(k, v)| {
            let mut reader = KeyReader::new(&k);
            let _scope = reader.key()?;
            Ok((reader.str()?.to_owned(), v))
        })
        .collect()
}

fn get_parent_scope<S: StorageAccess>(storage: &S, scope: Key) -> Result<Option<Key>> {
    Ok(storage
        .get_value::<Option<Key>>(TableKind::VariableScope, &scope_key(scope))?
        .flatten())
}

impl ReadOnlyVariableTable for PartitionStore {
    fn get_variable(&self, scope_key: Key, name: &str) -> Result<Option<serde_json::Value>> {
        self.get_value(TableKind::Variable, &variable_key(scope_key, name))
    }

    fn get_local_variables(&self, scope_key: Key) -> Result<Variables> {
        get_local_variables(self, scope_key)
    }

    fn get_parent_scope(&self, scope_key: Key) -> Result<Option<Key>> {
        get_parent_scope(self, scope_key)
    }
}

impl ReadOnlyVariableTable for PartitionStoreTransaction<'_> {
    fn get_variable(&self, scope_key: Key, name: &str) -> Result<Option<serde_json::Value>> {
        self.get_value(TableKind::Variable, &variable_key(scope_key, name))
    }

    fn get_local_variables(&self, scope_key: Key) -> Result<Variables> {
        get_local_variables(self, scope_key)
    }

    fn get_parent_scope(&self, scope_key: Key) -> Result<Option<Key>> {
        get_parent_scope(self, scope_key)
    }
}

impl VariableTable for PartitionStoreTransaction<'_> {
    fn put_variable_scope(&mut self, scope_key: Key, parent: Option<Key>) -> Result<()> {
        self.put_value(TableKind::VariableScope, self::scope_key(scope_key), &parent)
    }

    fn delete_variable_scope(&mut self, scope: Key) -> Result<()> {
        for (key, _) in self.scan_raw(TableKind::Variable, &scope_key(scope)) {
            self.delete_raw(TableKind::Variable, key);
        }
        self.delete_raw(TableKind::VariableScope, scope_key(scope));
        Ok(())
    }

    fn put_variable(&mut self, scope_key: Key, name: &str, value: serde_json::Value) -> Result<()> {
        self.put_value(TableKind::Variable, variable_key(scope_key, name), &value)
    }
}
