// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tracing::trace;

use cadence_storage_api::variable_table::ReadOnlyVariableTable;
use cadence_storage_api::{StorageError, Transaction};
use cadence_types::identifiers::Key;
use cadence_types::Variables;
use cadence_wal_protocol::intent::VariableIntent;
use cadence_wal_protocol::value::VariableRecord;

use crate::partition::state_machine::StateMachineApplyContext;

/// Sets the variables in the given scope. Variables whose value does not change are skipped.
pub(crate) fn set_local_variables<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    scope_key: Key,
    process_instance_key: Key,
    variables: &Variables,
) -> Result<(), StorageError> {
    for (name, value) in variables {
        set_variable(ctx, scope_key, process_instance_key, name, value)?;
    }
    Ok(())
}

/// Sets each variable in the nearest scope, starting at `scope_key`, which already defines it.
/// Variables no scope defines are created in the process instance scope.
pub(crate) fn propagate_variables<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    scope_key: Key,
    process_instance_key: Key,
    variables: &Variables,
) -> Result<(), StorageError> {
    for (name, value) in variables {
        let target =
            defining_scope(&*ctx.storage, scope_key, name)?.unwrap_or(process_instance_key);
        set_variable(ctx, target, process_instance_key, name, value)?;
    }
    Ok(())
}

fn defining_scope<S: ReadOnlyVariableTable>(
    storage: &S,
    scope_key: Key,
    name: &str,
) -> Result<Option<Key>, StorageError> {
    let mut current = Some(scope_key);
    while let Some(scope) = current {
        if storage.get_variable(scope, name)?.is_some() {
            return Ok(Some(scope));
        }
        current = storage.get_parent_scope(scope)?;
    }
    Ok(None)
}

fn set_variable<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    scope_key: Key,
    process_instance_key: Key,
    name: &str,
    value: &serde_json::Value,
) -> Result<(), StorageError> {
    let intent = match ctx.storage.get_variable(scope_key, name)? {
        Some(current) if current == *value => return Ok(()),
        Some(_) => VariableIntent::Updated,
        None => VariableIntent::Created,
    };
    trace!(%scope_key, %name, "Set variable");
    let key = ctx.next_key()?;
    ctx.append_event(
        key,
        intent,
        VariableRecord {
            name: name.to_owned(),
            value: value.clone(),
            scope_key,
            process_instance_key,
        },
    )
}
