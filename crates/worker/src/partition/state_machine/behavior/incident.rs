// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tracing::info;

use cadence_storage_api::{StorageError, Transaction};
use cadence_types::errors::Failure;
use cadence_types::identifiers::Key;
use cadence_wal_protocol::intent::IncidentIntent;
use cadence_wal_protocol::value::{IncidentRecord, ProcessInstanceRecord};

use crate::partition::state_machine::StateMachineApplyContext;

/// Raises an incident for the element instance. The element instance stays where it is until
/// the incident is resolved.
pub(crate) fn raise_incident<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    element_instance_key: Key,
    instance: &ProcessInstanceRecord,
    failure: Failure,
) -> Result<(), StorageError> {
    info!(
        %element_instance_key,
        element_id = %instance.element_id,
        "Raise incident: {failure}"
    );
    let key = ctx.next_key()?;
    ctx.append_event(
        key,
        IncidentIntent::Created,
        IncidentRecord {
            error_kind: failure.error_kind,
            error_message: failure.message,
            bpmn_process_id: instance.bpmn_process_id.clone(),
            process_instance_key: instance.process_instance_key,
            element_id: instance.element_id.clone(),
            element_instance_key,
            variable_scope_key: failure.scope_key,
        },
    )
}
