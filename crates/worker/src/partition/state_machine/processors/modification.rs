// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeSet;

use tracing::debug;

use cadence_storage_api::element_instance_table::ReadOnlyElementInstanceTable;
use cadence_storage_api::{StorageError, Transaction};
use cadence_types::identifiers::Key;
use cadence_types::process::{BpmnElementType, Process};
use cadence_wal_protocol::intent::{ProcessInstanceIntent, ProcessInstanceModificationIntent};
use cadence_wal_protocol::value::{ActivateInstruction, ProcessInstanceModificationRecord};
use cadence_wal_protocol::RejectionType;

use crate::partition::state_machine::behavior::element_activation::activate_element;
use crate::partition::state_machine::behavior::variables::set_local_variables;
use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

pub(crate) struct OnModifyProcessInstanceCommand {
    pub(crate) value: ProcessInstanceModificationRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnModifyProcessInstanceCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnModifyProcessInstanceCommand { value } = self;
        let process_instance_key = value.process_instance_key;

        let process_instance = match ctx.storage.get_element_instance(process_instance_key)? {
            Some(instance) if instance.value.flow_scope_key.is_none() => instance,
            _ => {
                ctx.reject(
                    RejectionType::NotFound,
                    format!(
                        "Expected to modify process instance but no process instance found with \
                        key '{process_instance_key}'"
                    ),
                );
                return Ok(());
            }
        };
        if !process_instance.is_active() {
            ctx.reject(
                RejectionType::InvalidState,
                format!(
                    "Expected to modify an active process instance, but process instance \
                    '{process_instance_key}' is {}",
                    process_instance.state
                ),
            );
            return Ok(());
        }

        let process = ctx.process(process_instance.value.process_definition_key)?;
        if let Err(reason) = validate(&*ctx.storage, &process, &value)? {
            ctx.reject(RejectionType::InvalidArgument, reason);
            return Ok(());
        }

        let mut activated = BTreeSet::new();
        for instruction in &value.activate_instructions {
            // the variables of an instruction are set on the flow scope of its element
            let variable_scope_id = process
                .flow_scope_of(&instruction.element_id)
                .map(|scope| scope.id.clone());
            let result = activate_element(
                ctx,
                &process,
                process_instance_key,
                &instruction.element_id,
                instruction.ancestor_scope_key,
                |ctx, element_id, key| {
                    if variable_scope_id.as_deref() == Some(element_id) {
                        set_local_variables(ctx, key, process_instance_key, &instruction.variables)
                    } else {
                        Ok(())
                    }
                },
            )?;
            activated.extend(result.flow_scope_keys);
            activated.insert(result.element_instance_key);
        }

        for key in &value.terminate_instructions {
            if let Some(instance) = ctx.storage.get_element_instance(*key)? {
                ctx.append_command(*key, ProcessInstanceIntent::TerminateElement, instance.value);
            }
        }

        debug!(
            %process_instance_key,
            activated = activated.len(),
            terminated = value.terminate_instructions.len(),
            "Modify process instance"
        );
        ctx.append_event(
            process_instance_key,
            ProcessInstanceModificationIntent::Modified,
            ProcessInstanceModificationRecord {
                activated_element_instance_keys: activated.into_iter().collect(),
                ..value
            },
        )?;
        Ok(())
    }
}

/// The outer result carries storage errors, the inner one the reason to reject the command.
fn validate<S: ReadOnlyElementInstanceTable>(
    storage: &S,
    process: &Process,
    value: &ProcessInstanceModificationRecord,
) -> Result<Result<(), String>, StorageError> {
    for instruction in &value.activate_instructions {
        let process_instance_key = value.process_instance_key;
        if let Err(reason) =
            validate_activate_instruction(storage, process, process_instance_key, instruction)?
        {
            return Ok(Err(reason));
        }
    }

    for key in &value.terminate_instructions {
        match storage.get_element_instance(*key)? {
            Some(instance)
                if instance.value.process_instance_key == value.process_instance_key
                    && instance.can_terminate() => {}
            _ => {
                return Ok(Err(format!(
                    "Expected to modify instance of process '{}' but it contains one or more \
                    terminate instructions with an element instance that could not be found: \
                    '{key}'",
                    process.bpmn_process_id
                )))
            }
        }
    }
    Ok(Ok(()))
}

fn validate_activate_instruction<S: ReadOnlyElementInstanceTable>(
    storage: &S,
    process: &Process,
    process_instance_key: Key,
    instruction: &ActivateInstruction,
) -> Result<Result<(), String>, StorageError> {
    let element_id = &instruction.element_id;
    let Some(element) = process.element(element_id) else {
        return Ok(Err(format!(
            "Expected to modify instance of process '{}' but it contains one or more activate \
            instructions with an element that could not be found: '{element_id}'",
            process.bpmn_process_id
        )));
    };
    if matches!(
        element.element_type,
        BpmnElementType::Process | BpmnElementType::SequenceFlow | BpmnElementType::BoundaryEvent
    ) {
        return Ok(Err(format!(
            "Expected to modify instance of process '{}' but it contains one or more activate \
            instructions for an element with unsupported type {}: '{element_id}'",
            process.bpmn_process_id, element.element_type
        )));
    }

    let Some(ancestor_scope_key) = instruction.ancestor_scope_key else {
        return Ok(Ok(()));
    };
    let ancestor = match storage.get_element_instance(ancestor_scope_key)? {
        Some(ancestor)
            if ancestor.value.process_instance_key == process_instance_key
                && ancestor.is_active() =>
        {
            ancestor
        }
        _ => {
            return Ok(Err(format!(
                "Expected to modify instance of process '{}' but it contains one or more activate \
                instructions with an ancestor scope key that does not exist, or is not in an \
                active state: '{ancestor_scope_key}'",
                process.bpmn_process_id
            )))
        }
    };

    let is_ancestor = ancestor.key == process_instance_key
        || process
            .flow_scope_chain(element_id)
            .iter()
            .any(|scope| scope.id == ancestor.value.element_id);
    if !is_ancestor {
        return Ok(Err(format!(
            "Expected to modify instance of process '{}' but it contains one or more activate \
            instructions with an ancestor scope key that is not an ancestor of the element to \
            activate: '{ancestor_scope_key}' is not an ancestor of '{element_id}'",
            process.bpmn_process_id
        )));
    }
    Ok(Ok(()))
}
