// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tracing::debug;

use cadence_storage_api::Transaction;
use cadence_types::process::{BpmnElementType, Process};
use cadence_wal_protocol::intent::{ProcessInstanceCreationIntent, ProcessInstanceIntent};
use cadence_wal_protocol::value::ProcessInstanceCreationRecord;
use cadence_wal_protocol::RejectionType;

use crate::partition::state_machine::behavior::element_activation::{
    activate_element, instance_record,
};
use crate::partition::state_machine::behavior::variables::set_local_variables;
use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

pub(crate) struct OnCreateProcessInstanceCommand {
    pub(crate) value: ProcessInstanceCreationRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnCreateProcessInstanceCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnCreateProcessInstanceCommand { value } = self;

        let process = match value.process_definition_key {
            Some(key) => ctx.process(key).ok(),
            None => ctx.latest_process(&value.bpmn_process_id),
        };
        let Some(process) = process else {
            ctx.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to find process definition with process ID '{}', but none found",
                    value.bpmn_process_id
                ),
            );
            return Ok(());
        };

        if let Err(reason) = validate_start_instructions(&process, &value.start_instructions) {
            ctx.reject(RejectionType::InvalidArgument, reason);
            return Ok(());
        }

        let process_instance_key = ctx.next_key()?;
        ctx.append_event(
            process_instance_key,
            ProcessInstanceCreationIntent::Created,
            ProcessInstanceCreationRecord {
                bpmn_process_id: process.bpmn_process_id.clone(),
                process_definition_key: Some(process.key),
                process_instance_key: Some(process_instance_key),
                ..value.clone()
            },
        )?;
        debug!(
            %process_instance_key,
            bpmn_process_id = %process.bpmn_process_id,
            version = process.version,
            "Create process instance"
        );

        if value.start_instructions.is_empty() {
            set_local_variables(ctx, process_instance_key, process_instance_key, &value.variables)?;
            ctx.append_command(
                process_instance_key,
                ProcessInstanceIntent::ActivateElement,
                instance_record(&process, process_instance_key, process.root(), None),
            );
            return Ok(());
        }

        for element_id in &value.start_instructions {
            activate_element(
                ctx,
                &process,
                process_instance_key,
                element_id,
                None,
                |ctx, _, key| {
                    if key == process_instance_key {
                        set_local_variables(ctx, key, process_instance_key, &value.variables)
                    } else {
                        Ok(())
                    }
                },
            )?;
        }
        Ok(())
    }
}

fn validate_start_instructions(process: &Process, element_ids: &[String]) -> Result<(), String> {
    for element_id in element_ids {
        let Some(element) = process.element(element_id) else {
            return Err(format!(
                "Expected to create instance of process with start instructions but no element \
                found with id '{element_id}'"
            ));
        };
        if matches!(
            element.element_type,
            BpmnElementType::Process
                | BpmnElementType::SequenceFlow
                | BpmnElementType::BoundaryEvent
        ) {
            return Err(format!(
                "Expected to create instance of process with start instructions but the element \
                with id '{element_id}' targets unsupported element type {}",
                element.element_type
            ));
        }
        let chain = process.flow_scope_chain(element_id);
        if chain
            .iter()
            .any(|scope| scope.element_type == BpmnElementType::EventSubProcess)
            || element.element_type == BpmnElementType::EventSubProcess
        {
            return Err(format!(
                "Expected to create instance of process with start instructions but the element \
                with id '{element_id}' belongs to an event sub process"
            ));
        }
        if chain.iter().any(|scope| scope.multi_instance) {
            return Err(format!(
                "Expected to create instance of process with start instructions but the element \
                with id '{element_id}' is inside a multi-instance sub process"
            ));
        }
    }
    Ok(())
}
