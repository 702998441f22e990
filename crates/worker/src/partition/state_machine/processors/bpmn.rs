// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Lifecycle of BPMN element instances: activation, completion and termination.

use tracing::{debug, trace};

use cadence_storage_api::element_instance_table::{ElementInstance, ElementInstanceState};
use cadence_storage_api::Transaction;
use cadence_types::errors::{ErrorKind, Failure};
use cadence_types::identifiers::Key;
use cadence_types::process::{BpmnElementType, Element, Process};
use cadence_wal_protocol::intent::{ProcessEventIntent, ProcessInstanceIntent};
use cadence_wal_protocol::value::{ProcessEventRecord, ProcessInstanceRecord};
use cadence_wal_protocol::RejectionType;

use crate::partition::state_machine::behavior::catch_event;
use crate::partition::state_machine::behavior::element_activation::instance_record;
use crate::partition::state_machine::behavior::event_trigger::{
    activate_triggered_event, find_trigger,
};
use crate::partition::state_machine::behavior::incident::raise_incident;
use crate::partition::state_machine::behavior::variables::{
    propagate_variables, set_local_variables,
};
use crate::partition::state_machine::{
    element, CommandHandler, ProcessingError, StateMachineApplyContext,
};

pub(crate) struct OnActivateElementCommand {
    pub(crate) key: Key,
    pub(crate) value: ProcessInstanceRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnActivateElementCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnActivateElementCommand { key, value } = self;

        if ctx.storage.get_element_instance(key)?.is_some() {
            ctx.reject(
                RejectionType::InvalidState,
                format!("Expected to activate element instance '{key}', but it already exists"),
            );
            return Ok(());
        }

        let process = ctx.process(value.process_definition_key)?;
        let element = element(&process, &value.element_id)?;

        if let Some(flow_scope_key) = value.flow_scope_key {
            let Some(flow_scope) = ctx.storage.get_element_instance(flow_scope_key)? else {
                ctx.reject(
                    RejectionType::NotFound,
                    format!(
                        "Expected to activate element '{}' in flow scope '{flow_scope_key}', \
                        but no such element instance exists",
                        value.element_id
                    ),
                );
                return Ok(());
            };
            if !flow_scope.is_active() {
                ctx.reject(
                    RejectionType::InvalidState,
                    format!(
                        "Expected to activate element '{}' in an active flow scope, but flow \
                        scope '{flow_scope_key}' is {}",
                        value.element_id, flow_scope.state
                    ),
                );
                return Ok(());
            }
            if flow_scope.is_interrupted()
                && !is_interrupting_event_sub_process(&process, element, &flow_scope)
            {
                debug!(
                    %flow_scope_key,
                    element_id = %value.element_id,
                    "Flow scope is interrupted, element is not activated"
                );
                ctx.reject(
                    RejectionType::InvalidState,
                    format!(
                        "Expected to activate element '{}', but flow scope '{flow_scope_key}' was \
                        interrupted by '{}'",
                        value.element_id,
                        flow_scope.interrupting_element_id.as_deref().unwrap_or_default()
                    ),
                );
                return Ok(());
            }
        }

        if element.element_type == BpmnElementType::SequenceFlow {
            ctx.reject(
                RejectionType::InvalidArgument,
                format!(
                    "Expected to activate a flow node, but '{}' is a sequence flow",
                    element.id
                ),
            );
            return Ok(());
        }
        if element.multi_instance {
            return Err(ProcessingError::UnsupportedMultiInstanceBodyActivation {
                element_id: element.id.clone(),
                flow_scope_id: element.id.clone(),
            });
        }

        ctx.append_event(key, ProcessInstanceIntent::ElementActivating, value.clone())?;

        match element.element_type {
            BpmnElementType::Process | BpmnElementType::SubProcess => {
                if !subscribe_or_raise_incident(ctx, &process, key, &value)? {
                    return Ok(());
                }
                ctx.append_event(key, ProcessInstanceIntent::ElementActivated, value.clone())?;
                match process.none_start_event(&element.id) {
                    Some(start) => {
                        let start_key = ctx.next_key()?;
                        ctx.append_command(
                            start_key,
                            ProcessInstanceIntent::ActivateElement,
                            instance_record(&process, value.process_instance_key, start, Some(key)),
                        );
                    }
                    None => raise_incident(
                        ctx,
                        key,
                        &value,
                        Failure::new(
                            format!(
                                "Expected to activate the none start event of '{}', but there \
                                is none",
                                element.id
                            ),
                            ErrorKind::ModelError,
                        )
                        .with_scope(key),
                    )?,
                }
            }
            BpmnElementType::EventSubProcess => {
                ctx.append_event(key, ProcessInstanceIntent::ElementActivated, value.clone())?;
                activate_event_sub_process_start(ctx, &process, element, key, &value)?;
            }
            BpmnElementType::StartEvent
            | BpmnElementType::EndEvent
            | BpmnElementType::BoundaryEvent => {
                ctx.append_event(key, ProcessInstanceIntent::ElementActivated, value.clone())?;
                ctx.append_command(key, ProcessInstanceIntent::CompleteElement, value);
            }
            BpmnElementType::IntermediateCatchEvent
            | BpmnElementType::ReceiveTask
            | BpmnElementType::ServiceTask
            | BpmnElementType::EventBasedGateway => {
                if subscribe_or_raise_incident(ctx, &process, key, &value)? {
                    ctx.append_event(key, ProcessInstanceIntent::ElementActivated, value)?;
                }
            }
            BpmnElementType::SequenceFlow => {}
        }
        Ok(())
    }
}

/// The event sub process whose start event interrupted the flow scope may still be activated.
fn is_interrupting_event_sub_process(
    process: &Process,
    element: &Element,
    flow_scope: &ElementInstance,
) -> bool {
    element.element_type == BpmnElementType::EventSubProcess
        && process
            .event_sub_process_start_event(&element.id)
            .is_some_and(|start| {
                flow_scope.interrupting_element_id.as_deref() == Some(start.id.as_str())
            })
}

/// Returns false if an incident was raised instead.
fn subscribe_or_raise_incident<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    key: Key,
    value: &ProcessInstanceRecord,
) -> Result<bool, ProcessingError> {
    match catch_event::subscribe_to_events(ctx, process, key, value)? {
        Ok(()) => Ok(true),
        Err(failure) => {
            raise_incident(ctx, key, value, failure)?;
            Ok(false)
        }
    }
}

/// The start event of the event sub process consumes the trigger which was queued in the
/// enclosing container.
fn activate_event_sub_process_start<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    event_sub_process: &Element,
    key: Key,
    value: &ProcessInstanceRecord,
) -> Result<(), ProcessingError> {
    let Some(start) = process.event_sub_process_start_event(&event_sub_process.id) else {
        raise_incident(
            ctx,
            key,
            value,
            Failure::new(
                format!(
                    "Expected to activate the start event of the event sub process '{}', but \
                    there is none",
                    event_sub_process.id
                ),
                ErrorKind::ModelError,
            )
            .with_scope(key),
        )?;
        return Ok(());
    };
    let start_record = instance_record(process, value.process_instance_key, start, Some(key));

    let trigger = match value.flow_scope_key {
        Some(container_key) => find_trigger(&*ctx.storage, container_key, Some(&start.id))?
            .map(|trigger| (container_key, trigger)),
        None => None,
    };
    let Some((container_key, trigger)) = trigger else {
        let start_key = ctx.next_key()?;
        ctx.append_command(start_key, ProcessInstanceIntent::ActivateElement, start_record);
        return Ok(());
    };

    ctx.append_event(
        trigger.event_key,
        ProcessEventIntent::Triggered,
        ProcessEventRecord {
            scope_key: container_key,
            target_element_id: trigger.element_id,
            variables: trigger.variables.clone(),
            process_definition_key: process.key,
            process_instance_key: value.process_instance_key,
        },
    )?;
    set_local_variables(ctx, key, value.process_instance_key, &trigger.variables)?;

    let start_key = ctx.next_key()?;
    ctx.append_event(start_key, ProcessInstanceIntent::ElementActivating, start_record.clone())?;
    ctx.append_event(start_key, ProcessInstanceIntent::ElementActivated, start_record.clone())?;
    ctx.append_command(start_key, ProcessInstanceIntent::CompleteElement, start_record);
    Ok(())
}

pub(crate) struct OnCompleteElementCommand {
    pub(crate) key: Key,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnCompleteElementCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let key = self.key;
        let Some(instance) = ctx.storage.get_element_instance(key)? else {
            ctx.reject(
                RejectionType::NotFound,
                format!("Expected to complete element instance '{key}', but it does not exist"),
            );
            return Ok(());
        };
        if instance.state != ElementInstanceState::Activated {
            ctx.reject(
                RejectionType::InvalidState,
                format!(
                    "Expected element instance '{key}' to be in state ELEMENT_ACTIVATED, but it \
                    is {}",
                    instance.state
                ),
            );
            return Ok(());
        }

        let process = ctx.process(instance.value.process_definition_key)?;
        let element = element(&process, &instance.value.element_id)?;
        let value = instance.value.clone();
        let process_instance_key = value.process_instance_key;

        ctx.append_event(key, ProcessInstanceIntent::ElementCompleting, value.clone())?;
        catch_event::unsubscribe_from_events(ctx, key)?;

        let mut gateway_trigger = None;
        match element.element_type {
            BpmnElementType::IntermediateCatchEvent | BpmnElementType::ReceiveTask => {
                if let Some(trigger) = find_trigger(&*ctx.storage, key, Some(&element.id))? {
                    ctx.append_event(
                        trigger.event_key,
                        ProcessEventIntent::Triggered,
                        ProcessEventRecord {
                            scope_key: key,
                            target_element_id: trigger.element_id,
                            variables: trigger.variables.clone(),
                            process_definition_key: process.key,
                            process_instance_key,
                        },
                    )?;
                    set_local_variables(ctx, key, process_instance_key, &trigger.variables)?;
                }
            }
            BpmnElementType::EventBasedGateway => {
                gateway_trigger = find_trigger(&*ctx.storage, key, None)?;
            }
            _ => {}
        }

        if !matches!(
            element.element_type,
            BpmnElementType::Process | BpmnElementType::SubProcess
        ) {
            if let Some(flow_scope_key) = value.flow_scope_key {
                let local = ctx.storage.get_local_variables(key)?;
                if !local.is_empty() {
                    propagate_variables(ctx, flow_scope_key, process_instance_key, &local)?;
                }
            }
        }

        ctx.append_event(key, ProcessInstanceIntent::ElementCompleted, value.clone())?;

        let Some(flow_scope_key) = value.flow_scope_key else {
            debug!(%process_instance_key, "Process instance completed");
            return Ok(());
        };

        if element.element_type == BpmnElementType::EventBasedGateway {
            if let Some(trigger) = gateway_trigger {
                activate_triggered_event(
                    ctx,
                    &process,
                    key,
                    flow_scope_key,
                    process_instance_key,
                    trigger,
                )?;
            }
        } else {
            take_outgoing_sequence_flows(ctx, &process, element, flow_scope_key, &value)?;
        }

        on_child_completed(ctx, flow_scope_key)
    }
}

fn take_outgoing_sequence_flows<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    element: &Element,
    flow_scope_key: Key,
    value: &ProcessInstanceRecord,
) -> Result<(), ProcessingError> {
    for flow in process.outgoing(&element.id) {
        let flow_key = ctx.next_key()?;
        trace!(flow_id = %flow.id, "Take sequence flow");
        ctx.append_event(
            flow_key,
            ProcessInstanceIntent::SequenceFlowTaken,
            ProcessInstanceRecord {
                element_id: flow.id.clone(),
                bpmn_element_type: BpmnElementType::SequenceFlow,
                flow_scope_key: Some(flow_scope_key),
                ..value.clone()
            },
        )?;

        let target = crate::partition::state_machine::element(process, &flow.target)?;
        let target_key = ctx.next_key()?;
        ctx.append_command(
            target_key,
            ProcessInstanceIntent::ActivateElement,
            instance_record(process, value.process_instance_key, target, Some(flow_scope_key)),
        );
    }
    Ok(())
}

/// Completes the flow scope once nothing is left to do inside of it.
fn on_child_completed<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    flow_scope_key: Key,
) -> Result<(), ProcessingError> {
    let Some(flow_scope) = ctx.storage.get_element_instance(flow_scope_key)? else {
        return Ok(());
    };
    if flow_scope.is_active()
        && flow_scope.active_children == 0
        && flow_scope.active_sequence_flows == 0
    {
        ctx.append_command(
            flow_scope_key,
            ProcessInstanceIntent::CompleteElement,
            flow_scope.value,
        );
    }
    Ok(())
}

pub(crate) struct OnTerminateElementCommand {
    pub(crate) key: Key,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnTerminateElementCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let key = self.key;
        let Some(instance) = ctx.storage.get_element_instance(key)? else {
            ctx.reject(
                RejectionType::NotFound,
                format!("Expected to terminate element instance '{key}', but it does not exist"),
            );
            return Ok(());
        };
        if !instance.can_terminate() {
            ctx.reject(
                RejectionType::InvalidState,
                format!(
                    "Expected to terminate element instance '{key}', but it is {}",
                    instance.state
                ),
            );
            return Ok(());
        }

        let process = ctx.process(instance.value.process_definition_key)?;
        ctx.append_event(
            key,
            ProcessInstanceIntent::ElementTerminating,
            instance.value.clone(),
        )?;
        catch_event::unsubscribe_from_events(ctx, key)?;

        if instance.value.bpmn_element_type.is_container() {
            let children = ctx.storage.get_children(key)?;
            for child in &children {
                if child.can_terminate() {
                    ctx.append_command(
                        child.key,
                        ProcessInstanceIntent::TerminateElement,
                        child.value.clone(),
                    );
                }
            }
            if !children.is_empty() {
                trace!(%key, children = children.len(), "Wait for children to terminate");
                return Ok(());
            }
        }

        finish_termination(ctx, &process, key, instance.value)
    }
}

fn finish_termination<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    key: Key,
    value: ProcessInstanceRecord,
) -> Result<(), ProcessingError> {
    // an interrupting boundary event waits for the termination of its activity
    let boundary_trigger = find_trigger(&*ctx.storage, key, None)?.filter(|trigger| {
        process
            .element(&trigger.element_id)
            .is_some_and(|e| e.attached_to.as_deref() == Some(value.element_id.as_str()))
    });

    ctx.append_event(key, ProcessInstanceIntent::ElementTerminated, value.clone())?;

    let Some(flow_scope_key) = value.flow_scope_key else {
        debug!(process_instance_key = %value.process_instance_key, "Process instance terminated");
        return Ok(());
    };

    let flow_scope = ctx.storage.get_element_instance(flow_scope_key)?;
    match (boundary_trigger, flow_scope) {
        (Some(trigger), Some(flow_scope)) if flow_scope.is_active() => activate_triggered_event(
            ctx,
            process,
            key,
            flow_scope_key,
            value.process_instance_key,
            trigger,
        ),
        _ => on_child_terminated(ctx, process, flow_scope_key),
    }
}

fn on_child_terminated<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    flow_scope_key: Key,
) -> Result<(), ProcessingError> {
    let Some(flow_scope) = ctx.storage.get_element_instance(flow_scope_key)? else {
        return Ok(());
    };
    if flow_scope.active_children > 0 {
        return Ok(());
    }

    match flow_scope.state {
        ElementInstanceState::Terminating => {
            finish_termination(ctx, process, flow_scope_key, flow_scope.value)
        }
        ElementInstanceState::Activated if flow_scope.is_interrupted() => {
            let interrupting = flow_scope.interrupting_element_id.as_deref();
            match find_trigger(&*ctx.storage, flow_scope_key, interrupting)? {
                Some(trigger) => activate_triggered_event(
                    ctx,
                    process,
                    flow_scope_key,
                    flow_scope_key,
                    flow_scope.value.process_instance_key,
                    trigger,
                ),
                None => on_child_completed(ctx, flow_scope_key),
            }
        }
        ElementInstanceState::Activated => on_child_completed(ctx, flow_scope_key),
        _ => Ok(()),
    }
}
