// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Turns queued event triggers into element activations.

use tracing::debug;

use cadence_storage_api::element_instance_table::{ElementInstance, ReadOnlyElementInstanceTable};
use cadence_storage_api::event_scope_table::{EventTrigger, ReadOnlyEventScopeTable};
use cadence_storage_api::{StorageError, Transaction};
use cadence_types::identifiers::Key;
use cadence_types::process::{BpmnElementType, Process};
use cadence_types::Variables;
use cadence_wal_protocol::intent::{ProcessEventIntent, ProcessInstanceIntent};
use cadence_wal_protocol::value::ProcessEventRecord;

use super::catch_event;
use super::element_activation::instance_record;
use super::variables::set_local_variables;
use crate::partition::state_machine::{element, ProcessingError, StateMachineApplyContext};

/// Queues a trigger for the catch event `target_element_id` in the event scope `scope_key`.
pub(crate) fn triggering_process_event<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    process_instance_key: Key,
    scope_key: Key,
    target_element_id: &str,
    variables: Variables,
) -> Result<EventTrigger, StorageError> {
    let event_key = ctx.next_key()?;
    ctx.append_event(
        event_key,
        ProcessEventIntent::Triggering,
        ProcessEventRecord {
            scope_key,
            target_element_id: target_element_id.to_owned(),
            variables: variables.clone(),
            process_definition_key: process.key,
            process_instance_key,
        },
    )?;
    Ok(EventTrigger {
        event_key,
        element_id: target_element_id.to_owned(),
        variables,
    })
}

/// Whether the catch event `element_id` can be triggered in the event scope of the element
/// instance.
pub(crate) fn can_trigger_element<S>(
    storage: &S,
    element_instance_key: Key,
    element_id: &str,
) -> Result<bool, StorageError>
where
    S: ReadOnlyElementInstanceTable + ReadOnlyEventScopeTable,
{
    let Some(instance) = storage.get_element_instance(element_instance_key)? else {
        return Ok(false);
    };
    if !instance.is_active() {
        return Ok(false);
    }
    Ok(storage
        .get_event_scope(element_instance_key)?
        .is_some_and(|scope| scope.can_trigger(element_id)))
}

/// The oldest trigger of the event scope, optionally only for the given catch event.
pub(crate) fn find_trigger<S: ReadOnlyEventScopeTable>(
    storage: &S,
    scope_key: Key,
    element_id: Option<&str>,
) -> Result<Option<EventTrigger>, StorageError> {
    Ok(storage.get_event_scope(scope_key)?.and_then(|scope| {
        scope
            .triggers
            .into_iter()
            .find(|t| element_id.map_or(true, |id| t.element_id == id))
    }))
}

/// Continues with the trigger which was just queued in the event scope `scope`.
pub(crate) fn activate_element<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    scope: &ElementInstance,
    trigger: EventTrigger,
) -> Result<(), ProcessingError> {
    let scope_type = scope.value.bpmn_element_type;

    if scope.value.element_id == trigger.element_id
        || scope_type == BpmnElementType::EventBasedGateway
    {
        // the catch event is the waiting element itself
        ctx.append_command(
            scope.key,
            ProcessInstanceIntent::CompleteElement,
            scope.value.clone(),
        );
        return Ok(());
    }

    if process.is_event_sub_process_start(&trigger.element_id) {
        return trigger_event_sub_process(ctx, process, scope, trigger);
    }

    let catch_event = element(process, &trigger.element_id)?;
    if catch_event.interrupting {
        debug!(
            element_instance_key = %scope.key,
            boundary_event = %trigger.element_id,
            "Interrupting boundary event terminates the activity"
        );
        // the boundary event is activated when the activity is terminated
        ctx.append_command(
            scope.key,
            ProcessInstanceIntent::TerminateElement,
            scope.value.clone(),
        );
        return Ok(());
    }

    let flow_scope_key = scope
        .parent_key()
        .ok_or(ProcessingError::MissingElementInstance(scope.key))?;
    activate_triggered_event(
        ctx,
        process,
        scope.key,
        flow_scope_key,
        scope.value.process_instance_key,
        trigger,
    )
}

/// Activates the event sub process of the start event `trigger.element_id` in the container
/// `scope`. An interrupting start event terminates all other children of the container first.
pub(crate) fn trigger_event_sub_process<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    scope: &ElementInstance,
    trigger: EventTrigger,
) -> Result<(), ProcessingError> {
    // the applier of the trigger marked the scope, read the current state
    let scope = ctx
        .storage
        .get_element_instance(scope.key)?
        .ok_or(ProcessingError::MissingElementInstance(scope.key))?;

    if let Some(interrupting) = &scope.interrupting_element_id {
        if *interrupting != trigger.element_id {
            debug!(
                scope_key = %scope.key,
                %interrupting,
                discarded = %trigger.element_id,
                "Scope is already interrupted, discard trigger"
            );
            ctx.append_event(
                trigger.event_key,
                ProcessEventIntent::Triggered,
                ProcessEventRecord {
                    scope_key: scope.key,
                    target_element_id: trigger.element_id,
                    variables: trigger.variables,
                    process_definition_key: process.key,
                    process_instance_key: scope.value.process_instance_key,
                },
            )?;
            return Ok(());
        }
    }

    let start_event = element(process, &trigger.element_id)?;
    if start_event.interrupting {
        catch_event::unsubscribe_event_subprocesses(ctx, process, scope.key)?;

        let children = ctx.storage.get_children(scope.key)?;
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
            debug!(
                scope_key = %scope.key,
                children = children.len(),
                "Terminate children before the interrupting event sub process is activated"
            );
            return Ok(());
        }
    }

    activate_triggered_event(
        ctx,
        process,
        scope.key,
        scope.key,
        scope.value.process_instance_key,
        trigger,
    )
}

/// Activates the catch event of the trigger in the flow scope `flow_scope_key`.
///
/// The trigger of an event sub process start event is kept, the event sub process consumes
/// it when it is activated.
pub(crate) fn activate_triggered_event<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    event_scope_key: Key,
    flow_scope_key: Key,
    process_instance_key: Key,
    trigger: EventTrigger,
) -> Result<(), ProcessingError> {
    if process.is_event_sub_process_start(&trigger.element_id) {
        let event_sub_process = process
            .flow_scope_of(&trigger.element_id)
            .ok_or_else(|| ProcessingError::MissingElement {
                process_definition_key: process.key,
                element_id: trigger.element_id.clone(),
            })?;
        let key = ctx.next_key()?;
        ctx.append_command(
            key,
            ProcessInstanceIntent::ActivateElement,
            instance_record(
                process,
                process_instance_key,
                event_sub_process,
                Some(flow_scope_key),
            ),
        );
        return Ok(());
    }

    let catch_event = element(process, &trigger.element_id)?;
    ctx.append_event(
        trigger.event_key,
        ProcessEventIntent::Triggered,
        ProcessEventRecord {
            scope_key: event_scope_key,
            target_element_id: trigger.element_id.clone(),
            variables: trigger.variables.clone(),
            process_definition_key: process.key,
            process_instance_key,
        },
    )?;

    let key = ctx.next_key()?;
    let record = instance_record(process, process_instance_key, catch_event, Some(flow_scope_key));
    ctx.append_event(key, ProcessInstanceIntent::ElementActivating, record.clone())?;
    ctx.append_event(key, ProcessInstanceIntent::ElementActivated, record.clone())?;
    if !trigger.variables.is_empty() {
        set_local_variables(ctx, key, process_instance_key, &trigger.variables)?;
    }
    ctx.append_command(key, ProcessInstanceIntent::CompleteElement, record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use googletest::prelude::*;

    use cadence_partition_store::PartitionStore;
    use cadence_storage_api::Storage;
    use cadence_types::expression::SimpleExpressionLanguage;
    use cadence_types::identifiers::{PartitionId, PartitionTopology};
    use cadence_types::process::{CatchEventKind, ProcessBuilder, ProcessRepository};
    use cadence_types::time::{ManualClock, MillisSinceEpoch};
    use cadence_wal_protocol::intent::{Intent, SignalIntent};
    use cadence_wal_protocol::value::SignalRecord;
    use cadence_wal_protocol::{Record, RecordType};

    use crate::partition::state_machine::{ActionCollector, StateMachine, Writers};

    type TestResult = std::result::Result<(), anyhow::Error>;

    fn interruptible() -> Process {
        let esp = |id: &'static str, start: &'static str, signal: &'static str| {
            move |b: ProcessBuilder| {
                b.event_start_event(
                    start,
                    CatchEventKind::Signal {
                        name: signal.into(),
                    },
                    true,
                )
                .end_event(format!("{id}_end"))
                .flow(start, format!("{id}_end"))
            }
        };
        ProcessBuilder::new("interruptible")
            .start_event("start")
            .service_task("work")
            .flow("start", "work")
            .event_sub_process("on_cancel", esp("on_cancel", "cancel_start", "cancel"))
            .event_sub_process("on_abort", esp("on_abort", "abort_start", "abort"))
            .build()
            .unwrap()
    }

    #[test]
    fn second_start_event_trigger_is_discarded_once_the_scope_is_interrupted() -> TestResult {
        let mut processes = ProcessRepository::default();
        let definition_key = processes.deploy(interruptible());
        let process = Arc::clone(processes.by_key(definition_key).unwrap());
        let partition_id = PartitionId::from(1);
        let state_machine = StateMachine::new(
            partition_id,
            PartitionTopology::new(partition_id, 1),
            Arc::new(processes),
            Arc::new(SimpleExpressionLanguage),
            Arc::new(ManualClock::new(MillisSinceEpoch::new(0))),
        );

        let command = Record {
            position: 1,
            source_position: None,
            record_type: RecordType::Command,
            key: None,
            intent: SignalIntent::Broadcast.into(),
            value: SignalRecord {
                signal_name: "abort".to_owned(),
                variables: Variables::new(),
            }
            .into(),
            rejection: None,
            distribution_key: None,
        };
        let mut store = PartitionStore::new(partition_id);
        let mut txn = store.transaction();
        let mut writers = Writers::new(1, 2);
        let mut actions = ActionCollector::new();
        let mut ctx = StateMachineApplyContext {
            storage: &mut txn,
            writers: &mut writers,
            action_collector: &mut actions,
            state_machine: &state_machine,
            command: &command,
        };

        let root = ctx.next_key()?;
        let root_record = instance_record(&process, root, process.root(), None);
        ctx.append_event(root, ProcessInstanceIntent::ElementActivating, root_record.clone())?;
        ctx.append_event(root, ProcessInstanceIntent::ElementActivated, root_record)?;
        let cancel = triggering_process_event(
            &mut ctx,
            &process,
            root,
            root,
            "cancel_start",
            Variables::new(),
        )?;
        // queued although the scope stopped accepting
        let abort = triggering_process_event(
            &mut ctx,
            &process,
            root,
            root,
            "abort_start",
            Variables::new(),
        )?;
        let scope = ctx
            .storage
            .get_element_instance(root)?
            .ok_or(ProcessingError::MissingElementInstance(root))?;

        trigger_event_sub_process(&mut ctx, &process, &scope, abort.clone())?;

        let scope = ctx
            .storage
            .get_element_instance(root)?
            .ok_or(ProcessingError::MissingElementInstance(root))?;
        assert_that!(scope.interrupting_element_id, some(eq("cancel_start")));
        let remaining: Vec<_> = ctx
            .storage
            .get_event_scope(root)?
            .map(|scope| scope.triggers.into_iter().map(|t| t.event_key).collect())
            .unwrap_or_default();
        assert_that!(remaining, eq(vec![cancel.event_key]));

        let last = writers.records().last().unwrap();
        assert_that!(last.record_type, eq(RecordType::Event));
        assert_that!(last.key, some(eq(abort.event_key)));
        assert_that!(last.intent, eq(Intent::from(ProcessEventIntent::Triggered)));
        assert!(writers
            .records()
            .iter()
            .all(|r| r.record_type != RecordType::Command));
        Ok(())
    }
}
