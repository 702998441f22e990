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
use std::sync::Arc;

use tracing::trace;

use cadence_storage_api::distribution_table::PendingDistribution;
use cadence_storage_api::element_instance_table::{ElementInstance, ElementInstanceState};
use cadence_storage_api::event_scope_table::{EventScopeInstance, EventTrigger};
use cadence_storage_api::message_subscription_table::MessageSubscription;
use cadence_storage_api::process_message_subscription_table::{
    ProcessMessageSubscription, ProcessMessageSubscriptionState,
};
use cadence_storage_api::signal_subscription_table::SignalSubscription;
use cadence_storage_api::timer_table::TimerInstance;
use cadence_storage_api::{Result, Transaction};
use cadence_types::identifiers::Key;
use cadence_types::process::{BpmnElementType, Process, ProcessRepository};
use cadence_wal_protocol::intent::{
    CommandDistributionIntent, ErrorIntent, IncidentIntent, Intent, MessageSubscriptionIntent,
    ProcessEventIntent, ProcessInstanceIntent, ProcessMessageSubscriptionIntent,
    SignalSubscriptionIntent, TimerIntent, VariableIntent,
};
use cadence_wal_protocol::value::{
    CommandDistributionRecord, MessageSubscriptionRecord, ProcessEventRecord,
    ProcessInstanceRecord, ProcessMessageSubscriptionRecord, RecordValue,
};
use cadence_wal_protocol::Record;

/// Applies events to the partition state.
///
/// This is the only place where the state is changed, for live processing as well as for
/// replay. It must therefore only depend on the event and the current state.
#[derive(Debug, Clone)]
pub(crate) struct EventApplier {
    processes: Arc<ProcessRepository>,
}

impl EventApplier {
    pub(crate) fn new(processes: Arc<ProcessRepository>) -> Self {
        Self { processes }
    }

    pub(crate) fn apply<S: Transaction>(&self, storage: &mut S, record: &Record) -> Result<()> {
        if !record.is_event() {
            return Ok(());
        }
        trace!(%record, "Apply event");

        match (record.key, record.intent, &record.value) {
            (Some(key), Intent::ProcessInstance(intent), RecordValue::ProcessInstance(value)) => {
                self.apply_process_instance(storage, key, intent, value)
            }
            (Some(key), Intent::ProcessEvent(intent), RecordValue::ProcessEvent(value)) => {
                self.apply_process_event(storage, key, intent, value)
            }
            (Some(key), Intent::Timer(intent), RecordValue::Timer(value)) => match intent {
                TimerIntent::Created => storage.put_timer(TimerInstance {
                    key,
                    value: value.clone(),
                }),
                TimerIntent::Triggered | TimerIntent::Canceled => storage.delete_timer(key),
                TimerIntent::Trigger => Ok(()),
            },
            (
                Some(key),
                Intent::ProcessMessageSubscription(intent),
                RecordValue::ProcessMessageSubscription(value),
            ) => apply_process_message_subscription(storage, key, intent, value),
            (
                Some(key),
                Intent::MessageSubscription(intent),
                RecordValue::MessageSubscription(value),
            ) => apply_message_subscription(storage, key, intent, value),
            (
                Some(key),
                Intent::SignalSubscription(intent),
                RecordValue::SignalSubscription(value),
            ) => match intent {
                SignalSubscriptionIntent::Created => {
                    storage.put_signal_subscription(SignalSubscription {
                        key,
                        value: value.clone(),
                    })
                }
                SignalSubscriptionIntent::Deleted => storage
                    .delete_signal_subscription(value.catch_event_instance_key, &value.signal_name),
            },
            (
                Some(key),
                Intent::CommandDistribution(intent),
                RecordValue::CommandDistribution(value),
            ) => apply_command_distribution(storage, key, intent, value),
            (Some(_), Intent::Variable(intent), RecordValue::Variable(value)) => match intent {
                VariableIntent::Created | VariableIntent::Updated => {
                    storage.put_variable(value.scope_key, &value.name, value.value.clone())
                }
            },
            (
                Some(key),
                Intent::Incident(IncidentIntent::Created),
                RecordValue::Incident(value),
            ) => storage.put_incident(key, value.clone()),
            (_, Intent::Error(ErrorIntent::Created), RecordValue::Error(value)) => {
                match value.process_instance_key {
                    Some(process_instance_key) => storage.ban_instance(process_instance_key),
                    None => Ok(()),
                }
            }
            // creation, modification, message and signal events only inform about the command
            _ => Ok(()),
        }
    }

    fn process(&self, value: &ProcessInstanceRecord) -> Option<&Process> {
        self.processes
            .by_key(value.process_definition_key)
            .map(|p| p.as_ref())
    }

    fn apply_process_instance<S: Transaction>(
        &self,
        storage: &mut S,
        key: Key,
        intent: ProcessInstanceIntent,
        value: &ProcessInstanceRecord,
    ) -> Result<()> {
        match intent {
            ProcessInstanceIntent::ElementActivating => {
                if let Some(parent_key) = value.flow_scope_key {
                    if let Some(mut parent) = storage.get_element_instance(parent_key)? {
                        parent.active_children += 1;
                        if self.is_reached_by_sequence_flow(value) {
                            parent.active_sequence_flows =
                                parent.active_sequence_flows.saturating_sub(1);
                        }
                        storage.put_element_instance(parent)?;
                    }
                }
                storage.put_element_instance(ElementInstance::new(key, value.clone()))?;
                storage.put_variable_scope(key, value.flow_scope_key)?;
                if let Some(event_scope) = self.new_event_scope(value) {
                    storage.put_event_scope(key, event_scope)?;
                }
                Ok(())
            }
            ProcessInstanceIntent::ElementActivated
            | ProcessInstanceIntent::ElementCompleting
            | ProcessInstanceIntent::ElementTerminating => {
                update_state(storage, key, intent).map(|_| ())
            }
            ProcessInstanceIntent::ElementCompleted | ProcessInstanceIntent::ElementTerminated => {
                if let Some(instance) = update_state(storage, key, intent)? {
                    if let Some(mut parent) = instance
                        .parent_key()
                        .map(|k| storage.get_element_instance(k))
                        .transpose()?
                        .flatten()
                    {
                        parent.active_children = parent.active_children.saturating_sub(1);
                        storage.put_element_instance(parent)?;
                    }
                }
                storage.delete_event_scope(key)?;
                storage.delete_variable_scope(key)
            }
            ProcessInstanceIntent::SequenceFlowTaken => {
                if let Some(mut scope) = value
                    .flow_scope_key
                    .map(|k| storage.get_element_instance(k))
                    .transpose()?
                    .flatten()
                {
                    scope.active_sequence_flows += 1;
                    storage.put_element_instance(scope)?;
                }
                Ok(())
            }
            ProcessInstanceIntent::ActivateElement
            | ProcessInstanceIntent::CompleteElement
            | ProcessInstanceIntent::TerminateElement => Ok(()),
        }
    }

    fn is_reached_by_sequence_flow(&self, value: &ProcessInstanceRecord) -> bool {
        self.process(value)
            .and_then(|p| p.element(&value.element_id))
            .is_some_and(|e| !e.incoming.is_empty())
    }

    fn new_event_scope(&self, value: &ProcessInstanceRecord) -> Option<EventScopeInstance> {
        let catch_events = self.process(value)?.catch_events(&value.element_id);
        if catch_events.is_empty() {
            return None;
        }
        let interrupting = catch_events
            .iter()
            .filter(|e| e.interrupting)
            .map(|e| e.element_id.clone())
            .collect();
        let boundaries = catch_events
            .iter()
            .filter(|e| e.is_boundary())
            .map(|e| e.element_id.clone())
            .collect();
        Some(EventScopeInstance::new(interrupting, boundaries))
    }

    fn apply_process_event<S: Transaction>(
        &self,
        storage: &mut S,
        key: Key,
        intent: ProcessEventIntent,
        value: &ProcessEventRecord,
    ) -> Result<()> {
        let Some(mut scope) = storage.get_event_scope(value.scope_key)? else {
            // the scope was left while the trigger was pending
            return Ok(());
        };

        match intent {
            ProcessEventIntent::Triggering => {
                let target = value.target_element_id.as_str();
                if scope.is_interrupting(target) {
                    scope.accepting = false;
                    if scope.boundary_element_ids.contains(target) {
                        scope.boundary_element_ids = BTreeSet::new();
                    } else if self.is_event_sub_process_start(value, target) {
                        mark_interrupted(storage, value.scope_key, target)?;
                    }
                }
                scope.triggers.push_back(EventTrigger {
                    event_key: key,
                    element_id: value.target_element_id.clone(),
                    variables: value.variables.clone(),
                });
            }
            ProcessEventIntent::Triggered => {
                scope.remove_trigger(key);
            }
        }
        storage.put_event_scope(value.scope_key, scope)
    }

    fn is_event_sub_process_start(&self, value: &ProcessEventRecord, element_id: &str) -> bool {
        self.processes
            .by_key(value.process_definition_key)
            .is_some_and(|p| p.is_event_sub_process_start(element_id))
    }
}

fn update_state<S: Transaction>(
    storage: &mut S,
    key: Key,
    intent: ProcessInstanceIntent,
) -> Result<Option<ElementInstance>> {
    let (Some(mut instance), Some(state)) = (
        storage.get_element_instance(key)?,
        ElementInstanceState::from_intent(intent),
    ) else {
        return Ok(None);
    };
    instance.state = state;
    storage.put_element_instance(instance.clone())?;
    Ok(Some(instance))
}

fn mark_interrupted<S: Transaction>(
    storage: &mut S,
    scope_key: Key,
    element_id: &str,
) -> Result<()> {
    if let Some(mut instance) = storage.get_element_instance(scope_key)? {
        if instance.is_interrupted() {
            return Ok(());
        }
        instance.interrupting_element_id = Some(element_id.to_owned());
        // pending sequence flows of the scope are not followed anymore
        instance.active_sequence_flows = 0;
        storage.put_element_instance(instance)?;
    }
    Ok(())
}

fn apply_process_message_subscription<S: Transaction>(
    storage: &mut S,
    key: Key,
    intent: ProcessMessageSubscriptionIntent,
    value: &ProcessMessageSubscriptionRecord,
) -> Result<()> {
    let state = match intent {
        ProcessMessageSubscriptionIntent::Creating => ProcessMessageSubscriptionState::Creating,
        ProcessMessageSubscriptionIntent::Created => ProcessMessageSubscriptionState::Created,
        ProcessMessageSubscriptionIntent::Deleting => ProcessMessageSubscriptionState::Deleting,
        ProcessMessageSubscriptionIntent::Correlated if !value.interrupting => {
            ProcessMessageSubscriptionState::Created
        }
        ProcessMessageSubscriptionIntent::Correlated
        | ProcessMessageSubscriptionIntent::Deleted => {
            return storage.delete_process_message_subscription(
                value.element_instance_key,
                &value.message_name,
            );
        }
        ProcessMessageSubscriptionIntent::Create
        | ProcessMessageSubscriptionIntent::Correlate
        | ProcessMessageSubscriptionIntent::Delete => return Ok(()),
    };

    storage.put_process_message_subscription(ProcessMessageSubscription {
        key,
        state,
        value: value.clone(),
    })
}

fn apply_message_subscription<S: Transaction>(
    storage: &mut S,
    key: Key,
    intent: MessageSubscriptionIntent,
    value: &MessageSubscriptionRecord,
) -> Result<()> {
    match intent {
        MessageSubscriptionIntent::Created => {
            storage.put_message_subscription(MessageSubscription {
                key,
                value: value.clone(),
                correlating: false,
            })
        }
        MessageSubscriptionIntent::Correlating => {
            storage.put_message_subscription(MessageSubscription {
                key,
                value: value.clone(),
                correlating: true,
            })
        }
        MessageSubscriptionIntent::Correlated if value.interrupting => storage
            .delete_message_subscription(value.element_instance_key, &value.message_name),
        MessageSubscriptionIntent::Correlated | MessageSubscriptionIntent::Rejected => {
            match storage
                .get_message_subscription(value.element_instance_key, &value.message_name)?
            {
                Some(mut subscription) => {
                    subscription.correlating = false;
                    storage.put_message_subscription(subscription)
                }
                None => Ok(()),
            }
        }
        MessageSubscriptionIntent::Deleted => {
            storage.delete_message_subscription(value.element_instance_key, &value.message_name)
        }
        MessageSubscriptionIntent::Create
        | MessageSubscriptionIntent::Correlate
        | MessageSubscriptionIntent::Reject
        | MessageSubscriptionIntent::Delete => Ok(()),
    }
}

fn apply_command_distribution<S: Transaction>(
    storage: &mut S,
    key: Key,
    intent: CommandDistributionIntent,
    value: &CommandDistributionRecord,
) -> Result<()> {
    match intent {
        CommandDistributionIntent::Started => {
            storage.put_pending_distribution(PendingDistribution {
                key,
                value: value.clone(),
                pending_partitions: BTreeSet::new(),
            })
        }
        CommandDistributionIntent::Distributing | CommandDistributionIntent::Acknowledged => {
            let Some(mut distribution) = storage.get_pending_distribution(key)? else {
                return Ok(());
            };
            if intent == CommandDistributionIntent::Distributing {
                distribution.pending_partitions.insert(value.partition_id);
            } else {
                distribution.pending_partitions.remove(&value.partition_id);
            }
            storage.put_pending_distribution(distribution)
        }
        CommandDistributionIntent::Finished => storage.delete_pending_distribution(key),
        CommandDistributionIntent::Received => storage.put_received_distribution(key),
        CommandDistributionIntent::Released => storage.delete_received_distribution(key),
        CommandDistributionIntent::Acknowledge | CommandDistributionIntent::Release => Ok(()),
    }
}
