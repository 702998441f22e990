// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Opens and closes the subscriptions of catch events.
//!
//! All expressions of all catch events of an element are evaluated before the first
//! subscription is opened. If one of them fails, no subscription is opened and the first
//! failure, in the order of the catch events, is returned.

use tracing::{debug, trace};

use cadence_storage_api::{StorageError, Transaction};
use cadence_types::errors::Failure;
use cadence_types::identifiers::Key;
use cadence_types::process::{CatchEventDefinition, CatchEventKind, Process, TimerDefinition};
use cadence_types::time::MillisSinceEpoch;
use cadence_wal_protocol::intent::{
    MessageSubscriptionIntent, ProcessMessageSubscriptionIntent, SignalSubscriptionIntent,
    TimerIntent,
};
use cadence_wal_protocol::value::{
    ProcessInstanceRecord, ProcessMessageSubscriptionRecord, SignalSubscriptionRecord, TimerRecord,
};
use cadence_wal_protocol::Command;

use super::expression::EvaluationScope;
use crate::partition::state_machine::StateMachineApplyContext;

/// A catch event whose expressions were evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EvaluatedCatchEvent {
    Timer {
        element_id: String,
        due_date: MillisSinceEpoch,
        repetitions: i32,
    },
    Message {
        element_id: String,
        message_name: String,
        correlation_key: String,
        interrupting: bool,
    },
    Signal {
        element_id: String,
        signal_name: String,
        interrupting: bool,
    },
}

/// Opens a subscription for every catch event of the element instance.
///
/// The outer result carries storage errors, the inner one the evaluation failure which
/// prevented any subscription from being opened.
pub(crate) fn subscribe_to_events<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    element_instance_key: Key,
    instance: &ProcessInstanceRecord,
) -> Result<Result<(), Failure>, StorageError> {
    let catch_events = process.catch_events(&instance.element_id);
    if catch_events.is_empty() {
        return Ok(Ok(()));
    }

    let element_scope = EvaluationScope::load(&*ctx.storage, Some(element_instance_key))?;
    // boundary events are evaluated outside of the activity they are attached to
    let outer_scope = EvaluationScope::load(&*ctx.storage, instance.flow_scope_key)?;

    let reader = &*ctx;
    let evaluated = match catch_events
        .iter()
        .filter_map(|event| {
            let scope = if event.is_boundary() {
                &outer_scope
            } else {
                &element_scope
            };
            evaluate_catch_event(reader, event, scope).transpose()
        })
        .collect::<Result<Vec<_>, Failure>>()
    {
        Ok(evaluated) => evaluated,
        Err(failure) => {
            debug!(
                element_id = %instance.element_id,
                %element_instance_key,
                "Failed to evaluate catch events, no subscription is opened: {failure}"
            );
            return Ok(Err(failure));
        }
    };

    for event in evaluated {
        open_subscription(ctx, element_instance_key, instance, event)?;
    }
    Ok(Ok(()))
}

fn evaluate_catch_event<S: Transaction>(
    ctx: &StateMachineApplyContext<'_, S>,
    event: &CatchEventDefinition,
    scope: &EvaluationScope,
) -> Result<Option<EvaluatedCatchEvent>, Failure> {
    let expressions = ctx.expressions();
    let element_id = event.element_id.clone();

    Ok(Some(match &event.kind {
        CatchEventKind::Message {
            name,
            correlation_key,
        } => EvaluatedCatchEvent::Message {
            message_name: expressions.evaluate_string(name, scope)?,
            correlation_key: expressions.evaluate_message_correlation_key(correlation_key, scope)?,
            interrupting: event.interrupting,
            element_id,
        },
        CatchEventKind::Timer(timer) => {
            let now = ctx.now();
            let (due_date, repetitions) = match timer {
                TimerDefinition::Duration(expression) => {
                    (now + expressions.evaluate_interval(expression, scope)?, 1)
                }
                TimerDefinition::Date(expression) => {
                    let timestamp = expressions.evaluate_date_time(expression, scope)?;
                    let millis = u64::try_from(timestamp.as_millisecond()).unwrap_or(0);
                    (MillisSinceEpoch::new(millis), 1)
                }
                TimerDefinition::Cycle(expression) => {
                    let cycle = expressions.evaluate_cycle(expression, scope)?;
                    (now + cycle.interval, cycle.repetitions)
                }
            };
            EvaluatedCatchEvent::Timer {
                element_id,
                due_date,
                repetitions,
            }
        }
        CatchEventKind::Signal { name } => EvaluatedCatchEvent::Signal {
            signal_name: expressions.evaluate_string(name, scope)?,
            interrupting: event.interrupting,
            element_id,
        },
        // error events are caught when the error is thrown, there is nothing to subscribe to
        CatchEventKind::Error { .. } | CatchEventKind::None => return Ok(None),
    }))
}

fn open_subscription<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    element_instance_key: Key,
    instance: &ProcessInstanceRecord,
    event: EvaluatedCatchEvent,
) -> Result<(), StorageError> {
    let key = ctx.next_key()?;
    match event {
        EvaluatedCatchEvent::Timer {
            element_id,
            due_date,
            repetitions,
        } => {
            trace!(%element_instance_key, %element_id, %due_date, "Open timer subscription");
            ctx.append_event(
                key,
                TimerIntent::Created,
                TimerRecord {
                    element_instance_key,
                    process_instance_key: instance.process_instance_key,
                    process_definition_key: instance.process_definition_key,
                    due_date,
                    repetitions,
                    target_element_id: element_id,
                },
            )?;
            ctx.schedule_timer(due_date);
        }
        EvaluatedCatchEvent::Message {
            element_id,
            message_name,
            correlation_key,
            interrupting,
        } => {
            let subscription_partition_id =
                ctx.topology().subscription_partition_id(&correlation_key);
            trace!(
                %element_instance_key,
                %element_id,
                %message_name,
                %subscription_partition_id,
                "Open message subscription"
            );
            let subscription = ProcessMessageSubscriptionRecord {
                subscription_partition_id,
                process_instance_key: instance.process_instance_key,
                element_instance_key,
                bpmn_process_id: instance.bpmn_process_id.clone(),
                element_id,
                message_name,
                correlation_key,
                interrupting,
                message_key: None,
                variables: Default::default(),
            };
            ctx.append_event(
                key,
                ProcessMessageSubscriptionIntent::Creating,
                subscription.clone(),
            )?;
            send_open_message_subscription(ctx, &subscription);
        }
        EvaluatedCatchEvent::Signal {
            element_id,
            signal_name,
            interrupting,
        } => {
            trace!(%element_instance_key, %element_id, %signal_name, "Open signal subscription");
            ctx.append_event(
                key,
                SignalSubscriptionIntent::Created,
                SignalSubscriptionRecord {
                    signal_name,
                    catch_event_id: element_id,
                    catch_event_instance_key: element_instance_key,
                    process_instance_key: instance.process_instance_key,
                    process_definition_key: instance.process_definition_key,
                    bpmn_process_id: instance.bpmn_process_id.clone(),
                    interrupting,
                },
            )?;
        }
    }
    Ok(())
}

pub(crate) fn send_open_message_subscription<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    subscription: &ProcessMessageSubscriptionRecord,
) {
    ctx.send_command(
        subscription.subscription_partition_id,
        Command::new(
            None,
            MessageSubscriptionIntent::Create,
            subscription.to_message_subscription(),
        ),
    );
}

pub(crate) fn send_close_message_subscription<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    subscription: &ProcessMessageSubscriptionRecord,
) {
    ctx.send_command(
        subscription.subscription_partition_id,
        Command::new(
            None,
            MessageSubscriptionIntent::Delete,
            subscription.to_message_subscription(),
        ),
    );
}

/// Closes all subscriptions of the element instance.
pub(crate) fn unsubscribe_from_events<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    element_instance_key: Key,
) -> Result<(), StorageError> {
    unsubscribe(ctx, element_instance_key, |_| true)
}

/// Closes the subscriptions of the event sub process start events of the container instance,
/// keeping the ones of boundary events.
pub(crate) fn unsubscribe_event_subprocesses<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    element_instance_key: Key,
) -> Result<(), StorageError> {
    unsubscribe(ctx, element_instance_key, |element_id| {
        process.is_event_sub_process_start(element_id)
    })
}

fn unsubscribe<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    element_instance_key: Key,
    filter: impl Fn(&str) -> bool,
) -> Result<(), StorageError> {
    for timer in ctx
        .storage
        .get_timers_for_element_instance(element_instance_key)?
    {
        if filter(&timer.value.target_element_id) {
            trace!(%element_instance_key, timer_key = %timer.key, "Cancel timer");
            ctx.append_event(timer.key, TimerIntent::Canceled, timer.value)?;
        }
    }

    for subscription in ctx
        .storage
        .get_process_message_subscriptions_for_element_instance(element_instance_key)?
    {
        if subscription.state.is_deleting() || !filter(&subscription.value.element_id) {
            continue;
        }
        trace!(
            %element_instance_key,
            message_name = %subscription.value.message_name,
            "Close message subscription"
        );
        ctx.append_event(
            subscription.key,
            ProcessMessageSubscriptionIntent::Deleting,
            subscription.value.clone(),
        )?;
        send_close_message_subscription(ctx, &subscription.value);
    }

    for subscription in ctx
        .storage
        .get_signal_subscriptions_for_element_instance(element_instance_key)?
    {
        if filter(&subscription.value.catch_event_id) {
            ctx.append_event(
                subscription.key,
                SignalSubscriptionIntent::Deleted,
                subscription.value,
            )?;
        }
    }
    Ok(())
}
