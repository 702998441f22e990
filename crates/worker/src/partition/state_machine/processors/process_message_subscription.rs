// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Message subscriptions on the partition of the subscribing process instance.

use tracing::debug;

use cadence_storage_api::Transaction;
use cadence_wal_protocol::intent::{MessageSubscriptionIntent, ProcessMessageSubscriptionIntent};
use cadence_wal_protocol::value::ProcessMessageSubscriptionRecord;
use cadence_wal_protocol::{Command, RejectionType};

use crate::partition::state_machine::behavior::event_trigger::{
    activate_element, can_trigger_element, triggering_process_event,
};
use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

pub(crate) struct OnProcessMessageSubscriptionCommand {
    pub(crate) intent: ProcessMessageSubscriptionIntent,
    pub(crate) value: ProcessMessageSubscriptionRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnProcessMessageSubscriptionCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnProcessMessageSubscriptionCommand { intent, value } = self;
        match intent {
            ProcessMessageSubscriptionIntent::Create => on_create(ctx, value),
            ProcessMessageSubscriptionIntent::Delete => on_delete(ctx, value),
            ProcessMessageSubscriptionIntent::Correlate => on_correlate(ctx, value),
            ProcessMessageSubscriptionIntent::Creating
            | ProcessMessageSubscriptionIntent::Created
            | ProcessMessageSubscriptionIntent::Correlated
            | ProcessMessageSubscriptionIntent::Deleting
            | ProcessMessageSubscriptionIntent::Deleted => {
                ctx.reject(
                    RejectionType::InvalidArgument,
                    format!(
                        "Expected a process message subscription command, but got event {intent}"
                    ),
                );
                Ok(())
            }
        }
    }
}

fn on_create<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    value: ProcessMessageSubscriptionRecord,
) -> Result<(), ProcessingError> {
    match ctx
        .storage
        .get_process_message_subscription(value.element_instance_key, &value.message_name)?
    {
        Some(subscription) if subscription.state.is_creating() => {
            ctx.append_event(
                subscription.key,
                ProcessMessageSubscriptionIntent::Created,
                subscription.value,
            )?;
        }
        Some(subscription) => ctx.reject(
            RejectionType::InvalidState,
            format!(
                "Expected to open the subscription for element with key '{}' and message name \
                '{}', but the subscription is {}",
                value.element_instance_key, value.message_name, subscription.state
            ),
        ),
        None => ctx.reject(
            RejectionType::NotFound,
            format!(
                "Expected to open the subscription for element with key '{}' and message name \
                '{}', but no such subscription was found",
                value.element_instance_key, value.message_name
            ),
        ),
    }
    Ok(())
}

fn on_delete<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    value: ProcessMessageSubscriptionRecord,
) -> Result<(), ProcessingError> {
    match ctx
        .storage
        .get_process_message_subscription(value.element_instance_key, &value.message_name)?
    {
        Some(subscription) => ctx.append_event(
            subscription.key,
            ProcessMessageSubscriptionIntent::Deleted,
            subscription.value,
        )?,
        None => ctx.reject(
            RejectionType::NotFound,
            format!(
                "Expected to close the subscription for element with key '{}' and message name \
                '{}', but no such subscription was found",
                value.element_instance_key, value.message_name
            ),
        ),
    }
    Ok(())
}

fn on_correlate<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    value: ProcessMessageSubscriptionRecord,
) -> Result<(), ProcessingError> {
    let element_instance_key = value.element_instance_key;
    let subscription = ctx
        .storage
        .get_process_message_subscription(element_instance_key, &value.message_name)?
        .filter(|subscription| !subscription.state.is_deleting());
    let Some(subscription) = subscription else {
        ctx.reject(
            RejectionType::NotFound,
            format!(
                "Expected to correlate subscription for element with key '{element_instance_key}' \
                and message name '{}', but no such subscription was found",
                value.message_name
            ),
        );
        send_reject(ctx, &value);
        return Ok(());
    };

    let element_id = subscription.value.element_id.clone();
    if !can_trigger_element(&*ctx.storage, element_instance_key, &element_id)? {
        ctx.reject(
            RejectionType::InvalidState,
            format!(
                "Expected to correlate subscription for element with key '{element_instance_key}' \
                and message name '{}', but the element can't be triggered by '{element_id}'",
                value.message_name
            ),
        );
        send_reject(ctx, &value);
        return Ok(());
    }

    let scope = ctx
        .storage
        .get_element_instance(element_instance_key)?
        .ok_or(ProcessingError::MissingElementInstance(element_instance_key))?;
    let process = ctx.process(scope.value.process_definition_key)?;

    let correlated = ProcessMessageSubscriptionRecord {
        message_key: value.message_key,
        variables: value.variables.clone(),
        ..subscription.value
    };
    ctx.append_event(
        subscription.key,
        ProcessMessageSubscriptionIntent::Correlated,
        correlated.clone(),
    )?;
    debug!(
        %element_instance_key,
        message_name = %correlated.message_name,
        "Message correlated"
    );

    let trigger = triggering_process_event(
        ctx,
        &process,
        correlated.process_instance_key,
        element_instance_key,
        &element_id,
        value.variables,
    )?;
    activate_element(ctx, &process, &scope, trigger)?;

    ctx.send_command(
        correlated.subscription_partition_id,
        Command::new(
            None,
            MessageSubscriptionIntent::Correlate,
            correlated.to_message_subscription(),
        ),
    );
    Ok(())
}

/// Tells the message partition that the message was not correlated.
fn send_reject<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    value: &ProcessMessageSubscriptionRecord,
) {
    ctx.send_command(
        value.subscription_partition_id,
        Command::new(
            None,
            MessageSubscriptionIntent::Reject,
            value.to_message_subscription(),
        ),
    );
}
