// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Message subscriptions on the partition which owns the correlation key.

use tracing::trace;

use cadence_storage_api::Transaction;
use cadence_wal_protocol::intent::{MessageSubscriptionIntent, ProcessMessageSubscriptionIntent};
use cadence_wal_protocol::value::MessageSubscriptionRecord;
use cadence_wal_protocol::{Command, RejectionType};

use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

pub(crate) struct OnMessageSubscriptionCommand {
    pub(crate) intent: MessageSubscriptionIntent,
    pub(crate) value: MessageSubscriptionRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnMessageSubscriptionCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnMessageSubscriptionCommand { intent, value } = self;
        let existing = ctx
            .storage
            .get_message_subscription(value.element_instance_key, &value.message_name)?;

        match intent {
            MessageSubscriptionIntent::Create => {
                if existing.is_some() {
                    ctx.reject(
                        RejectionType::AlreadyExists,
                        format!(
                            "Expected to open a new message subscription for element with key \
                            '{}' and message name '{}', but there is already a message \
                            subscription for that element key and message name opened",
                            value.element_instance_key, value.message_name
                        ),
                    );
                } else {
                    let key = ctx.next_key()?;
                    ctx.append_event(key, MessageSubscriptionIntent::Created, value.clone())?;
                }
                // the subscriber waits for the confirmation in any case
                confirm(ctx, ProcessMessageSubscriptionIntent::Create, &value);
            }
            MessageSubscriptionIntent::Delete => {
                match existing {
                    Some(subscription) => ctx.append_event(
                        subscription.key,
                        MessageSubscriptionIntent::Deleted,
                        subscription.value,
                    )?,
                    None => ctx.reject(
                        RejectionType::NotFound,
                        format!(
                            "Expected to close message subscription for element with key '{}' \
                            and message name '{}', but no such message subscription exists",
                            value.element_instance_key, value.message_name
                        ),
                    ),
                }
                confirm(ctx, ProcessMessageSubscriptionIntent::Delete, &value);
            }
            MessageSubscriptionIntent::Correlate | MessageSubscriptionIntent::Reject => {
                let Some(subscription) = existing else {
                    ctx.reject(
                        RejectionType::NotFound,
                        format!(
                            "Expected to find message subscription for element with key '{}' \
                            and message name '{}', but no such message subscription exists",
                            value.element_instance_key, value.message_name
                        ),
                    );
                    return Ok(());
                };
                let event = if intent == MessageSubscriptionIntent::Correlate {
                    MessageSubscriptionIntent::Correlated
                } else {
                    MessageSubscriptionIntent::Rejected
                };
                trace!(
                    element_instance_key = %value.element_instance_key,
                    message_name = %value.message_name,
                    "Message subscription {event}"
                );
                ctx.append_event(subscription.key, event, subscription.value)?;
            }
            MessageSubscriptionIntent::Created
            | MessageSubscriptionIntent::Correlating
            | MessageSubscriptionIntent::Correlated
            | MessageSubscriptionIntent::Rejected
            | MessageSubscriptionIntent::Deleted => {
                ctx.reject(
                    RejectionType::InvalidArgument,
                    format!("Expected a message subscription command, but got event {intent}"),
                );
            }
        }
        Ok(())
    }
}

/// Confirms the command to the partition of the subscribing element instance.
fn confirm<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    intent: ProcessMessageSubscriptionIntent,
    value: &MessageSubscriptionRecord,
) {
    let subscriber = value.element_instance_key.partition_id();
    let command = Command::new(
        None,
        intent,
        value.to_process_message_subscription(ctx.partition_id()),
    );
    ctx.send_command(subscriber, command);
}
