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
use cadence_wal_protocol::intent::{
    MessageIntent, MessageSubscriptionIntent, ProcessMessageSubscriptionIntent,
};
use cadence_wal_protocol::value::{MessageRecord, MessageSubscriptionRecord};
use cadence_wal_protocol::Command;

use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

/// Publishes a message and correlates it to every subscription which waits for it.
pub(crate) struct OnPublishMessageCommand {
    pub(crate) value: MessageRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnPublishMessageCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnPublishMessageCommand { value } = self;

        let message_key = ctx.next_key()?;
        ctx.append_event(message_key, MessageIntent::Published, value.clone())?;

        let subscriptions = ctx
            .storage
            .get_message_subscriptions_by_correlation(&value.name, &value.correlation_key)?;
        for subscription in subscriptions {
            if subscription.correlating {
                // the subscriber did not confirm the previous message yet
                continue;
            }
            debug!(
                %message_key,
                message_name = %value.name,
                element_instance_key = %subscription.value.element_instance_key,
                "Correlate message"
            );
            let correlating = MessageSubscriptionRecord {
                message_key: Some(message_key),
                variables: value.variables.clone(),
                ..subscription.value
            };
            ctx.append_event(
                subscription.key,
                MessageSubscriptionIntent::Correlating,
                correlating.clone(),
            )?;

            let subscriber = correlating.element_instance_key.partition_id();
            let command = Command::new(
                None,
                ProcessMessageSubscriptionIntent::Correlate,
                correlating.to_process_message_subscription(ctx.partition_id()),
            );
            ctx.send_command(subscriber, command);
        }
        Ok(())
    }
}
