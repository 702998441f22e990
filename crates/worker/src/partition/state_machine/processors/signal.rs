// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tracing::{debug, trace};

use cadence_storage_api::Transaction;
use cadence_wal_protocol::intent::SignalIntent;
use cadence_wal_protocol::value::SignalRecord;

use crate::partition::state_machine::behavior::command_distribution::distribute_command;
use crate::partition::state_machine::behavior::event_trigger::{
    activate_element, can_trigger_element, triggering_process_event,
};
use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

/// Broadcasts a signal to all signal subscriptions of the partition. A signal which was not
/// received through a distribution is distributed to all other partitions.
pub(crate) struct OnBroadcastSignalCommand {
    pub(crate) value: SignalRecord,
    pub(crate) distributed: bool,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnBroadcastSignalCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnBroadcastSignalCommand { value, distributed } = self;

        let key = ctx.next_key()?;
        ctx.append_event(key, SignalIntent::Broadcasted, value.clone())?;
        if !distributed {
            distribute_command(ctx, key, SignalIntent::Broadcast, value.clone().into())?;
        }

        let subscriptions = ctx
            .storage
            .get_signal_subscriptions_by_name(&value.signal_name)?;
        debug!(
            signal_name = %value.signal_name,
            subscriptions = subscriptions.len(),
            "Broadcast signal"
        );
        for subscription in subscriptions {
            let element_instance_key = subscription.value.catch_event_instance_key;
            let catch_event_id = &subscription.value.catch_event_id;
            // an earlier trigger of this broadcast may have interrupted the element
            if !can_trigger_element(&*ctx.storage, element_instance_key, catch_event_id)? {
                trace!(%element_instance_key, %catch_event_id, "Skip signal subscription");
                continue;
            }

            let process = ctx.process(subscription.value.process_definition_key)?;
            let trigger = triggering_process_event(
                ctx,
                &process,
                subscription.value.process_instance_key,
                element_instance_key,
                catch_event_id,
                value.variables.clone(),
            )?;
            let scope = ctx
                .storage
                .get_element_instance(element_instance_key)?
                .ok_or(ProcessingError::MissingElementInstance(element_instance_key))?;
            activate_element(ctx, &process, &scope, trigger)?;
        }
        Ok(())
    }
}
