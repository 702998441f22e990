// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Distribution of a command to all other partitions.
//!
//! The distributing partition writes `STARTED` with the payload and one `DISTRIBUTING` per
//! other partition before the commands are sent. Each receiver processes the command once,
//! records `RECEIVED` and acknowledges to the partition encoded in the distribution key.

use metrics::counter;
use tracing::{debug, trace};

use cadence_storage_api::distribution_table::ReadOnlyDistributionTable;
use cadence_storage_api::{StorageError, Transaction};
use cadence_types::identifiers::{Key, PartitionId};
use cadence_wal_protocol::intent::{CommandDistributionIntent, Intent};
use cadence_wal_protocol::value::{CommandDistributionRecord, RecordValue};
use cadence_wal_protocol::{Command, Envelope, Record};

use crate::metric_definitions::PARTITION_DISTRIBUTIONS_STARTED;
use crate::partition::state_machine::{Action, ActionCollector, StateMachineApplyContext};

pub(crate) fn distribute_command<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    distribution_key: Key,
    intent: impl Into<Intent>,
    value: RecordValue,
) -> Result<(), StorageError> {
    let topology = ctx.topology();
    if topology.partitions_count() == 1 {
        return Ok(());
    }

    let intent = intent.into();
    let partition_id = ctx.partition_id();
    let value_type = value.value_type();
    debug!(%distribution_key, %value_type, %intent, "Distribute command to {topology}");

    ctx.append_event(
        distribution_key,
        CommandDistributionIntent::Started,
        CommandDistributionRecord {
            partition_id,
            value_type,
            intent,
            command_value: Some(Box::new(value.clone())),
        },
    )?;
    counter!(PARTITION_DISTRIBUTIONS_STARTED).increment(1);

    for other in topology.other_partitions(partition_id) {
        // only the STARTED event keeps the payload
        ctx.append_event(
            distribution_key,
            CommandDistributionIntent::Distributing,
            CommandDistributionRecord {
                partition_id: other,
                value_type,
                intent,
                command_value: None,
            },
        )?;
        ctx.send_command(
            other,
            Command::new(None, intent, value.clone()).with_distribution_key(distribution_key),
        );
    }
    Ok(())
}

/// Records that the distributed command was processed and acknowledges it.
pub(crate) fn receive_command<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    distribution_key: Key,
    command: &Record,
) -> Result<(), StorageError> {
    let record = CommandDistributionRecord {
        partition_id: ctx.partition_id(),
        value_type: command.value_type(),
        intent: command.intent,
        command_value: None,
    };
    ctx.append_event(distribution_key, CommandDistributionIntent::Received, record)?;
    acknowledge_command(ctx, distribution_key, command);
    Ok(())
}

/// Sends the acknowledgement to the partition which started the distribution.
pub(crate) fn acknowledge_command<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    distribution_key: Key,
    command: &Record,
) {
    let origin = distribution_key.partition_id();
    trace!(%distribution_key, %origin, "Acknowledge distributed command");
    let record = CommandDistributionRecord {
        partition_id: ctx.partition_id(),
        value_type: command.value_type(),
        intent: command.intent,
        command_value: None,
    };
    ctx.send_command(
        origin,
        Command::new(
            Some(distribution_key),
            CommandDistributionIntent::Acknowledge,
            record,
        ),
    );
}

/// Sends every pending distribution again to the partitions which did not acknowledge it yet.
pub(crate) fn redistribute<S: ReadOnlyDistributionTable>(
    storage: &S,
    partition_id: PartitionId,
    action_collector: &mut ActionCollector,
) -> Result<(), StorageError> {
    for distribution in storage.get_pending_distributions()? {
        let Some(value) = &distribution.value.command_value else {
            continue;
        };
        for pending in &distribution.pending_partitions {
            trace!(
                distribution_key = %distribution.key,
                partition_id = %pending,
                "Redistribute command"
            );
            let command = Command::new(None, distribution.value.intent, value.as_ref().clone())
                .with_distribution_key(distribution.key);
            action_collector.push(Action::SendCommand {
                partition_id: *pending,
                envelope: Envelope::from_partition(partition_id, *pending, command),
            });
        }
    }
    Ok(())
}
