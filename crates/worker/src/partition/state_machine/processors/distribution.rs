// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use metrics::counter;
use tracing::{debug, trace};

use cadence_storage_api::Transaction;
use cadence_types::identifiers::Key;
use cadence_wal_protocol::intent::CommandDistributionIntent;
use cadence_wal_protocol::value::CommandDistributionRecord;
use cadence_wal_protocol::{Command, RejectionType};

use crate::metric_definitions::PARTITION_DISTRIBUTIONS_ACKNOWLEDGED;
use crate::partition::state_machine::{CommandHandler, ProcessingError, StateMachineApplyContext};

pub(crate) struct OnAcknowledgeCommand {
    pub(crate) distribution_key: Key,
    pub(crate) value: CommandDistributionRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnAcknowledgeCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnAcknowledgeCommand {
            distribution_key,
            value,
        } = self;
        let acknowledging = value.partition_id;

        let Some(distribution) = ctx.storage.get_pending_distribution(distribution_key)? else {
            ctx.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to acknowledge the distribution of command with key \
                    '{distribution_key}', but no such distribution is pending"
                ),
            );
            return Ok(());
        };
        if !distribution.pending_partitions.contains(&acknowledging) {
            ctx.reject(
                RejectionType::InvalidState,
                format!(
                    "Expected to acknowledge the distribution of command with key \
                    '{distribution_key}' for partition {acknowledging}, but the partition is \
                    not pending"
                ),
            );
            return Ok(());
        }

        let record = CommandDistributionRecord {
            partition_id: acknowledging,
            value_type: distribution.value.value_type,
            intent: distribution.value.intent,
            command_value: None,
        };
        ctx.append_event(
            distribution_key,
            CommandDistributionIntent::Acknowledged,
            record.clone(),
        )?;
        counter!(PARTITION_DISTRIBUTIONS_ACKNOWLEDGED).increment(1);

        if distribution.pending_partitions.len() == 1 {
            debug!(%distribution_key, "Command distribution finished");
            let partition_id = ctx.partition_id();
            ctx.append_event(
                distribution_key,
                CommandDistributionIntent::Finished,
                CommandDistributionRecord {
                    partition_id,
                    ..record.clone()
                },
            )?;
            // sent after every redistribution of the command, so no copy arrives afterwards
            for other in ctx.topology().other_partitions(partition_id) {
                ctx.send_command(
                    other,
                    Command::new(
                        Some(distribution_key),
                        CommandDistributionIntent::Release,
                        CommandDistributionRecord {
                            partition_id: other,
                            ..record.clone()
                        },
                    ),
                );
            }
        }
        Ok(())
    }
}

/// The partition which started the distribution will not send the command again, so the
/// receiver forgets that it received it.
pub(crate) struct OnReleaseCommand {
    pub(crate) distribution_key: Key,
    pub(crate) value: CommandDistributionRecord,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnReleaseCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let OnReleaseCommand {
            distribution_key,
            value,
        } = self;

        if !ctx.storage.is_distribution_received(distribution_key)? {
            ctx.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to release the distributed command with key '{distribution_key}', \
                    but it was not received"
                ),
            );
            return Ok(());
        }
        trace!(%distribution_key, "Release received distribution");
        ctx.append_event(distribution_key, CommandDistributionIntent::Released, value)?;
        Ok(())
    }
}
