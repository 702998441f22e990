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
use tracing::{debug, info, instrument, trace, warn};

use cadence_partition_store::PartitionStore;
use cadence_storage_api::banned_instance_table::ReadOnlyBannedInstanceTable;
use cadence_storage_api::fsm_table::{FsmTable, ReadOnlyFsmTable};
use cadence_storage_api::process_message_subscription_table::{
    ProcessMessageSubscriptionState, ReadOnlyProcessMessageSubscriptionTable,
};
use cadence_storage_api::timer_table::ReadOnlyTimerTable;
use cadence_storage_api::{Storage, StorageError, Transaction};
use cadence_types::identifiers::PartitionId;
use cadence_types::time::MillisSinceEpoch;
use cadence_wal_protocol::intent::{ErrorIntent, MessageSubscriptionIntent, TimerIntent};
use cadence_wal_protocol::value::ErrorRecord;
use cadence_wal_protocol::{Command, Envelope, Position, Record};

use crate::metric_definitions::{
    PARTITION_LABEL, PARTITION_PROCESSED_COMMANDS, PARTITION_QUARANTINED_COMMANDS,
    PARTITION_REPLAYED_RECORDS, PARTITION_WRITTEN_RECORDS,
};
use crate::partition::state_machine::{
    Action, ActionCollector, ProcessingError, StateMachine, Writers,
};

pub mod log;
mod processor;
pub mod router;
pub(crate) mod state_machine;

#[cfg(test)]
mod tests;

pub use log::PartitionLog;
pub use processor::{PartitionProcessor, PartitionProcessorHandle};

/// Log, state and processing logic of one partition.
///
/// Commands are processed one at a time in log order. The follow up records of a command are
/// appended to the log in the same step in which its state changes are committed, and only
/// then are its actions handed out for execution.
#[derive(Debug)]
pub struct Partition {
    store: PartitionStore,
    log: PartitionLog,
    state_machine: StateMachine,
}

impl Partition {
    pub fn new(state_machine: StateMachine) -> Self {
        Self {
            store: PartitionStore::new(state_machine.partition_id()),
            log: PartitionLog::new(),
            state_machine,
        }
    }

    /// Rebuilds the state of the partition from its log.
    ///
    /// Events are applied in log order. Every command up to the last one which produced a
    /// follow up record is considered processed; later commands are processed by
    /// [`Partition::process_next`] as usual.
    #[instrument(
        level = "debug",
        skip_all,
        fields(cadence.partition.id = %state_machine.partition_id())
    )]
    pub fn replay(state_machine: StateMachine, log: PartitionLog) -> Result<Self, StorageError> {
        let mut store = PartitionStore::new(state_machine.partition_id());
        let mut txn = store.transaction();

        let mut last_processed: Option<Position> = None;
        for record in log.records() {
            if let Some(key) = record.key {
                state_machine.key_generator().observe(&mut txn, key)?;
            }
            if record.is_event() {
                state_machine.event_applier().apply(&mut txn, record)?;
            }
            if let Some(source_position) = record.source_position {
                last_processed = last_processed.max(Some(source_position));
            }
        }
        if let Some(position) = last_processed {
            txn.put_last_processed_position(position)?;
        }
        txn.commit()?;

        let partition_id = state_machine.partition_id().to_string();
        counter!(PARTITION_REPLAYED_RECORDS, PARTITION_LABEL => partition_id)
            .increment(log.len() as u64);
        info!(
            records = log.len(),
            last_processed_position = ?last_processed,
            "Replayed partition log"
        );

        Ok(Self {
            store,
            log,
            state_machine,
        })
    }

    pub fn partition_id(&self) -> PartitionId {
        self.state_machine.partition_id()
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    pub fn log(&self) -> &PartitionLog {
        &self.log
    }

    pub fn into_log(self) -> PartitionLog {
        self.log
    }

    /// Appends a command received from a client or another partition.
    pub fn append_command(&mut self, command: Command) -> Position {
        let position = self.log.append_command(command);
        trace!(position, "Appended inbound command");
        position
    }

    pub fn append_envelope(&mut self, envelope: Envelope) -> Position {
        self.append_command(envelope.command)
    }

    /// Whether the log holds a command which was not processed yet.
    pub fn has_unprocessed_commands(&self) -> Result<bool, StorageError> {
        Ok(self.next_command()?.is_some())
    }

    fn next_command(&self) -> Result<Option<&Record>, StorageError> {
        let from = self
            .store
            .get_last_processed_position()?
            .map_or(1, |position| position + 1);
        Ok(self.log.records_from(from).find(|record| record.is_command()))
    }

    /// Processes the next unprocessed command of the log.
    ///
    /// Returns `None` if there is no such command, otherwise the actions of the command. An
    /// error is returned only if the partition can't continue processing.
    pub fn process_next(&mut self) -> Result<Option<ActionCollector>, ProcessingError> {
        let Some(command) = self.next_command()?.cloned() else {
            return Ok(None);
        };
        let position = command.position;
        let partition_label = self.partition_id().to_string();

        if let Some(process_instance_key) = command.value.process_instance_key() {
            if self.store.is_banned(process_instance_key)? {
                debug!(
                    position,
                    %process_instance_key,
                    "Skip command of banned process instance"
                );
                let mut txn = self.store.transaction();
                txn.put_last_processed_position(position)?;
                txn.commit()?;
                return Ok(Some(ActionCollector::new()));
            }
        }

        let mut txn = self.store.transaction();
        let mut writers = Writers::new(position, self.log.next_position());
        let mut actions = ActionCollector::new();

        match self
            .state_machine
            .apply(&command, &mut txn, &mut writers, &mut actions)
        {
            Ok(()) => {
                txn.put_last_processed_position(position)?;
                txn.commit()?;

                let records = writers.into_records();
                counter!(PARTITION_PROCESSED_COMMANDS, PARTITION_LABEL => partition_label.clone())
                    .increment(1);
                counter!(PARTITION_WRITTEN_RECORDS, PARTITION_LABEL => partition_label)
                    .increment(records.len() as u64);
                self.log.append(records);
                Ok(Some(actions))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                // discard everything the command did so far
                drop(txn);
                self.quarantine(&command, err)?;
                Ok(Some(ActionCollector::new()))
            }
        }
    }

    /// Writes an `ERROR` record for the failed command, which bans its process instance.
    fn quarantine(&mut self, command: &Record, err: ProcessingError) -> Result<(), StorageError> {
        let process_instance_key = command.value.process_instance_key();
        warn!(
            position = command.position,
            process_instance_key = ?process_instance_key,
            "Failed to process command {command}, the process instance is banned: {err}"
        );
        counter!(PARTITION_QUARANTINED_COMMANDS, PARTITION_LABEL => self.partition_id().to_string())
            .increment(1);

        let mut txn = self.store.transaction();
        let mut writers = Writers::new(command.position, self.log.next_position());
        let key = self.state_machine.key_generator().next_key(&mut txn)?;
        let record = writers.event(
            Some(key),
            ErrorIntent::Created.into(),
            ErrorRecord {
                error_message: err.to_string(),
                error_event_position: command.position,
                process_instance_key,
            }
            .into(),
        );
        self.state_machine.event_applier().apply(&mut txn, record)?;
        txn.put_last_processed_position(command.position)?;
        txn.commit()?;

        self.log.append(writers.into_records());
        Ok(())
    }

    /// Appends a `TIMER TRIGGER` command for every timer due at `now`, at most `limit`.
    pub fn append_due_timer_triggers(
        &mut self,
        now: MillisSinceEpoch,
        limit: usize,
    ) -> Result<usize, StorageError> {
        let timers = self.store.get_due_timers(now, limit)?;
        for timer in &timers {
            trace!(timer_key = %timer.key, due_date = %timer.value.due_date, "Timer is due");
            self.log.append_command(Command::new(
                Some(timer.key),
                TimerIntent::Trigger,
                timer.value.clone(),
            ));
        }
        Ok(timers.len())
    }

    pub fn next_due_date(&self) -> Result<Option<MillisSinceEpoch>, StorageError> {
        self.store.get_next_due_date()
    }

    pub fn next_due_date_after(
        &self,
        after: MillisSinceEpoch,
    ) -> Result<Option<MillisSinceEpoch>, StorageError> {
        self.store.get_next_due_date_after(after)
    }

    /// Sends again what the partition did not get a confirmation for: pending command
    /// distributions and message subscriptions which are still opening or closing.
    pub fn retry_actions(&self) -> Result<ActionCollector, StorageError> {
        let partition_id = self.partition_id();
        let mut actions = ActionCollector::new();

        state_machine::redistribute(&self.store, partition_id, &mut actions)?;

        for subscription in self.store.get_pending_process_message_subscriptions()? {
            let intent = match subscription.state {
                ProcessMessageSubscriptionState::Creating => MessageSubscriptionIntent::Create,
                ProcessMessageSubscriptionState::Deleting => MessageSubscriptionIntent::Delete,
                ProcessMessageSubscriptionState::Created => continue,
            };
            let dest = subscription.value.subscription_partition_id;
            trace!(
                element_instance_key = %subscription.value.element_instance_key,
                message_name = %subscription.value.message_name,
                %intent,
                "Resend pending message subscription"
            );
            actions.push(Action::SendCommand {
                partition_id: dest,
                envelope: Envelope::from_partition(
                    partition_id,
                    dest,
                    Command::new(None, intent, subscription.value.to_message_subscription()),
                ),
            });
        }
        Ok(actions)
    }
}
