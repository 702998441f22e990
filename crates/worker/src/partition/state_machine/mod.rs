// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod actions;
mod behavior;
mod error;
mod event_applier;
mod key_generator;
mod processors;
mod tracing;
mod writers;

use std::sync::Arc;
use std::time::Instant;

use ::tracing::{debug, warn};
use metrics::{counter, histogram};

use cadence_storage_api::{StorageError, Transaction};
use cadence_types::expression::ExpressionLanguage;
use cadence_types::identifiers::{Key, PartitionId, PartitionTopology};
use cadence_types::process::{Element, Process, ProcessRepository};
use cadence_types::time::{Clock, MillisSinceEpoch};
use cadence_wal_protocol::intent::{
    CommandDistributionIntent, Intent, MessageIntent, MessageSubscriptionIntent,
    ProcessInstanceCreationIntent, ProcessInstanceIntent, ProcessInstanceModificationIntent,
    ProcessMessageSubscriptionIntent, SignalIntent, TimerIntent,
};
use cadence_wal_protocol::value::RecordValue;
use cadence_wal_protocol::{Command, Envelope, Record, Rejection, RejectionType};

use self::tracing::StateMachineSpanExt;
use crate::metric_definitions::{PARTITION_APPLY_COMMAND, PARTITION_REJECTED_COMMANDS};

pub use actions::{Action, ActionCollector};
pub(crate) use behavior::command_distribution::redistribute;
pub(crate) use behavior::expression::ExpressionProcessor;
pub use error::ProcessingError;
pub(crate) use event_applier::EventApplier;
pub(crate) use key_generator::KeyGenerator;
pub(crate) use writers::Writers;

/// Handles one command in the context of a [`StateMachineApplyContext`].
pub(crate) trait CommandHandler<CTX> {
    fn apply(self, ctx: CTX) -> Result<(), ProcessingError>;
}

/// Deterministic processing logic of a partition.
///
/// The state machine turns a command into follow up records and actions. It never touches the
/// log itself: records are collected by [`Writers`] and actions by the [`ActionCollector`].
pub struct StateMachine {
    partition_id: PartitionId,
    topology: PartitionTopology,
    processes: Arc<ProcessRepository>,
    expressions: ExpressionProcessor,
    clock: Arc<dyn Clock>,
    key_generator: KeyGenerator,
    event_applier: EventApplier,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("partition_id", &self.partition_id)
            .field("topology", &self.topology)
            .finish()
    }
}

impl StateMachine {
    pub fn new(
        partition_id: PartitionId,
        topology: PartitionTopology,
        processes: Arc<ProcessRepository>,
        expression_language: Arc<dyn ExpressionLanguage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            partition_id,
            topology,
            event_applier: EventApplier::new(Arc::clone(&processes)),
            processes,
            expressions: ExpressionProcessor::new(expression_language),
            clock,
            key_generator: KeyGenerator::new(partition_id),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn topology(&self) -> PartitionTopology {
        self.topology
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn event_applier(&self) -> &EventApplier {
        &self.event_applier
    }

    pub(crate) fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    pub(crate) fn apply<S: Transaction>(
        &self,
        command: &Record,
        storage: &mut S,
        writers: &mut Writers,
        action_collector: &mut ActionCollector,
    ) -> Result<(), ProcessingError> {
        let span = tracing::state_machine_apply_command_span(self.partition_id, command);
        let _enter = span.enter();
        ::tracing::Span::record_process_instance_key(command);

        let start = Instant::now();
        let res = self.on_apply(
            StateMachineApplyContext {
                storage,
                writers,
                action_collector,
                state_machine: self,
                command,
            },
            command,
        );
        histogram!(PARTITION_APPLY_COMMAND, "command" => command.intent.name())
            .record(start.elapsed());
        res
    }

    fn on_apply<S: Transaction>(
        &self,
        mut ctx: StateMachineApplyContext<'_, S>,
        command: &Record,
    ) -> Result<(), ProcessingError> {
        if let Some(distribution_key) = command.distribution_key {
            if ctx.storage.is_distribution_received(distribution_key)? {
                debug!(
                    %distribution_key,
                    "Distributed command was received before, acknowledge again"
                );
                behavior::command_distribution::acknowledge_command(
                    &mut ctx,
                    distribution_key,
                    command,
                );
                return Ok(());
            }
        }

        self.dispatch(&mut ctx, command)?;

        if let Some(distribution_key) = command.distribution_key {
            behavior::command_distribution::receive_command(&mut ctx, distribution_key, command)?;
        }
        Ok(())
    }

    fn dispatch<S: Transaction>(
        &self,
        ctx: &mut StateMachineApplyContext<'_, S>,
        command: &Record,
    ) -> Result<(), ProcessingError> {
        use processors::*;

        match (command.intent, &command.value, command.key) {
            (
                Intent::ProcessInstance(ProcessInstanceIntent::ActivateElement),
                RecordValue::ProcessInstance(value),
                Some(key),
            ) => bpmn::OnActivateElementCommand {
                key,
                value: value.clone(),
            }
            .apply(ctx),
            (
                Intent::ProcessInstance(ProcessInstanceIntent::CompleteElement),
                RecordValue::ProcessInstance(_),
                Some(key),
            ) => bpmn::OnCompleteElementCommand { key }.apply(ctx),
            (
                Intent::ProcessInstance(ProcessInstanceIntent::TerminateElement),
                RecordValue::ProcessInstance(_),
                Some(key),
            ) => bpmn::OnTerminateElementCommand { key }.apply(ctx),
            (
                Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Create),
                RecordValue::ProcessInstanceCreation(value),
                _,
            ) => creation::OnCreateProcessInstanceCommand {
                value: value.clone(),
            }
            .apply(ctx),
            (
                Intent::ProcessInstanceModification(ProcessInstanceModificationIntent::Modify),
                RecordValue::ProcessInstanceModification(value),
                _,
            ) => modification::OnModifyProcessInstanceCommand {
                value: value.clone(),
            }
            .apply(ctx),
            (Intent::Timer(TimerIntent::Trigger), RecordValue::Timer(_), Some(key)) => {
                timer::OnTriggerTimerCommand { key }.apply(ctx)
            }
            (
                Intent::ProcessMessageSubscription(intent),
                RecordValue::ProcessMessageSubscription(value),
                _,
            ) => process_message_subscription::OnProcessMessageSubscriptionCommand {
                intent,
                value: value.clone(),
            }
            .apply(ctx),
            (
                Intent::MessageSubscription(intent),
                RecordValue::MessageSubscription(value),
                _,
            ) => message_subscription::OnMessageSubscriptionCommand {
                intent,
                value: value.clone(),
            }
            .apply(ctx),
            (Intent::Message(MessageIntent::Publish), RecordValue::Message(value), _) => {
                message::OnPublishMessageCommand {
                    value: value.clone(),
                }
                .apply(ctx)
            }
            (Intent::Signal(SignalIntent::Broadcast), RecordValue::Signal(value), _) => {
                signal::OnBroadcastSignalCommand {
                    value: value.clone(),
                    distributed: command.distribution_key.is_some(),
                }
                .apply(ctx)
            }
            (
                Intent::CommandDistribution(CommandDistributionIntent::Acknowledge),
                RecordValue::CommandDistribution(value),
                Some(key),
            ) => distribution::OnAcknowledgeCommand {
                distribution_key: key,
                value: value.clone(),
            }
            .apply(ctx),
            (
                Intent::CommandDistribution(CommandDistributionIntent::Release),
                RecordValue::CommandDistribution(value),
                Some(key),
            ) => distribution::OnReleaseCommand {
                distribution_key: key,
                value: value.clone(),
            }
            .apply(ctx),
            (intent, value, _) => {
                ctx.reject(
                    RejectionType::InvalidArgument,
                    format!(
                        "Expected a command which is processed by the partition, but got {} {intent}",
                        value.value_type()
                    ),
                );
                Ok(())
            }
        }
    }
}

pub(crate) struct StateMachineApplyContext<'a, S> {
    pub(crate) storage: &'a mut S,
    writers: &'a mut Writers,
    action_collector: &'a mut ActionCollector,
    state_machine: &'a StateMachine,
    command: &'a Record,
}

impl<'a, S: Transaction> StateMachineApplyContext<'a, S> {
    pub(crate) fn partition_id(&self) -> PartitionId {
        self.state_machine.partition_id
    }

    pub(crate) fn topology(&self) -> PartitionTopology {
        self.state_machine.topology
    }

    pub(crate) fn now(&self) -> MillisSinceEpoch {
        self.state_machine.clock.now()
    }

    pub(crate) fn expressions(&self) -> &'a ExpressionProcessor {
        &self.state_machine.expressions
    }

    /// The command which is being processed.
    pub(crate) fn command(&self) -> &'a Record {
        self.command
    }

    pub(crate) fn process(
        &self,
        process_definition_key: Key,
    ) -> Result<Arc<Process>, ProcessingError> {
        self.state_machine
            .processes
            .by_key(process_definition_key)
            .cloned()
            .ok_or(ProcessingError::MissingProcess(process_definition_key))
    }

    pub(crate) fn latest_process(&self, bpmn_process_id: &str) -> Option<Arc<Process>> {
        self.state_machine.processes.latest(bpmn_process_id).cloned()
    }

    pub(crate) fn next_key(&mut self) -> Result<Key, StorageError> {
        self.state_machine.key_generator.next_key(self.storage)
    }

    /// Writes a follow up event and applies it to the state right away.
    pub(crate) fn append_event(
        &mut self,
        key: impl Into<Option<Key>>,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) -> Result<(), StorageError> {
        let record = self.writers.event(key.into(), intent.into(), value.into());
        self.state_machine.event_applier.apply(self.storage, record)
    }

    /// Writes a follow up command which is processed after the current one.
    pub(crate) fn append_command(
        &mut self,
        key: impl Into<Option<Key>>,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) {
        self.writers.command(key.into(), intent.into(), value.into());
    }

    pub(crate) fn reject(&mut self, rejection_type: RejectionType, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            position = self.command.position,
            %rejection_type,
            "Rejecting command {}: {reason}",
            self.command.intent
        );
        counter!(PARTITION_REJECTED_COMMANDS, "command" => self.command.intent.name()).increment(1);
        self.writers
            .rejection(self.command, Rejection::new(rejection_type, reason));
    }

    pub(crate) fn send_command(&mut self, partition_id: PartitionId, command: Command) {
        self.action_collector.push(Action::SendCommand {
            partition_id,
            envelope: Envelope::from_partition(self.partition_id(), partition_id, command),
        });
    }

    pub(crate) fn schedule_timer(&mut self, due_date: MillisSinceEpoch) {
        self.action_collector.push(Action::ScheduleTimer { due_date });
    }
}

/// Looks up an element of the process, failing the command if the model does not know it.
pub(crate) fn element<'p>(
    process: &'p Process,
    element_id: &str,
) -> Result<&'p Element, ProcessingError> {
    process
        .element(element_id)
        .ok_or_else(|| ProcessingError::MissingElement {
            process_definition_key: process.key,
            element_id: element_id.to_owned(),
        })
}
