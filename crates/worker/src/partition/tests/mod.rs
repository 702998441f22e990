// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Scenarios spanning one or more partitions. Commands sent between partitions are delivered
//! by [`TestCluster`] once the sending partition has processed everything it can.

mod processor;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use googletest::prelude::*;
use serde_json::json;
use test_log::test;

use cadence_storage_api::banned_instance_table::ReadOnlyBannedInstanceTable;
use cadence_storage_api::distribution_table::ReadOnlyDistributionTable;
use cadence_test_util::let_assert;
use cadence_types::expression::SimpleExpressionLanguage;
use cadence_types::identifiers::{Key, PartitionId, PartitionTopology};
use cadence_types::process::{
    CatchEventKind, Process, ProcessBuilder, ProcessRepository, TimerDefinition,
};
use cadence_types::time::{Clock, ManualClock, MillisSinceEpoch};
use cadence_types::Variables;
use cadence_wal_protocol::intent::{
    CommandDistributionIntent, ErrorIntent, IncidentIntent, Intent, MessageIntent,
    MessageSubscriptionIntent, ProcessInstanceCreationIntent, ProcessInstanceIntent,
    ProcessInstanceModificationIntent, ProcessMessageSubscriptionIntent, SignalIntent,
    TimerIntent,
};
use cadence_wal_protocol::value::{
    ActivateInstruction, CommandDistributionRecord, MessageRecord,
    ProcessInstanceCreationRecord, ProcessInstanceModificationRecord, RecordValue, SignalRecord,
};
use cadence_wal_protocol::{Command, Record, RejectionType, ValueType};

use crate::partition::state_machine::{Action, StateMachine};
use crate::partition::{Partition, PartitionLog};

type TestResult = std::result::Result<(), anyhow::Error>;

const START: MillisSinceEpoch = MillisSinceEpoch::new(1_000_000);
const TIMER_BATCH_LIMIT: usize = 100;

struct TestCluster {
    partitions: BTreeMap<PartitionId, Partition>,
    processes: Arc<ProcessRepository>,
    clock: ManualClock,
    topology: PartitionTopology,
}

impl TestCluster {
    fn new(partitions_count: u16, processes: impl IntoIterator<Item = Process>) -> Self {
        let mut repository = ProcessRepository::default();
        for process in processes {
            repository.deploy(process);
        }

        let mut cluster = Self {
            partitions: BTreeMap::new(),
            processes: Arc::new(repository),
            clock: ManualClock::new(START),
            topology: PartitionTopology::new(PartitionId::from(1), partitions_count),
        };
        for partition_id in cluster.topology.partition_ids() {
            let partition = Partition::new(cluster.state_machine(partition_id));
            cluster.partitions.insert(partition_id, partition);
        }
        cluster
    }

    fn state_machine(&self, partition_id: PartitionId) -> StateMachine {
        StateMachine::new(
            partition_id,
            self.topology,
            Arc::clone(&self.processes),
            Arc::new(SimpleExpressionLanguage),
            Arc::new(self.clock.clone()),
        )
    }

    fn partition(&self, partition_id: u16) -> &Partition {
        &self.partitions[&PartitionId::from(partition_id)]
    }

    fn partition_mut(&mut self, partition_id: u16) -> &mut Partition {
        self.partitions
            .get_mut(&PartitionId::from(partition_id))
            .expect("partition exists")
    }

    fn submit(&mut self, partition_id: u16, command: Command) {
        self.partition_mut(partition_id).append_command(command);
    }

    /// Processes commands on all partitions and delivers the sent commands until nothing is
    /// left to do.
    fn run_until_quiescent(&mut self) -> TestResult {
        for _ in 0..1_000 {
            let mut progressed = false;
            let mut outbox = Vec::new();
            for partition in self.partitions.values_mut() {
                while let Some(actions) = partition.process_next()? {
                    progressed = true;
                    outbox.extend(actions.into_iter().filter_map(|action| match action {
                        Action::SendCommand {
                            partition_id,
                            envelope,
                        } => Some((partition_id, envelope)),
                        Action::ScheduleTimer { .. } => None,
                    }));
                }
            }
            for (partition_id, envelope) in outbox {
                self.partitions
                    .get_mut(&partition_id)
                    .with_context(|| format!("no partition {partition_id}"))?
                    .append_envelope(envelope);
            }
            if !progressed {
                return Ok(());
            }
        }
        bail!("partitions did not become quiescent")
    }

    fn advance_time(&mut self, by: Duration) -> TestResult {
        self.clock.advance(by);
        let now = self.clock.now();
        for partition in self.partitions.values_mut() {
            partition.append_due_timer_triggers(now, TIMER_BATCH_LIMIT)?;
        }
        self.run_until_quiescent()
    }

    /// Records of the partition with the intent, rejections excluded.
    fn records(&self, partition_id: u16, intent: impl Into<Intent>) -> Vec<&Record> {
        let intent = intent.into();
        self.partition(partition_id)
            .log()
            .records()
            .iter()
            .filter(|r| r.intent == intent && !r.record_type.is_command_rejection())
            .collect()
    }

    fn rejections(&self, partition_id: u16) -> Vec<&Record> {
        self.partition(partition_id)
            .log()
            .records()
            .iter()
            .filter(|r| r.record_type.is_command_rejection())
            .collect()
    }

    /// Lifecycle of the element as written to the log, in log order.
    fn element_intents(&self, partition_id: u16, element_id: &str) -> Vec<ProcessInstanceIntent> {
        self.partition(partition_id)
            .log()
            .records()
            .iter()
            .filter(|r| !r.record_type.is_command_rejection())
            .filter_map(|r| match (&r.intent, &r.value) {
                (Intent::ProcessInstance(intent), RecordValue::ProcessInstance(value))
                    if value.element_id == element_id =>
                {
                    Some(*intent)
                }
                _ => None,
            })
            .collect()
    }

    /// Keys of the element instances of the element which were activated.
    fn element_instance_keys(&self, partition_id: u16, element_id: &str) -> Vec<Key> {
        self.records(partition_id, ProcessInstanceIntent::ElementActivating)
            .into_iter()
            .filter(|r| {
                matches!(
                    &r.value,
                    RecordValue::ProcessInstance(value) if value.element_id == element_id
                )
            })
            .filter_map(|r| r.key)
            .collect()
    }

    fn create_instance(
        &mut self,
        partition_id: u16,
        bpmn_process_id: &str,
        variables: Variables,
    ) -> anyhow::Result<Key> {
        self.create_instance_at(partition_id, bpmn_process_id, variables, vec![])
    }

    fn create_instance_at(
        &mut self,
        partition_id: u16,
        bpmn_process_id: &str,
        variables: Variables,
        start_instructions: Vec<String>,
    ) -> anyhow::Result<Key> {
        let created_before = self
            .records(partition_id, ProcessInstanceCreationIntent::Created)
            .len();
        self.submit(
            partition_id,
            Command::new(
                None,
                ProcessInstanceCreationIntent::Create,
                ProcessInstanceCreationRecord {
                    bpmn_process_id: bpmn_process_id.to_owned(),
                    process_definition_key: None,
                    process_instance_key: None,
                    variables,
                    start_instructions,
                },
            ),
        );
        self.run_until_quiescent()?;

        self.records(partition_id, ProcessInstanceCreationIntent::Created)
            .get(created_before)
            .and_then(|r| r.key)
            .context("process instance was not created")
    }

    fn modify(
        &mut self,
        partition_id: u16,
        process_instance_key: Key,
        activate_instructions: Vec<ActivateInstruction>,
        terminate_instructions: Vec<Key>,
    ) -> TestResult {
        self.submit(
            partition_id,
            Command::new(
                Some(process_instance_key),
                ProcessInstanceModificationIntent::Modify,
                ProcessInstanceModificationRecord {
                    process_instance_key,
                    activate_instructions,
                    terminate_instructions,
                    activated_element_instance_keys: vec![],
                },
            ),
        );
        self.run_until_quiescent()
    }

    fn broadcast_signal(&mut self, partition_id: u16, signal_name: &str) {
        self.submit(
            partition_id,
            Command::new(
                None,
                SignalIntent::Broadcast,
                SignalRecord {
                    signal_name: signal_name.to_owned(),
                    variables: Variables::new(),
                },
            ),
        );
    }
}

fn variables(entries: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> Variables {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
}

fn activate(element_id: &str) -> ActivateInstruction {
    ActivateInstruction {
        element_id: element_id.to_owned(),
        ancestor_scope_key: None,
        variables: Variables::new(),
    }
}

fn message_catch_process() -> Process {
    ProcessBuilder::new("order")
        .start_event("start")
        .intermediate_catch_event(
            "wait_for_payment",
            CatchEventKind::Message {
                name: "msg".into(),
                correlation_key: "=foo".into(),
            },
        )
        .end_event("end")
        .flow("start", "wait_for_payment")
        .flow("wait_for_payment", "end")
        .build()
        .expect("valid process")
}

fn signal_catch_process() -> Process {
    ProcessBuilder::new("signalled")
        .start_event("start")
        .intermediate_catch_event(
            "wait_for_signal",
            CatchEventKind::Signal { name: "sig".into() },
        )
        .end_event("end")
        .flow("start", "wait_for_signal")
        .flow("wait_for_signal", "end")
        .build()
        .expect("valid process")
}

fn nested_process() -> Process {
    ProcessBuilder::new("nested")
        .start_event("start")
        .sub_process("outer", |b| {
            b.start_event("outer_start")
                .sub_process("inner", |b| {
                    b.start_event("inner_start")
                        .service_task("task")
                        .service_task("other_task")
                        .flow("inner_start", "task")
                })
                .flow("outer_start", "inner")
        })
        .flow("start", "outer")
        .build()
        .expect("valid process")
}

#[test]
fn message_subscription_is_routed_by_correlation_key() -> TestResult {
    let mut cluster = TestCluster::new(3, [message_catch_process()]);
    let process_instance_key =
        cluster.create_instance(1, "order", variables([("foo", json!("bar"))]))?;

    let subscription_partition = cluster.topology.subscription_partition_id("bar");
    let subscription_partition_id = (1..=3)
        .find(|id| PartitionId::from(*id) == subscription_partition)
        .context("subscription partition is one of the partitions")?;
    for partition_id in 1..=3 {
        let created = cluster.records(partition_id, MessageSubscriptionIntent::Created);
        if partition_id == subscription_partition_id {
            assert_that!(created, len(eq(1)));
        } else {
            assert_that!(created, empty());
        }
    }

    let creating = cluster.records(1, ProcessMessageSubscriptionIntent::Creating);
    assert_that!(creating, len(eq(1)));
    let_assert!(RecordValue::ProcessMessageSubscription(subscription) = &creating[0].value);
    assert_that!(subscription.subscription_partition_id, eq(subscription_partition));
    assert_that!(subscription.correlation_key.as_str(), eq("bar"));
    assert_that!(subscription.process_instance_key, eq(process_instance_key));
    // confirmed by the subscription partition
    assert_that!(
        cluster.records(1, ProcessMessageSubscriptionIntent::Created),
        len(eq(1))
    );

    cluster.submit(
        subscription_partition_id,
        Command::new(
            None,
            MessageIntent::Publish,
            MessageRecord {
                name: "msg".to_owned(),
                correlation_key: "bar".to_owned(),
                variables: variables([("amount", json!(42))]),
            },
        ),
    );
    cluster.run_until_quiescent()?;

    assert_that!(
        cluster.records(subscription_partition_id, MessageSubscriptionIntent::Correlating),
        len(eq(1))
    );
    assert_that!(
        cluster.records(subscription_partition_id, MessageSubscriptionIntent::Correlated),
        len(eq(1))
    );
    let correlated = cluster.records(1, ProcessMessageSubscriptionIntent::Correlated);
    assert_that!(correlated, len(eq(1)));
    let_assert!(RecordValue::ProcessMessageSubscription(subscription) = &correlated[0].value);
    assert_that!(subscription.variables.get("amount"), some(eq(&json!(42))));

    assert_that!(
        cluster.element_intents(1, "wait_for_payment"),
        contains(eq(ProcessInstanceIntent::ElementCompleted))
    );
    assert_that!(
        cluster.element_intents(1, "order").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    Ok(())
}

#[test]
fn subscription_partition_is_stable_across_clusters() {
    let first = TestCluster::new(3, [message_catch_process()]);
    let second = TestCluster::new(3, [message_catch_process()]);

    for correlation_key in ["bar", "order-123", ""] {
        assert_that!(
            first.topology.subscription_partition_id(correlation_key),
            eq(second.topology.subscription_partition_id(correlation_key))
        );
    }
}

#[test]
fn message_without_subscription_is_only_published() -> TestResult {
    let mut cluster = TestCluster::new(1, [message_catch_process()]);
    cluster.submit(
        1,
        Command::new(
            None,
            MessageIntent::Publish,
            MessageRecord {
                name: "msg".to_owned(),
                correlation_key: "nobody".to_owned(),
                variables: Variables::new(),
            },
        ),
    );
    cluster.run_until_quiescent()?;

    assert_that!(cluster.records(1, MessageIntent::Published), len(eq(1)));
    assert_that!(
        cluster.records(1, MessageSubscriptionIntent::Correlating),
        empty()
    );
    Ok(())
}

#[test]
fn signal_is_distributed_to_all_partitions() -> TestResult {
    let mut cluster = TestCluster::new(3, [signal_catch_process()]);
    cluster.create_instance(2, "signalled", Variables::new())?;
    assert_that!(
        cluster.element_intents(2, "wait_for_signal").last(),
        some(eq(&ProcessInstanceIntent::ElementActivated))
    );

    cluster.broadcast_signal(1, "sig");
    cluster.run_until_quiescent()?;

    for partition_id in 1..=3 {
        assert_that!(
            cluster.records(partition_id, SignalIntent::Broadcasted),
            len(eq(1))
        );
    }

    let started = cluster.records(1, CommandDistributionIntent::Started);
    assert_that!(started, len(eq(1)));
    let distribution_key = started[0].key.context("distribution has a key")?;
    assert_that!(distribution_key.partition_id(), eq(PartitionId::from(1)));
    let_assert!(RecordValue::CommandDistribution(distribution) = &started[0].value);
    assert_that!(distribution.value_type, eq(ValueType::Signal));
    assert!(distribution.command_value.is_some());

    let distributing: Vec<_> = cluster
        .records(1, CommandDistributionIntent::Distributing)
        .into_iter()
        .filter_map(|r| match &r.value {
            RecordValue::CommandDistribution(d) => Some(d.partition_id),
            _ => None,
        })
        .collect();
    assert_that!(
        distributing,
        eq(vec![PartitionId::from(2), PartitionId::from(3)])
    );

    for partition_id in [2, 3] {
        let received = cluster.records(partition_id, CommandDistributionIntent::Received);
        assert_that!(received, len(eq(1)));
        assert_that!(received[0].key, some(eq(distribution_key)));
        // acknowledgements go to the partition which started the distribution
        assert_that!(
            cluster.records(partition_id, CommandDistributionIntent::Acknowledge),
            empty()
        );
    }
    assert_that!(
        cluster.records(1, CommandDistributionIntent::Acknowledge),
        len(eq(2))
    );
    assert_that!(
        cluster.records(1, CommandDistributionIntent::Acknowledged),
        len(eq(2))
    );
    let finished = cluster.records(1, CommandDistributionIntent::Finished);
    assert_that!(finished, len(eq(1)));
    assert_that!(finished[0].key, some(eq(distribution_key)));
    // the receivers forget the distribution once it is finished
    for partition_id in [2, 3] {
        let released = cluster.records(partition_id, CommandDistributionIntent::Released);
        assert_that!(released, len(eq(1)));
        assert_that!(released[0].key, some(eq(distribution_key)));
        assert!(!cluster
            .partition(partition_id)
            .store()
            .is_distribution_received(distribution_key)?);
    }

    assert_that!(
        cluster.element_intents(2, "signalled").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    Ok(())
}

#[test]
fn signal_on_single_partition_is_not_distributed() -> TestResult {
    let mut cluster = TestCluster::new(1, [signal_catch_process()]);
    cluster.create_instance(1, "signalled", Variables::new())?;

    cluster.broadcast_signal(1, "sig");
    cluster.run_until_quiescent()?;

    assert_that!(cluster.records(1, SignalIntent::Broadcasted), len(eq(1)));
    assert_that!(
        cluster.records(1, CommandDistributionIntent::Started),
        empty()
    );
    assert_that!(
        cluster.element_intents(1, "signalled").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    Ok(())
}

#[test]
fn redelivered_distribution_is_processed_once() -> TestResult {
    let mut cluster = TestCluster::new(2, [signal_catch_process()]);
    cluster.broadcast_signal(1, "sig");
    // the first send is lost
    while cluster.partition_mut(1).process_next()?.is_some() {}
    // two redistributions reach the receiver
    for _ in 0..2 {
        for action in cluster.partition(1).retry_actions()? {
            let_assert!(Action::SendCommand { partition_id, envelope } = action);
            assert_that!(partition_id, eq(PartitionId::from(2)));
            cluster.partition_mut(2).append_envelope(envelope);
        }
    }
    cluster.run_until_quiescent()?;

    assert_that!(cluster.records(2, SignalIntent::Broadcasted), len(eq(1)));
    let received = cluster.records(2, CommandDistributionIntent::Received);
    assert_that!(received, len(eq(1)));
    let distribution_key = received[0].key.context("distribution has a key")?;
    // acknowledged twice, the second acknowledgement finds the distribution finished
    assert_that!(
        cluster.records(1, CommandDistributionIntent::Acknowledge),
        len(eq(2))
    );
    assert_that!(
        cluster.records(1, CommandDistributionIntent::Finished),
        len(eq(1))
    );
    assert_that!(cluster.rejections(1), len(eq(1)));

    assert_that!(
        cluster.records(2, CommandDistributionIntent::Released),
        len(eq(1))
    );
    assert_that!(cluster.rejections(2), empty());
    assert!(!cluster
        .partition(2)
        .store()
        .is_distribution_received(distribution_key)?);
    Ok(())
}

#[test]
fn acknowledging_unknown_distribution_is_rejected() -> TestResult {
    let mut cluster = TestCluster::new(2, [signal_catch_process()]);
    cluster.submit(
        1,
        Command::new(
            Some(Key::from_parts(PartitionId::from(1), 999)),
            CommandDistributionIntent::Acknowledge,
            CommandDistributionRecord {
                partition_id: PartitionId::from(2),
                value_type: ValueType::Signal,
                intent: SignalIntent::Broadcast.into(),
                command_value: None,
            },
        ),
    );
    cluster.run_until_quiescent()?;

    let rejections = cluster.rejections(1);
    assert_that!(rejections, len(eq(1)));
    let_assert!(Some(rejection) = &rejections[0].rejection);
    assert_that!(rejection.rejection_type, eq(RejectionType::NotFound));
    Ok(())
}

#[test]
fn nested_element_creates_missing_flow_scopes_outermost_first() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    cluster.create_instance_at(1, "nested", Variables::new(), vec!["task".to_owned()])?;

    let creation = cluster.records(1, ProcessInstanceCreationIntent::Create)[0].position;
    let lifecycle: Vec<_> = cluster
        .partition(1)
        .log()
        .records()
        .iter()
        .filter(|r| r.source_position == Some(creation))
        .filter_map(|r| match (&r.intent, &r.value) {
            (Intent::ProcessInstance(intent), RecordValue::ProcessInstance(value)) => {
                Some((value.element_id.as_str(), *intent))
            }
            _ => None,
        })
        .collect();

    assert_that!(
        lifecycle,
        eq(vec![
            ("nested", ProcessInstanceIntent::ElementActivating),
            ("nested", ProcessInstanceIntent::ElementActivated),
            ("outer", ProcessInstanceIntent::ElementActivating),
            ("outer", ProcessInstanceIntent::ElementActivated),
            ("inner", ProcessInstanceIntent::ElementActivating),
            ("inner", ProcessInstanceIntent::ElementActivated),
            ("task", ProcessInstanceIntent::ActivateElement),
        ])
    );
    // the none start events are skipped
    assert_that!(cluster.element_intents(1, "start"), empty());
    assert_that!(cluster.element_intents(1, "inner_start"), empty());
    assert_that!(
        cluster.element_intents(1, "task").last(),
        some(eq(&ProcessInstanceIntent::ElementActivated))
    );
    Ok(())
}

#[test]
fn creation_with_unknown_start_element_is_rejected() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    let created = cluster.create_instance_at(
        1,
        "nested",
        Variables::new(),
        vec!["does_not_exist".to_owned()],
    );

    assert!(created.is_err());
    let rejections = cluster.rejections(1);
    assert_that!(rejections, len(eq(1)));
    let_assert!(Some(rejection) = &rejections[0].rejection);
    assert_that!(rejection.rejection_type, eq(RejectionType::InvalidArgument));
    Ok(())
}

#[test]
fn single_active_flow_scope_instance_is_reused() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    let process_instance_key =
        cluster.create_instance_at(1, "nested", Variables::new(), vec!["task".to_owned()])?;
    let inner_key = cluster.element_instance_keys(1, "inner")[0];
    let outer_key = cluster.element_instance_keys(1, "outer")[0];

    cluster.modify(1, process_instance_key, vec![activate("other_task")], vec![])?;

    assert_that!(cluster.element_instance_keys(1, "inner"), len(eq(1)));
    let modified = cluster.records(1, ProcessInstanceModificationIntent::Modified);
    assert_that!(modified, len(eq(1)));
    let_assert!(RecordValue::ProcessInstanceModification(value) = &modified[0].value);
    let other_task_key = cluster.element_instance_keys(1, "other_task")[0];
    for key in [process_instance_key, outer_key, inner_key, other_task_key] {
        assert_that!(value.activated_element_instance_keys, contains(eq(key)));
    }

    let_assert!(RecordValue::ProcessInstance(other_task) = &cluster
        .records(1, ProcessInstanceIntent::ElementActivated)
        .last()
        .context("other task was activated")?
        .value);
    assert_that!(other_task.flow_scope_key, some(eq(inner_key)));
    Ok(())
}

#[test]
fn ambiguous_flow_scope_is_resolved_by_ancestor_or_bans_the_instance() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    let process_instance_key =
        cluster.create_instance_at(1, "nested", Variables::new(), vec!["task".to_owned()])?;

    // a second instance of the inner sub process
    cluster.modify(1, process_instance_key, vec![activate("inner")], vec![])?;
    let inner_keys = cluster.element_instance_keys(1, "inner");
    assert_that!(inner_keys, len(eq(2)));

    cluster.modify(
        1,
        process_instance_key,
        vec![ActivateInstruction {
            ancestor_scope_key: Some(inner_keys[1]),
            ..activate("other_task")
        }],
        vec![],
    )?;
    let_assert!(RecordValue::ProcessInstance(other_task) = &cluster
        .records(1, ProcessInstanceIntent::ActivateElement)
        .last()
        .context("other task was activated")?
        .value);
    assert_that!(other_task.element_id.as_str(), eq("other_task"));
    assert_that!(other_task.flow_scope_key, some(eq(inner_keys[1])));

    cluster.modify(1, process_instance_key, vec![activate("other_task")], vec![])?;

    let errors = cluster.records(1, ErrorIntent::Created);
    assert_that!(errors, len(eq(1)));
    let_assert!(RecordValue::Error(error) = &errors[0].value);
    assert_that!(error.process_instance_key, some(eq(process_instance_key)));
    assert_that!(
        error.error_message,
        contains_substring("multiple active instances")
    );
    assert!(cluster.partition(1).store().is_banned(process_instance_key)?);
    assert_that!(
        cluster.records(1, ProcessInstanceModificationIntent::Modified),
        len(eq(2))
    );

    // later commands of the banned instance are skipped
    let log_len = cluster.partition(1).log().len();
    cluster.modify(1, process_instance_key, vec![activate("other_task")], vec![])?;
    assert_that!(cluster.partition(1).log().len(), eq(log_len + 1));
    Ok(())
}

#[test]
fn modification_terminates_element_instances() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    let process_instance_key =
        cluster.create_instance_at(1, "nested", Variables::new(), vec!["task".to_owned()])?;
    let task_key = cluster.element_instance_keys(1, "task")[0];

    cluster.modify(1, process_instance_key, vec![], vec![task_key])?;

    assert_that!(
        cluster.element_intents(1, "task").last(),
        some(eq(&ProcessInstanceIntent::ElementTerminated))
    );
    // the emptied flow scopes complete
    assert_that!(
        cluster.element_intents(1, "nested").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    Ok(())
}

#[test]
fn ancestor_scope_key_creates_a_flow_scope_instance_inside_it() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    let process_instance_key =
        cluster.create_instance_at(1, "nested", Variables::new(), vec!["task".to_owned()])?;

    // the only outer instance lies inside the ancestor, so a new one is created
    cluster.modify(
        1,
        process_instance_key,
        vec![ActivateInstruction {
            ancestor_scope_key: Some(process_instance_key),
            ..activate("other_task")
        }],
        vec![],
    )?;

    let outer_keys = cluster.element_instance_keys(1, "outer");
    let inner_keys = cluster.element_instance_keys(1, "inner");
    assert_that!(outer_keys, len(eq(2)));
    assert_that!(inner_keys, len(eq(2)));
    let flow_scope_of = |key: Key| {
        cluster
            .records(1, ProcessInstanceIntent::ElementActivating)
            .into_iter()
            .find(|r| r.key == Some(key))
            .and_then(|r| match &r.value {
                RecordValue::ProcessInstance(value) => value.flow_scope_key,
                _ => None,
            })
    };
    assert_that!(flow_scope_of(inner_keys[1]), some(eq(outer_keys[1])));
    let other_task_key = cluster.element_instance_keys(1, "other_task")[0];
    assert_that!(flow_scope_of(other_task_key), some(eq(inner_keys[1])));
    assert_that!(cluster.records(1, ErrorIntent::Created), empty());
    Ok(())
}

#[test]
fn ancestor_scope_key_selects_the_enclosing_flow_scope_instance() -> TestResult {
    let mut cluster = TestCluster::new(1, [nested_process()]);
    let process_instance_key =
        cluster.create_instance_at(1, "nested", Variables::new(), vec!["task".to_owned()])?;
    cluster.modify(
        1,
        process_instance_key,
        vec![ActivateInstruction {
            ancestor_scope_key: Some(process_instance_key),
            ..activate("other_task")
        }],
        vec![],
    )?;
    let outer_keys = cluster.element_instance_keys(1, "outer");
    let inner_keys = cluster.element_instance_keys(1, "inner");
    assert_that!(outer_keys, len(eq(2)));

    // two outer instances, the ancestor lies inside the first one
    cluster.modify(
        1,
        process_instance_key,
        vec![ActivateInstruction {
            ancestor_scope_key: Some(inner_keys[0]),
            ..activate("other_task")
        }],
        vec![],
    )?;

    assert_that!(cluster.element_instance_keys(1, "outer"), len(eq(2)));
    assert_that!(cluster.element_instance_keys(1, "inner"), len(eq(2)));
    let_assert!(RecordValue::ProcessInstance(other_task) = &cluster
        .records(1, ProcessInstanceIntent::ActivateElement)
        .last()
        .context("other task was activated")?
        .value);
    assert_that!(other_task.element_id.as_str(), eq("other_task"));
    assert_that!(other_task.flow_scope_key, some(eq(inner_keys[0])));
    assert_that!(cluster.records(1, ErrorIntent::Created), empty());
    Ok(())
}

#[test]
fn activating_inside_a_multi_instance_body_bans_the_instance() -> TestResult {
    let process = ProcessBuilder::new("batch")
        .start_event("start")
        .service_task("idle")
        .flow("start", "idle")
        .multi_instance_sub_process("items", |b| {
            b.start_event("item_start")
                .service_task("item_task")
                .flow("item_start", "item_task")
        })
        .build()
        .expect("valid process");
    let mut cluster = TestCluster::new(1, [process]);
    let process_instance_key = cluster.create_instance(1, "batch", Variables::new())?;

    cluster.modify(1, process_instance_key, vec![activate("item_task")], vec![])?;

    let errors = cluster.records(1, ErrorIntent::Created);
    assert_that!(errors, len(eq(1)));
    let_assert!(RecordValue::Error(error) = &errors[0].value);
    assert_that!(
        error.error_message,
        contains_substring("inside the multi-instance body 'items'")
    );
    assert!(cluster.partition(1).store().is_banned(process_instance_key)?);
    assert_that!(cluster.element_instance_keys(1, "items"), empty());
    assert_that!(
        cluster.records(1, ProcessInstanceModificationIntent::Modified),
        empty()
    );
    Ok(())
}

#[test]
fn new_flow_scope_variables_are_set_before_its_subscriptions_open() -> TestResult {
    let process = ProcessBuilder::new("orders")
        .start_event("start")
        .service_task("idle")
        .flow("start", "idle")
        .sub_process("sub", |b| {
            b.start_event("sub_start")
                .service_task("task")
                .flow("sub_start", "task")
                .event_sub_process("on_order", |b| {
                    b.event_start_event(
                        "order_start",
                        CatchEventKind::Message {
                            name: "order".into(),
                            correlation_key: "=orderId".into(),
                        },
                        false,
                    )
                })
        })
        .build()
        .expect("valid process");
    let mut cluster = TestCluster::new(1, [process]);
    let process_instance_key = cluster.create_instance(1, "orders", Variables::new())?;

    cluster.modify(
        1,
        process_instance_key,
        vec![ActivateInstruction {
            variables: variables([("orderId", json!("o-1"))]),
            ..activate("task")
        }],
        vec![],
    )?;

    assert_that!(cluster.records(1, ErrorIntent::Created), empty());
    assert!(!cluster.partition(1).store().is_banned(process_instance_key)?);
    let creating = cluster.records(1, ProcessMessageSubscriptionIntent::Creating);
    assert_that!(creating, len(eq(1)));
    let_assert!(RecordValue::ProcessMessageSubscription(subscription) = &creating[0].value);
    assert_that!(subscription.correlation_key.as_str(), eq("o-1"));
    assert_that!(
        subscription.element_instance_key,
        eq(cluster.element_instance_keys(1, "sub")[0])
    );
    assert_that!(
        cluster.element_intents(1, "task").last(),
        some(eq(&ProcessInstanceIntent::ElementActivated))
    );
    Ok(())
}

fn interrupting_event_sub_process() -> Process {
    ProcessBuilder::new("cancellable")
        .start_event("start")
        .service_task("work")
        .flow("start", "work")
        .event_sub_process("on_cancel", |b| {
            b.event_start_event(
                "cancel_start",
                CatchEventKind::Signal {
                    name: "cancel".into(),
                },
                true,
            )
            .end_event("cancel_end")
            .flow("cancel_start", "cancel_end")
        })
        .event_sub_process("on_abort", |b| {
            b.event_start_event(
                "abort_start",
                CatchEventKind::Signal {
                    name: "abort".into(),
                },
                true,
            )
            .end_event("abort_end")
            .flow("abort_start", "abort_end")
        })
        .build()
        .expect("valid process")
}

#[test]
fn interrupting_event_sub_process_terminates_the_flow_scope_children() -> TestResult {
    let mut cluster = TestCluster::new(1, [interrupting_event_sub_process()]);
    cluster.create_instance(1, "cancellable", Variables::new())?;

    cluster.broadcast_signal(1, "cancel");
    cluster.run_until_quiescent()?;

    assert_that!(
        cluster.element_intents(1, "work").last(),
        some(eq(&ProcessInstanceIntent::ElementTerminated))
    );
    assert_that!(
        cluster.element_intents(1, "cancel_end").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    assert_that!(
        cluster.element_intents(1, "on_cancel").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    assert_that!(
        cluster.element_intents(1, "cancellable").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    Ok(())
}

#[test]
fn second_interruption_of_the_same_scope_is_discarded() -> TestResult {
    let mut cluster = TestCluster::new(1, [interrupting_event_sub_process()]);
    cluster.create_instance(1, "cancellable", Variables::new())?;

    cluster.broadcast_signal(1, "cancel");
    cluster.broadcast_signal(1, "abort");
    cluster.run_until_quiescent()?;

    assert_that!(
        cluster.element_intents(1, "on_cancel").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    assert_that!(cluster.element_intents(1, "on_abort"), empty());
    assert_that!(
        cluster.element_intents(1, "cancellable").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    Ok(())
}

fn timer_process(timer: TimerDefinition) -> Process {
    ProcessBuilder::new("delayed")
        .start_event("start")
        .intermediate_catch_event("wait", CatchEventKind::Timer(timer))
        .end_event("end")
        .flow("start", "wait")
        .flow("wait", "end")
        .build()
        .expect("valid process")
}

#[test]
fn duration_timer_triggers_when_due() -> TestResult {
    let mut cluster = TestCluster::new(1, [timer_process(TimerDefinition::Duration(
        "PT10S".into(),
    ))]);
    cluster.create_instance(1, "delayed", Variables::new())?;

    let created = cluster.records(1, TimerIntent::Created);
    assert_that!(created, len(eq(1)));
    let_assert!(RecordValue::Timer(timer) = &created[0].value);
    assert_that!(timer.due_date, eq(START + Duration::from_secs(10)));
    assert_that!(
        cluster.partition(1).next_due_date()?,
        some(eq(START + Duration::from_secs(10)))
    );

    cluster.advance_time(Duration::from_secs(5))?;
    assert_that!(cluster.records(1, TimerIntent::Triggered), empty());

    cluster.advance_time(Duration::from_secs(5))?;
    assert_that!(cluster.records(1, TimerIntent::Triggered), len(eq(1)));
    assert_that!(
        cluster.element_intents(1, "delayed").last(),
        some(eq(&ProcessInstanceIntent::ElementCompleted))
    );
    assert_that!(cluster.partition(1).next_due_date()?, none());
    Ok(())
}

#[test]
fn timer_date_expression_is_evaluated_against_variables() -> TestResult {
    let mut cluster = TestCluster::new(1, [timer_process(TimerDefinition::Date(
        "=deadline".into(),
    ))]);
    cluster.create_instance(
        1,
        "delayed",
        variables([("deadline", json!("1970-01-01T00:20:00Z"))]),
    )?;

    let created = cluster.records(1, TimerIntent::Created);
    assert_that!(created, len(eq(1)));
    let_assert!(RecordValue::Timer(timer) = &created[0].value);
    assert_that!(timer.due_date, eq(MillisSinceEpoch::new(1_200_000)));
    Ok(())
}

#[test]
fn cycle_timer_repeats_for_non_interrupting_boundary_event() -> TestResult {
    let process = ProcessBuilder::new("reminders")
        .start_event("start")
        .service_task("work")
        .boundary_event(
            "remind",
            "work",
            CatchEventKind::Timer(TimerDefinition::Cycle("R3/PT10S".into())),
            false,
        )
        .end_event("reminded")
        .flow("start", "work")
        .flow("remind", "reminded")
        .build()
        .expect("valid process");
    let mut cluster = TestCluster::new(1, [process]);
    cluster.create_instance(1, "reminders", Variables::new())?;

    for round in 1..=3 {
        cluster.advance_time(Duration::from_secs(10))?;
        assert_that!(cluster.records(1, TimerIntent::Triggered), len(eq(round)));
    }
    cluster.advance_time(Duration::from_secs(10))?;

    let repetitions: Vec<_> = cluster
        .records(1, TimerIntent::Created)
        .into_iter()
        .filter_map(|r| match &r.value {
            RecordValue::Timer(timer) => Some((timer.repetitions, timer.due_date)),
            _ => None,
        })
        .collect();
    assert_that!(
        repetitions,
        eq(vec![
            (3, START + Duration::from_secs(10)),
            (2, START + Duration::from_secs(20)),
            (1, START + Duration::from_secs(30)),
        ])
    );
    assert_that!(cluster.records(1, TimerIntent::Triggered), len(eq(3)));
    assert_that!(
        cluster
            .element_intents(1, "reminded")
            .into_iter()
            .filter(|i| *i == ProcessInstanceIntent::ElementCompleted)
            .count(),
        eq(3)
    );
    // the activity keeps running
    assert_that!(
        cluster.element_intents(1, "work").last(),
        some(eq(&ProcessInstanceIntent::ElementActivated))
    );
    Ok(())
}

#[test]
fn failing_catch_event_opens_no_subscription() -> TestResult {
    let process = ProcessBuilder::new("guarded")
        .start_event("start")
        .service_task("work")
        .boundary_event(
            "timeout",
            "work",
            CatchEventKind::Timer(TimerDefinition::Duration("PT1H".into())),
            true,
        )
        .boundary_event(
            "cancelled",
            "work",
            CatchEventKind::Message {
                name: "cancel".into(),
                correlation_key: "=missing".into(),
            },
            true,
        )
        .flow("start", "work")
        .build()
        .expect("valid process");
    let mut cluster = TestCluster::new(1, [process]);
    cluster.create_instance(1, "guarded", Variables::new())?;

    let incidents = cluster.records(1, IncidentIntent::Created);
    assert_that!(incidents, len(eq(1)));
    let_assert!(RecordValue::Incident(incident) = &incidents[0].value);
    assert_that!(incident.element_id.as_str(), eq("work"));
    assert_that!(incident.error_message, contains_substring("missing"));

    assert_that!(cluster.records(1, TimerIntent::Created), empty());
    assert_that!(
        cluster.records(1, ProcessMessageSubscriptionIntent::Creating),
        empty()
    );
    assert_that!(
        cluster.element_intents(1, "work").last(),
        some(eq(&ProcessInstanceIntent::ElementActivating))
    );
    Ok(())
}

#[test]
fn replayed_partition_has_the_same_state() -> TestResult {
    let mut cluster = TestCluster::new(1, [
        timer_process(TimerDefinition::Duration("PT10S".into())),
        interrupting_event_sub_process(),
    ]);
    cluster.create_instance(1, "delayed", Variables::new())?;
    cluster.create_instance(1, "cancellable", Variables::new())?;
    cluster.create_instance(1, "delayed", Variables::new())?;
    cluster.advance_time(Duration::from_secs(10))?;
    // not processed yet
    cluster.broadcast_signal(1, "cancel");

    let log: PartitionLog = cluster.partition(1).log().clone();
    let mut replayed = Partition::replay(cluster.state_machine(PartitionId::from(1)), log)?;

    assert_that!(
        replayed.store().column_snapshots()?,
        eq(cluster.partition(1).store().column_snapshots()?)
    );
    assert!(replayed.has_unprocessed_commands()?);

    cluster.run_until_quiescent()?;
    while replayed.process_next()?.is_some() {}

    assert_that!(replayed.log(), eq(cluster.partition(1).log()));
    assert_that!(
        replayed.store().column_snapshots()?,
        eq(cluster.partition(1).store().column_snapshots()?)
    );
    Ok(())
}
