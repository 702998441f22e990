// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use googletest::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use test_log::test;

use cadence_types::config::WorkerOptions;
use cadence_types::identifiers::PartitionId;
use cadence_types::process::TimerDefinition;
use cadence_types::time::{Clock, MillisSinceEpoch};
use cadence_types::Variables;
use cadence_wal_protocol::intent::{
    CommandDistributionIntent, Intent, SignalIntent, TimerIntent,
};
use cadence_wal_protocol::value::SignalRecord;
use cadence_wal_protocol::Command;

use super::{signal_catch_process, timer_process, TestCluster, TestResult};
use crate::partition::router::InProcessRouter;
use crate::partition::{Partition, PartitionProcessor, PartitionProcessorHandle};

/// Wall clock following the paused tokio time.
struct TokioClock {
    origin: tokio::time::Instant,
    start: MillisSinceEpoch,
}

impl TokioClock {
    fn new(start: MillisSinceEpoch) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            start,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> MillisSinceEpoch {
        self.start + self.origin.elapsed()
    }
}

fn count(partition: &Partition, intent: impl Into<Intent>) -> usize {
    let intent = intent.into();
    partition
        .log()
        .records()
        .iter()
        .filter(|r| r.intent == intent && !r.record_type.is_command_rejection())
        .count()
}

struct RunningPartition {
    handle: PartitionProcessorHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<Partition>>,
}

fn start_processors(cluster: TestCluster) -> Vec<RunningPartition> {
    let options = WorkerOptions::default();
    let channels: Vec<_> = cluster
        .partitions
        .keys()
        .map(|partition_id| {
            let (tx, rx) = mpsc::channel(options.internal_queue_length);
            (*partition_id, tx, rx)
        })
        .collect();
    let router = InProcessRouter::new(
        channels
            .iter()
            .map(|(partition_id, tx, _)| (*partition_id, tx.clone())),
    );

    let clock = Arc::new(cluster.clock.clone());
    let mut partitions = cluster.partitions;
    channels
        .into_iter()
        .map(|(partition_id, tx, rx)| {
            let partition = partitions.remove(&partition_id).expect("partition exists");
            let processor = PartitionProcessor::new(
                partition,
                rx,
                router.clone(),
                clock.clone(),
                options.clone(),
            );
            let (shutdown, shutdown_rx) = oneshot::channel();
            let task = tokio::spawn(processor.run(async move {
                let _ = shutdown_rx.await;
            }));
            RunningPartition {
                handle: PartitionProcessorHandle::new(partition_id, tx),
                shutdown,
                task,
            }
        })
        .collect()
}

async fn stop_processors(running: Vec<RunningPartition>) -> anyhow::Result<Vec<Partition>> {
    let mut partitions = Vec::with_capacity(running.len());
    for partition in running {
        let _ = partition.shutdown.send(());
        partitions.push(partition.task.await??);
    }
    Ok(partitions)
}

#[test(tokio::test(start_paused = true))]
async fn processors_exchange_distributed_commands() -> TestResult {
    let cluster = TestCluster::new(2, [signal_catch_process()]);
    let running = start_processors(cluster);

    assert_that!(running[0].handle.partition_id(), eq(PartitionId::from(1)));
    running[0]
        .handle
        .submit(Command::new(
            None,
            SignalIntent::Broadcast,
            SignalRecord {
                signal_name: "sig".to_owned(),
                variables: Default::default(),
            },
        ))
        .await?;
    // time only moves once all processors are idle
    tokio::time::sleep(Duration::from_millis(100)).await;

    let partitions = stop_processors(running).await?;

    assert_that!(count(&partitions[0], CommandDistributionIntent::Started), eq(1));
    assert_that!(count(&partitions[0], CommandDistributionIntent::Finished), eq(1));
    assert_that!(count(&partitions[1], CommandDistributionIntent::Received), eq(1));
    assert!(!partitions[0].has_unprocessed_commands()?);
    assert!(!partitions[1].has_unprocessed_commands()?);
    Ok(())
}

#[test(tokio::test(start_paused = true))]
async fn processor_stops_when_inbound_channel_is_closed() -> TestResult {
    let cluster = TestCluster::new(1, [signal_catch_process()]);
    let state_machine = cluster.state_machine(PartitionId::from(1));
    let (tx, rx) = mpsc::channel(1);
    let processor = PartitionProcessor::new(
        Partition::new(state_machine),
        rx,
        InProcessRouter::default(),
        Arc::new(cluster.clock.clone()),
        WorkerOptions::default(),
    );
    drop(tx);

    let partition = processor.run(std::future::pending()).await?;

    assert!(partition.log().is_empty());
    Ok(())
}

#[test(tokio::test(start_paused = true))]
async fn persisted_timers_trigger_after_restart() -> TestResult {
    let mut cluster = TestCluster::new(1, [timer_process(TimerDefinition::Duration(
        "PT10S".into(),
    ))]);
    cluster.create_instance(1, "delayed", Variables::new())?;
    cluster.advance_time(Duration::from_secs(5))?;
    cluster.create_instance(1, "delayed", Variables::new())?;
    assert_that!(count(cluster.partition(1), TimerIntent::Created), eq(2));

    // restart from the log, nothing is scheduled in memory yet
    let log = cluster.partition(1).log().clone();
    let partition = Partition::replay(cluster.state_machine(PartitionId::from(1)), log)?;
    let (_tx, rx) = mpsc::channel(1);
    let processor = PartitionProcessor::new(
        partition,
        rx,
        InProcessRouter::default(),
        Arc::new(TokioClock::new(cluster.clock.now())),
        WorkerOptions::default(),
    );
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(processor.run(async move {
        let _ = shutdown_rx.await;
    }));

    tokio::time::sleep(Duration::from_secs(60)).await;
    let _ = shutdown.send(());
    let partition = task.await??;

    assert_that!(count(&partition, TimerIntent::Triggered), eq(2));
    assert_that!(partition.next_due_date()?, none());
    assert!(!partition.has_unprocessed_commands()?);
    Ok(())
}
