// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cadence_types::config::{Configuration, InvalidConfigurationError, WorkerOptions};
use cadence_types::config_loader::{ConfigLoadError, ConfigLoader};
use cadence_types::expression::SimpleExpressionLanguage;
use cadence_types::identifiers::PartitionId;
use cadence_types::process::ProcessRepository;
use cadence_types::time::{Clock, SystemClock};
use cadence_wal_protocol::Envelope;

use crate::metric_definitions;
use crate::partition::router::InProcessRouter;
use crate::partition::state_machine::StateMachine;
use crate::partition::{Partition, PartitionProcessor, PartitionProcessorHandle};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed creating worker: {0}")]
    InvalidConfiguration(#[from] InvalidConfigurationError),
    #[error("failed loading configuration: {0}")]
    ConfigLoad(#[from] ConfigLoadError),
}

/// All partitions of a node, wired to each other through an [`InProcessRouter`].
pub struct Worker {
    options: WorkerOptions,
    clock: Arc<dyn Clock>,
    router: InProcessRouter,
    partitions: Vec<(Partition, mpsc::Receiver<Envelope>)>,
    handles: BTreeMap<PartitionId, PartitionProcessorHandle>,
}

impl Worker {
    /// Loads the configuration and creates the worker from it.
    pub fn load(
        config_loader: &ConfigLoader,
        processes: Arc<ProcessRepository>,
    ) -> Result<Self, BuildError> {
        let config = config_loader.load_once()?;
        Self::create(&config, processes)
    }

    /// Creates a partition per partition id of the configured topology. The processes are
    /// shared by all partitions.
    pub fn create(
        config: &Configuration,
        processes: Arc<ProcessRepository>,
    ) -> Result<Self, BuildError> {
        Self::create_with_clock(config, processes, Arc::new(SystemClock))
    }

    pub fn create_with_clock(
        config: &Configuration,
        processes: Arc<ProcessRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        metric_definitions::describe_metrics();

        let topology = config.topology();
        let options = config.worker.clone();
        let expression_language = Arc::new(SimpleExpressionLanguage);

        let mut partitions = Vec::with_capacity(usize::from(topology.partitions_count()));
        let mut handles = BTreeMap::new();
        for partition_id in topology.partition_ids() {
            let (tx, rx) = mpsc::channel(options.internal_queue_length);
            let state_machine = StateMachine::new(
                partition_id,
                topology,
                Arc::clone(&processes),
                expression_language.clone(),
                Arc::clone(&clock),
            );
            partitions.push((Partition::new(state_machine), rx));
            handles.insert(partition_id, PartitionProcessorHandle::new(partition_id, tx));
        }
        let router = InProcessRouter::new(
            handles
                .iter()
                .map(|(partition_id, handle)| (*partition_id, handle.sender())),
        );

        info!(
            node_name = %config.common.node_name,
            first_partition_id = %topology.first_partition_id(),
            partitions_count = topology.partitions_count(),
            "Created worker"
        );
        Ok(Self {
            options,
            clock,
            router,
            partitions,
            handles,
        })
    }

    pub fn handle(&self, partition_id: PartitionId) -> Option<&PartitionProcessorHandle> {
        self.handles.get(&partition_id)
    }

    /// Spawns one [`PartitionProcessor`] per partition on the current tokio runtime.
    pub fn start(self) -> RunningWorker {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let tasks = self
            .partitions
            .into_iter()
            .map(|(partition, inbound_rx)| {
                let partition_id = partition.partition_id();
                let processor = PartitionProcessor::new(
                    partition,
                    inbound_rx,
                    self.router.clone(),
                    Arc::clone(&self.clock),
                    self.options.clone(),
                );
                let mut shutdown_rx = shutdown_rx.clone();
                let task = tokio::spawn(processor.run(async move {
                    // a dropped sender shuts down as well
                    let _ = shutdown_rx.changed().await;
                }));
                (partition_id, task)
            })
            .collect();
        info!("Started worker");

        RunningWorker {
            handles: self.handles,
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// A started [`Worker`]. Dropping it shuts the partition processors down without waiting
/// for them.
pub struct RunningWorker {
    handles: BTreeMap<PartitionId, PartitionProcessorHandle>,
    shutdown: watch::Sender<()>,
    tasks: Vec<(PartitionId, JoinHandle<anyhow::Result<Partition>>)>,
}

impl RunningWorker {
    pub fn handle(&self, partition_id: PartitionId) -> Option<&PartitionProcessorHandle> {
        self.handles.get(&partition_id)
    }

    /// Stops all partition processors and returns their partitions in partition id order.
    pub async fn shutdown(self) -> anyhow::Result<Vec<Partition>> {
        let RunningWorker { shutdown, tasks, .. } = self;
        // fails only if every processor has stopped already
        let _ = shutdown.send(());

        let mut partitions = Vec::with_capacity(tasks.len());
        for (partition_id, task) in tasks {
            let partition = task.await??;
            debug!(%partition_id, "Partition processor shut down");
            partitions.push(partition);
        }
        info!("Worker shut down");
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use googletest::prelude::*;
    use test_log::test;

    use cadence_test_util::let_assert;
    use cadence_types::config::{CommonOptionsBuilder, ConfigurationBuilder};
    use cadence_types::config_loader::ConfigLoaderBuilder;
    use cadence_types::process::{CatchEventKind, Process, ProcessBuilder};
    use cadence_wal_protocol::intent::{
        CommandDistributionIntent, Intent, ProcessInstanceCreationIntent, ProcessInstanceIntent,
        SignalIntent,
    };
    use cadence_wal_protocol::value::{ProcessInstanceCreationRecord, RecordValue, SignalRecord};
    use cadence_wal_protocol::Command;

    type TestResult = std::result::Result<(), anyhow::Error>;

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

    fn create_instance() -> Command {
        Command::new(
            None,
            ProcessInstanceCreationIntent::Create,
            ProcessInstanceCreationRecord {
                bpmn_process_id: "signalled".to_owned(),
                process_definition_key: None,
                process_instance_key: None,
                variables: Default::default(),
                start_instructions: vec![],
            },
        )
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

    fn completed(partition: &Partition, element_id: &str) -> usize {
        partition
            .log()
            .records()
            .iter()
            .filter(|r| r.intent == Intent::from(ProcessInstanceIntent::ElementCompleted))
            .filter(|r| {
                matches!(
                    &r.value,
                    RecordValue::ProcessInstance(value) if value.element_id == element_id
                )
            })
            .count()
    }

    #[test(tokio::test(start_paused = true))]
    async fn worker_runs_the_configured_partitions() -> TestResult {
        let config_loader = ConfigLoaderBuilder::default()
            .custom_default(
                ConfigurationBuilder::default()
                    .common(
                        CommonOptionsBuilder::default()
                            .first_partition_id(3)
                            .partitions_count(2)
                            .build()?,
                    )
                    .build()?,
            )
            .build()?;
        let mut processes = ProcessRepository::default();
        processes.deploy(signal_catch_process());

        let worker = Worker::load(&config_loader, Arc::new(processes))?;
        assert!(worker.handle(PartitionId::from(1)).is_none());
        let running = worker.start();

        for partition_id in [3, 4] {
            let_assert!(Some(handle) = running.handle(PartitionId::from(partition_id)));
            handle.submit(create_instance()).await?;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let_assert!(Some(handle) = running.handle(PartitionId::from(3)));
        handle
            .submit(Command::new(
                None,
                SignalIntent::Broadcast,
                SignalRecord {
                    signal_name: "sig".to_owned(),
                    variables: Default::default(),
                },
            ))
            .await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let partitions = running.shutdown().await?;

        assert_that!(partitions, len(eq(2)));
        assert_that!(partitions[0].partition_id(), eq(PartitionId::from(3)));
        assert_that!(count(&partitions[0], CommandDistributionIntent::Finished), eq(1));
        assert_that!(count(&partitions[1], CommandDistributionIntent::Received), eq(1));
        for partition in &partitions {
            assert_that!(count(partition, ProcessInstanceCreationIntent::Created), eq(1));
            assert_that!(completed(partition, "signalled"), eq(1));
            assert!(!partition.has_unprocessed_commands()?);
        }
        Ok(())
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = ConfigurationBuilder::default()
            .common(
                CommonOptionsBuilder::default()
                    .partitions_count(0)
                    .build()
                    .expect("valid builder"),
            )
            .build()
            .expect("valid builder");

        let result = Worker::create(&config, Arc::default());

        let_assert!(Err(BuildError::InvalidConfiguration(_)) = result);
    }
}
