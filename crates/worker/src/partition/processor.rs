// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use cadence_timer_queue::TimerQueue;
use cadence_types::config::WorkerOptions;
use cadence_types::identifiers::PartitionId;
use cadence_types::time::Clock;
use cadence_wal_protocol::{Command, Envelope};

use crate::metric_definitions::PARTITION_HANDLE_ACTION_BATCH_DURATION;
use crate::partition::router::{PartitionRouter, RouterError};
use crate::partition::state_machine::{Action, ActionCollector};
use crate::partition::Partition;

/// Submits commands to a running [`PartitionProcessor`].
#[derive(Debug, Clone)]
pub struct PartitionProcessorHandle {
    partition_id: PartitionId,
    tx: mpsc::Sender<Envelope>,
}

impl PartitionProcessorHandle {
    pub fn new(partition_id: PartitionId, tx: mpsc::Sender<Envelope>) -> Self {
        Self { partition_id, tx }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Envelope> {
        self.tx.clone()
    }

    pub async fn submit(&self, command: Command) -> Result<(), RouterError> {
        self.tx
            .send(Envelope::from_client(self.partition_id, command))
            .await
            .map_err(|_| RouterError::PartitionClosed(self.partition_id))
    }
}

/// Drives a [`Partition`]: appends inbound commands, processes them, triggers due timers and
/// periodically retries unconfirmed sends.
pub struct PartitionProcessor<R> {
    partition: Partition,
    inbound_rx: mpsc::Receiver<Envelope>,
    router: R,
    clock: Arc<dyn Clock>,
    options: WorkerOptions,
}

impl<R: PartitionRouter> PartitionProcessor<R> {
    pub fn new(
        partition: Partition,
        inbound_rx: mpsc::Receiver<Envelope>,
        router: R,
        clock: Arc<dyn Clock>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            partition,
            inbound_rx,
            router,
            clock,
            options,
        }
    }

    /// Runs until `shutdown` completes or the inbound channel is closed and returns the
    /// partition.
    #[instrument(
        level = "info",
        skip_all,
        fields(cadence.partition.id = %self.partition.partition_id())
    )]
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<Partition> {
        let PartitionProcessor {
            mut partition,
            mut inbound_rx,
            router,
            clock,
            options,
        } = self;
        let max_commands_in_batch = options.max_commands_in_batch.max(1);
        let timer_batch_limit = options.timer_batch_limit.max(1);

        let mut timer_queue = TimerQueue::new();
        if let Some(due_date) = partition.next_due_date()? {
            debug!(%due_date, "Schedule persisted timers");
            timer_queue.sleep_until(due_date, ());
        }

        let retry_period: Duration =
            (*options.redistribution_interval).min(*options.pending_subscription_check_interval);
        let mut retry_interval = tokio::time::interval(retry_period);
        retry_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        retry_interval.tick().await;

        tokio::pin!(shutdown);
        info!("Partition processor started");

        loop {
            let has_unprocessed = partition.has_unprocessed_commands()?;
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutting partition processor down");
                    break;
                },
                envelope = inbound_rx.recv() => {
                    let Some(envelope) = envelope else {
                        debug!("Inbound channel closed, shutting partition processor down");
                        break;
                    };
                    partition.append_envelope(envelope);
                    while let Ok(envelope) = inbound_rx.try_recv() {
                        partition.append_envelope(envelope);
                    }
                },
                timer = timer_queue.await_timer(clock.now()) => {
                    trace!(due_date = %timer.due_date(), "Timer fired");
                    let now = clock.now();
                    let appended = partition.append_due_timer_triggers(now, timer_batch_limit)?;
                    let next_due_date = if appended == timer_batch_limit {
                        // more timers may be due already
                        partition.next_due_date()?
                    } else {
                        partition.next_due_date_after(now)?
                    };
                    if let Some(due_date) = next_due_date {
                        timer_queue.sleep_until(due_date, ());
                    }
                },
                _ = retry_interval.tick() => {
                    let actions = partition.retry_actions()?;
                    if !actions.is_empty() {
                        debug!(actions = actions.len(), "Retry unconfirmed sends");
                    }
                    handle_actions(&mut partition, &router, &mut timer_queue, actions).await;
                },
                _ = std::future::ready(()), if has_unprocessed => {},
            }

            for _ in 0..max_commands_in_batch {
                let Some(actions) = partition.process_next()? else {
                    break;
                };
                handle_actions(&mut partition, &router, &mut timer_queue, actions).await;
            }
        }

        info!("Partition processor stopped");
        Ok(partition)
    }
}

async fn handle_actions<R: PartitionRouter>(
    partition: &mut Partition,
    router: &R,
    timer_queue: &mut TimerQueue<()>,
    actions: ActionCollector,
) {
    if actions.is_empty() {
        return;
    }
    let start = Instant::now();
    let partition_id = partition.partition_id();

    for action in actions {
        match action {
            Action::ScheduleTimer { due_date } => {
                timer_queue.sleep_until(due_date, ());
            }
            Action::SendCommand {
                partition_id: dest,
                envelope,
            } if dest == partition_id => {
                partition.append_envelope(envelope);
            }
            Action::SendCommand {
                partition_id: dest,
                envelope,
            } => {
                // unconfirmed sends are retried, a lost envelope is not fatal
                if let Err(err) = router.route(envelope).await {
                    warn!(%dest, "Failed to send command: {err}");
                }
            }
        }
    }
    histogram!(PARTITION_HANDLE_ACTION_BATCH_DURATION).record(start.elapsed());
}
