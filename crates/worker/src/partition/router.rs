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
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use cadence_types::identifiers::PartitionId;
use cadence_wal_protocol::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no route to partition {0}")]
    UnknownPartition(PartitionId),
    #[error("partition {0} is shut down")]
    PartitionClosed(PartitionId),
}

/// Delivers envelopes to the partition they are addressed to.
pub trait PartitionRouter: Clone + Send + Sync + 'static {
    fn route(&self, envelope: Envelope) -> impl Future<Output = Result<(), RouterError>> + Send;
}

/// Routes between the partitions of one process through their inbound channels.
#[derive(Debug, Clone, Default)]
pub struct InProcessRouter {
    senders: Arc<BTreeMap<PartitionId, mpsc::Sender<Envelope>>>,
}

impl InProcessRouter {
    pub fn new(senders: impl IntoIterator<Item = (PartitionId, mpsc::Sender<Envelope>)>) -> Self {
        Self {
            senders: Arc::new(senders.into_iter().collect()),
        }
    }
}

impl PartitionRouter for InProcessRouter {
    async fn route(&self, envelope: Envelope) -> Result<(), RouterError> {
        let partition_id = envelope.partition_id();
        let sender = self
            .senders
            .get(&partition_id)
            .ok_or(RouterError::UnknownPartition(partition_id))?;
        sender
            .send(envelope)
            .await
            .map_err(|_| RouterError::PartitionClosed(partition_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cadence_test_util::{assert_no_recv, let_assert};
    use cadence_wal_protocol::intent::SignalIntent;
    use cadence_wal_protocol::value::SignalRecord;
    use cadence_wal_protocol::Command;
    use test_log::test;

    fn broadcast(dest: PartitionId) -> Envelope {
        Envelope::from_client(
            dest,
            Command::new(
                None,
                SignalIntent::Broadcast,
                SignalRecord {
                    signal_name: "alarm".to_owned(),
                    variables: Default::default(),
                },
            ),
        )
    }

    #[test(tokio::test)]
    async fn routes_by_destination() {
        let (tx_1, mut rx_1) = mpsc::channel(4);
        let (tx_2, mut rx_2) = mpsc::channel(4);
        let router = InProcessRouter::new([
            (PartitionId::from(1), tx_1),
            (PartitionId::from(2), tx_2),
        ]);

        let_assert!(Ok(()) = router.route(broadcast(PartitionId::from(2))).await);

        let_assert!(Some(envelope) = rx_2.recv().await);
        assert_eq!(envelope.partition_id(), PartitionId::from(2));
        assert_no_recv!(rx_1);
    }

    #[test(tokio::test)]
    async fn unknown_partition_is_an_error() {
        let router = InProcessRouter::default();

        let_assert!(
            Err(RouterError::UnknownPartition(partition_id)) =
                router.route(broadcast(PartitionId::from(7))).await
        );
        assert_eq!(partition_id, PartitionId::from(7));
    }
}
