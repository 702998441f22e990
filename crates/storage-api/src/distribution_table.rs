// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cadence_types::identifiers::{Key, PartitionId};
use cadence_wal_protocol::value::CommandDistributionRecord;

use crate::Result;

/// A command distribution started by this partition which is not acknowledged by every
/// other partition yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDistribution {
    pub key: Key,
    /// The `STARTED` value, including the payload of the distributed command.
    pub value: CommandDistributionRecord,
    pub pending_partitions: BTreeSet<PartitionId>,
}

pub trait ReadOnlyDistributionTable {
    fn get_pending_distribution(
        &self,
        distribution_key: Key,
    ) -> Result<Option<PendingDistribution>>;

    /// All pending distributions, ordered by distribution key.
    fn get_pending_distributions(&self) -> Result<Vec<PendingDistribution>>;

    /// Whether a distributed command with this key was already received by this partition.
    fn is_distribution_received(&self, distribution_key: Key) -> Result<bool>;
}

pub trait DistributionTable: ReadOnlyDistributionTable {
    fn put_pending_distribution(&mut self, distribution: PendingDistribution) -> Result<()>;

    fn delete_pending_distribution(&mut self, distribution_key: Key) -> Result<()>;

    fn put_received_distribution(&mut self, distribution_key: Key) -> Result<()>;

    fn delete_received_distribution(&mut self, distribution_key: Key) -> Result<()>;
}
