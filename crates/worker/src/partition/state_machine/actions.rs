// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_types::identifiers::PartitionId;
use cadence_types::time::MillisSinceEpoch;
use cadence_wal_protocol::Envelope;

/// Side effect of processing a command. Actions are executed only after the records written
/// by the command are durable, and they may be executed more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Make sure the timer checker runs at the given due date.
    ScheduleTimer { due_date: MillisSinceEpoch },
    /// Send a command to the log of a partition. The partition can be this partition.
    SendCommand {
        partition_id: PartitionId,
        envelope: Envelope,
    },
}

pub type ActionCollector = Vec<Action>;
