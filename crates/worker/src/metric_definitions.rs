// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

/// Optional to have but adds description/help message to the metrics emitted to
/// the metrics' sink.
use metrics::{describe_counter, describe_histogram, Unit};

pub const PARTITION_APPLY_COMMAND: &str = "cadence.partition.apply_command.seconds";
pub const PARTITION_PROCESSED_COMMANDS: &str = "cadence.partition.processed_commands.total";
pub const PARTITION_REJECTED_COMMANDS: &str = "cadence.partition.rejected_commands.total";
pub const PARTITION_QUARANTINED_COMMANDS: &str = "cadence.partition.quarantined_commands.total";
pub const PARTITION_WRITTEN_RECORDS: &str = "cadence.partition.written_records.total";
pub const PARTITION_REPLAYED_RECORDS: &str = "cadence.partition.replayed_records.total";
pub const PARTITION_TIMER_DUE_HANDLED: &str = "cadence.partition.timer_due_handled.total";
pub const PARTITION_DISTRIBUTIONS_STARTED: &str = "cadence.partition.distributions_started.total";
pub const PARTITION_DISTRIBUTIONS_ACKNOWLEDGED: &str =
    "cadence.partition.distributions_acknowledged.total";
pub const PARTITION_HANDLE_ACTION_BATCH_DURATION: &str =
    "cadence.partition.handle_action_batch_duration.seconds";

pub const PARTITION_LABEL: &str = "partition";

pub fn describe_metrics() {
    describe_histogram!(
        PARTITION_APPLY_COMMAND,
        Unit::Seconds,
        "Time spent applying partition processor command"
    );
    describe_counter!(
        PARTITION_PROCESSED_COMMANDS,
        Unit::Count,
        "Number of commands processed by the partition processor"
    );
    describe_counter!(
        PARTITION_REJECTED_COMMANDS,
        Unit::Count,
        "Number of commands which were rejected"
    );
    describe_counter!(
        PARTITION_QUARANTINED_COMMANDS,
        Unit::Count,
        "Number of commands whose processing failed and banned their process instance"
    );
    describe_counter!(
        PARTITION_WRITTEN_RECORDS,
        Unit::Count,
        "Number of follow up records appended to the partition log"
    );
    describe_counter!(
        PARTITION_REPLAYED_RECORDS,
        Unit::Count,
        "Number of log records replayed when recovering the partition state"
    );
    describe_counter!(
        PARTITION_TIMER_DUE_HANDLED,
        Unit::Count,
        "Number of due timer instances processed"
    );
    describe_counter!(
        PARTITION_DISTRIBUTIONS_STARTED,
        Unit::Count,
        "Number of command distributions started by this partition"
    );
    describe_counter!(
        PARTITION_DISTRIBUTIONS_ACKNOWLEDGED,
        Unit::Count,
        "Number of command distribution acknowledgements received"
    );
    describe_histogram!(
        PARTITION_HANDLE_ACTION_BATCH_DURATION,
        Unit::Seconds,
        "Time spent executing the actions of a processed command"
    );
}
