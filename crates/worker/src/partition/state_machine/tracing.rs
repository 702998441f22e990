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
use cadence_wal_protocol::Record;
use tracing::{debug_span, event_enabled, Level, Span};

pub(super) trait StateMachineSpanExt {
    fn record_process_instance_key(record: &Record);
}

impl StateMachineSpanExt for Span {
    fn record_process_instance_key(record: &Record) {
        if let Some(process_instance_key) = record.value.process_instance_key() {
            Span::current().record(
                "cadence.process_instance.key",
                tracing::field::display(process_instance_key),
            );
        }
    }
}

pub(super) fn state_machine_apply_command_span(partition_id: PartitionId, cmd: &Record) -> Span {
    let span = debug_span!(
        "apply_command",
        cadence.partition.id = %partition_id,
        cadence.record.position = cmd.position,
        cadence.record.intent = %cmd.intent,
        cadence.record.value_type = %cmd.value_type(),
        cadence.record.key = tracing::field::Empty,
        cadence.process_instance.key = tracing::field::Empty,
        cadence.state_machine.command = tracing::field::Empty,
    );
    if let Some(key) = cmd.key {
        span.record("cadence.record.key", tracing::field::display(key));
    }
    if event_enabled!(Level::TRACE) {
        span.record("cadence.state_machine.command", tracing::field::debug(cmd));
    }

    span
}
