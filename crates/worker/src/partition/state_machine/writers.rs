// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::StorageError;
use cadence_types::identifiers::Key;
use cadence_wal_protocol::intent::Intent;
use cadence_wal_protocol::value::RecordValue;
use cadence_wal_protocol::{Position, Record, RecordType, Rejection};

/// Collects the follow up records of the command being processed. The records get their
/// positions up front: the log is not appended to while a command is processed.
#[derive(Debug)]
pub(crate) struct Writers {
    source_position: Position,
    next_position: Position,
    records: Vec<Record>,
}

impl Writers {
    pub(crate) fn new(source_position: Position, next_position: Position) -> Self {
        Self {
            source_position,
            next_position,
            records: Vec::new(),
        }
    }

    fn push(
        &mut self,
        record_type: RecordType,
        key: Option<Key>,
        intent: Intent,
        value: RecordValue,
        rejection: Option<Rejection>,
    ) -> &Record {
        let position = self.next_position;
        self.next_position += 1;
        self.records.push(Record {
            position,
            source_position: Some(self.source_position),
            record_type,
            key,
            intent,
            value,
            rejection,
            distribution_key: None,
        });
        // just pushed
        &self.records[self.records.len() - 1]
    }

    pub(crate) fn event(
        &mut self,
        key: Option<Key>,
        intent: Intent,
        value: RecordValue,
    ) -> &Record {
        debug_assert!(intent.is_event(), "{intent} is not an event intent");
        self.push(RecordType::Event, key, intent, value, None)
    }

    pub(crate) fn command(&mut self, key: Option<Key>, intent: Intent, value: RecordValue) {
        debug_assert!(!intent.is_event(), "{intent} is not a command intent");
        self.push(RecordType::Command, key, intent, value, None);
    }

    pub(crate) fn rejection(&mut self, command: &Record, rejection: Rejection) {
        self.push(
            RecordType::CommandRejection,
            command.key,
            command.intent,
            command.value.clone(),
            Some(rejection),
        );
    }

    pub(crate) fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }
}
