// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_wal_protocol::{Command, Position, Record, RecordType};

/// The ordered records of one partition. Positions start at 1 and have no gaps.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PartitionLog {
    records: Vec<Record>,
}

impl PartitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_position(&self) -> Position {
        self.records.len() as Position + 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, position: Position) -> Option<&Record> {
        let index = usize::try_from(position.checked_sub(1)?).ok()?;
        self.records.get(index)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Records from the given position on.
    pub fn records_from(&self, position: Position) -> impl Iterator<Item = &Record> {
        let skip = usize::try_from(position.saturating_sub(1)).unwrap_or(usize::MAX);
        self.records.iter().skip(skip)
    }

    /// Appends a command which was not written by this partition's processor.
    pub fn append_command(&mut self, command: Command) -> Position {
        let position = self.next_position();
        self.records.push(Record {
            position,
            source_position: None,
            record_type: RecordType::Command,
            key: command.key,
            intent: command.intent,
            value: command.value,
            rejection: None,
            distribution_key: command.distribution_key,
        });
        position
    }

    /// Appends the follow up records of a processed command. Their positions were assigned
    /// when they were written and continue the log.
    pub(crate) fn append(&mut self, records: Vec<Record>) {
        for record in records {
            debug_assert_eq!(record.position, self.next_position());
            self.records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cadence_wal_protocol::intent::MessageIntent;
    use cadence_wal_protocol::value::MessageRecord;
    use googletest::prelude::*;

    fn publish(name: &str) -> Command {
        Command::new(
            None,
            MessageIntent::Publish,
            MessageRecord {
                name: name.to_owned(),
                correlation_key: "bar".to_owned(),
                variables: Default::default(),
            },
        )
    }

    #[test]
    fn positions_start_at_one() {
        let mut log = PartitionLog::new();

        assert_that!(log.append_command(publish("a")), eq(1));
        assert_that!(log.append_command(publish("b")), eq(2));
        assert_that!(log.get(0), none());
        assert_that!(log.get(2).map(|r| r.position), some(eq(2)));
        assert_that!(log.get(3), none());
    }

    #[test]
    fn reads_from_position() {
        let mut log = PartitionLog::new();
        for name in ["a", "b", "c"] {
            log.append_command(publish(name));
        }

        let positions: Vec<_> = log.records_from(2).map(|r| r.position).collect();
        assert_that!(positions, eq(vec![2, 3]));
    }
}
