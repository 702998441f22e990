// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_types::identifiers::{Key, PartitionId};

pub mod intent;
pub mod record;
pub mod value;

pub use intent::Intent;
pub use record::{Position, Record, RecordType, Rejection, RejectionType};
pub use value::{RecordValue, ValueType};

/// The primary envelope for all messages exchanged between partitions.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub command: Command,
}

impl Envelope {
    pub fn new(header: Header, command: Command) -> Self {
        Self { header, command }
    }

    /// Envelope for a command sent by one partition to another one.
    pub fn from_partition(source: PartitionId, dest: PartitionId, command: Command) -> Self {
        Self::new(
            Header {
                source: Source::Processor {
                    partition_id: source,
                },
                dest: Destination::Processor { partition_id: dest },
            },
            command,
        )
    }

    /// Envelope for a command submitted by a client.
    pub fn from_client(dest: PartitionId, command: Command) -> Self {
        Self::new(
            Header {
                source: Source::Client {},
                dest: Destination::Processor { partition_id: dest },
            },
            command,
        )
    }

    pub fn partition_id(&self) -> PartitionId {
        match self.header.dest {
            Destination::Processor { partition_id } => partition_id,
        }
    }
}

/// Header is set on every message
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub source: Source,
    pub dest: Destination,
}

/// Identifies the source of a message
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Source {
    /// Message is sent from another partition processor
    Processor { partition_id: PartitionId },
    /// Message is submitted by a client of the cluster
    Client {},
}

/// Identifies the intended destination of the message
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Destination {
    /// Message is sent to partition processor
    Processor { partition_id: PartitionId },
}

/// A command to be appended to the log of the destination partition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Command {
    pub key: Option<Key>,
    pub intent: Intent,
    pub value: RecordValue,
    /// Set when the command is part of a command distribution.
    pub distribution_key: Option<Key>,
}

impl Command {
    pub fn new(key: Option<Key>, intent: impl Into<Intent>, value: impl Into<RecordValue>) -> Self {
        Self {
            key,
            intent: intent.into(),
            value: value.into(),
            distribution_key: None,
        }
    }

    pub fn with_distribution_key(mut self, distribution_key: Key) -> Self {
        self.distribution_key = Some(distribution_key);
        self
    }

    pub fn name(&self) -> &'static str {
        self.intent.name()
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    use crate::intent::MessageIntent;
    use crate::value::MessageRecord;

    #[test]
    fn envelope_routes_to_destination() {
        let command = Command::new(
            None,
            MessageIntent::Publish,
            MessageRecord {
                name: "msg".to_owned(),
                correlation_key: "bar".to_owned(),
                variables: Default::default(),
            },
        );

        let envelope =
            Envelope::from_partition(PartitionId::from(1), PartitionId::from(3), command);

        assert_that!(envelope.partition_id(), eq(PartitionId::from(3)));
        assert_that!(envelope.command.name(), eq("PUBLISH"));
        assert_that!(envelope.command.value_type(), eq(ValueType::Message));
    }
}
