// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;

use serde::{Deserialize, Serialize};

use cadence_types::identifiers::Key;

use crate::intent::Intent;
use crate::value::{RecordValue, ValueType};

/// Position of a record in the partition log. Positions start at 1.
pub type Position = u64;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    NotFound,
    InvalidState,
    InvalidArgument,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }
}

/// An entry of the partition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub position: Position,
    /// Position of the command which caused this record, `None` for records which were not
    /// written by the stream processor (e.g. commands received from outside).
    pub source_position: Option<Position>,
    pub record_type: RecordType,
    pub key: Option<Key>,
    pub intent: Intent,
    pub value: RecordValue,
    pub rejection: Option<Rejection>,
    /// Set on commands received through command distribution.
    pub distribution_key: Option<Key>,
}

impl Record {
    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn is_command(&self) -> bool {
        self.record_type.is_command()
    }

    pub fn is_event(&self) -> bool {
        self.record_type.is_event()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {}",
            self.position,
            self.record_type,
            self.value_type(),
            self.intent
        )?;
        if let Some(key) = self.key {
            write!(f, " key={key}")?;
        }
        if let Some(rejection) = &self.rejection {
            write!(f, " ({}: {})", rejection.rejection_type, rejection.reason)?;
        }
        Ok(())
    }
}
