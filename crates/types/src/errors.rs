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

use crate::identifiers::Key;

pub type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a recoverable [`Failure`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// An expression could not be evaluated or returned a value of an unexpected type.
    ExtractValueError,
    /// A variable mapping could not be applied.
    IoMappingError,
    /// The process model refers to something which is not there.
    ModelError,
    Unknown,
}

/// A recoverable problem, surfaced to the user as an incident on the element instance.
///
/// `scope_key` is the variable scope in which the problem happened, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub error_kind: ErrorKind,
    pub scope_key: Option<Key>,
}

impl Failure {
    pub fn new(message: impl Into<String>, error_kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            error_kind,
            scope_key: None,
        }
    }

    pub fn with_scope(mut self, scope_key: impl Into<Option<Key>>) -> Self {
        self.scope_key = scope_key.into();
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_kind, self.message)
    }
}

impl std::error::Error for Failure {}
