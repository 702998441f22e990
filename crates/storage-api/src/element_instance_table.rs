// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use serde::{Deserialize, Serialize};

use cadence_types::identifiers::Key;
use cadence_wal_protocol::intent::ProcessInstanceIntent;
use cadence_wal_protocol::value::ProcessInstanceRecord;

use crate::Result;

/// Lifecycle state of an element instance. Mirrors the last applied `ELEMENT_*` event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementInstanceState {
    Activating,
    Activated,
    Completing,
    Completed,
    Terminating,
    Terminated,
}

impl ElementInstanceState {
    pub fn from_intent(intent: ProcessInstanceIntent) -> Option<Self> {
        Some(match intent {
            ProcessInstanceIntent::ElementActivating => ElementInstanceState::Activating,
            ProcessInstanceIntent::ElementActivated => ElementInstanceState::Activated,
            ProcessInstanceIntent::ElementCompleting => ElementInstanceState::Completing,
            ProcessInstanceIntent::ElementCompleted => ElementInstanceState::Completed,
            ProcessInstanceIntent::ElementTerminating => ElementInstanceState::Terminating,
            ProcessInstanceIntent::ElementTerminated => ElementInstanceState::Terminated,
            _ => return None,
        })
    }

    /// Completed and terminated instances are retired: they stay readable but are no longer
    /// mutated and do not count as children of their flow scope.
    pub fn is_retired(&self) -> bool {
        matches!(
            self,
            ElementInstanceState::Completed | ElementInstanceState::Terminated
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ElementInstanceState::Activated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstance {
    pub key: Key,
    pub state: ElementInstanceState,
    pub value: ProcessInstanceRecord,
    pub active_children: u32,
    /// Sequence flows taken inside this container whose target was not activated yet.
    pub active_sequence_flows: u32,
    /// Set when an interrupting event (sub process) took over this container.
    pub interrupting_element_id: Option<String>,
}

impl ElementInstance {
    pub fn new(key: Key, value: ProcessInstanceRecord) -> Self {
        Self {
            key,
            state: ElementInstanceState::Activating,
            value,
            active_children: 0,
            active_sequence_flows: 0,
            interrupting_element_id: None,
        }
    }

    pub fn parent_key(&self) -> Option<Key> {
        self.value.flow_scope_key
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupting_element_id.is_some()
    }

    pub fn can_terminate(&self) -> bool {
        matches!(
            self.state,
            ElementInstanceState::Activating
                | ElementInstanceState::Activated
                | ElementInstanceState::Completing
        )
    }
}

pub trait ReadOnlyElementInstanceTable {
    fn get_element_instance(&self, key: Key) -> Result<Option<ElementInstance>>;

    /// Non retired children of the given flow scope instance, ordered by key.
    fn get_children(&self, parent_key: Key) -> Result<Vec<ElementInstance>>;
}

pub trait ElementInstanceTable: ReadOnlyElementInstanceTable {
    fn put_element_instance(&mut self, instance: ElementInstance) -> Result<()>;
}
