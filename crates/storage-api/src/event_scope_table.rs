// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use cadence_types::identifiers::Key;
use cadence_types::Variables;

use crate::Result;

/// A queued trigger of a catch event, waiting to be activated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub event_key: Key,
    pub element_id: String,
    pub variables: Variables,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScopeInstance {
    /// Whether new triggers are accepted. Cleared once an interrupting trigger was accepted.
    pub accepting: bool,
    pub interrupting_element_ids: BTreeSet<String>,
    pub boundary_element_ids: BTreeSet<String>,
    pub triggers: VecDeque<EventTrigger>,
}

impl EventScopeInstance {
    pub fn new(
        interrupting_element_ids: BTreeSet<String>,
        boundary_element_ids: BTreeSet<String>,
    ) -> Self {
        Self {
            accepting: true,
            interrupting_element_ids,
            boundary_element_ids,
            triggers: VecDeque::new(),
        }
    }

    pub fn is_interrupting(&self, element_id: &str) -> bool {
        self.interrupting_element_ids.contains(element_id)
    }

    /// Boundary events stay triggerable after an event sub process interrupted the scope.
    pub fn can_trigger(&self, element_id: &str) -> bool {
        self.accepting || self.boundary_element_ids.contains(element_id)
    }

    pub fn peek_trigger(&self) -> Option<&EventTrigger> {
        self.triggers.front()
    }

    pub fn remove_trigger(&mut self, event_key: Key) -> Option<EventTrigger> {
        let index = self.triggers.iter().position(|t| t.event_key == event_key)?;
        self.triggers.remove(index)
    }
}

pub trait ReadOnlyEventScopeTable {
    fn get_event_scope(&self, key: Key) -> Result<Option<EventScopeInstance>>;
}

pub trait EventScopeTable: ReadOnlyEventScopeTable {
    fn put_event_scope(&mut self, key: Key, scope: EventScopeInstance) -> Result<()>;

    fn delete_event_scope(&mut self, key: Key) -> Result<()>;
}
