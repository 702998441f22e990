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
use cadence_types::time::MillisSinceEpoch;
use cadence_wal_protocol::value::TimerRecord;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerInstance {
    pub key: Key,
    pub value: TimerRecord,
}

impl TimerInstance {
    pub fn due_date(&self) -> MillisSinceEpoch {
        self.value.due_date
    }
}

pub trait ReadOnlyTimerTable {
    fn get_timer(&self, key: Key) -> Result<Option<TimerInstance>>;

    /// Timers attached to the given element instance, ordered by key.
    fn get_timers_for_element_instance(&self, element_instance_key: Key)
        -> Result<Vec<TimerInstance>>;

    /// Timers due at or before `now`, ordered by due date then key, at most `limit` of them.
    fn get_due_timers(&self, now: MillisSinceEpoch, limit: usize) -> Result<Vec<TimerInstance>>;

    fn get_next_due_date(&self) -> Result<Option<MillisSinceEpoch>>;

    /// Earliest due date strictly later than `after`.
    fn get_next_due_date_after(&self, after: MillisSinceEpoch)
        -> Result<Option<MillisSinceEpoch>>;
}

pub trait TimerTable: ReadOnlyTimerTable {
    fn put_timer(&mut self, timer: TimerInstance) -> Result<()>;

    fn delete_timer(&mut self, key: Key) -> Result<()>;
}
