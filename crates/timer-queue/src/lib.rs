// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeSet;

use cadence_types::time::MillisSinceEpoch;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timer<T> {
    due_date: MillisSinceEpoch,
    payload: T,
}

impl<T> Timer<T> {
    pub fn due_date(&self) -> MillisSinceEpoch {
        self.due_date
    }

    pub fn into_inner(self) -> T {
        self.payload
    }
}

/// Queue of timers ordered by due date.
///
/// Scheduling the same due date and payload twice keeps a single timer, so timers can be
/// rescheduled freely, e.g. after rebuilding them from persisted state.
#[derive(Debug)]
pub struct TimerQueue<T>(BTreeSet<Timer<T>>);

impl<T: Ord> Default for TimerQueue<T> {
    fn default() -> Self {
        TimerQueue::new()
    }
}

impl<T: Ord> TimerQueue<T> {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns false if the timer was already scheduled.
    pub fn sleep_until(&mut self, due_date: MillisSinceEpoch, payload: T) -> bool {
        self.0.insert(Timer { due_date, payload })
    }

    pub fn next_due_date(&self) -> Option<MillisSinceEpoch> {
        self.0.first().map(|t| t.due_date)
    }

    /// Removes the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: MillisSinceEpoch) -> Option<Timer<T>> {
        if self.next_due_date()? <= now {
            self.0.pop_first()
        } else {
            None
        }
    }

    /// Waits for the earliest timer and removes it. `now` is the current time of the caller's
    /// clock; never completes if the queue is empty.
    pub async fn await_timer(&mut self, now: MillisSinceEpoch) -> Timer<T> {
        if let Some(due_date) = self.next_due_date() {
            let sleep = due_date.duration_since(now);
            if !sleep.is_zero() {
                tokio::time::sleep(sleep).await;
            }

            if let Some(timer) = self.0.pop_first() {
                return timer;
            }
        }
        futures::future::pending().await
    }
}

impl<T: Ord> FromIterator<(MillisSinceEpoch, T)> for TimerQueue<T> {
    fn from_iter<IT: IntoIterator<Item = (MillisSinceEpoch, T)>>(iter: IT) -> Self {
        let mut tq = TimerQueue::new();
        for (time, payload) in iter {
            tq.sleep_until(time, payload);
        }
        tq
    }
}
