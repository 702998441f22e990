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
use std::fmt::Display;
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Milliseconds since the unix epoch
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct MillisSinceEpoch(u64);

impl MillisSinceEpoch {
    pub const UNIX_EPOCH: MillisSinceEpoch = MillisSinceEpoch::new(0);
    pub const MAX: MillisSinceEpoch = MillisSinceEpoch::new(u64::MAX);

    pub const fn new(millis_since_epoch: u64) -> Self {
        MillisSinceEpoch(millis_since_epoch)
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Time left until `self` is reached, zero if it is already in the past of `now`.
    pub fn duration_since(&self, now: MillisSinceEpoch) -> Duration {
        Duration::from_millis(self.0.saturating_sub(now.0))
    }
}

impl From<u64> for MillisSinceEpoch {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Times before the unix epoch clamp to [`MillisSinceEpoch::UNIX_EPOCH`].
impl From<SystemTime> for MillisSinceEpoch {
    fn from(value: SystemTime) -> Self {
        let millis = value
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        MillisSinceEpoch::new(millis)
    }
}

impl From<MillisSinceEpoch> for SystemTime {
    fn from(value: MillisSinceEpoch) -> Self {
        SystemTime::UNIX_EPOCH.add(Duration::from_millis(value.as_u64()))
    }
}

impl Add<Duration> for MillisSinceEpoch {
    type Output = MillisSinceEpoch;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        MillisSinceEpoch(self.0.saturating_add(millis))
    }
}

impl Display for MillisSinceEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms since epoch", self.0)
    }
}

/// Source of the current time for processing.
pub trait Clock: Send + Sync {
    fn now(&self) -> MillisSinceEpoch;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> MillisSinceEpoch {
        MillisSinceEpoch::now()
    }
}

#[cfg(any(test, feature = "test-util"))]
mod manual {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Clock, MillisSinceEpoch};

    /// A clock which only moves when told to. Clones share the same time.
    #[derive(Debug, Clone, Default)]
    pub struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        pub fn new(start: MillisSinceEpoch) -> Self {
            Self(Arc::new(AtomicU64::new(start.as_u64())))
        }

        pub fn advance(&self, by: Duration) {
            self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }

        pub fn set(&self, to: MillisSinceEpoch) {
            self.0.store(to.as_u64(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> MillisSinceEpoch {
            MillisSinceEpoch::new(self.0.load(Ordering::SeqCst))
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use manual::ManualClock;
