// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// # Worker options
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case", default)]
#[builder(default)]
pub struct WorkerOptions {
    /// # Internal queue for partition processor communication
    pub internal_queue_length: usize,

    /// # Maximum commands per batch
    ///
    /// Upper bound of log commands a partition processes before it yields to inbound messages
    /// and timers.
    pub max_commands_in_batch: usize,

    /// # Redistribution interval
    ///
    /// Interval in which unacknowledged command distributions are sent again.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub redistribution_interval: humantime::Duration,

    /// # Pending subscription check interval
    ///
    /// Interval in which message subscriptions that are still opening or closing are sent
    /// again to the partition owning the correlation key.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub pending_subscription_check_interval: humantime::Duration,

    /// # Timer batch limit
    ///
    /// Maximum number of due timers triggered in one go.
    pub timer_batch_limit: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            internal_queue_length: 64,
            max_commands_in_batch: 32,
            redistribution_interval: Duration::from_secs(10).into(),
            pending_subscription_check_interval: Duration::from_secs(10).into(),
            timer_batch_limit: 100,
        }
    }
}
