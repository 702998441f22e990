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
use cadence_wal_protocol::value::SignalSubscriptionRecord;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSubscription {
    pub key: Key,
    pub value: SignalSubscriptionRecord,
}

pub trait ReadOnlySignalSubscriptionTable {
    /// Subscriptions for the signal name, ordered by catch event instance key.
    fn get_signal_subscriptions_by_name(&self, signal_name: &str)
        -> Result<Vec<SignalSubscription>>;

    fn get_signal_subscriptions_for_element_instance(
        &self,
        catch_event_instance_key: Key,
    ) -> Result<Vec<SignalSubscription>>;
}

pub trait SignalSubscriptionTable: ReadOnlySignalSubscriptionTable {
    fn put_signal_subscription(&mut self, subscription: SignalSubscription) -> Result<()>;

    fn delete_signal_subscription(
        &mut self,
        catch_event_instance_key: Key,
        signal_name: &str,
    ) -> Result<()>;
}
