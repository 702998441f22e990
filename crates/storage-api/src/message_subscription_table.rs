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
use cadence_wal_protocol::value::MessageSubscriptionRecord;

use crate::Result;

/// A message subscription as seen by the partition owning the correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSubscription {
    pub key: Key,
    pub value: MessageSubscriptionRecord,
    /// A message was correlated and the subscriber did not confirm yet.
    pub correlating: bool,
}

pub trait ReadOnlyMessageSubscriptionTable {
    fn get_message_subscription(
        &self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<Option<MessageSubscription>>;

    /// Subscriptions for the given message name and correlation key, ordered by element
    /// instance key.
    fn get_message_subscriptions_by_correlation(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Result<Vec<MessageSubscription>>;
}

pub trait MessageSubscriptionTable: ReadOnlyMessageSubscriptionTable {
    fn put_message_subscription(&mut self, subscription: MessageSubscription) -> Result<()>;

    fn delete_message_subscription(
        &mut self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<()>;
}
