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
use cadence_wal_protocol::value::ProcessMessageSubscriptionRecord;

use crate::Result;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessMessageSubscriptionState {
    /// Open command was sent, the message partition did not confirm yet.
    Creating,
    Created,
    /// Close command was sent, the message partition did not confirm yet.
    Deleting,
}

/// A message subscription of an element instance, owned by the partition of the process
/// instance. Identified by element instance key and message name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMessageSubscription {
    pub key: Key,
    pub state: ProcessMessageSubscriptionState,
    pub value: ProcessMessageSubscriptionRecord,
}

impl ProcessMessageSubscription {
    pub fn is_pending(&self) -> bool {
        !self.state.is_created()
    }
}

pub trait ReadOnlyProcessMessageSubscriptionTable {
    fn get_process_message_subscription(
        &self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<Option<ProcessMessageSubscription>>;

    /// All subscriptions of the element instance, ordered by message name.
    fn get_process_message_subscriptions_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Vec<ProcessMessageSubscription>>;

    /// Subscriptions waiting for a confirmation of the message partition.
    fn get_pending_process_message_subscriptions(&self) -> Result<Vec<ProcessMessageSubscription>>;
}

pub trait ProcessMessageSubscriptionTable: ReadOnlyProcessMessageSubscriptionTable {
    fn put_process_message_subscription(
        &mut self,
        subscription: ProcessMessageSubscription,
    ) -> Result<()>;

    fn delete_process_message_subscription(
        &mut self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<()>;
}
