// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::process_message_subscription_table::{
    ProcessMessageSubscription, ProcessMessageSubscriptionTable,
    ReadOnlyProcessMessageSubscriptionTable,
};
use cadence_storage_api::Result;
use cadence_types::identifiers::Key;

use crate::keys::KeyBuilder;
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn subscription_key(element_instance_key: Key, message_name: &str) -> Vec<u8> {
    KeyBuilder::new()
        .key(element_instance_key)
        .str(message_name)
        .build()
}

fn get_subscription<S: StorageAccess>(
    storage: &S,
    element_instance_key: Key,
    message_name: &str,
) -> Result<Option<ProcessMessageSubscription>> {
    storage.get_value(
        TableKind::ProcessMessageSubscription,
        &subscription_key(element_instance_key, message_name),
    )
}

fn get_subscriptions_for_element_instance<S: StorageAccess>(
    storage: &S,
    element_instance_key: Key,
) -> Result<Vec<ProcessMessageSubscription>> {
    Ok(storage
        .scan_values(
            TableKind::ProcessMessageSubscription,
            &KeyBuilder::new().key(element_instance_key).build(),
        )?
        .into_iter()
        .map(|(_, v)| v)
        .collect())
}

fn get_pending_subscriptions<S: StorageAccess>(
    storage: &S,
) -> Result<Vec<ProcessMessageSubscription>> {
    Ok(storage
        .scan_values::<ProcessMessageSubscription>(TableKind::ProcessMessageSubscription, &[])?
        .into_iter()
        .map(|(_, v)| v)
        .filter(|s| s.is_pending())
        .collect())
}

impl ReadOnlyProcessMessageSubscriptionTable for PartitionStore {
    fn get_process_message_subscription(
        &self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<Option<ProcessMessageSubscription>> {
        get_subscription(self, element_instance_key, message_name)
    }

    fn get_process_message_subscriptions_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Vec<ProcessMessageSubscription>> {
        get_subscriptions_for_element_instance(self, element_instance_key)
    }

    fn get_pending_process_message_subscriptions(&self) -> Result<Vec<ProcessMessageSubscription>> {
        get_pending_subscriptions(self)
    }
}

impl ReadOnlyProcessMessageSubscriptionTable for PartitionStoreTransaction<'_> {
    fn get_process_message_subscription(
        &self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<Option<ProcessMessageSubscription>> {
        get_subscription(self, element_instance_key, message_name)
    }

    fn get_process_message_subscriptions_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Vec<ProcessMessageSubscription>> {
        get_subscriptions_for_element_instance(self, element_instance_key)
    }

    fn get_pending_process_message_subscriptions(&self) -> Result<Vec<ProcessMessageSubscription>> {
        get_pending_subscriptions(self)
    }
}

impl ProcessMessageSubscriptionTable for PartitionStoreTransaction<'_> {
    fn put_process_message_subscription(
        &mut self,
        subscription: ProcessMessageSubscription,
    ) -> Result<()> {
        self.put_value(
            TableKind::ProcessMessageSubscription,
            subscription_key(
                subscription.value.element_instance_key,
                &subscription.value.message_name,
            ),
            &subscription,
        )
    }

    fn delete_process_message_subscription(
        &mut self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<()> {
        self.delete_raw(
            TableKind::ProcessMessageSubscription,
            subscription_key(element_instance_key, message_name),
        );
        Ok(())
    }
}
