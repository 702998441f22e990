// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::message_subscription_table::{
    MessageSubscription, MessageSubscriptionTable, ReadOnlyMessageSubscriptionTable,
};
use cadence_storage_api::{Result, StorageError};
use cadence_types::identifiers::Key;

use crate::keys::{KeyBuilder, KeyReader};
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn subscription_key(element_instance_key: Key, message_name: &str) -> Vec<u8> {
    KeyBuilder::new()
        .key(element_instance_key)
        .str(message_name)
        .build()
}

fn correlation_prefix(message_name: &str, correlation_key: &str) -> KeyBuilder {
    KeyBuilder::new().str(message_name).str(correlation_key)
}

fn get_subscription<S: StorageAccess>(
    storage: &S,
    element_instance_key: Key,
    message_name: &str,
) -> Result<Option<MessageSubscription>> {
    storage.get_value(
        TableKind::MessageSubscription,
        &subscription_key(element_instance_key, message_name),
    )
}

fn get_subscriptions_by_correlation<S: StorageAccess>(
    storage: &S,
    message_name: &str,
    correlation_key: &str,
) -> Result<Vec<MessageSubscription>> {
    storage
        .scan_raw(
            TableKind::MessageSubscriptionByCorrelation,
            &correlation_prefix(message_name, correlation_key).build(),
        )
        .into_iter()
        .map(|(k, _)| {
            let mut reader = KeyReader::new(&k);
            let _name = reader.str()?;
            let _correlation_key = reader.str()?;
            let element_instance_key = reader.key()?;
            get_subscription(storage, element_instance_key, message_name)?.ok_or_else(|| {
                StorageError::DataIntegrityError(format!(
                    "message subscription of {element_instance_key} for '{message_name}' is indexed but does not exist"
                ))
            })
        })
        .collect()
}

impl ReadOnlyMessageSubscriptionTable for PartitionStore {
    fn get_message_subscription(
        &self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<Option<MessageSubscription>> {
        get_subscription(self, element_instance_key, message_name)
    }

    fn get_message_subscriptions_by_correlation(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Result<Vec<MessageSubscription>> {
        get_subscriptions_by_correlation(self, message_name, correlation_key)
    }
}

impl ReadOnlyMessageSubscriptionTable for PartitionStoreTransaction<'_> {
    fn get_message_subscription(
        &self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<Option<MessageSubscription>> {
        get_subscription(self, element_instance_key, message_name)
    }

    fn get_message_subscriptions_by_correlation(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Result<Vec<MessageSubscription>> {
        get_subscriptions_by_correlation(self, message_name, correlation_key)
    }
}

impl MessageSubscriptionTable for PartitionStoreTransaction<'_> {
    fn put_message_subscription(&mut self, subscription: MessageSubscription) -> Result<()> {
        let value = &subscription.value;
        self.put_value(
            TableKind::MessageSubscriptionByCorrelation,
            correlation_prefix(&value.message_name, &value.correlation_key)
                .key(value.element_instance_key)
                .build(),
            &(),
        )?;
        self.put_value(
            TableKind::MessageSubscription,
            subscription_key(value.element_instance_key, &value.message_name),
            &subscription,
        )
    }

    fn delete_message_subscription(
        &mut self,
        element_instance_key: Key,
        message_name: &str,
    ) -> Result<()> {
        let Some(subscription) = get_subscription(self, element_instance_key, message_name)? else {
            return Ok(());
        };
        self.delete_raw(
            TableKind::MessageSubscriptionByCorrelation,
            correlation_prefix(message_name, &subscription.value.correlation_key)
                .key(element_instance_key)
                .build(),
        );
        self.delete_raw(
            TableKind::MessageSubscription,
            subscription_key(element_instance_key, message_name),
        );
        Ok(())
    }
}
