// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::signal_subscription_table::{
    ReadOnlySignalSubscriptionTable, SignalSubscription, SignalSubscriptionTable,
};
use cadence_storage_api::{Result, StorageError};
use cadence_types::identifiers::Key;

use crate::keys::{KeyBuilder, KeyReader};
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn subscription_key(catch_event_instance_key: Key, signal_name: &str) -> Vec<u8> {
    KeyBuilder::new()
        .key(catch_event_instance_key)
        .str(signal_name)
        .build()
}

fn name_key(signal_name: &str, catch_event_instance_key: Key) -> Vec<u8> {
    KeyBuilder::new()
        .str(signal_name)
        .key(catch_event_instance_key)
        .build()
}

fn get_subscriptions_by_name<S: StorageAccess>(
    storage: &S,
    signal_name: &str,
) -> Result<Vec<SignalSubscription>> {
    storage
        .scan_raw(
            TableKind::SignalSubscriptionByName,
            &KeyBuilder::new().str(signal_name).build(),
        )
        .into_iter()
        .map(|(k, _)| {
            let mut reader = KeyReader::new(&k);
            let _name = reader.str()?;
            let catch_event_instance_key = reader.key()?;
            storage
                .get_value(
                    TableKind::SignalSubscription,
                    &subscription_key(catch_event_instance_key, signal_name),
                )?
                .ok_or_else(|| {
                    StorageError::DataIntegrityError(format!(
                        "signal subscription of {catch_event_instance_key} for '{signal_name}' is indexed but does not exist"
                    ))
                })
        })
        .collect()
}

fn get_subscriptions_for_element_instance<S: StorageAccess>(
    storage: &S,
    catch_event_instance_key: Key,
) -> Result<Vec<SignalSubscription>> {
    Ok(storage
        .scan_values(
            TableKind::SignalSubscription,
            &KeyBuilder::new().key(catch_event_instance_key).build(),
        )?
        .into_iter()
        .map(|(_, v)| v)
        .collect())
}

impl ReadOnlySignalSubscriptionTable for PartitionStore {
    fn get_signal_subscriptions_by_name(
        &self,
        signal_name: &str,
    ) -> Result<Vec<SignalSubscription>> {
        get_subscriptions_by_name(self, signal_name)
    }

    fn get_signal_subscriptions_for_element_instance(
        &self,
        catch_event_instance_key: Key,
    ) -> Result<Vec<SignalSubscription>> {
        get_subscriptions_for_element_instance(self, catch_event_instance_key)
    }
}

impl ReadOnlySignalSubscriptionTable for PartitionStoreTransaction<'_> {
    fn get_signal_subscriptions_by_name(
        &self,
        signal_name: &str,
    ) -> Result<Vec<SignalSubscription>> {
        get_subscriptions_by_name(self, signal_name)
    }

    fn get_signal_subscriptions_for_element_instance(
        &self,
        catch_event_instance_key: Key,
    ) -> Result<Vec<SignalSubscription>> {
        get_subscriptions_for_element_instance(self, catch_event_instance_key)
    }
}

impl SignalSubscriptionTable for PartitionStoreTransaction<'_> {
    fn put_signal_subscription(&mut self, subscription: SignalSubscription) -> Result<()> {
        let value = &subscription.value;
        self.put_value(
            TableKind::SignalSubscriptionByName,
            name_key(&value.signal_name, value.catch_event_instance_key),
            &(),
        )?;
        self.put_value(
            TableKind::SignalSubscription,
            subscription_key(value.catch_event_instance_key, &value.signal_name),
            &subscription,
        )
    }

    fn delete_signal_subscription(
        &mut self,
        catch_event_instance_key: Key,
        signal_name: &str,
    ) -> Result<()> {
        self.delete_raw(
            TableKind::SignalSubscriptionByName,
            name_key(signal_name, catch_event_instance_key),
        );
        self.delete_raw(
            TableKind::SignalSubscription,
            subscription_key(catch_event_instance_key, signal_name),
        );
        Ok(())
    }
}
