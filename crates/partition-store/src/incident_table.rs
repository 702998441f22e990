// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::incident_table::{IncidentTable, ReadOnlyIncidentTable};
use cadence_storage_api::Result;
use cadence_types::identifiers::Key;
use cadence_wal_protocol::value::IncidentRecord;

use crate::keys::KeyBuilder;
use crate::{PartitionStore, PartitionStoreTransaction, StorageAccess, TableKind};

fn incident_key(key: Key) -> Vec<u8> {
    KeyBuilder::new().key(key).build()
}

fn get_incident_for_element_instance<S: StorageAccess>(
    storage: &S,
    element_instance_key: Key,
) -> Result<Option<(Key, IncidentRecord)>> {
    let Some(incident_key) = storage.get_value::<Key>(
        TableKind::IncidentByElementInstance,
        &self::incident_key(element_instance_key),
    )?
    else {
        return Ok(None);
    };
    Ok(storage
        .get_value(TableKind::Incident, &self::incident_key(incident_key))?
        .map(|incident| (incident_key, incident)))
}

impl ReadOnlyIncidentTable for PartitionStore {
    fn get_incident(&self, key: Key) -> Result<Option<IncidentRecord>> {
        self.get_value(TableKind::Incident, &incident_key(key))
    }

    fn get_incident_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Option<(Key, IncidentRecord)>> {
        get_incident_for_element_instance(self, element_instance_key)
    }
}

impl ReadOnlyIncidentTable for PartitionStoreTransaction<'_> {
    fn get_incident(&self, key: Key) -> Result<Option<IncidentRecord>> {
        self.get_value(TableKind::Incident, &incident_key(key))
    }

    fn get_incident_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Result<Option<(Key, IncidentRecord)>> {
        get_incident_for_element_instance(self, element_instance_key)
    }
}

impl IncidentTable for PartitionStoreTransaction<'_> {
    fn put_incident(&mut self, key: Key, incident: IncidentRecord) -> Result<()> {
        self.put_value(
            TableKind::IncidentByElementInstance,
            incident_key(incident.element_instance_key),
            &key,
        )?;
        self.put_value(TableKind::Incident, incident_key(key), &incident)
    }
}
