// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_types::identifiers::Key;
use cadence_wal_protocol::value::IncidentRecord;

use crate::Result;

pub trait ReadOnlyIncidentTable {
    fn get_incident(&self, key: Key) -> Result<Option<IncidentRecord>>;

    fn get_incident_for_element_instance(&self, element_instance_key: Key)
        -> Result<Option<(Key, IncidentRecord)>>;
}

pub trait IncidentTable: ReadOnlyIncidentTable {
    fn put_incident(&mut self, key: Key, incident: IncidentRecord) -> Result<()>;
}
