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

use crate::Result;

/// Process instances which are excluded from processing after a command of theirs failed.
pub trait ReadOnlyBannedInstanceTable {
    fn is_banned(&self, process_instance_key: Key) -> Result<bool>;
}

pub trait BannedInstanceTable: ReadOnlyBannedInstanceTable {
    fn ban_instance(&mut self, process_instance_key: Key) -> Result<()>;
}
