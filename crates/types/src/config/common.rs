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

#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case", default)]
#[builder(default)]
pub struct CommonOptions {
    /// # Node Name
    ///
    /// Name of this node, used in logs only. Defaults to `cadence`.
    pub node_name: String,

    /// # Partitions
    ///
    /// Number of partitions of the cluster. Message subscriptions are routed by hashing the
    /// correlation key over this number, so it must not change once the cluster holds data.
    pub partitions_count: u16,

    /// # First partition id
    ///
    /// Id of the first partition. Partition ids are contiguous starting from this id.
    pub first_partition_id: u16,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            node_name: "cadence".to_owned(),
            partitions_count: 1,
            first_partition_id: 1,
        }
    }
}
