// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod common;
mod worker;

pub use common::*;
pub use worker::*;

use serde::{Deserialize, Serialize};

use crate::identifiers::{PartitionId, PartitionTopology, KEY_PARTITION_ID_BOUND};

#[derive(Debug, thiserror::Error)]
pub enum InvalidConfigurationError {
    #[error("partitions-count must be greater than zero")]
    NoPartitions,
    #[error(
        "partition ids [{first}, {first} + {count}) must be smaller than {} to be encoded \
        in keys",
        KEY_PARTITION_ID_BOUND
    )]
    PartitionIdOverflow { first: u16, count: u16 },
    #[error("{0} must not be zero")]
    ZeroValue(&'static str),
}

/// Cadence configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct Configuration {
    #[serde(flatten)]
    pub common: CommonOptions,
    pub worker: WorkerOptions,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), InvalidConfigurationError> {
        if self.common.partitions_count == 0 {
            return Err(InvalidConfigurationError::NoPartitions);
        }
        // partition 0 owns the keys of deployed processes
        if self.common.first_partition_id == 0 {
            return Err(InvalidConfigurationError::ZeroValue("first-partition-id"));
        }
        // keys carry the id of the partition which allocated them
        if u32::from(self.common.first_partition_id) + u32::from(self.common.partitions_count)
            > KEY_PARTITION_ID_BOUND
        {
            return Err(InvalidConfigurationError::PartitionIdOverflow {
                first: self.common.first_partition_id,
                count: self.common.partitions_count,
            });
        }
        if self.worker.internal_queue_length == 0 {
            return Err(InvalidConfigurationError::ZeroValue("worker.internal-queue-length"));
        }
        if self.worker.max_commands_in_batch == 0 {
            return Err(InvalidConfigurationError::ZeroValue("worker.max-commands-in-batch"));
        }
        Ok(())
    }

    /// The partitions of the cluster. Only meaningful for a validated configuration.
    pub fn topology(&self) -> PartitionTopology {
        PartitionTopology::new(
            PartitionId::from(self.common.first_partition_id),
            self.common.partitions_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    use crate::identifiers::Key;

    #[test]
    fn default_configuration_is_valid() {
        let config = Configuration::default();

        assert!(config.validate().is_ok());
        assert_that!(config.topology().partitions_count(), eq(1));
        assert_that!(config.topology().first_partition_id(), eq(PartitionId::from(1)));
    }

    #[test]
    fn zero_partitions_are_rejected() {
        let config = ConfigurationBuilder::default()
            .common(
                CommonOptionsBuilder::default()
                    .partitions_count(0)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        assert!(matches!(
            config.validate(),
            Err(InvalidConfigurationError::NoPartitions)
        ));
    }

    #[test]
    fn partition_zero_is_reserved() {
        let config = ConfigurationBuilder::default()
            .common(
                CommonOptionsBuilder::default()
                    .first_partition_id(0)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        assert!(matches!(
            config.validate(),
            Err(InvalidConfigurationError::ZeroValue("first-partition-id"))
        ));
    }

    #[test]
    fn overflowing_partition_ids_are_rejected() {
        let config = ConfigurationBuilder::default()
            .common(
                CommonOptionsBuilder::default()
                    .first_partition_id(u16::MAX)
                    .partitions_count(2)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        assert!(matches!(
            config.validate(),
            Err(InvalidConfigurationError::PartitionIdOverflow { .. })
        ));
    }

    #[test]
    fn partition_ids_must_fit_into_keys() {
        let config = |first_partition_id: u16, partitions_count: u16| {
            ConfigurationBuilder::default()
                .common(
                    CommonOptionsBuilder::default()
                        .first_partition_id(first_partition_id)
                        .partitions_count(partitions_count)
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap()
        };

        assert!(matches!(
            config(8190, 4).validate(),
            Err(InvalidConfigurationError::PartitionIdOverflow {
                first: 8190,
                count: 4
            })
        ));
        assert!(config(8190, 2).validate().is_ok());

        let last = config(8190, 2).topology().partition_ids().last().unwrap();
        let key = Key::from_parts(last, 7);
        assert_that!(key.partition_id(), eq(last));
        assert_that!(key.counter(), eq(7));
    }
}
