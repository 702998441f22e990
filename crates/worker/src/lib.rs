// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The partition processor of the cadence engine.
//!
//! A [`Partition`] owns the log and the state of one partition and processes the commands of
//! its log one at a time. The [`PartitionProcessor`] drives a partition on the tokio runtime and
//! exchanges commands with the other partitions through a [`PartitionRouter`]. A [`Worker`]
//! bootstraps the partitions of a node from its configuration.

mod metric_definitions;
pub mod partition;
mod worker;

pub use partition::log::PartitionLog;
pub use partition::router::{InProcessRouter, PartitionRouter, RouterError};
pub use partition::state_machine::{Action, ActionCollector, ProcessingError, StateMachine};
pub use partition::{Partition, PartitionProcessor, PartitionProcessorHandle};
pub use worker::{BuildError, RunningWorker, Worker};

pub use metric_definitions::describe_metrics;
