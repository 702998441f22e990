// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

pub mod banned_instance_table;
pub mod distribution_table;
pub mod element_instance_table;
pub mod event_scope_table;
pub mod fsm_table;
pub mod incident_table;
pub mod keys;
pub mod message_subscription_table;
mod partition_store;
pub mod process_message_subscription_table;
pub mod signal_subscription_table;
pub mod timer_table;
pub mod variable_table;

pub use partition_store::*;
