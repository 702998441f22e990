// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("generic storage error: {0}")]
    Generic(#[from] anyhow::Error),
    #[error("failed to convert Rust objects to/from their serialized form: {0}")]
    Conversion(anyhow::Error),
    #[error("integrity constraint is violated: {0}")]
    DataIntegrityError(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub mod banned_instance_table;
pub mod distribution_table;
pub mod element_instance_table;
pub mod event_scope_table;
pub mod fsm_table;
pub mod incident_table;
pub mod message_subscription_table;
pub mod process_message_subscription_table;
pub mod signal_subscription_table;
pub mod timer_table;
pub mod variable_table;

pub trait Storage {
    type TransactionType<'a>: Transaction
    where
        Self: 'a;

    /// Create a transaction. Writes become visible to other transactions only after
    /// [`Transaction::commit`]; dropping the transaction discards them.
    fn transaction(&mut self) -> Self::TransactionType<'_>;
}

pub trait Transaction:
    fsm_table::FsmTable
    + element_instance_table::ElementInstanceTable
    + event_scope_table::EventScopeTable
    + timer_table::TimerTable
    + process_message_subscription_table::ProcessMessageSubscriptionTable
    + message_subscription_table::MessageSubscriptionTable
    + signal_subscription_table::SignalSubscriptionTable
    + distribution_table::DistributionTable
    + variable_table::VariableTable
    + incident_table::IncidentTable
    + banned_instance_table::BannedInstanceTable
{
    fn commit(self) -> Result<()>;
}
