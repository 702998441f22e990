// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_storage_api::StorageError;
use cadence_types::errors::Failure;
use cadence_types::identifiers::Key;

/// A command could not be processed.
///
/// Apart from [`ProcessingError::Storage`] the error is specific to the command: the
/// transaction of the command is discarded, an `ERROR` record is written and the process
/// instance of the command is banned from further processing.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(
        "cannot activate element '{element_id}' because it is inside the multi-instance body \
        '{flow_scope_id}', which does not support activating single elements"
    )]
    UnsupportedMultiInstanceBodyActivation {
        element_id: String,
        flow_scope_id: String,
    },
    #[error(
        "cannot activate element '{element_id}' because its flow scope '{flow_scope_id}' has \
        multiple active instances {instance_keys:?} and {}",
        describe_ancestor_scope_key(.ancestor_scope_key)
    )]
    MultipleFlowScopeInstancesFound {
        element_id: String,
        flow_scope_id: String,
        instance_keys: Vec<Key>,
        ancestor_scope_key: Option<Key>,
    },
    #[error("failed to open the event subscriptions of element '{element_id}': {failure}")]
    EventSubscription { element_id: String, failure: Failure },
    #[error("process definition {0} is not deployed")]
    MissingProcess(Key),
    #[error("element '{element_id}' does not exist in process definition {process_definition_key}")]
    MissingElement {
        process_definition_key: Key,
        element_id: String,
    },
    #[error("element instance {0} does not exist")]
    MissingElementInstance(Key),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn describe_ancestor_scope_key(ancestor_scope_key: &Option<Key>) -> String {
    match ancestor_scope_key {
        Some(key) => format!("the ancestor scope key {key} does not select one of them"),
        None => "no ancestor scope key was given".to_owned(),
    }
}

impl ProcessingError {
    /// Errors which stop the partition processor instead of quarantining a process instance.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessingError::Storage(_))
    }
}
