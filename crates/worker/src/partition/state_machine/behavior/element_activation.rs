// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Activation of an arbitrary element of a process instance.
//!
//! The flow scopes of the element are resolved from the outermost to the innermost one. An
//! existing, active instance of a flow scope is reused when it is unambiguous, otherwise a new
//! instance is created. The element itself is activated through an `ACTIVATE_ELEMENT` command so
//! that it passes through the regular element processing.

use std::collections::BTreeSet;

use tracing::debug;

use cadence_storage_api::element_instance_table::{ElementInstance, ReadOnlyElementInstanceTable};
use cadence_storage_api::{StorageError, Transaction};
use cadence_types::identifiers::Key;
use cadence_types::process::{Element, Process};
use cadence_wal_protocol::intent::ProcessInstanceIntent;
use cadence_wal_protocol::value::ProcessInstanceRecord;

use super::catch_event;
use crate::partition::state_machine::{element, ProcessingError, StateMachineApplyContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActivatedElement {
    pub(crate) element_instance_key: Key,
    /// All flow scope instances of the element, reused or created.
    pub(crate) flow_scope_keys: BTreeSet<Key>,
}

enum FlowScopeResolution {
    Reuse(Key),
    Create,
}

/// Activates the element inside the process instance, creating missing flow scope instances.
///
/// `variables` is called with the element id and key of every flow scope instance and of the
/// element instance itself, to set variables before the element is activated.
pub(crate) fn activate_element<S, F>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    process_instance_key: Key,
    element_id: &str,
    ancestor_scope_key: Option<Key>,
    mut variables: F,
) -> Result<ActivatedElement, ProcessingError>
where
    S: Transaction,
    F: FnMut(&mut StateMachineApplyContext<'_, S>, &str, Key) -> Result<(), StorageError>,
{
    let target = element(process, element_id)?;
    let mut flow_scope_keys = BTreeSet::new();

    let root = process.root();
    if ctx.storage.get_element_instance(process_instance_key)?.is_none() {
        let scope = NewFlowScope {
            element: root,
            key: process_instance_key,
            flow_scope_key: None,
        };
        create_flow_scope(ctx, process, process_instance_key, scope, &mut variables)?;
    } else {
        variables(ctx, &root.id, process_instance_key)?;
    }
    flow_scope_keys.insert(process_instance_key);

    let mut flow_scope_key = process_instance_key;
    for ancestor in process.flow_scope_chain(element_id) {
        let candidates: Vec<ElementInstance> = ctx
            .storage
            .get_children(flow_scope_key)?
            .into_iter()
            .filter(|child| child.value.element_id == ancestor.id && child.is_active())
            .collect();

        let resolution =
            resolve_flow_scope(&*ctx.storage, target, ancestor, &candidates, ancestor_scope_key)?;
        flow_scope_key = match resolution {
            FlowScopeResolution::Reuse(key) => {
                variables(ctx, &ancestor.id, key)?;
                key
            }
            FlowScopeResolution::Create => {
                if let Some(multi_instance) = multi_instance_body(process, ancestor) {
                    return Err(ProcessingError::UnsupportedMultiInstanceBodyActivation {
                        element_id: element_id.to_owned(),
                        flow_scope_id: multi_instance.id.clone(),
                    });
                }
                let scope = NewFlowScope {
                    element: ancestor,
                    key: ctx.next_key()?,
                    flow_scope_key: Some(flow_scope_key),
                };
                let key = scope.key;
                create_flow_scope(ctx, process, process_instance_key, scope, &mut variables)?;
                key
            }
        };
        flow_scope_keys.insert(flow_scope_key);
    }

    let element_instance_key = ctx.next_key()?;
    debug!(
        %element_instance_key,
        %element_id,
        %flow_scope_key,
        "Activate element"
    );
    ctx.append_command(
        element_instance_key,
        ProcessInstanceIntent::ActivateElement,
        instance_record(process, process_instance_key, target, Some(flow_scope_key)),
    );
    variables(ctx, element_id, element_instance_key)?;

    Ok(ActivatedElement {
        element_instance_key,
        flow_scope_keys,
    })
}

fn resolve_flow_scope<S: ReadOnlyElementInstanceTable>(
    storage: &S,
    target: &Element,
    ancestor: &Element,
    candidates: &[ElementInstance],
    ancestor_scope_key: Option<Key>,
) -> Result<FlowScopeResolution, ProcessingError> {
    let multiple = || ProcessingError::MultipleFlowScopeInstancesFound {
        element_id: target.id.clone(),
        flow_scope_id: ancestor.id.clone(),
        instance_keys: candidates.iter().map(|c| c.key).collect(),
        ancestor_scope_key,
    };

    match (candidates, ancestor_scope_key) {
        ([], _) => Ok(FlowScopeResolution::Create),
        ([candidate], None) => Ok(FlowScopeResolution::Reuse(candidate.key)),
        ([candidate], Some(ancestor_key)) => {
            if is_strict_descendant(storage, candidate.key, ancestor_key)? {
                Ok(FlowScopeResolution::Create)
            } else {
                Ok(FlowScopeResolution::Reuse(candidate.key))
            }
        }
        (_, None) => Err(multiple()),
        (_, Some(ancestor_key)) => {
            if candidates.iter().any(|c| c.key == ancestor_key) {
                return Ok(FlowScopeResolution::Reuse(ancestor_key));
            }
            for candidate in candidates {
                if is_strict_descendant(storage, candidate.key, ancestor_key)? {
                    return Ok(FlowScopeResolution::Create);
                }
            }
            let mut enclosing = Vec::new();
            for candidate in candidates {
                if is_strict_descendant(storage, ancestor_key, candidate.key)? {
                    enclosing.push(candidate.key);
                }
            }
            match enclosing.as_slice() {
                [key] => Ok(FlowScopeResolution::Reuse(*key)),
                _ => Err(multiple()),
            }
        }
    }
}

/// Whether `key` lies strictly inside the element instance `ancestor_key`.
fn is_strict_descendant<S: ReadOnlyElementInstanceTable>(
    storage: &S,
    key: Key,
    ancestor_key: Key,
) -> Result<bool, StorageError> {
    let mut current = storage
        .get_element_instance(key)?
        .and_then(|instance| instance.parent_key());
    while let Some(parent) = current {
        if parent == ancestor_key {
            return Ok(true);
        }
        current = storage
            .get_element_instance(parent)?
            .and_then(|instance| instance.parent_key());
    }
    Ok(false)
}

fn multi_instance_body<'p>(process: &'p Process, ancestor: &'p Element) -> Option<&'p Element> {
    if ancestor.multi_instance {
        return Some(ancestor);
    }
    process
        .flow_scope_of(&ancestor.id)
        .filter(|scope| scope.multi_instance)
}

struct NewFlowScope<'p> {
    element: &'p Element,
    key: Key,
    flow_scope_key: Option<Key>,
}

/// Writes the activation of a new flow scope instance. Its variables are set before its event
/// subscriptions are opened, so that the subscription expressions can refer to them.
fn create_flow_scope<S, F>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    process_instance_key: Key,
    scope: NewFlowScope<'_>,
    variables: &mut F,
) -> Result<(), ProcessingError>
where
    S: Transaction,
    F: FnMut(&mut StateMachineApplyContext<'_, S>, &str, Key) -> Result<(), StorageError>,
{
    let NewFlowScope {
        element: scope,
        key,
        flow_scope_key,
    } = scope;
    debug!(%key, element_id = %scope.id, "Create flow scope instance");
    let record = instance_record(process, process_instance_key, scope, flow_scope_key);
    ctx.append_event(key, ProcessInstanceIntent::ElementActivating, record.clone())?;
    ctx.append_event(key, ProcessInstanceIntent::ElementActivated, record.clone())?;
    variables(ctx, &scope.id, key)?;

    catch_event::subscribe_to_events(ctx, process, key, &record)?.map_err(|failure| {
        ProcessingError::EventSubscription {
            element_id: scope.id.clone(),
            failure,
        }
    })
}

pub(crate) fn instance_record(
    process: &Process,
    process_instance_key: Key,
    element: &Element,
    flow_scope_key: Option<Key>,
) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        bpmn_process_id: process.bpmn_process_id.clone(),
        process_definition_key: process.key,
        process_instance_key,
        element_id: element.id.clone(),
        bpmn_element_type: element.element_type,
        flow_scope_key,
    }
}
