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
use cadence_types::Variables;

use crate::Result;

/// Variable scopes mirror element instances. A scope sees its own variables and the variables
/// of all of its parent scopes, inner scopes shadowing outer ones.
pub trait ReadOnlyVariableTable {
    fn get_variable(&self, scope_key: Key, name: &str) -> Result<Option<serde_json::Value>>;

    fn get_local_variables(&self, scope_key: Key) -> Result<Variables>;

    fn get_parent_scope(&self, scope_key: Key) -> Result<Option<Key>>;

    /// Variables visible from the scope.
    fn get_visible_variables(&self, scope_key: Key) -> Result<Variables> {
        let mut scopes = vec![scope_key];
        let mut current = scope_key;
        while let Some(parent) = self.get_parent_scope(current)? {
            scopes.push(parent);
            current = parent;
        }

        let mut variables = Variables::new();
        // outermost first so that inner scopes overwrite
        for scope in scopes.into_iter().rev() {
            variables.extend(self.get_local_variables(scope)?);
        }
        Ok(variables)
    }
}

pub trait VariableTable: ReadOnlyVariableTable {
    fn put_variable_scope(&mut self, scope_key: Key, parent: Option<Key>) -> Result<()>;

    /// Removes the scope and its local variables.
    fn delete_variable_scope(&mut self, scope_key: Key) -> Result<()>;

    fn put_variable(&mut self, scope_key: Key, name: &str, value: serde_json::Value) -> Result<()>;
}
