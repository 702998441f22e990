// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Typed evaluation of expressions against the variables of a scope.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use cadence_storage_api::variable_table::ReadOnlyVariableTable;
use cadence_storage_api::StorageError;
use cadence_types::errors::{ErrorKind, Failure};
use cadence_types::expression::{
    parse_date_time, parse_duration, Expression, ExpressionLanguage, RepeatingInterval, ResultType,
};
use cadence_types::identifiers::Key;
use cadence_types::Variables;

/// Variables an expression is evaluated against. A scope without key has no variables.
#[derive(Debug, Clone, Default)]
pub(crate) struct EvaluationScope {
    key: Option<Key>,
    variables: Variables,
}

impl EvaluationScope {
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn load<S: ReadOnlyVariableTable>(
        storage: &S,
        scope_key: Option<Key>,
    ) -> Result<Self, StorageError> {
        let variables = match scope_key {
            Some(key) => storage.get_visible_variables(key)?,
            None => Variables::new(),
        };
        Ok(Self {
            key: scope_key,
            variables,
        })
    }

    pub(crate) fn key(&self) -> Option<Key> {
        self.key
    }
}

pub(crate) struct ExpressionProcessor {
    language: Arc<dyn ExpressionLanguage>,
}

impl ExpressionProcessor {
    pub(crate) fn new(language: Arc<dyn ExpressionLanguage>) -> Self {
        Self { language }
    }

    pub(crate) fn evaluate_any(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<Value, Failure> {
        self.language
            .evaluate(expression, &scope.variables)
            .map_err(|message| failure(message, scope))
    }

    pub(crate) fn evaluate_string(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<String, Failure> {
        match self.evaluate_any(expression, scope)? {
            Value::String(s) => Ok(s),
            other => Err(type_mismatch(expression, ResultType::String, &other, scope)),
        }
    }

    // The typed evaluations below complete the result type contract. The process model has no
    // conditions or io mappings yet, so only tests call them.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn evaluate_long(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<i64, Failure> {
        let value = self.evaluate_any(expression, scope)?;
        value
            .as_i64()
            .ok_or_else(|| type_mismatch(expression, ResultType::Number, &value, scope))
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn evaluate_boolean(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<bool, Failure> {
        match self.evaluate_any(expression, scope)? {
            Value::Bool(b) => Ok(b),
            other => Err(type_mismatch(expression, ResultType::Boolean, &other, scope)),
        }
    }

    /// An ISO-8601 duration such as `PT10S`.
    pub(crate) fn evaluate_interval(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<Duration, Failure> {
        let text = self.evaluate_string(expression, scope)?;
        parse_duration(&text).map_err(|e| invalid_format(expression, e, scope))
    }

    /// An ISO-8601 repeating interval such as `R3/PT10S`.
    pub(crate) fn evaluate_cycle(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<RepeatingInterval, Failure> {
        let text = self.evaluate_string(expression, scope)?;
        text.parse::<RepeatingInterval>()
            .map_err(|e| invalid_format(expression, e, scope))
    }

    pub(crate) fn evaluate_date_time(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<jiff::Timestamp, Failure> {
        let text = self.evaluate_string(expression, scope)?;
        parse_date_time(&text).map_err(|e| invalid_format(expression, e, scope))
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn evaluate_array(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<Vec<Value>, Failure> {
        match self.evaluate_any(expression, scope)? {
            Value::Array(items) => Ok(items),
            other => Err(type_mismatch(expression, ResultType::Array, &other, scope)),
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn evaluate_array_of_strings(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<Vec<String>, Failure> {
        self.evaluate_array(expression, scope)?
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(failure(
                    format!(
                        "Expected result of the expression '{}' to be '{}' containing '{}' \
                        items, but was '{}' containing at least one non-'{}' item.",
                        expression.body(),
                        ResultType::Array,
                        ResultType::String,
                        ResultType::Array,
                        ResultType::String
                    ),
                    scope,
                )),
            })
            .collect()
    }

    /// Correlation keys are strings. Numbers are accepted and converted to their decimal form.
    pub(crate) fn evaluate_message_correlation_key(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<String, Failure> {
        match self.evaluate_any(expression, scope)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(canonical_number(&n)),
            other => Err(failure(
                format!(
                    "Expected result of the expression '{}' to be one of '[{}, {}]', but was '{}'",
                    expression.body(),
                    ResultType::String,
                    ResultType::Number,
                    ResultType::of(&other)
                ),
                scope,
            )),
        }
    }

    /// A variable mapping evaluates to an object whose entries become variables. `null` is an
    /// empty mapping.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn evaluate_variable_mapping(
        &self,
        expression: &Expression,
        scope: &EvaluationScope,
    ) -> Result<Variables, Failure> {
        match self.evaluate_any(expression, scope)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Variables::new()),
            other => Err(type_mismatch(expression, ResultType::Object, &other, scope)
                .with_kind(ErrorKind::IoMappingError)),
        }
    }
}

#[cfg_attr(not(test), allow(dead_code))]
trait FailureExt {
    fn with_kind(self, error_kind: ErrorKind) -> Self;
}

impl FailureExt for Failure {
    fn with_kind(mut self, error_kind: ErrorKind) -> Self {
        self.error_kind = error_kind;
        self
    }
}

fn failure(message: String, scope: &EvaluationScope) -> Failure {
    Failure::new(message, ErrorKind::ExtractValueError).with_scope(scope.key)
}

fn type_mismatch(
    expression: &Expression,
    expected: ResultType,
    actual: &Value,
    scope: &EvaluationScope,
) -> Failure {
    failure(
        format!(
            "Expected result of the expression '{}' to be '{expected}', but was '{}'.",
            expression.body(),
            ResultType::of(actual)
        ),
        scope,
    )
}

fn invalid_format(expression: &Expression, reason: String, scope: &EvaluationScope) -> Failure {
    failure(
        format!(
            "Invalid format of the result of the expression '{}': {reason}",
            expression.body()
        ),
        scope,
    )
}

fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}
