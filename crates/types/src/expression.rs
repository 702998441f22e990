// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Contract towards the expression language.
//!
//! Expressions starting with `=` are evaluated by an [`ExpressionLanguage`] against the variables
//! visible from a scope. All other expressions are static string values.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Variables;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(String);

impl Expression {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn is_static(&self) -> bool {
        !self.0.starts_with('=')
    }

    /// The expression without the leading `=`.
    pub fn body(&self) -> &str {
        self.0.strip_prefix('=').unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Expression {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Expression {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of an evaluation result, as reported in failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl ResultType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ResultType::Null,
            Value::Bool(_) => ResultType::Boolean,
            Value::Number(_) => ResultType::Number,
            Value::String(_) => ResultType::String,
            Value::Array(_) => ResultType::Array,
            Value::Object(_) => ResultType::Object,
        }
    }
}

/// Evaluates dynamic expressions.
pub trait ExpressionLanguage: Send + Sync {
    /// Evaluates the body of the expression against the given variables. An `Err` carries a
    /// human readable description of why the evaluation failed.
    fn evaluate(&self, expression: &Expression, context: &Variables) -> Result<Value, String>;
}

/// A minimal expression language: JSON literals and variable references with optional
/// path navigation (`=order.customer.id`). Missing variables and path segments evaluate
/// to `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExpressionLanguage;

impl ExpressionLanguage for SimpleExpressionLanguage {
    fn evaluate(&self, expression: &Expression, context: &Variables) -> Result<Value, String> {
        if expression.is_static() {
            return Ok(Value::String(expression.as_str().to_owned()));
        }

        let body = expression.body().trim();
        if body.is_empty() {
            return Err(format!(
                "failed to parse expression '{expression}': expression is empty"
            ));
        }
        if let Ok(literal) = serde_json::from_str::<Value>(body) {
            return Ok(literal);
        }

        let segments: Vec<&str> = body.split('.').collect();
        if let Some(segment) = segments.iter().find(|s| !is_identifier(s)) {
            return Err(format!(
                "failed to parse expression '{expression}': unexpected '{segment}'"
            ));
        }

        let (first, path) = segments.split_first().ok_or_else(|| {
            format!("failed to parse expression '{expression}': expression is empty")
        })?;
        let mut current = context.get(*first).cloned().unwrap_or(Value::Null);
        for segment in path {
            current = match current {
                Value::Object(mut map) => map.remove(*segment).unwrap_or(Value::Null),
                _ => Value::Null,
            };
        }
        Ok(current)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// An ISO-8601 repeating interval `R<n>/<duration>`. `R/<duration>` repeats forever, which is
/// expressed as `repetitions == -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatingInterval {
    pub repetitions: i32,
    pub interval: Duration,
}

impl RepeatingInterval {
    pub const INFINITE: i32 = -1;
}

impl FromStr for RepeatingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("'{s}' is not a repeating interval (expected R<n>/<duration>)");
        let rest = s.strip_prefix('R').ok_or_else(invalid)?;
        let (repetitions, duration) = rest.split_once('/').ok_or_else(invalid)?;
        let repetitions = if repetitions.is_empty() {
            Self::INFINITE
        } else {
            repetitions.parse::<i32>().map_err(|_| invalid())?
        };
        if repetitions < Self::INFINITE {
            return Err(invalid());
        }
        Ok(Self {
            repetitions,
            interval: parse_duration(duration)?,
        })
    }
}

/// Parses an ISO-8601 duration. Days count as 24 hours.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let span: jiff::Span = s
        .parse()
        .map_err(|e| format!("'{s}' is not a valid duration: {e}"))?;
    let signed = span
        .to_duration(jiff::SpanRelativeTo::days_are_24_hours())
        .map_err(|e| format!("'{s}' is not a valid duration: {e}"))?;
    Duration::try_from(signed).map_err(|_| format!("'{s}' is a negative duration"))
}

/// Parses an ISO-8601 date time with offset (or a zoned date time) into a timestamp.
pub fn parse_date_time(s: &str) -> Result<jiff::Timestamp, String> {
    s.parse::<jiff::Timestamp>()
        .or_else(|_| s.parse::<jiff::Zoned>().map(|z| z.timestamp()))
        .map_err(|e| format!("'{s}' is not a valid date time: {e}"))
}
