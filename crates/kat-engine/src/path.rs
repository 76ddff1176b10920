//! Path evaluator and value comparator
//!
//! Locates a value inside a nested document by a dotted field path
//! (`.status.readyReplicas`) and compares it against an expected scalar.
//!
//! Resolution distinguishes two kinds of miss:
//! - an absent key is [`Lookup::NotFound`], a normal "not yet" answer
//! - descending into a non-mapping is [`PathError::NotAContainer`], meaning
//!   the path shape does not fit the document shape
//!
//! Comparison normalises numbers: a document parsed from YAML carries
//! integers while a live API response may carry floats, so `3` and `3.0`
//! compare equal. Anything involving a non-number compares by canonical
//! string form.

use kat_scenario::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field path separator
pub const SEPARATOR: char = '.';

/// Result of resolving a path that fits the document shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// Value at the path
    Found(&'a Value),
    /// Key `segment` is absent
    NotFound { segment: usize },
}

/// Path does not fit the document
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path names no field
    #[error("path is empty")]
    Empty,

    /// Descent reached a scalar or list before the path ended
    #[error("expected mapping at {segment:?}, found {found}")]
    NotAContainer { segment: String, found: &'static str },
}

/// Locate `path` inside `document`
///
/// A single leading separator is optional.
///
/// # Errors
/// - `PathError::Empty` if the path is `""` or `"."`
/// - `PathError::NotAContainer` if a non-mapping is reached before the
///   last segment is consumed
pub fn resolve<'a>(document: &'a Value, path: &str) -> Result<Lookup<'a>, PathError> {
    let trimmed = path.strip_prefix(SEPARATOR).unwrap_or(path);
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let mut current = document;
    for (index, segment) in trimmed.split(SEPARATOR).enumerate() {
        let Value::Object(map) = current else {
            return Err(PathError::NotAContainer {
                segment: segment.to_string(),
                found: type_name(current),
            });
        };
        match map.get(segment) {
            Some(next) => current = next,
            None => return Ok(Lookup::NotFound { segment: index }),
        }
    }
    Ok(Lookup::Found(current))
}

/// Compare an observed value with an expected one
///
/// Both numbers: numeric equality after normalising to `f64`.
/// Otherwise: equality of [`canonical_string`] forms, so `"done" != "Done"`
/// and `3 == "3"` but `3 != "3.0"`.
#[must_use]
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(e)) => a == e,
        _ => canonical_string(actual) == canonical_string(expected),
    }
}

/// String form used when either side of a comparison is not numeric
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) => format_float(f),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// What was observed at a condition's path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Observed {
    /// A value that differs from the expected one
    Value(Value),
    /// Path key absent
    NotFound,
    /// Resource could not be fetched
    FetchFailed(String),
    /// Path shape does not fit the document
    Structural(String),
}

impl Observed {
    /// Check if this is a shape mismatch
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}

impl std::fmt::Display for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Observed::Value(v) => f.write_str(&canonical_string(v)),
            Observed::NotFound => f.write_str("not found"),
            Observed::FetchFailed(msg) => write!(f, "fetch failed ({msg})"),
            Observed::Structural(msg) => write!(f, "shape mismatch ({msg})"),
        }
    }
}

/// Outcome of evaluating one condition against a fetched document
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOutcome {
    /// Condition holds
    Met,
    /// Condition does not hold
    Unmet(Observed),
}

/// Evaluate a condition against a document
#[must_use]
pub fn evaluate(document: &Value, condition: &Condition) -> ConditionOutcome {
    match resolve(document, &condition.path) {
        Ok(Lookup::Found(actual)) if values_equal(actual, &condition.value) => {
            ConditionOutcome::Met
        }
        Ok(Lookup::Found(actual)) => ConditionOutcome::Unmet(Observed::Value(actual.clone())),
        Ok(Lookup::NotFound { .. }) => ConditionOutcome::Unmet(Observed::NotFound),
        Err(e) => ConditionOutcome::Unmet(Observed::Structural(e.to_string())),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
