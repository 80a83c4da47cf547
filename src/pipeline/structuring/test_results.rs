//! Typed conversion of the model's `test_results` tree.
//!
//! A mapping with a scalar `value` next to a `unit` or `reference_range`
//! is a measured result (leaf); every other mapping is a group and is
//! walked recursively. Leaves get an
//! `is_normal` verdict when the model did not supply one.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::normalizer::text;
use super::types::{ResultValue, TestResult, TestResultNode};

/// Flags that mark a result abnormal regardless of the numeric range.
pub const ABNORMAL_FLAGS: &[&str] = &["H", "L", "HIGH", "LOW", "ABNORMAL"];

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*[-–]\s*(-?\d+(?:\.\d+)?)\s*$").expect("valid regex")
});

/// Convert the raw `test_results` value. Anything but an object yields an
/// empty map.
pub fn build_test_results(raw: &Value) -> BTreeMap<String, TestResultNode> {
    match raw {
        Value::Object(entries) => build_group(entries, ""),
        Value::Null => BTreeMap::new(),
        other => {
            tracing::warn!(kind = json_kind(other), "test_results is not an object, ignored");
            BTreeMap::new()
        }
    }
}

fn build_group(entries: &Map<String, Value>, path: &str) -> BTreeMap<String, TestResultNode> {
    let mut group = BTreeMap::new();
    for (name, value) in entries {
        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}/{name}")
        };
        match value {
            Value::Object(fields) if is_leaf(fields) => {
                group.insert(name.clone(), TestResultNode::Leaf(build_leaf(fields)));
            }
            Value::Object(children) => {
                group.insert(
                    name.clone(),
                    TestResultNode::Group(build_group(children, &child_path)),
                );
            }
            other => {
                tracing::warn!(
                    entry = %child_path,
                    kind = json_kind(other),
                    "Dropping test result entry that is neither a result nor a group"
                );
            }
        }
    }
    group
}

fn is_leaf(fields: &Map<String, Value>) -> bool {
    let scalar_value = matches!(fields.get("value"), Some(v) if !v.is_object() && !v.is_array());
    scalar_value && (fields.contains_key("unit") || fields.contains_key("reference_range"))
}

fn build_leaf(fields: &Map<String, Value>) -> TestResult {
    let value = fields.get("value").and_then(result_value);
    let unit = text(fields.get("unit"));
    let reference_range = text(fields.get("reference_range"));
    let flag = text(fields.get("flag"));

    let is_normal = fields
        .get("is_normal")
        .and_then(explicit_verdict)
        .unwrap_or_else(|| {
            is_value_normal(value.as_ref(), reference_range.as_deref(), flag.as_deref())
        });

    TestResult {
        value,
        unit,
        reference_range,
        is_normal,
        flag,
    }
}

/// Verdict for a result without a model-supplied `is_normal`.
///
/// An abnormal flag wins. Otherwise a numeric value is checked against a
/// `min-max` range (inclusive). Anything undecidable is normal.
pub fn is_value_normal(
    value: Option<&ResultValue>,
    reference_range: Option<&str>,
    flag: Option<&str>,
) -> bool {
    if let Some(flag) = flag {
        let flag = flag.trim().to_ascii_uppercase();
        if ABNORMAL_FLAGS.contains(&flag.as_str()) {
            return false;
        }
    }

    match (
        value.and_then(ResultValue::as_f64),
        reference_range.and_then(parse_reference_range),
    ) {
        (Some(v), Some((min, max))) => min <= v && v <= max,
        _ => true,
    }
}

/// Parse `"min-max"` (hyphen or en dash, optional spaces, signed decimals).
pub fn parse_reference_range(text: &str) -> Option<(f64, f64)> {
    let caps = RANGE.captures(text)?;
    let min = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let max = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some((min, max))
}

fn result_value(value: &Value) -> Option<ResultValue> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(ResultValue::Number(n.clone())),
        Value::String(s) => Some(ResultValue::Text(s.trim().to_string())),
        Value::Bool(b) => Some(ResultValue::Text(b.to_string())),
        other => Some(ResultValue::Text(other.to_string())),
    }
}

/// Model-supplied `is_normal`, accepted as a bool or a yes/no string.
fn explicit_verdict(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "normal" => Some(true),
            "false" | "no" | "abnormal" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
