//! Boundary between loosely typed extraction replies and the strict record.
//!
//! Replies from the extraction collaborator are JSON whose shape is only
//! roughly right: numbers where strings belong, lists where a scalar
//! belongs, `null` for whole sections. The deserializers here coerce those
//! values so that [`CanonicalRecord`] never sees anything but its own shape.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FillError, Result};
use crate::record::{CanonicalRecord, RawTable};

/// Decode one chunk's reply into a partial record.
///
/// An empty object yields an all-empty record. Anything other than a JSON
/// object is rejected.
pub fn decode_partial(value: Value) -> Result<CanonicalRecord> {
    if !value.is_object() {
        return Err(FillError::InvalidPartial(format!(
            "expected a JSON object, found {}",
            value_kind(&value)
        )));
    }
    serde_json::from_value(value).map_err(|err| FillError::InvalidPartial(err.to_string()))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(scalar_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .values()
            .map(scalar_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_text(&value))
}

pub(crate) fn lenient_string_list<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items.iter().map(scalar_text).collect(),
        other => vec![scalar_text(&other)],
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on" | "checked"
        ),
        _ => false,
    })
}

/// A nested section that may arrive as `null`.
pub(crate) fn lenient_section<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A collection of objects; `null` is empty, a bare object is a single
/// item, and items that cannot be coerced are dropped.
pub(crate) fn lenient_items<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let raw = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    };
    Ok(raw
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

pub(crate) fn lenient_table<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<RawTable>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(rows) = value else {
        return Ok(None);
    };
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| match row {
            Value::Array(cells) => cells.iter().map(scalar_text).collect(),
            Value::Object(map) => map.values().map(scalar_text).collect(),
            other => vec![scalar_text(other)],
        })
        .collect();
    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(RawTable { rows }))
}

pub(crate) fn lenient_string_map<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .iter()
        .map(|(key, value)| (key.clone(), scalar_text(value)))
        .filter(|(_, value)| !value.is_empty())
        .collect())
}
