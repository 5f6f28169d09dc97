//! YAML scalar helpers
//!
//! Descriptor variables and catalog defaults are strings semantically but are
//! frequently written as bare numbers or booleans (`port: 8080`).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

/// Render a YAML scalar as the string a user would have typed
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

pub fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a scalar, got {:?}", value)))
}

/// A possibly-null mapping of scalars
pub fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            scalar_to_string(&v)
                .map(|s| (k.clone(), s))
                .ok_or_else(|| serde::de::Error::custom(format!("value of {:?} is not a scalar", k)))
        })
        .collect()
}

/// A possibly-null sequence of scalars
pub fn scalar_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .iter()
        .map(|v| {
            scalar_to_string(v)
                .ok_or_else(|| serde::de::Error::custom(format!("expected a scalar, got {:?}", v)))
        })
        .collect()
}
