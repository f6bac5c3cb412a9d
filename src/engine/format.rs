//! Variable Formatter (C2, §4.2): template substitution `{name}` over
//! heterogeneous values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

/// Canonical stringification used both by the formatter and anywhere else a
/// JSON value needs to become request-body text: numbers print as decimal,
/// booleans as `true`/`false`, strings pass through unquoted, everything
/// structured becomes compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Replaces every `{name}` (whitespace inside the braces tolerated) with
/// `stringify(variables[name])`. A name absent from `variables` is left
/// literal and logged, never treated as an error.
pub fn format_template(template: &str, variables: &serde_json::Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => stringify(value),
                None => {
                    warn!(name, "variable formatter: missing name, leaving literal");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Applies [`format_template`] recursively: strings are substituted, arrays
/// and objects are walked, everything else passes through unchanged. Used
/// for request bodies and any other structured template (§4.2).
pub fn format_value(value: &Value, variables: &serde_json::Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(format_template(s, variables)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| format_value(v, variables)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), format_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}
