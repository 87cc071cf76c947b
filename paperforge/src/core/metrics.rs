//! Metrics recovery from entry-script stdout.

use serde_json::{Map, Value};

/// Return the last stdout line that parses as a JSON object, or an empty map.
///
/// Lines are trimmed and blank lines skipped. Earlier log output is tolerated,
/// but a logged mapping printed after the result line would win; callers get the
/// last object-shaped line, whatever produced it.
pub fn extract_metrics(stdout: &str) -> Map<String, Value> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Keep scalar metrics and flatten one level of nested objects into
/// `outer.inner` keys. Nulls, arrays and deeper nesting are dropped.
pub fn flatten_key_metrics(metrics: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in metrics {
        if is_scalar(value) {
            flat.insert(key.clone(), value.clone());
            continue;
        }
        if let Value::Object(inner) = value {
            for (subkey, subval) in inner {
                if is_scalar(subval) {
                    flat.insert(format!("{key}.{subkey}"), subval.clone());
                }
            }
        }
    }
    flat
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}
