use serde_json::Value;

/// Normalizes a loosely typed value into a list of unique, non-empty strings.
///
/// Accepts arrays, JSON-encoded array strings, plain strings and scalars.
/// Order of first occurrence is preserved.
pub fn to_unique_string_vec(value: &Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |item: String| {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    };

    match value {
        Value::Null => {}
        Value::Array(items) => items.iter().filter_map(scalar_to_string).for_each(&mut push),
        Value::String(raw) => {
            let parsed = match raw.trim() {
                trimmed if trimmed.starts_with('[') => serde_json::from_str::<Value>(trimmed).ok(),
                _ => None,
            };
            match parsed {
                Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).for_each(&mut push),
                _ => push(raw.clone()),
            }
        }
        other => {
            if let Some(item) = scalar_to_string(other) {
                push(item);
            }
        }
    }

    out
}

/// Renders a scalar JSON value the way it would be stored in a text column.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Returns `source` without any of the `remove` entries.
pub fn subtract(source: &[String], remove: &[String]) -> Vec<String> {
    source.iter().filter(|s| !remove.contains(s)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_mixed_inputs() {
        assert_eq!(to_unique_string_vec(&json!(null)), Vec::<String>::new());
        assert_eq!(to_unique_string_vec(&json!("a")), vec!["a"]);
        assert_eq!(to_unique_string_vec(&json!(["a", "", "b", "a", 1])), vec!["a", "b", "1"]);
        assert_eq!(to_unique_string_vec(&json!("[\"x\",\"y\",\"x\"]")), vec!["x", "y"]);
        assert_eq!(to_unique_string_vec(&json!("[not json")), vec!["[not json"]);
    }
}
