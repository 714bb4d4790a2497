//! Dotted-path helpers for navigating collected records.
//!
//! Paths are dot-separated field names. A segment may be wrapped in double
//! quotes to protect field names which themselves contain dots or leading
//! special characters (e.g. `"@timestamp"`).

use serde_json::Value;

/// Splits a dotted path into segments, honoring double-quoted segments.
pub fn split(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in path.chars() {
        match ch {
            '"' => quoted = !quoted,
            '.' if !quoted => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    segments.push(current);
    segments
}

/// Resolves a dotted path against a record, returning the value it points at.
pub fn search<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;

    for segment in split(path) {
        current = current.as_object()?.get(&segment)?;
    }

    Some(current)
}

/// Returns a copy of the record with the value at the dotted path replaced.
///
/// Intermediate objects are created where missing; non-object intermediates
/// are overwritten.
pub fn update(record: &Value, path: &str, new_value: Value) -> Value {
    let mut updated = record.clone();
    set_path(&mut updated, &split(path), new_value);
    updated
}

fn set_path(target: &mut Value, segments: &[String], new_value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }

    if let Value::Object(map) = target {
        if rest.is_empty() {
            map.insert(head.clone(), new_value);
        } else {
            let child = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            set_path(child, rest, new_value);
        }
    }
}

/// Renders a pointer value as the opaque string stored in the cache.
///
/// Strings pass through unquoted; any other JSON value uses its compact
/// rendering (so a numeric timestamp `1607425434` becomes `"1607425434"`).
pub fn pointer_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_plain() {
        assert_eq!(split("events.parameters"), vec!["events", "parameters"]);
        assert_eq!(split("timestamp"), vec!["timestamp"]);
    }

    #[test]
    fn test_split_quoted_segment() {
        assert_eq!(split("\"@timestamp\""), vec!["@timestamp"]);
        assert_eq!(
            split("outer.\"dotted.field\".inner"),
            vec!["outer", "dotted.field", "inner"]
        );
    }

    #[test]
    fn test_search_nested() {
        let record = json!({"a": {"b": {"c": 42}}});
        assert_eq!(search(&record, "a.b.c"), Some(&json!(42)));
        assert_eq!(search(&record, "a.b"), Some(&json!({"c": 42})));
        assert!(search(&record, "a.missing").is_none());
        assert!(search(&record, "a.b.c.d").is_none());
    }

    #[test]
    fn test_search_quoted() {
        let record = json!({"@timestamp": 1607425434i64});
        assert_eq!(search(&record, "\"@timestamp\""), Some(&json!(1607425434i64)));
    }

    #[test]
    fn test_update_replaces_value() {
        let record = json!({"events": [1, 2, 3], "id": "x"});
        let updated = update(&record, "events", json!(2));
        assert_eq!(updated, json!({"events": 2, "id": "x"}));
        // Original untouched.
        assert_eq!(record["events"], json!([1, 2, 3]));
    }

    #[test]
    fn test_update_nested_path() {
        let record = json!({"events": {"parameters": [{"name": "n"}]}});
        let updated = update(&record, "events.parameters", json!({"n": 1}));
        assert_eq!(updated, json!({"events": {"parameters": {"n": 1}}}));
    }

    #[test]
    fn test_update_creates_missing_intermediates() {
        let record = json!({});
        let updated = update(&record, "a.b", json!(true));
        assert_eq!(updated, json!({"a": {"b": true}}));
    }

    #[test]
    fn test_pointer_string_rendering() {
        assert_eq!(pointer_string(&json!("2020-12-08T10:23:54Z")), "2020-12-08T10:23:54Z");
        assert_eq!(pointer_string(&json!(1607425434i64)), "1607425434");
    }
}
