//! Defaulting accessors over untyped event payloads. Nothing in here fails.

use serde_json::Map;
use serde_json::Value;

/// Looks up `key` on an object value. `null` is treated as absent.
pub fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object()?.get(key).filter(|v| !v.is_null())
}

/// Walks a chain of object keys.
pub fn read_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| field(current, key))
}

/// Returns the first candidate key present on `value`, in alias order.
pub fn read_aliased<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|key| field(value, key))
}

/// Coerces a scalar to a string. Numbers and booleans are stringified so that
/// numeric ids survive; objects and arrays are rejected.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerces a value to a number. Numeric strings are accepted, including a
/// trailing `%` sign.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite()),
        _ => None,
    }
}

pub fn read_string(value: &Value, key: &str) -> String {
    field(value, key).and_then(as_text).unwrap_or_default()
}

/// Like [`read_string`] but maps blank strings to `None`.
pub fn read_opt_string(value: &Value, key: &str) -> Option<String> {
    field(value, key)
        .and_then(as_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-blank string found under any of `keys`.
pub fn read_first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| read_opt_string(value, key))
}

pub fn read_number(value: &Value, key: &str) -> Option<f64> {
    field(value, key).and_then(as_number)
}

pub fn read_number_or(value: &Value, key: &str, default: f64) -> f64 {
    read_number(value, key).unwrap_or(default)
}

/// Reads a non-negative integer. Fractions are truncated, negatives rejected.
pub fn read_u64(value: &Value, key: &str) -> Option<u64> {
    read_number(value, key)
        .filter(|n| *n >= 0.0)
        .map(|n| n.trunc() as u64)
}

/// Booleans, plus the strings `"true"`/`"false"`. Anything else is `false`.
pub fn read_bool(value: &Value, key: &str) -> bool {
    match field(value, key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub fn read_array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    field(value, key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn read_object<'a>(value: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    field(value, key).and_then(Value::as_object)
}

/// Collects the textual entries of an array. Object entries contribute their
/// `text`, `description`, `title` or `label` field, in that order.
pub fn text_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(_) => read_first_string(item, &["text", "description", "title", "label"]),
            other => as_text(other),
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn read_string_array(value: &Value, key: &str) -> Vec<String> {
    match field(value, key) {
        Some(Value::Array(items)) => text_items(items),
        Some(single @ Value::String(_)) => text_items(std::slice::from_ref(single)),
        _ => Vec::new(),
    }
}

/// Extracts a human readable error text from either a plain string or an
/// object carrying `message`/`error`.
pub fn error_text(value: Option<&Value>) -> Option<String> {
    let value = value?;
    match value {
        Value::Object(_) => read_first_string(value, &["message", "error", "detail"]),
        other => as_text(other)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn string_reader_defaults_on_mismatch() {
        let payload = json!({ "a": "x", "b": 3, "c": { "nested": true }, "d": null });
        assert_eq!(read_string(&payload, "a"), "x");
        assert_eq!(read_string(&payload, "b"), "3");
        assert_eq!(read_string(&payload, "c"), "");
        assert_eq!(read_string(&payload, "d"), "");
        assert_eq!(read_string(&payload, "missing"), "");
        assert_eq!(read_string(&json!("not an object"), "a"), "");
    }

    #[test]
    fn number_reader_accepts_numeric_strings() {
        let payload = json!({ "n": 0.5, "s": " 85% ", "bad": "abc", "arr": [1] });
        assert_eq!(read_number(&payload, "n"), Some(0.5));
        assert_eq!(read_number(&payload, "s"), Some(85.0));
        assert_eq!(read_number(&payload, "bad"), None);
        assert_eq!(read_number(&payload, "arr"), None);
        assert_eq!(read_number_or(&payload, "missing", 7.0), 7.0);
    }

    #[test]
    fn u64_reader_rejects_negatives_and_truncates() {
        let payload = json!({ "neg": -2, "frac": 3.9 });
        assert_eq!(read_u64(&payload, "neg"), None);
        assert_eq!(read_u64(&payload, "frac"), Some(3));
    }

    #[test]
    fn bool_reader_is_strict() {
        let payload = json!({ "t": true, "s": "TRUE", "n": 1 });
        assert!(read_bool(&payload, "t"));
        assert!(read_bool(&payload, "s"));
        assert!(!read_bool(&payload, "n"));
        assert!(!read_bool(&payload, "missing"));
    }

    #[test]
    fn aliased_reader_takes_first_present_key() {
        let payload = json!({ "maxClusters": 4, "max_clusters": null, "other": 1 });
        let found = read_aliased(&payload, &["max_clusters", "maxClusters", "other"]);
        assert_eq!(found, Some(&json!(4)));
        assert_eq!(read_aliased(&payload, &["nope"]), None);
    }

    #[test]
    fn string_array_mixes_scalars_and_objects() {
        let payload = json!({
            "steps": ["one", { "title": "two" }, { "unrelated": 1 }, 4, "  "],
            "single": "only",
        });
        assert_eq!(read_string_array(&payload, "steps"), vec!["one", "two", "4"]);
        assert_eq!(read_string_array(&payload, "single"), vec!["only"]);
        assert!(read_string_array(&payload, "missing").is_empty());
    }

    #[test]
    fn path_reader_stops_at_non_objects() {
        let payload = json!({ "data": { "content": { "text": "hi" } }, "flat": "x" });
        assert_eq!(
            read_path(&payload, &["data", "content", "text"]),
            Some(&json!("hi"))
        );
        assert_eq!(read_path(&payload, &["flat", "text"]), None);
    }

    #[test]
    fn error_text_reads_objects_and_strings() {
        assert_eq!(error_text(Some(&json!("boom"))), Some("boom".to_string()));
        assert_eq!(
            error_text(Some(&json!({ "message": "bad sql" }))),
            Some("bad sql".to_string())
        );
        assert_eq!(error_text(Some(&json!(""))), None);
        assert_eq!(error_text(None), None);
    }
}
