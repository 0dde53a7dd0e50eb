//! Wildcard-aware deep comparison of JSON values
//!
//! The literal string `"*"` on the expected side matches any actual value,
//! including `null` and an absent key. Arrays are order-sensitive, objects
//! compare by key set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Expected-side marker that matches anything
pub const WILDCARD: &str = "*";

/// Outcome of [`compare`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    #[serde(rename = "match")]
    pub matches: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differences: Option<String>,
    pub actual_value: Value,
    pub expected_value: Value,
}

/// Compare `actual` against `expected`. Never panics; a mismatch carries a
/// pretty-printed expected/actual diff plus the first differing path.
pub fn compare(actual: &Value, expected: &Value) -> ComparisonResult {
    match first_difference(actual, expected, "$") {
        None => ComparisonResult {
            matches: true,
            differences: None,
            actual_value: actual.clone(),
            expected_value: expected.clone(),
        },
        Some(path) => ComparisonResult {
            matches: false,
            differences: Some(render_diff(actual, expected, &path)),
            actual_value: actual.clone(),
            expected_value: expected.clone(),
        },
    }
}

/// Boolean form of [`compare`]
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    first_difference(actual, expected, "$").is_none()
}

fn is_wildcard(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == WILDCARD)
}

/// Returns the JSON path of the first mismatch, if any
fn first_difference(actual: &Value, expected: &Value, path: &str) -> Option<String> {
    if is_wildcard(expected) {
        return None;
    }

    match (actual, expected) {
        (Value::Array(a), Value::Array(e)) => {
            if a.len() != e.len() {
                return Some(format!("{path} (length {} != {})", a.len(), e.len()));
            }
            a.iter()
                .zip(e.iter())
                .enumerate()
                .find_map(|(i, (av, ev))| first_difference(av, ev, &format!("{path}[{i}]")))
        }
        (Value::Object(a), Value::Object(e)) => {
            if let Some((key, _)) = e
                .iter()
                .find(|(k, v)| !a.contains_key(*k) && !is_wildcard(v))
            {
                return Some(format!("{path}.{key} (missing in actual)"));
            }
            if let Some(key) = a.keys().find(|k| !e.contains_key(*k)) {
                return Some(format!("{path}.{key} (unexpected in actual)"));
            }
            e.iter().find_map(|(k, ev)| {
                first_difference(a.get(k).unwrap_or(&Value::Null), ev, &format!("{path}.{k}"))
            })
        }
        (Value::Number(a), Value::Number(e)) => {
            if numbers_equal(a, e) {
                None
            } else {
                Some(path.to_string())
            }
        }
        (a, e) if a == e => None,
        _ => Some(path.to_string()),
    }
}

// 1 and 1.0 are the same JSON number once they leave the backend
fn numbers_equal(a: &serde_json::Number, e: &serde_json::Number) -> bool {
    if a == e {
        return true;
    }
    match (a.as_f64(), e.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn render_diff(actual: &Value, expected: &Value, path: &str) -> String {
    let expected_text =
        serde_json::to_string_pretty(expected).unwrap_or_else(|e| format!("<unprintable: {e}>"));
    let actual_text =
        serde_json::to_string_pretty(actual).unwrap_or_else(|e| format!("<unprintable: {e}>"));
    format!("First difference at {path}\nExpected:\n{expected_text}\nActual:\n{actual_text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!(null) ; "null")]
    #[test_case(json!(42) ; "number")]
    #[test_case(json!("text") ; "string")]
    #[test_case(json!([1, {"a": [true]}]) ; "nested array")]
    #[test_case(json!({"data": [{"id": 1}], "status": 200}) ; "envelope")]
    fn wildcard_matches_anything(value: Value) {
        assert!(compare(&value, &json!("*")).matches);
    }

    #[test_case(json!(null) ; "null")]
    #[test_case(json!({"id": 1, "name": "Afghanistan"}) ; "object")]
    #[test_case(json!([[1, 2], [3]]) ; "nested arrays")]
    fn value_matches_itself(value: Value) {
        let result = compare(&value, &value);
        assert!(result.matches);
        assert!(result.differences.is_none());
    }

    #[test]
    fn nested_wildcard_ignores_volatile_fields() {
        let actual = json!({"data": [{"id": 7, "created_at": "2024-01-01T00:00:00Z"}], "status": 201});
        let expected = json!({"data": [{"id": 7, "created_at": "*"}], "status": 201});
        assert!(compare(&actual, &expected).matches);
    }

    #[test]
    fn wildcard_covers_absent_value() {
        let actual = json!({"data": null});
        let expected = json!({"data": "*"});
        assert!(compare(&actual, &expected).matches);
    }

    #[test]
    fn wildcard_covers_missing_key() {
        let actual = json!({"status": 200, "statusText": "OK"});
        let expected = json!({"data": "*", "status": 200, "statusText": "OK"});
        assert!(compare(&actual, &expected).matches);

        let strict = json!({"data": [], "status": 200, "statusText": "OK"});
        let result = compare(&actual, &strict);
        assert!(!result.matches);
        assert!(result.differences.unwrap().contains("$.data (missing in actual)"));
    }

    #[test]
    fn arrays_are_order_sensitive() {
        let result = compare(&json!([1, 2]), &json!([2, 1]));
        assert!(!result.matches);
        assert!(result.differences.unwrap().contains("$[0]"));
    }

    #[test]
    fn objects_ignore_key_order() {
        let actual: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert!(compare(&actual, &json!({"a": 1, "b": 2})).matches);
    }

    #[test]
    fn extra_key_is_a_mismatch() {
        let result = compare(&json!({"a": 1, "b": 2}), &json!({"a": 1}));
        assert!(!result.matches);
        assert!(result.differences.unwrap().contains("unexpected"));
    }

    #[test]
    fn missing_key_is_a_mismatch() {
        let result = compare(&json!({"a": 1}), &json!({"a": 1, "b": 2}));
        assert!(!result.matches);
        assert!(result.differences.unwrap().contains("$.b"));
    }

    #[test]
    fn object_versus_array_mismatch() {
        assert!(!compare(&json!({}), &json!([])).matches);
        assert!(!compare(&json!("1"), &json!(1)).matches);
    }

    #[test]
    fn star_on_actual_side_is_literal() {
        assert!(!compare(&json!("*"), &json!("x")).matches);
    }

    #[test]
    fn integer_and_float_forms_are_equal() {
        assert!(compare(&json!(1.0), &json!(1)).matches);
    }
}
