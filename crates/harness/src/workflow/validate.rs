//! Step result expectations

use serde_json::Value;

use restcheck_common::{values_match, ExpectedResult};

/// Whether `row` carries every key/value pair of `pattern`
pub fn row_contains(row: &Value, pattern: &Value) -> bool {
    match (row.as_object(), pattern.as_object()) {
        (Some(row), Some(pattern)) => pattern
            .iter()
            .all(|(key, expected)| values_match(row.get(key).unwrap_or(&Value::Null), expected)),
        _ => values_match(row, pattern),
    }
}

fn patterns(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

/// Check `rows` against `expected`; returns every violated expectation
pub fn validate_rows(rows: &[Value], expected: &ExpectedResult) -> Vec<String> {
    let mut failures = Vec::new();

    if let Some(count) = expected.row_count {
        if rows.len() != count {
            failures.push(format!("expected {} row(s), got {}", count, rows.len()));
        }
    }

    if let Some(contains) = &expected.contains {
        for pattern in patterns(contains) {
            if !rows.iter().any(|row| row_contains(row, pattern)) {
                failures.push(format!("no row contains {}", pattern));
            }
        }
    }

    if let Some(not_contains) = &expected.not_contains {
        for pattern in patterns(not_contains) {
            if rows.iter().any(|row| row_contains(row, pattern)) {
                failures.push(format!("a row unexpectedly contains {}", pattern));
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "title": "alice post", "user_id": "u-a"}),
            json!({"id": 2, "title": "bob post", "user_id": "u-b"}),
        ]
    }

    #[test]
    fn row_count_is_exact() {
        let expected = ExpectedResult {
            row_count: Some(1),
            ..Default::default()
        };
        assert_eq!(validate_rows(&rows(), &expected).len(), 1);
        assert!(validate_rows(&rows()[..1], &expected).is_empty());
    }

    #[test]
    fn contains_accepts_object_or_array() {
        let single = ExpectedResult {
            contains: Some(json!({"title": "bob post"})),
            ..Default::default()
        };
        assert!(validate_rows(&rows(), &single).is_empty());

        let many = ExpectedResult {
            contains: Some(json!([{"id": 1}, {"user_id": "u-c"}])),
            ..Default::default()
        };
        let failures = validate_rows(&rows(), &many);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("u-c"));
    }

    #[test]
    fn not_contains_rejects_any_match() {
        let expected = ExpectedResult {
            not_contains: Some(json!([{"user_id": "u-b"}])),
            ..Default::default()
        };
        assert_eq!(validate_rows(&rows(), &expected).len(), 1);
        assert!(validate_rows(&rows()[..1], &expected).is_empty());
    }

    #[test]
    fn wildcard_values_match_anything() {
        assert!(row_contains(&rows()[0], &json!({"id": "*", "user_id": "u-a"})));
        assert!(row_contains(&rows()[0], &json!({"missing": "*"})));
        assert!(!row_contains(&rows()[0], &json!({"missing": 1})));
    }
}
