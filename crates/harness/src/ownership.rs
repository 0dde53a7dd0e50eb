//! Ownership-column injection for inserts made by an authenticated user
//!
//! Workflow fixtures insert rows without hard-coding user ids; the engine
//! stamps the signed-in user's id into the table's ownership column so that
//! ownership-based RLS policies can be exercised.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use restcheck_common::InsertSpec;

/// Maps tables whose name contains `pattern` to an ownership column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRule {
    pub pattern: String,
    pub column: String,
}

impl OwnershipRule {
    pub fn new(pattern: &str, column: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            column: column.to_string(),
        }
    }

    /// Comment-like tables use `author_id`, project/document-like tables
    /// `owner_id`, post-like tables `user_id`
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("comment", "author_id"),
            Self::new("project", "owner_id"),
            Self::new("document", "owner_id"),
            Self::new("post", "user_id"),
            Self::new("todo", "user_id"),
            Self::new("note", "user_id"),
            Self::new("profile", "user_id"),
            Self::new("message", "user_id"),
        ]
    }
}

/// Ownership column for `table`; first matching rule wins
pub fn ownership_column<'r>(rules: &'r [OwnershipRule], table: &str) -> Option<&'r str> {
    let name = table
        .rsplit('.')
        .next()
        .unwrap_or(table)
        .trim_matches('"')
        .to_ascii_lowercase();
    rules
        .iter()
        .find(|rule| name.contains(&rule.pattern.to_ascii_lowercase()))
        .map(|rule| rule.column.as_str())
}

/// Stamp `user_id` into every row of an insert payload (object or array of
/// objects) that lacks `column`. Returns the number of rows stamped.
pub fn stamp_payload(payload: &mut Value, column: &str, user_id: &str) -> usize {
    let stamp = |row: &mut Value| -> usize {
        match row.as_object_mut() {
            Some(obj) if !obj.contains_key(column) => {
                obj.insert(column.to_string(), Value::String(user_id.to_string()));
                1
            }
            _ => 0,
        }
    };
    match payload {
        Value::Array(rows) => rows.iter_mut().map(stamp).sum(),
        row => stamp(row),
    }
}

static INSERT_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*insert\s+into\s+([\w."]+)\s*\(([^)]*)\)\s*values\s*"#).expect("static regex")
});

/// An `INSERT ... VALUES` statement held as structure.
///
/// Values are SQL expression text so that parsed statements round-trip
/// unchanged apart from injected columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlInsert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Anything after the value tuples, e.g. `RETURNING *`
    pub suffix: String,
}

impl SqlInsert {
    /// Best-effort parse of `INSERT INTO t (cols) VALUES (...), (...) [suffix]`.
    /// Returns `None` for anything else, including `INSERT ... SELECT`.
    pub fn parse(sql: &str) -> Option<Self> {
        let caps = INSERT_HEAD.captures(sql)?;
        let table = caps[1].to_string();
        let columns: Vec<String> = caps[2]
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            return None;
        }

        let rest: Vec<char> = sql[caps.get(0)?.end()..].chars().collect();
        let mut rows = Vec::new();
        let mut i = 0;
        loop {
            while i < rest.len() && (rest[i].is_whitespace() || rest[i] == ',') {
                i += 1;
            }
            if i >= rest.len() || rest[i] != '(' {
                break;
            }
            let (values, next) = scan_tuple(&rest, i + 1)?;
            if values.len() != columns.len() {
                return None;
            }
            rows.push(values);
            i = next;
        }
        if rows.is_empty() {
            return None;
        }

        let suffix: String = rest[i..].iter().collect();
        let suffix = suffix.trim().trim_end_matches(';').trim().to_string();
        Some(Self {
            table,
            columns,
            rows,
            suffix,
        })
    }

    pub fn from_spec(spec: &InsertSpec) -> Self {
        Self {
            table: spec.table.clone(),
            columns: spec.columns.clone(),
            rows: spec
                .values
                .iter()
                .map(|row| row.iter().map(sql_literal).collect())
                .collect(),
            suffix: String::new(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.trim_matches('"').eq_ignore_ascii_case(column))
    }

    /// Add `column = 'user_id'` to every row unless the column is present
    pub fn stamp_owner(&mut self, column: &str, user_id: &str) -> bool {
        if self.has_column(column) {
            return false;
        }
        self.columns.push(column.to_string());
        let literal = sql_literal(&Value::String(user_id.to_string()));
        for row in &mut self.rows {
            row.push(literal.clone());
        }
        true
    }

    pub fn to_sql(&self) -> String {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| format!("({})", row.join(", ")))
            .collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            rows.join(", ")
        );
        if !self.suffix.is_empty() {
            sql.push(' ');
            sql.push_str(&self.suffix);
        }
        sql.push(';');
        sql
    }
}

/// Render a JSON value as a SQL literal
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Split one parenthesised tuple into top-level expressions. Returns the
/// expressions and the index just past the closing parenthesis.
fn scan_tuple(chars: &[char], start: usize) -> Option<(Vec<String>, usize)> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                current.push(c);
                i += 1;
                while i < chars.len() {
                    current.push(chars[i]);
                    if chars[i] == c {
                        if chars.get(i + 1) == Some(&c) {
                            current.push(c);
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' if depth == 0 => {
                values.push(current.trim().to_string());
                return Some((values, i + 1));
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                values.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_column_by_table_name() {
        let rules = OwnershipRule::defaults();
        assert_eq!(ownership_column(&rules, "posts"), Some("user_id"));
        assert_eq!(ownership_column(&rules, "public.post_comments"), Some("author_id"));
        assert_eq!(ownership_column(&rules, "projects"), Some("owner_id"));
        assert_eq!(ownership_column(&rules, "shared_documents"), Some("owner_id"));
        assert_eq!(ownership_column(&rules, "countries"), None);
    }

    #[test]
    fn stamps_only_missing_columns() {
        let mut payload = json!([{"title": "a"}, {"title": "b", "user_id": "someone-else"}]);
        assert_eq!(stamp_payload(&mut payload, "user_id", "u-1"), 1);
        assert_eq!(payload[0]["user_id"], "u-1");
        assert_eq!(payload[1]["user_id"], "someone-else");

        let mut single = json!({"title": "c"});
        assert_eq!(stamp_payload(&mut single, "user_id", "u-1"), 1);
        assert_eq!(single["user_id"], "u-1");
    }

    #[test]
    fn parses_and_stamps_raw_insert() {
        let sql = "INSERT INTO posts (title, body) VALUES ('Hello, world', 'it''s (fine)'), ('Two', now()) RETURNING id;";
        let mut insert = SqlInsert::parse(sql).unwrap();
        assert_eq!(insert.table, "posts");
        assert_eq!(insert.rows.len(), 2);
        assert_eq!(insert.rows[0][1], "'it''s (fine)'");
        assert_eq!(insert.suffix, "RETURNING id");

        assert!(insert.stamp_owner("user_id", "u-1"));
        assert!(!insert.stamp_owner("user_id", "u-2"));
        assert_eq!(
            insert.to_sql(),
            "INSERT INTO posts (title, body, user_id) VALUES ('Hello, world', 'it''s (fine)', 'u-1'), ('Two', now(), 'u-1') RETURNING id;"
        );
    }

    #[test]
    fn rejects_non_values_inserts() {
        assert!(SqlInsert::parse("INSERT INTO posts SELECT * FROM drafts").is_none());
        assert!(SqlInsert::parse("INSERT INTO posts (a, b) VALUES (1)").is_none());
        assert!(SqlInsert::parse("UPDATE posts SET a = 1").is_none());
    }

    #[test]
    fn renders_structured_insert() {
        let spec = InsertSpec {
            table: "documents".into(),
            columns: vec!["title".into(), "public".into(), "meta".into()],
            values: vec![vec![json!("O'Brien"), json!(true), json!({"k": 1})]],
        };
        let mut insert = SqlInsert::from_spec(&spec);
        insert.stamp_owner("owner_id", "u-9");
        assert_eq!(
            insert.to_sql(),
            r#"INSERT INTO documents (title, public, meta, owner_id) VALUES ('O''Brien', TRUE, '{"k":1}', 'u-9');"#
        );
    }
}
