//! Typed workflow step actions

use serde_json::{Map, Value};
use std::convert::TryFrom;

use restcheck_common::{Error, OperationKind, Result, WorkflowStep};

use crate::call::{Filter, FilterOp};
use crate::ownership::SqlInsert;

/// A workflow step with its operation resolved and required fields checked
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Cleanup,
    SignUp {
        email: String,
        password: String,
        data: Value,
    },
    SignIn {
        email: String,
        /// Falls back to the password cached for `email` this session
        password: Option<String>,
    },
    SignOut,
    UpdateUser {
        data: Value,
    },
    SetServiceRole,
    RawSql {
        sql: String,
        /// Present when the statement is insert-shaped
        insert: Option<SqlInsert>,
    },
    Insert {
        table: String,
        data: Value,
    },
    Select {
        table: String,
        columns: Option<String>,
        filters: Vec<Filter>,
    },
    Update {
        table: String,
        data: Value,
        filters: Vec<Filter>,
    },
    Delete {
        table: String,
        filters: Vec<Filter>,
    },
}

impl StepAction {
    pub fn kind(&self) -> OperationKind {
        match self {
            StepAction::Cleanup => OperationKind::Cleanup,
            StepAction::SignUp { .. } => OperationKind::AuthSignup,
            StepAction::SignIn { .. } => OperationKind::AuthSignin,
            StepAction::SignOut => OperationKind::AuthSignout,
            StepAction::UpdateUser { .. } => OperationKind::AuthUpdateUser,
            StepAction::SetServiceRole => OperationKind::SetServiceRole,
            StepAction::RawSql { .. } => OperationKind::RawSql,
            StepAction::Insert { .. } => OperationKind::TableInsert,
            StepAction::Select { .. } => OperationKind::TableSelect,
            StepAction::Update { .. } => OperationKind::TableUpdate,
            StepAction::Delete { .. } => OperationKind::TableDelete,
        }
    }
}

impl TryFrom<&WorkflowStep> for StepAction {
    type Error = Error;

    fn try_from(step: &WorkflowStep) -> Result<Self> {
        let kind: OperationKind = step.operation.parse()?;
        let fields = StepFields { step };

        Ok(match kind {
            OperationKind::Cleanup => StepAction::Cleanup,
            OperationKind::AuthSignup => StepAction::SignUp {
                email: fields.param_str("email")?,
                password: fields.param_str("password")?,
                data: fields.param("data").cloned().unwrap_or(Value::Null),
            },
            OperationKind::AuthSignin => StepAction::SignIn {
                email: fields.param_str("email")?,
                password: fields.param_str("password").ok(),
            },
            OperationKind::AuthSignout => StepAction::SignOut,
            OperationKind::AuthUpdateUser => StepAction::UpdateUser {
                data: fields
                    .param("data")
                    .or(step.data.as_ref())
                    .cloned()
                    .ok_or_else(|| fields.missing("params.data"))?,
            },
            OperationKind::SetServiceRole => StepAction::SetServiceRole,
            OperationKind::RawSql => match (&step.insert, &step.sql) {
                (Some(spec), _) => {
                    let insert = SqlInsert::from_spec(spec);
                    StepAction::RawSql {
                        sql: insert.to_sql(),
                        insert: Some(insert),
                    }
                }
                (None, Some(sql)) if !sql.trim().is_empty() => StepAction::RawSql {
                    sql: sql.clone(),
                    insert: SqlInsert::parse(sql),
                },
                _ => return Err(fields.missing("sql")),
            },
            OperationKind::TableInsert => StepAction::Insert {
                table: fields.table()?,
                data: fields.data()?,
            },
            OperationKind::TableSelect => StepAction::Select {
                table: fields.table()?,
                columns: step.select.clone(),
                filters: fields.filters()?,
            },
            OperationKind::TableUpdate => StepAction::Update {
                table: fields.table()?,
                data: fields.data()?,
                filters: fields.filters()?,
            },
            OperationKind::TableDelete => StepAction::Delete {
                table: fields.table()?,
                filters: fields.filters()?,
            },
        })
    }
}

struct StepFields<'a> {
    step: &'a WorkflowStep,
}

impl<'a> StepFields<'a> {
    fn missing(&self, field: &str) -> Error {
        Error::invalid_step(
            &self.step.id,
            format!("{} requires '{}'", self.step.operation, field),
        )
    }

    fn param(&self, key: &str) -> Option<&'a Value> {
        self.step.params.as_ref().and_then(|p| p.get(key))
    }

    fn param_str(&self, key: &str) -> Result<String> {
        self.param(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.missing(&format!("params.{}", key)))
    }

    fn table(&self) -> Result<String> {
        self.step
            .table
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| self.missing("table"))
    }

    fn data(&self) -> Result<Value> {
        self.step.data.clone().ok_or_else(|| self.missing("data"))
    }

    fn filters(&self) -> Result<Vec<Filter>> {
        match &self.step.filter {
            Some(map) => parse_filters(map).map_err(|e| Error::invalid_step(&self.step.id, e)),
            None => Ok(Vec::new()),
        }
    }
}

/// Turn `{column: {operator: value}}` entries into chained predicates.
///
/// A column mapped to anything other than an object is an equality test.
pub fn parse_filters(map: &Map<String, Value>) -> std::result::Result<Vec<Filter>, String> {
    let mut filters = Vec::new();
    for (column, condition) in map {
        match condition {
            Value::Object(ops) if !ops.is_empty() => {
                for (op, value) in ops {
                    let op: FilterOp = op
                        .parse()
                        .map_err(|_| format!("unknown filter operator '{}' on '{}'", op, column))?;
                    filters.push(Filter::compare(column.clone(), op, value.clone()));
                }
            }
            value => filters.push(Filter::eq(column.clone(), value.clone())),
        }
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(value: Value) -> WorkflowStep {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn resolves_auth_steps() {
        let action = StepAction::try_from(&step(json!({
            "id": "s1", "name": "sign up", "operation": "auth_signup",
            "params": {"email": "bob@rlstest.com", "password": "pw", "data": {"role": "editor"}}
        })))
        .unwrap();
        assert_eq!(action.kind(), OperationKind::AuthSignup);
        assert!(matches!(
            action,
            StepAction::SignUp { ref email, ref data, .. }
                if email == "bob@rlstest.com" && data["role"] == "editor"
        ));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = StepAction::try_from(&step(json!({
            "id": "s1", "name": "?", "operation": "truncate_everything"
        })))
        .unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(op) if op == "truncate_everything"));
    }

    #[test]
    fn missing_fields_are_invalid_steps() {
        let err = StepAction::try_from(&step(json!({
            "id": "s9", "name": "insert", "operation": "table_insert", "table": "posts"
        })))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidStep { step, .. } if step == "s9"));

        let err = StepAction::try_from(&step(json!({
            "id": "s2", "name": "sign in", "operation": "auth_signin",
            "params": {"password": "pw"}
        })))
        .unwrap_err();
        assert!(err.to_string().contains("params.email"));
    }

    #[test]
    fn sign_in_password_is_optional() {
        let action = StepAction::try_from(&step(json!({
            "id": "s3", "name": "sign in", "operation": "auth_signin",
            "params": {"email": "a@b.c"}
        })))
        .unwrap();
        assert_eq!(
            action,
            StepAction::SignIn {
                email: "a@b.c".to_string(),
                password: None
            }
        );
    }

    #[test]
    fn raw_sql_detects_inserts() {
        let action = StepAction::try_from(&step(json!({
            "id": "s1", "name": "seed", "operation": "raw_sql",
            "sql": "INSERT INTO posts (title) VALUES ('hi')"
        })))
        .unwrap();
        assert!(matches!(action, StepAction::RawSql { insert: Some(_), .. }));

        let action = StepAction::try_from(&step(json!({
            "id": "s2", "name": "ddl", "operation": "raw_sql",
            "sql": "ALTER TABLE posts ENABLE ROW LEVEL SECURITY"
        })))
        .unwrap();
        assert!(matches!(action, StepAction::RawSql { insert: None, .. }));

        let action = StepAction::try_from(&step(json!({
            "id": "s3", "name": "structured", "operation": "raw_sql",
            "insert": {"table": "notes", "columns": ["body"], "values": [["x"], ["y"]]}
        })))
        .unwrap();
        match action {
            StepAction::RawSql { sql, insert } => {
                assert_eq!(sql, "INSERT INTO notes (body) VALUES ('x'), ('y');");
                assert_eq!(insert.unwrap().rows.len(), 2);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn filters_accept_operator_maps_and_bare_values() {
        let map = json!({"title": {"eq": "hello", "neq": "bye"}, "published": true});
        let filters = parse_filters(map.as_object().unwrap()).unwrap();
        assert_eq!(filters.len(), 3);
        assert!(filters.contains(&Filter::eq("published", json!(true))));
        assert!(filters.contains(&Filter::compare("title", FilterOp::Neq, json!("bye"))));

        let bad = json!({"title": {"approximately": "x"}});
        assert!(parse_filters(bad.as_object().unwrap()).is_err());
    }
}
