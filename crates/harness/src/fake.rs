//! In-memory backend
//!
//! Implements [`RestBackend`] over a handful of tables guarded by simple
//! row-level-security policies, a user store with bearer tokens, and a small
//! statement interpreter behind the raw-SQL endpoint. It understands the
//! statements fixtures actually issue (`CREATE TABLE`, `DROP TABLE`,
//! `ALTER TABLE ... ENABLE ROW LEVEL SECURITY`, `CREATE POLICY`, `INSERT`,
//! `SELECT * FROM`, `TRUNCATE`, `DELETE FROM auth.users`); other DDL is
//! accepted as a no-op and anything else is a syntax error.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use restcheck_common::{ApiError, ApiResponse, AuthResponse, AuthSession, AuthUser};

use crate::call::{CallAction, CallTarget, ClientCall, Filter, FilterOp, OrderBy};
use crate::client::{Credential, RestBackend};
use crate::ownership::SqlInsert;
use crate::seeder::split_statements;

type Row = Map<String, Value>;
type Outcome<T> = std::result::Result<T, ApiError>;

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*create\s+table\s+(if\s+not\s+exists\s+)?([\w."]+)\s*\((.*)\)\s*;?\s*$"#)
        .expect("static regex")
});
static DROP_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*drop\s+table\s+(if\s+exists\s+)?([\w.",\s]+?)\s*(cascade|restrict)?\s*;?\s*$"#)
        .expect("static regex")
});
static ENABLE_RLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*alter\s+table\s+(?:only\s+)?([\w."]+)\s+enable\s+row\s+level\s+security"#)
        .expect("static regex")
});
static CREATE_POLICY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*create\s+policy\s+(?:"[^"]*"|\w+)\s+on\s+([\w."]+)(.*)$"#)
        .expect("static regex")
});
static POLICY_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bfor\s+(all|select|insert|update|delete)\b").expect("static regex"));
static POLICY_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bto\s+(authenticated|anon|public)\b").expect("static regex"));
static OWNER_PREDICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)(?:\(\s*select\s+)?auth\.uid\(\)\s*\)?\s*=\s*"?(\w+)"?|"?(\w+)"?\s*=\s*\(?\s*(?:select\s+)?auth\.uid\(\)"#)
        .expect("static regex")
});
static OPEN_PREDICATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\b(using|check)\s*\(\s*true\s*\)").expect("static regex"));
static SELECT_ALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*select\s+\*\s+from\s+([\w."]+)\s*;?\s*$"#).expect("static regex")
});
static TRUNCATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*truncate\s+(?:table\s+)?([\w."]+)"#).expect("static regex")
});
static DELETE_AUTH_USERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*delete\s+from\s+auth\.users\s+where\s+email\s+in\s*\((.*)\)\s*;?\s*$")
        .expect("static regex")
});
static COLUMN_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bdefault\s+('(?:[^']|'')*'(?:::\w+)?|[\w.]+\(\)|[\w.-]+)").expect("static regex")
});
static NO_OP_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(create|alter|grant|revoke|comment|set|begin|commit|do|select|notify|reset)\b")
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq)]
enum ColumnDefault {
    Serial,
    Uuid,
    AuthUid,
    Now,
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Select,
    Insert,
    Update,
    Delete,
}

impl Command {
    fn keyword(&self) -> &'static str {
        match self {
            Command::Select => "select",
            Command::Insert => "insert",
            Command::Update => "update",
            Command::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PolicyRule {
    /// `auth.uid() = column`
    Owner(String),
    /// `using (true)`
    Open,
}

#[derive(Debug, Clone)]
struct Policy {
    command: Option<Command>,
    role: Option<String>,
    rule: PolicyRule,
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    defaults: Vec<(String, ColumnDefault)>,
    not_null: Vec<String>,
    primary_key: Option<String>,
    rls: bool,
    policies: Vec<Policy>,
    rows: Vec<Row>,
    next_serial: i64,
}

#[derive(Debug, Clone)]
struct User {
    id: String,
    email: String,
    password: String,
    metadata: Value,
}

/// Who a call runs as
#[derive(Debug, Clone, PartialEq)]
enum Principal {
    Service,
    User(String),
    Anon,
}

impl Principal {
    fn uid(&self) -> Option<&str> {
        match self {
            Principal::User(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    users: Vec<User>,
    tokens: HashMap<String, String>,
    rpcs: HashMap<String, Value>,
    sql_log: Vec<String>,
    signup_sessions: bool,
}

/// [`RestBackend`] held entirely in memory
pub struct FakeBackend {
    state: Mutex<State>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                signup_sessions: true,
                ..Default::default()
            }),
        }
    }

    /// Sign-up returns a user but no session, as with email confirmation on
    pub fn without_signup_sessions(self) -> Self {
        self.state.lock().signup_sessions = false;
        self
    }

    /// Create a table with a serial `id` primary key. With an owner column,
    /// RLS is enabled and rows are visible only to their owner.
    pub fn create_table(&self, name: &str, owner_column: Option<&str>) {
        let mut table = Table {
            columns: vec!["id".to_string()],
            defaults: vec![("id".to_string(), ColumnDefault::Serial)],
            primary_key: Some("id".to_string()),
            next_serial: 1,
            ..Default::default()
        };
        if let Some(column) = owner_column {
            table.columns.push(column.to_string());
            table.rls = true;
            table.policies.push(Policy {
                command: None,
                role: None,
                rule: PolicyRule::Owner(column.to_string()),
            });
        }
        self.state.lock().tables.insert(table_key(name), table);
    }

    /// Insert rows directly, bypassing RLS and defaults other than `id`
    pub fn insert_rows(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.state.lock();
        if let Some(table) = state.tables.get_mut(&table_key(table)) {
            for row in rows {
                if let Value::Object(mut row) = row {
                    fill_defaults(table, &mut row, None);
                    table.rows.push(row);
                }
            }
        }
    }

    /// Result returned by `rpc(name)`
    pub fn register_rpc(&self, name: &str, result: Value) {
        self.state.lock().rpcs.insert(name.to_string(), result);
    }

    /// Register a user directly; returns its id
    pub fn add_user(&self, email: &str, password: &str) -> String {
        let mut state = self.state.lock();
        let id = uuid::Uuid::new_v4().to_string();
        state.users.push(User {
            id: id.clone(),
            email: email.to_string(),
            password: password.to_string(),
            metadata: json!({}),
        });
        id
    }

    pub fn user_exists(&self, email: &str) -> bool {
        self.state.lock().users.iter().any(|u| u.email == email)
    }

    pub fn user_id(&self, email: &str) -> Option<String> {
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.id.clone())
    }

    pub fn user_metadata(&self, email: &str) -> Option<Value> {
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.metadata.clone())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.state.lock().tables.contains_key(&table_key(name))
    }

    /// All rows of a table, ignoring RLS
    pub fn table_rows(&self, name: &str) -> Vec<Value> {
        self.state
            .lock()
            .tables
            .get(&table_key(name))
            .map(|t| t.rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Every statement received by the SQL endpoint, in order
    pub fn sql_log(&self) -> Vec<String> {
        self.state.lock().sql_log.clone()
    }
}

#[async_trait]
impl RestBackend for FakeBackend {
    async fn query(&self, credential: &Credential, call: &ClientCall) -> ApiResponse {
        let mut state = self.state.lock();
        let principal = match state.principal(credential) {
            Ok(p) => p,
            Err(e) => return ApiResponse::err(e),
        };
        match state.query(&principal, call) {
            Ok(response) => response,
            Err(e) => ApiResponse::err(e),
        }
    }

    async fn sign_up(&self, email: &str, password: &str, data: &Value) -> AuthResponse {
        let mut state = self.state.lock();
        if state.users.iter().any(|u| u.email == email) {
            return AuthResponse::err(ApiError::with_code(
                "user_already_exists",
                "User already registered",
            ));
        }
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password: password.to_string(),
            metadata: if data.is_null() { json!({}) } else { data.clone() },
        };
        state.users.push(user.clone());
        let session = if state.signup_sessions {
            Some(state.issue_token(&user.id))
        } else {
            None
        };
        AuthResponse {
            user: Some(auth_user(&user)),
            session,
            error: None,
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResponse {
        let mut state = self.state.lock();
        let user = match state
            .users
            .iter()
            .find(|u| u.email == email && u.password == password)
        {
            Some(user) => user.clone(),
            None => {
                return AuthResponse::err(ApiError::with_code(
                    "invalid_credentials",
                    "Invalid login credentials",
                ))
            }
        };
        let session = state.issue_token(&user.id);
        AuthResponse {
            user: Some(auth_user(&user)),
            session: Some(session),
            error: None,
        }
    }

    async fn sign_out(&self, credential: &Credential) -> Option<ApiError> {
        if let Credential::User { access_token } = credential {
            self.state.lock().tokens.remove(access_token);
        }
        None
    }

    async fn update_user(&self, credential: &Credential, data: &Value) -> AuthResponse {
        let mut state = self.state.lock();
        let uid = match state.principal(credential) {
            Ok(Principal::User(uid)) => uid,
            Ok(_) => return AuthResponse::err(ApiError::new("Auth session missing!")),
            Err(e) => return AuthResponse::err(e),
        };
        match state.users.iter_mut().find(|u| u.id == uid) {
            Some(user) => {
                if let (Value::Object(current), Value::Object(update)) = (&mut user.metadata, data) {
                    for (key, value) in update {
                        current.insert(key.clone(), value.clone());
                    }
                } else {
                    user.metadata = data.clone();
                }
                AuthResponse {
                    user: Some(auth_user(user)),
                    session: None,
                    error: None,
                }
            }
            None => AuthResponse::err(ApiError::new("User not found")),
        }
    }

    async fn get_user(&self, credential: &Credential) -> AuthResponse {
        let state = self.state.lock();
        match state.principal(credential) {
            Ok(Principal::User(uid)) => match state.users.iter().find(|u| u.id == uid) {
                Some(user) => AuthResponse {
                    user: Some(auth_user(user)),
                    session: None,
                    error: None,
                },
                None => AuthResponse::err(ApiError::new("User not found")),
            },
            Ok(_) => AuthResponse::err(ApiError::new("Auth session missing!")),
            Err(e) => AuthResponse::err(e),
        }
    }

    async fn execute_sql(
        &self,
        credential: &Credential,
        sql: &str,
    ) -> std::result::Result<Vec<Value>, String> {
        let mut state = self.state.lock();
        let principal = state.principal(credential).map_err(|e| e.message)?;
        let mut rows = Vec::new();
        for statement in split_statements(sql) {
            state.sql_log.push(statement.clone());
            rows = state
                .execute_statement(&principal, &statement)
                .map_err(|e| e.message)?;
        }
        Ok(rows)
    }
}

impl State {
    fn principal(&self, credential: &Credential) -> Outcome<Principal> {
        match credential {
            Credential::ServiceRole => Ok(Principal::Service),
            Credential::Anon => Ok(Principal::Anon),
            Credential::User { access_token } => self
                .tokens
                .get(access_token)
                .map(|uid| Principal::User(uid.clone()))
                .ok_or_else(|| ApiError::with_code("PGRST301", "JWT is invalid or expired")),
        }
    }

    fn issue_token(&mut self, uid: &str) -> AuthSession {
        let token = format!("fake-{}", uuid::Uuid::new_v4());
        self.tokens.insert(token.clone(), uid.to_string());
        AuthSession {
            access_token: token,
            refresh_token: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    fn table_mut(&mut self, name: &str) -> Outcome<&mut Table> {
        self.tables
            .get_mut(&table_key(name))
            .ok_or_else(|| missing_relation(name))
    }

    // ------------------------------------------------------------------
    // REST
    // ------------------------------------------------------------------

    fn query(&mut self, principal: &Principal, call: &ClientCall) -> Outcome<ApiResponse> {
        let name = match &call.target {
            CallTarget::Rpc { function, .. } => {
                let data = self.rpcs.get(function).cloned().ok_or_else(|| {
                    ApiError::with_code(
                        "PGRST202",
                        format!("Could not find the function public.{}", function),
                    )
                })?;
                return Ok(ApiResponse {
                    data: Some(data),
                    status: Some(200),
                    ..Default::default()
                });
            }
            CallTarget::Table { name } => name.clone(),
        };

        let table = self.table_mut(&name)?;
        match &call.action {
            CallAction::Select { columns, head, count } => {
                let mut rows = visible_rows(table, principal, Command::Select, &call.filters)?
                    .into_iter()
                    .map(|i| table.rows[i].clone())
                    .collect::<Vec<_>>();
                let total = rows.len() as u64;
                sort_rows(&mut rows, &call.modifiers.order);
                let rows = paginate(rows, call);

                if call.modifiers.explain {
                    return Ok(ApiResponse::ok(Value::String(query_plan(&name, total))));
                }
                let projected = project(rows, columns.as_deref())?;
                finish_read(call, projected, count.map(|_| total), *head)
            }
            CallAction::Insert {
                payload,
                upsert,
                on_conflict,
                ignore_duplicates,
                ..
            } => {
                let incoming = match payload {
                    Value::Array(items) => items.clone(),
                    single => vec![single.clone()],
                };
                let conflict = on_conflict
                    .clone()
                    .or_else(|| table.primary_key.clone());
                let mut written = Vec::new();
                for item in incoming {
                    let row = match item {
                        Value::Object(row) => row,
                        other => {
                            return Err(ApiError::with_code(
                                "PGRST102",
                                format!("expected a JSON object, got {}", other),
                            ))
                        }
                    };
                    if let Some(row) = upsert_row(
                        table,
                        &name,
                        principal,
                        row,
                        *upsert,
                        *ignore_duplicates,
                        conflict.as_deref(),
                    )? {
                        written.push(row);
                    }
                }
                finish_write(call, written, 201)
            }
            CallAction::Update { payload, .. } => {
                let changes = payload.as_object().cloned().ok_or_else(|| {
                    ApiError::with_code("PGRST102", "update payload must be an object")
                })?;
                let indices = visible_rows(table, principal, Command::Update, &call.filters)?;
                let mut written = Vec::new();
                for i in indices {
                    let mut updated = table.rows[i].clone();
                    for (k, v) in &changes {
                        updated.insert(k.clone(), v.clone());
                    }
                    if !admits(table, principal, Command::Update, &updated) {
                        return Err(rls_violation(&name));
                    }
                    table.rows[i] = updated.clone();
                    written.push(updated);
                }
                finish_write(call, written, 200)
            }
            CallAction::Delete { .. } => {
                let mut indices = visible_rows(table, principal, Command::Delete, &call.filters)?;
                indices.sort_unstable_by(|a, b| b.cmp(a));
                let mut removed: Vec<Row> = indices.into_iter().map(|i| table.rows.remove(i)).collect();
                removed.reverse();
                finish_write(call, removed, 200)
            }
        }
    }

    // ------------------------------------------------------------------
    // SQL
    // ------------------------------------------------------------------

    fn execute_statement(&mut self, principal: &Principal, sql: &str) -> Outcome<Vec<Value>> {
        let privileged = *principal == Principal::Service;

        if let Some(caps) = DROP_TABLE.captures(sql) {
            let if_exists = caps.get(1).is_some();
            for name in caps[2].split(',') {
                let key = table_key(name);
                if self.tables.remove(&key).is_none() && !if_exists {
                    return Err(missing_relation(name.trim()));
                }
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = CREATE_TABLE.captures(sql) {
            require_privilege(privileged, "create table")?;
            let key = table_key(&caps[2]);
            if self.tables.contains_key(&key) {
                if caps.get(1).is_some() {
                    return Ok(Vec::new());
                }
                return Err(ApiError::with_code(
                    "42P07",
                    format!("relation \"{}\" already exists", key),
                ));
            }
            self.tables.insert(key, parse_table(&caps[3]));
            return Ok(Vec::new());
        }

        if let Some(caps) = ENABLE_RLS.captures(sql) {
            require_privilege(privileged, "alter table")?;
            self.table_mut(&caps[1])?.rls = true;
            return Ok(Vec::new());
        }

        if let Some(caps) = CREATE_POLICY.captures(sql) {
            require_privilege(privileged, "create policy")?;
            let policy = parse_policy(&caps[2])?;
            self.table_mut(&caps[1])?.policies.push(policy);
            return Ok(Vec::new());
        }

        if let Some(caps) = DELETE_AUTH_USERS.captures(sql) {
            require_privilege(privileged, "delete from auth.users")?;
            let emails: Vec<String> = caps[1]
                .split(',')
                .map(|e| unquote(e.trim()))
                .collect();
            let removed: Vec<String> = self
                .users
                .iter()
                .filter(|u| emails.contains(&u.email))
                .map(|u| u.id.clone())
                .collect();
            self.users.retain(|u| !emails.contains(&u.email));
            self.tokens.retain(|_, uid| !removed.contains(uid));
            return Ok(Vec::new());
        }

        if let Some(caps) = TRUNCATE.captures(sql) {
            require_privilege(privileged, "truncate")?;
            self.table_mut(&caps[1])?.rows.clear();
            return Ok(Vec::new());
        }

        if sql.trim_start().to_ascii_lowercase().starts_with("insert") {
            let insert = SqlInsert::parse(sql)
                .ok_or_else(|| ApiError::with_code("42601", "unsupported INSERT form"))?;
            return self.execute_insert(principal, &insert);
        }

        if let Some(caps) = SELECT_ALL.captures(sql) {
            let table = self.table_mut(&caps[1])?;
            let rows = visible_rows(table, principal, Command::Select, &[])?
                .into_iter()
                .map(|i| Value::Object(table.rows[i].clone()))
                .collect();
            return Ok(rows);
        }

        if NO_OP_STATEMENT.is_match(sql) {
            return Ok(Vec::new());
        }

        let word = sql.split_whitespace().next().unwrap_or("");
        Err(ApiError::with_code(
            "42601",
            format!("syntax error at or near \"{}\"", word),
        ))
    }

    fn execute_insert(&mut self, principal: &Principal, insert: &SqlInsert) -> Outcome<Vec<Value>> {
        let table = self.table_mut(&insert.table)?;
        let mut written = Vec::new();
        for values in &insert.rows {
            let mut row = Row::new();
            for (column, expr) in insert.columns.iter().zip(values) {
                row.insert(column.trim_matches('"').to_string(), sql_value(expr, principal)?);
            }
            if let Some(row) = upsert_row(table, &insert.table, principal, row, false, false, None)? {
                written.push(Value::Object(row));
            }
        }
        if insert.suffix.to_ascii_lowercase().contains("returning") {
            Ok(written)
        } else {
            Ok(Vec::new())
        }
    }
}

// ----------------------------------------------------------------------
// Row-level security
// ----------------------------------------------------------------------

fn admits(table: &Table, principal: &Principal, command: Command, row: &Row) -> bool {
    if !table.rls || *principal == Principal::Service {
        return true;
    }
    table.policies.iter().any(|policy| {
        let command_matches = policy.command.map_or(true, |c| c == command);
        let role_matches = match policy.role.as_deref() {
            None | Some("public") => true,
            Some("authenticated") => principal.uid().is_some(),
            Some("anon") => *principal == Principal::Anon,
            Some(_) => false,
        };
        let rule_matches = match &policy.rule {
            PolicyRule::Open => true,
            PolicyRule::Owner(column) => match (principal.uid(), row.get(column)) {
                (Some(uid), Some(Value::String(owner))) => owner == uid,
                _ => false,
            },
        };
        command_matches && role_matches && rule_matches
    })
}

fn visible_rows(
    table: &Table,
    principal: &Principal,
    command: Command,
    filters: &[Filter],
) -> Outcome<Vec<usize>> {
    let mut indices = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        if !admits(table, principal, command, row) {
            continue;
        }
        let mut keep = true;
        for filter in filters {
            if !filter_matches(row, filter)? {
                keep = false;
                break;
            }
        }
        if keep {
            indices.push(i);
        }
    }
    Ok(indices)
}

fn upsert_row(
    table: &mut Table,
    name: &str,
    principal: &Principal,
    mut row: Row,
    upsert: bool,
    ignore_duplicates: bool,
    conflict: Option<&str>,
) -> Outcome<Option<Row>> {
    let existing = conflict.and_then(|column| {
        row.get(column).and_then(|value| {
            table
                .rows
                .iter()
                .position(|r| r.get(column).map_or(false, |v| loosely_equal(v, value)))
        })
    });

    if let Some(index) = existing {
        if !upsert {
            return Err(ApiError {
                code: Some("23505".to_string()),
                message: format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    table_key(name)
                ),
                ..Default::default()
            });
        }
        if ignore_duplicates {
            return Ok(None);
        }
        let mut merged = table.rows[index].clone();
        for (k, v) in row {
            merged.insert(k, v);
        }
        if !admits(table, principal, Command::Update, &merged) {
            return Err(rls_violation(name));
        }
        table.rows[index] = merged.clone();
        return Ok(Some(merged));
    }

    fill_defaults(table, &mut row, principal.uid());
    if let Some(column) = table
        .not_null
        .iter()
        .find(|c| row.get(c.as_str()).map_or(true, Value::is_null))
    {
        return Err(ApiError {
            code: Some("23502".to_string()),
            message: format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                column,
                table_key(name)
            ),
            ..Default::default()
        });
    }
    if !admits(table, principal, Command::Insert, &row) {
        return Err(rls_violation(name));
    }
    table.rows.push(row.clone());
    Ok(Some(row))
}

fn fill_defaults(table: &mut Table, row: &mut Row, uid: Option<&str>) {
    for (column, default) in table.defaults.clone() {
        if row.contains_key(&column) {
            if default == ColumnDefault::Serial {
                if let Some(n) = row.get(&column).and_then(Value::as_i64) {
                    table.next_serial = table.next_serial.max(n + 1);
                }
            }
            continue;
        }
        let value = match default {
            ColumnDefault::Serial => {
                let n = table.next_serial.max(1);
                table.next_serial = n + 1;
                json!(n)
            }
            ColumnDefault::Uuid => json!(uuid::Uuid::new_v4().to_string()),
            ColumnDefault::AuthUid => uid.map_or(Value::Null, |u| json!(u)),
            ColumnDefault::Now => json!(Utc::now().to_rfc3339()),
            ColumnDefault::Literal(v) => v,
        };
        row.insert(column, value);
    }
}

// ----------------------------------------------------------------------
// Filters and result shaping
// ----------------------------------------------------------------------

fn filter_matches(row: &Row, filter: &Filter) -> Outcome<bool> {
    match filter {
        Filter::Compare {
            column,
            op,
            value,
            negated,
        } => {
            let actual = row.get(column).unwrap_or(&Value::Null);
            Ok(compare_op(actual, op, value)? != *negated)
        }
        Filter::Or {
            expression,
            foreign_table: None,
        } => {
            for term in split_top_level(expression) {
                if filter_matches(row, &parse_or_term(&term)?)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Filter::Or { .. } => Err(unsupported("or() on a referenced table")),
    }
}

fn compare_op(actual: &Value, op: &FilterOp, expected: &Value) -> Outcome<bool> {
    Ok(match op {
        FilterOp::Eq => loosely_equal(actual, expected),
        FilterOp::Neq => !actual.is_null() && !loosely_equal(actual, expected),
        FilterOp::Gt => order(actual, expected) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(order(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => order(actual, expected) == Some(Ordering::Less),
        FilterOp::Lte => matches!(order(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Like | FilterOp::Ilike => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(pattern)) => like(text, pattern, *op == FilterOp::Ilike),
            _ => false,
        },
        FilterOp::Is => match expected {
            Value::Null => actual.is_null(),
            Value::String(s) if s == "null" => actual.is_null(),
            Value::String(s) if s == "true" => actual == &Value::Bool(true),
            Value::String(s) if s == "false" => actual == &Value::Bool(false),
            other => actual == other,
        },
        FilterOp::In => match expected {
            Value::Array(items) => items.iter().any(|item| loosely_equal(actual, item)),
            _ => false,
        },
        FilterOp::Contains => contains(actual, expected),
        FilterOp::ContainedBy => contains(expected, actual),
        FilterOp::Overlaps => match (actual, expected) {
            (Value::Array(a), Value::Array(b)) => a.iter().any(|x| b.iter().any(|y| loosely_equal(x, y))),
            _ => false,
        },
        FilterOp::TextSearch { .. } => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(query)) => {
                let text = text.to_lowercase();
                query
                    .split(|c: char| c.is_whitespace() || "&|'!".contains(c))
                    .filter(|w| !w.is_empty())
                    .all(|w| text.contains(&w.to_lowercase()))
            }
            _ => false,
        },
        FilterOp::RangeGt
        | FilterOp::RangeGte
        | FilterOp::RangeLt
        | FilterOp::RangeLte
        | FilterOp::RangeAdjacent => return Err(unsupported("range operators")),
    })
}

fn contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Array(a), Value::Array(b)) => b.iter().all(|y| a.iter().any(|x| loosely_equal(x, y))),
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(k, v)| a.get(k).map_or(false, |x| contains(x, v) || x == v)),
        (a, b) => loosely_equal(a, b),
    }
}

/// Equality that treats `1`, `1.0` and `"1"` alike, as query strings do
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (Value::Bool(x), Value::String(y)) | (Value::String(y), Value::Bool(x)) => {
                y == &x.to_string()
            }
            _ => false,
        },
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        if !(a.is_string() && b.is_string()) {
            return x.partial_cmp(&y);
        }
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn like(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    for c in pattern.chars() {
        match c {
            '%' | '*' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_or(false, |re| re.is_match(text))
}

fn parse_or_term(term: &str) -> Outcome<Filter> {
    let mut parts = term.splitn(3, '.');
    let (column, op, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(c), Some(o), Some(v)) => (c.trim(), o, v),
        _ => return Err(unsupported(&format!("or() term '{}'", term))),
    };
    let (negated, op, value) = if op == "not" {
        let mut rest = value.splitn(2, '.');
        match (rest.next(), rest.next()) {
            (Some(o), Some(v)) => (true, o, v),
            _ => return Err(unsupported(&format!("or() term '{}'", term))),
        }
    } else {
        (false, op, value)
    };
    if op == "and" || op == "or" {
        return Err(unsupported("nested logic trees"));
    }
    let op = FilterOp::from_str(op).map_err(|e| ApiError::with_code("PGRST100", e.to_string()))?;
    let value = match (&op, value) {
        (FilterOp::In, v) => Value::Array(
            v.trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .map(|s| Value::String(s.trim().trim_matches('"').to_string()))
                .collect(),
        ),
        (FilterOp::Is, "null") => Value::Null,
        (_, v) => Value::String(v.to_string()),
    };
    Ok(Filter::Compare {
        column: column.to_string(),
        op,
        value,
        negated,
    })
}

fn split_top_level(expression: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in expression.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn sort_rows(rows: &mut [Row], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in order_by.iter().filter(|o| o.foreign_table.is_none()) {
            let x = a.get(&key.column).unwrap_or(&Value::Null);
            let y = b.get(&key.column).unwrap_or(&Value::Null);
            let nulls_first = key.nulls_first.unwrap_or(!key.ascending);
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => if nulls_first { Ordering::Less } else { Ordering::Greater },
                (false, true) => if nulls_first { Ordering::Greater } else { Ordering::Less },
                (false, false) => {
                    let o = order(x, y).unwrap_or(Ordering::Equal);
                    if key.ascending { o } else { o.reverse() }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn paginate(rows: Vec<Row>, call: &ClientCall) -> Vec<Row> {
    match (call.modifiers.range, call.modifiers.limit) {
        (Some((from, to)), _) => rows
            .into_iter()
            .skip(from as usize)
            .take((to.saturating_sub(from) + 1) as usize)
            .collect(),
        (None, Some(limit)) => rows.into_iter().take(limit as usize).collect(),
        (None, None) => rows,
    }
}

fn project(rows: Vec<Row>, columns: Option<&str>) -> Outcome<Vec<Value>> {
    let columns = columns.map(str::trim).unwrap_or("*");
    if columns.is_empty() || columns == "*" {
        return Ok(rows.into_iter().map(Value::Object).collect());
    }
    if columns.contains('(') {
        return Err(unsupported("embedded resources"));
    }
    let fields: Vec<(String, String)> = columns
        .split(',')
        .map(|item| {
            let item = item.trim();
            let (alias, source) = match item.split_once(':') {
                Some((alias, source)) => (alias.trim(), source.trim()),
                None => (item, item),
            };
            let source = source.split("::").next().unwrap_or(source);
            let alias = if alias == item { source } else { alias };
            (alias.to_string(), source.to_string())
        })
        .collect();
    Ok(rows
        .into_iter()
        .map(|row| {
            let mut out = Row::new();
            for (alias, source) in &fields {
                if source == "*" {
                    out.extend(row.clone());
                } else {
                    out.insert(alias.clone(), row.get(source).cloned().unwrap_or(Value::Null));
                }
            }
            Value::Object(out)
        })
        .collect())
}

fn finish_read(call: &ClientCall, rows: Vec<Value>, count: Option<u64>, head: bool) -> Outcome<ApiResponse> {
    let data = if head { None } else { Some(single_or_array(call, rows)?) };
    Ok(ApiResponse {
        data,
        error: None,
        count,
        status: Some(200),
    })
}

fn finish_write(call: &ClientCall, rows: Vec<Row>, created: u16) -> Outcome<ApiResponse> {
    let count = call.action.count().map(|_| rows.len() as u64);
    let (data, status) = match &call.modifiers.returning {
        Some(columns) => {
            let projected = project(rows, Some(columns))?;
            (Some(single_or_array(call, projected)?), created)
        }
        None if created == 201 => (None, 201),
        None => (None, 204),
    };
    Ok(ApiResponse {
        data,
        error: None,
        count,
        status: Some(status),
    })
}

fn single_or_array(call: &ClientCall, mut rows: Vec<Value>) -> Outcome<Value> {
    let single = call.modifiers.single;
    let maybe = call.modifiers.maybe_single;
    if !single && !maybe {
        return Ok(Value::Array(rows));
    }
    match rows.len() {
        1 => Ok(rows.remove(0)),
        0 if maybe => Ok(Value::Null),
        n => Err(ApiError {
            code: Some("PGRST116".to_string()),
            details: Some(format!("The result contains {} rows", n)),
            message: "JSON object requested, multiple (or no) rows returned".to_string(),
            ..Default::default()
        }),
    }
}

fn query_plan(table: &str, rows: u64) -> String {
    format!(
        "Seq Scan on {}  (cost=0.00..{}.00 rows={} width=40)",
        table_key(table),
        rows.max(1),
        rows
    )
}

// ----------------------------------------------------------------------
// DDL parsing
// ----------------------------------------------------------------------

fn parse_table(body: &str) -> Table {
    let mut table = Table {
        next_serial: 1,
        ..Default::default()
    };
    for definition in split_top_level(body) {
        let definition = definition.trim();
        let lower = definition.to_ascii_lowercase();
        let first = lower.split_whitespace().next().unwrap_or("");

        if first == "primary" {
            if let Some(inner) = lower.split('(').nth(1) {
                table.primary_key = Some(inner.trim_end_matches(')').trim().to_string());
            }
            continue;
        }
        if matches!(first, "constraint" | "unique" | "foreign" | "check" | "") {
            continue;
        }

        let column = definition
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches('"')
            .to_string();
        table.columns.push(column.clone());

        if lower.contains("primary key") {
            table.primary_key = Some(column.clone());
        }

        let default = if lower.contains("serial") || lower.contains("as identity") {
            Some(ColumnDefault::Serial)
        } else {
            COLUMN_DEFAULT.captures(definition).map(|caps| {
                let expr = caps[1].trim();
                match expr.to_ascii_lowercase().as_str() {
                    "gen_random_uuid()" | "uuid_generate_v4()" => ColumnDefault::Uuid,
                    "auth.uid()" => ColumnDefault::AuthUid,
                    "now()" | "current_timestamp" => ColumnDefault::Now,
                    _ => ColumnDefault::Literal(sql_value(expr, &Principal::Anon).unwrap_or(Value::Null)),
                }
            })
        };
        match default {
            Some(default) => table.defaults.push((column, default)),
            None if lower.contains("not null") || lower.contains("primary key") => {
                table.not_null.push(column)
            }
            None => {}
        }
    }
    table
}

fn parse_policy(rest: &str) -> Outcome<Policy> {
    let command = POLICY_COMMAND.captures(rest).and_then(|c| {
        match c[1].to_ascii_lowercase().as_str() {
            "select" => Some(Command::Select),
            "insert" => Some(Command::Insert),
            "update" => Some(Command::Update),
            "delete" => Some(Command::Delete),
            _ => None,
        }
    });
    let role = POLICY_ROLE.captures(rest).map(|c| c[1].to_ascii_lowercase());
    let rule = if let Some(caps) = OWNER_PREDICATE.captures(rest) {
        let column = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        PolicyRule::Owner(column)
    } else if OPEN_PREDICATE.is_match(rest) {
        PolicyRule::Open
    } else {
        return Err(unsupported(&format!(
            "policy predicate for {}",
            command.map_or("all", |c| c.keyword())
        )));
    };
    Ok(Policy { command, role, rule })
}

/// Evaluate a SQL literal or one of the few functions fixtures use
fn sql_value(expr: &str, principal: &Principal) -> Outcome<Value> {
    let expr = expr.trim();
    let lower = expr.to_ascii_lowercase();
    if expr.starts_with('\'') {
        let (literal, cast) = match expr.rfind("'::") {
            Some(i) => (&expr[..=i], lower[i + 3..].to_string()),
            None => (expr, String::new()),
        };
        let inner = literal
            .trim_start_matches('\'')
            .trim_end_matches('\'')
            .replace("''", "'");
        if cast == "json" || cast == "jsonb" {
            return Ok(serde_json::from_str(&inner).unwrap_or(Value::String(inner)));
        }
        return Ok(Value::String(inner));
    }
    match lower.as_str() {
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "auth.uid()" | "(select auth.uid())" => {
            return Ok(principal.uid().map_or(Value::Null, |u| json!(u)))
        }
        "now()" | "current_timestamp" => return Ok(json!(Utc::now().to_rfc3339())),
        "gen_random_uuid()" | "uuid_generate_v4()" => {
            return Ok(json!(uuid::Uuid::new_v4().to_string()))
        }
        _ => {}
    }
    if let Ok(n) = expr.parse::<i64>() {
        return Ok(json!(n));
    }
    if let Ok(f) = expr.parse::<f64>() {
        return Ok(json!(f));
    }
    Err(unsupported(&format!("expression '{}'", expr)))
}

fn require_privilege(privileged: bool, what: &str) -> Outcome<()> {
    if privileged {
        Ok(())
    } else {
        Err(ApiError::with_code("42501", format!("permission denied to {}", what)))
    }
}

fn table_key(name: &str) -> String {
    let name = name.trim().trim_matches('"');
    let name = name.strip_prefix("public.").unwrap_or(name);
    name.trim_matches('"').to_ascii_lowercase()
}

fn unquote(s: &str) -> String {
    s.trim_matches('\'').replace("''", "'")
}

fn missing_relation(name: &str) -> ApiError {
    ApiError::with_code(
        "42P01",
        format!("relation \"public.{}\" does not exist", table_key(name)),
    )
}

fn rls_violation(name: &str) -> ApiError {
    ApiError::with_code(
        "42501",
        format!(
            "new row violates row-level security policy for table \"{}\"",
            table_key(name)
        ),
    )
}

fn unsupported(what: &str) -> ApiError {
    ApiError::with_code("0A000", format!("{} not supported by the in-memory backend", what))
}

fn auth_user(user: &User) -> AuthUser {
    AuthUser {
        id: user.id.clone(),
        email: Some(user.email.clone()),
        user_metadata: user.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sql(backend: &FakeBackend, statement: &str) -> Vec<Value> {
        backend
            .execute_sql(&Credential::ServiceRole, statement)
            .await
            .unwrap()
    }

    async fn user(backend: &FakeBackend, email: &str) -> (String, Credential) {
        let response = backend.sign_up(email, "pw123456", &Value::Null).await;
        (
            response.user.unwrap().id,
            Credential::User {
                access_token: response.session.unwrap().access_token,
            },
        )
    }

    #[tokio::test]
    async fn ddl_builds_tables_with_defaults() {
        let backend = FakeBackend::new();
        sql(
            &backend,
            "create table public.todos (id bigint generated by default as identity primary key, task text not null, done boolean default false);",
        )
        .await;
        let rows = sql(&backend, "insert into todos (task) values ('write tests') returning *;").await;
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["done"], json!(false));

        let err = backend
            .execute_sql(&Credential::ServiceRole, "insert into todos (done) values (true);")
            .await
            .unwrap_err();
        assert!(err.contains("not-null"));

        sql(&backend, "drop table if exists todos cascade;").await;
        assert!(!backend.table_exists("todos"));
    }

    #[tokio::test]
    async fn owner_policy_filters_rows() {
        let backend = FakeBackend::new();
        sql(&backend, "create table posts (id serial primary key, title text, user_id uuid not null);").await;
        sql(&backend, "alter table posts enable row level security;").await;
        sql(
            &backend,
            "create policy \"own\" on public.posts for all to authenticated using ((select auth.uid()) = user_id);",
        )
        .await;

        let (alice_id, alice) = user(&backend, "alice@rlstest.com").await;
        let (_, bob) = user(&backend, "bob@rlstest.com").await;

        let insert = ClientCall::insert("posts", json!({"title": "mine", "user_id": alice_id}));
        assert!(!backend.query(&alice, &insert).await.is_error());
        assert!(backend.query(&bob, &insert).await.is_error());

        let select = ClientCall::select("posts", None);
        assert_eq!(backend.query(&alice, &select).await.rows().len(), 1);
        assert!(backend.query(&bob, &select).await.rows().is_empty());
        assert!(backend.query(&Credential::Anon, &select).await.rows().is_empty());
        assert_eq!(
            backend.query(&Credential::ServiceRole, &select).await.rows().len(),
            1
        );
    }

    #[tokio::test]
    async fn filters_order_and_count() {
        let backend = FakeBackend::new();
        backend.create_table("countries", None);
        backend.insert_rows(
            "countries",
            vec![
                json!({"name": "Albania"}),
                json!({"name": "Algeria"}),
                json!({"name": "Zambia"}),
            ],
        );

        let call = ClientCall::parse(
            "await supabase.from('countries').select('name', { count: 'exact' }).ilike('name', 'al%').order('name', { ascending: false })",
        )
        .unwrap();
        let response = backend.query(&Credential::Anon, &call).await;
        assert_eq!(response.count, Some(2));
        assert_eq!(
            response.data.unwrap(),
            json!([{"name": "Algeria"}, {"name": "Albania"}])
        );

        let call = ClientCall::parse(
            "await supabase.from('countries').select().or('id.eq.1,name.eq.Zambia')",
        )
        .unwrap();
        assert_eq!(backend.query(&Credential::Anon, &call).await.rows().len(), 2);
    }

    #[tokio::test]
    async fn mutations_return_rows_only_when_selected() {
        let backend = FakeBackend::new();
        backend.create_table("notes", None);
        backend.insert_rows("notes", vec![json!({"body": "a"}), json!({"body": "b"})]);

        let update = ClientCall::parse("await supabase.from('notes').update({ body: 'z' }).eq('id', 1)").unwrap();
        let response = backend.query(&Credential::Anon, &update).await;
        assert!(response.data.is_none());
        assert_eq!(backend.table_rows("notes")[0]["body"], json!("z"));

        let delete = ClientCall::parse("await supabase.from('notes').delete().eq('id', 2).select()").unwrap();
        let response = backend.query(&Credential::Anon, &delete).await;
        assert_eq!(response.rows(), vec![json!({"id": 2, "body": "b"})]);
        assert_eq!(backend.table_rows("notes").len(), 1);
    }

    #[tokio::test]
    async fn duplicate_keys_and_upserts() {
        let backend = FakeBackend::new();
        backend.create_table("items", None);
        let insert = ClientCall::insert("items", json!({"id": 1, "name": "a"}));
        assert!(!backend.query(&Credential::Anon, &insert).await.is_error());
        let again = backend.query(&Credential::Anon, &insert).await;
        assert_eq!(again.error.unwrap().code.as_deref(), Some("23505"));

        let upsert = ClientCall::parse("await supabase.from('items').upsert({ id: 1, name: 'b' }).select()").unwrap();
        let response = backend.query(&Credential::Anon, &upsert).await;
        assert_eq!(response.rows(), vec![json!({"id": 1, "name": "b"})]);
    }

    #[tokio::test]
    async fn deleting_auth_users_revokes_tokens() {
        let backend = FakeBackend::new();
        let (_, alice) = user(&backend, "alice@rlstest.com").await;
        sql(&backend, "DELETE FROM auth.users WHERE email IN ('alice@rlstest.com', 'bob@rlstest.com');").await;
        assert!(!backend.user_exists("alice@rlstest.com"));
        assert!(backend.get_user(&alice).await.error.is_some());
    }

    #[tokio::test]
    async fn unknown_statements_are_syntax_errors() {
        let backend = FakeBackend::new();
        let err = backend
            .execute_sql(&Credential::ServiceRole, "frobnicate everything;")
            .await
            .unwrap_err();
        assert!(err.contains("syntax error"));
        assert!(sql(&backend, "grant select on posts to anon;").await.is_empty());
    }
}
