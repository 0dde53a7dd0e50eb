//! Declarative JSON fixture catalogs
//!
//! Two catalogs exist: single-call compliance fixtures grouped into
//! [`Category`]s, and multi-step RLS workflows grouped into
//! [`WorkflowGroup`]s. Both are plain data; the harness compiles them into
//! executable calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{TestExecution, WorkflowExecution};

// ============================================================================
// Single-call catalog
// ============================================================================

/// A named, ordered group of compliance fixtures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub examples: Vec<Fixture>,
}

/// One single-call compliance check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub id: String,
    pub name: String,

    /// Client-call snippet, possibly fenced
    pub code: String,

    /// Expected response text: JSON, a type-check block or a query plan
    #[serde(default)]
    pub expected_response: Option<String>,

    #[serde(default)]
    pub seed_sql: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Known-unsupported by the backend under test; never executed
    #[serde(default)]
    pub unsupported: bool,

    /// Last run, attached for inspection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_result: Option<TestExecution>,
}

// ============================================================================
// Workflow catalog
// ============================================================================

/// A titled set of related workflow examples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGroup {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<WorkflowExample>,
}

/// An ordered multi-actor scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExample {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_result: Option<WorkflowExecution>,
}

/// One step of a workflow, in its on-disk shape.
///
/// Which optional fields are meaningful depends on `operation`; the harness
/// validates that when it turns the step into a typed action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub operation: String,

    /// Auth parameters: `email`, `password`, `data`
    #[serde(default)]
    pub params: Option<Value>,

    #[serde(default)]
    pub sql: Option<String>,

    /// Structured insert for `raw_sql` steps
    #[serde(default)]
    pub insert: Option<InsertSpec>,

    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub select: Option<String>,

    /// `{column: {operator: value}}` or `{column: value}` for equality
    #[serde(default)]
    pub filter: Option<serde_json::Map<String, Value>>,

    #[serde(default)]
    pub expected_result: Option<ExpectedResult>,

    #[serde(default)]
    pub expected_error: bool,
}

impl WorkflowStep {
    /// Whether the fixture declares that this step must fail
    pub fn expects_error(&self) -> bool {
        self.expected_error
            || self
                .expected_result
                .as_ref()
                .and_then(|r| r.should_error)
                .unwrap_or(false)
    }
}

/// `INSERT` described as data rather than SQL text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertSpec {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Value>>,
}

/// Per-step result expectations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedResult {
    #[serde(default)]
    pub row_count: Option<usize>,
    /// A single object or an array of objects that must each match some row
    #[serde(default)]
    pub contains: Option<Value>,
    /// A single object or an array of objects that must match no row
    #[serde(default)]
    pub not_contains: Option<Value>,
    #[serde(default)]
    pub should_error: Option<bool>,
}

/// Closed set of workflow operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Cleanup,
    AuthSignup,
    AuthSignin,
    AuthSignout,
    AuthUpdateUser,
    SetServiceRole,
    RawSql,
    TableInsert,
    TableSelect,
    TableUpdate,
    TableDelete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Cleanup => "cleanup",
            OperationKind::AuthSignup => "auth_signup",
            OperationKind::AuthSignin => "auth_signin",
            OperationKind::AuthSignout => "auth_signout",
            OperationKind::AuthUpdateUser => "auth_update_user",
            OperationKind::SetServiceRole => "set_service_role",
            OperationKind::RawSql => "raw_sql",
            OperationKind::TableInsert => "table_insert",
            OperationKind::TableSelect => "table_select",
            OperationKind::TableUpdate => "table_update",
            OperationKind::TableDelete => "table_delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "cleanup" => OperationKind::Cleanup,
            "auth_signup" => OperationKind::AuthSignup,
            "auth_signin" => OperationKind::AuthSignin,
            "auth_signout" => OperationKind::AuthSignout,
            "auth_update_user" => OperationKind::AuthUpdateUser,
            "set_service_role" => OperationKind::SetServiceRole,
            "raw_sql" => OperationKind::RawSql,
            "table_insert" => OperationKind::TableInsert,
            "table_select" => OperationKind::TableSelect,
            "table_update" => OperationKind::TableUpdate,
            "table_delete" => OperationKind::TableDelete,
            other => return Err(Error::UnknownOperation(other.to_string())),
        })
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Catalog parsing
// ============================================================================

/// Parse a single-call catalog (`Category[]`)
pub fn parse_categories(json: &str) -> Result<Vec<Category>> {
    serde_json::from_str(json).map_err(Error::from)
}

/// Parse a workflow catalog (`WorkflowGroup[]`)
pub fn parse_workflow_groups(json: &str) -> Result<Vec<WorkflowGroup>> {
    serde_json::from_str(json).map_err(Error::from)
}

/// Read and parse a single-call catalog from disk
pub fn categories_from_file(path: &Path) -> Result<Vec<Category>> {
    let content = std::fs::read_to_string(path)?;
    parse_categories(&content)
}

/// Read and parse a workflow catalog from disk
pub fn workflow_groups_from_file(path: &Path) -> Result<Vec<WorkflowGroup>> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_groups(&content)
}
