//! Core types shared by the engines, runners and CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compare::ComparisonResult;
use crate::log::TestLog;

// ============================================================================
// Backend results
// ============================================================================

/// PostgREST-style error body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            ..Default::default()
        }
    }

    /// The `{code, details, hint, message}` object used in response envelopes
    pub fn to_envelope_value(&self) -> Value {
        serde_json::json!({
            "code": self.code,
            "details": self.details,
            "hint": self.hint,
            "message": self.message,
        })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// `{data, error, count}` result of a table or RPC call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub count: Option<u64>,
    /// Status the backend reported for the call, if it exposed one
    #[serde(default)]
    pub status: Option<u16>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn err(error: ApiError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Result rows, treating a single object as one row
    pub fn rows(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(rows)) => rows.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        }
    }
}

/// Authenticated user as returned by the identity service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

/// Session tokens issued on sign-up or sign-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `{data: {user, session}, error}` result of an auth call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub session: Option<AuthSession>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

impl AuthResponse {
    pub fn err(error: ApiError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

// ============================================================================
// Execution records
// ============================================================================

/// Lifecycle of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Execution record of a single-call compliance fixture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecution {
    pub fixture_id: String,
    pub category_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub actual_result: Option<Value>,
    pub expected_result: Option<Value>,
    pub comparison: Option<ComparisonResult>,
    pub error: Option<String>,
    pub logs: Vec<TestLog>,
}

impl TestExecution {
    pub fn passed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Outcome of one workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub step_name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The step failed the way its fixture said it would
    #[serde(default)]
    pub expected_error: bool,
    pub logs: Vec<TestLog>,
}

/// Execution record of a workflow example
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub example_id: String,
    pub group_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_step_index: usize,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
    pub logs: Vec<TestLog>,
}

impl WorkflowExecution {
    pub fn passed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Pass/fail/skip tally over a set of fixtures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl Stats {
    /// Count one fixture by the status of its last run
    pub fn record(&mut self, status: Option<ExecutionStatus>) {
        self.total += 1;
        match status {
            Some(ExecutionStatus::Completed) => self.passed += 1,
            Some(ExecutionStatus::Failed) => self.failed += 1,
            Some(ExecutionStatus::Skipped) => self.skipped += 1,
            Some(ExecutionStatus::Pending) | Some(ExecutionStatus::Running) | None => {
                self.pending += 1
            }
        }
    }

    pub fn merge(&mut self, other: &Stats) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.pending += other.pending;
    }

    /// Percentage of executed (non-skipped, non-pending) fixtures that passed
    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed + self.failed;
        if executed == 0 {
            return 0.0;
        }
        self.passed as f64 * 100.0 / executed as f64
    }
}
