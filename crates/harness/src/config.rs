//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use restcheck_common::{Error, Result};

use crate::ownership::OwnershipRule;

/// Harness configuration, usually loaded from `restcheck.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Backend under test
    pub backend: BackendConfig,

    /// Fixture catalog sources
    pub catalogs: CatalogConfig,

    /// Workflow engine configuration
    pub workflow: WorkflowConfig,

    /// Runner configuration
    pub runner: RunnerConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

/// Endpoints and keys of the backend under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// PostgREST base URL, e.g. `http://127.0.0.1:54321/rest/v1`
    pub rest_url: String,

    /// Identity service base URL, e.g. `http://127.0.0.1:54321/auth/v1`
    pub auth_url: String,

    /// Raw-SQL debug endpoint
    pub sql_endpoint: String,

    /// Key used for anonymous and authenticated calls
    pub anon_key: String,

    /// Privileged key that bypasses RLS
    pub service_role_key: String,

    /// Per-request timeout
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rest_url: "http://127.0.0.1:54321/rest/v1".to_string(),
            auth_url: "http://127.0.0.1:54321/auth/v1".to_string(),
            sql_endpoint: "http://127.0.0.1:54321/debug/sql".to_string(),
            anon_key: String::new(),
            service_role_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Where the fixture catalogs come from: an http(s) URL or a file path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub compliance: Option<String>,
    pub workflow: Option<String>,
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Pause between consecutive steps of an example
    pub step_delay_ms: u64,

    /// Tables dropped by every `cleanup` step
    pub scratch_tables: Vec<String>,

    /// Users deleted by the first `cleanup` step of a run
    pub test_user_emails: Vec<String>,

    /// Which ownership column to stamp on inserts, by table name pattern
    pub ownership: Vec<OwnershipRule>,
}

impl WorkflowConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let tables = [
            "comments",
            "posts",
            "project_members",
            "projects",
            "documents",
            "profiles",
            "todos",
            "notes",
            "messages",
            "team_members",
            "teams",
            "tasks",
        ];
        let users = ["alice", "bob", "charlie", "dave", "eve", "admin"];
        Self {
            step_delay_ms: 100,
            scratch_tables: tables.iter().map(|t| t.to_string()).collect(),
            test_user_emails: users
                .iter()
                .map(|u| format!("{}@rlstest.com", u))
                .collect(),
            ownership: OwnershipRule::defaults(),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Stop iterating a category or group at its first failure
    pub skip_on_first_failure: bool,

    /// SQL run through the seeder before each category of a full run
    pub schema_reset_sql: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
[backend]
rest_url = "http://localhost:3000"
anon_key = "anon"

[workflow]
step_delay_ms = 0

[runner]
skip_on_first_failure = true
"#,
        )
        .unwrap();

        assert_eq!(config.backend.rest_url, "http://localhost:3000");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.workflow.step_delay(), Duration::ZERO);
        assert!(config.workflow.scratch_tables.contains(&"posts".to_string()));
        assert!(config
            .workflow
            .test_user_emails
            .contains(&"alice@rlstest.com".to_string()));
        assert!(config.runner.skip_on_first_failure);
        assert!(config.catalogs.compliance.is_none());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = HarnessConfig::from_toml("backend = 3").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
