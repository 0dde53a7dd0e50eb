//! Configuration layering and backend construction

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use restcheck_harness::{FakeBackend, HarnessConfig, HttpBackend, RestBackend};

/// Backend and runner flags; each overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// PostgREST base URL
    #[arg(long, env = "RESTCHECK_REST_URL", global = true)]
    pub rest_url: Option<String>,

    /// Identity service base URL
    #[arg(long, env = "RESTCHECK_AUTH_URL", global = true)]
    pub auth_url: Option<String>,

    /// Raw-SQL debug endpoint
    #[arg(long, env = "RESTCHECK_SQL_ENDPOINT", global = true)]
    pub sql_endpoint: Option<String>,

    /// Anonymous key
    #[arg(long, env = "RESTCHECK_ANON_KEY", global = true, hide_env_values = true)]
    pub anon_key: Option<String>,

    /// Service-role key
    #[arg(long, env = "RESTCHECK_SERVICE_ROLE_KEY", global = true, hide_env_values = true)]
    pub service_role_key: Option<String>,

    /// Compliance catalog (URL or file)
    #[arg(long, env = "RESTCHECK_COMPLIANCE_CATALOG", global = true)]
    pub compliance_catalog: Option<String>,

    /// Workflow catalog (URL or file)
    #[arg(long, env = "RESTCHECK_WORKFLOW_CATALOG", global = true)]
    pub workflow_catalog: Option<String>,

    /// Stop a category or group at its first failure
    #[arg(long, global = true)]
    pub skip_on_first_failure: bool,

    /// Run against the in-memory backend instead of HTTP
    #[arg(long, global = true)]
    pub in_memory: bool,
}

/// Load the config file (when given) and apply flag overrides
pub fn load_config(path: Option<&Path>, args: &BackendArgs) -> Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    let backend = &mut config.backend;
    override_with(&mut backend.rest_url, &args.rest_url);
    override_with(&mut backend.auth_url, &args.auth_url);
    override_with(&mut backend.sql_endpoint, &args.sql_endpoint);
    override_with(&mut backend.anon_key, &args.anon_key);
    override_with(&mut backend.service_role_key, &args.service_role_key);

    if args.compliance_catalog.is_some() {
        config.catalogs.compliance = args.compliance_catalog.clone();
    }
    if args.workflow_catalog.is_some() {
        config.catalogs.workflow = args.workflow_catalog.clone();
    }
    if args.skip_on_first_failure {
        config.runner.skip_on_first_failure = true;
    }
    Ok(config)
}

fn override_with(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

/// Build the backend the engines talk to
pub fn connect(config: &HarnessConfig, in_memory: bool) -> Result<Arc<dyn RestBackend>> {
    if in_memory {
        info!("Using in-memory backend");
        return Ok(Arc::new(FakeBackend::new()));
    }
    if config.backend.anon_key.is_empty() {
        warn!("No anon key configured; requests will be unauthenticated");
    }
    info!("Using backend at {}", config.backend.rest_url);
    let backend = HttpBackend::new(config.backend.clone()).context("Failed to build HTTP client")?;
    Ok(Arc::new(backend))
}
