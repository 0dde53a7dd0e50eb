//! CLI Commands

pub mod compliance;
pub mod list;
pub mod workflow;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use restcheck_common::{Category, TestExecution, WorkflowExecution, WorkflowGroup};
use restcheck_harness::{
    compliance_loader, workflow_loader, CatalogOrigin, HarnessConfig, RestBackend, SuiteResult,
};

use crate::output::{print_warning, OutputFormat};

/// Everything a command needs
pub struct Context {
    pub config: HarnessConfig,
    pub backend: Arc<dyn RestBackend>,
    pub format: OutputFormat,
}

impl Context {
    pub async fn compliance_catalog(&self) -> Vec<Category> {
        let loader = compliance_loader(
            self.config.catalogs.compliance.clone(),
            self.config.backend.timeout(),
        );
        let (origin, categories) = loader.load_with_origin().await;
        self.note_origin("compliance", *origin);
        categories.clone()
    }

    pub async fn workflow_catalog(&self) -> Vec<WorkflowGroup> {
        let loader = workflow_loader(
            self.config.catalogs.workflow.clone(),
            self.config.backend.timeout(),
        );
        let (origin, groups) = loader.load_with_origin().await;
        self.note_origin("workflow", *origin);
        groups.clone()
    }

    pub fn is_table(&self) -> bool {
        self.format == OutputFormat::Table
    }

    fn note_origin(&self, kind: &str, origin: CatalogOrigin) {
        if origin == CatalogOrigin::Fallback && self.is_table() {
            print_warning(&format!("Using the embedded {} catalog", kind));
        }
    }
}

/// What a run produced; serialised to `results.json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<SuiteResult<TestExecution>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<SuiteResult<WorkflowExecution>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            compliance: None,
            workflow: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.compliance.as_ref().map_or(true, SuiteResult::all_passed)
            && self.workflow.as_ref().map_or(true, SuiteResult::all_passed)
    }

    /// Write `results.json` into `dir`, creating it if needed
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join("results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restcheck_common::Stats;

    #[test]
    fn report_fails_when_any_suite_fails() {
        let mut report = RunReport::new();
        assert!(report.passed());

        report.workflow = Some(SuiteResult {
            stats: Stats {
                total: 1,
                failed: 1,
                ..Default::default()
            },
            groups: Vec::new(),
        });
        assert!(!report.passed());
    }

    #[test]
    fn report_is_written_as_camel_case_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new();
        report.compliance = Some(SuiteResult {
            stats: Stats::default(),
            groups: Vec::new(),
        });

        let path = report.write(&dir.path().join("out")).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(written.get("generatedAt").is_some());
        assert!(written.get("compliance").is_some());
        assert!(written.get("workflow").is_none());
    }
}
