use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use restcheck_common::{
    Category, Error, ExecutionStatus, Fixture, Result, Stats, TestExecution, TestLogger,
};

use crate::client::RestBackend;
use crate::compliance::{CompiledFixture, ComplianceEngine, TestOutcome};
use crate::config::RunnerConfig;

use super::{GroupResult, SuiteResult};

/// Runs single-call fixtures category by category
pub struct ComplianceRunner {
    engine: ComplianceEngine,
    config: RunnerConfig,
    categories: Vec<Category>,
    /// Compiled calls keyed by `(category id, fixture id)`
    compiled: HashMap<(String, String), CompiledFixture>,
}

impl ComplianceRunner {
    pub fn new(backend: Arc<dyn RestBackend>, config: RunnerConfig) -> Self {
        Self {
            engine: ComplianceEngine::new(backend),
            config,
            categories: Vec::new(),
            compiled: HashMap::new(),
        }
    }

    /// Replace the loaded catalog; every fixture is compiled here, once
    pub fn load_test_data(&mut self, categories: Vec<Category>) {
        self.compiled = categories
            .iter()
            .flat_map(|category| {
                category.examples.iter().map(move |fixture| {
                    (
                        (category.id.clone(), fixture.id.clone()),
                        CompiledFixture::compile(fixture),
                    )
                })
            })
            .collect();
        info!(
            "Loaded {} categories ({} fixtures)",
            categories.len(),
            self.compiled.len()
        );
        self.categories = categories;
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn get_category(&self, category_id: &str) -> Result<&Category> {
        self.categories
            .iter()
            .find(|c| c.id == category_id)
            .ok_or_else(|| Error::not_found("category", category_id))
    }

    pub fn get_fixture(&self, category_id: &str, fixture_id: &str) -> Result<&Fixture> {
        self.get_category(category_id)?
            .examples
            .iter()
            .find(|f| f.id == fixture_id)
            .ok_or_else(|| Error::not_found("fixture", fixture_id))
    }

    /// Run one fixture and record the result on it
    pub async fn execute_test(&mut self, category_id: &str, fixture_id: &str) -> Result<TestExecution> {
        let key = (category_id.to_string(), fixture_id.to_string());
        let compiled = self
            .compiled
            .get(&key)
            .ok_or_else(|| Error::not_found("fixture", fixture_id))?;

        let start_time = Utc::now();
        let outcome = self.engine.execute_test(compiled).await;
        let execution = to_execution(category_id, fixture_id, start_time, outcome);

        match execution.status {
            ExecutionStatus::Completed => info!("✓ {}/{}", category_id, fixture_id),
            ExecutionStatus::Skipped => info!("- {}/{} (unsupported)", category_id, fixture_id),
            _ => error!(
                "✗ {}/{} - {}",
                category_id,
                fixture_id,
                execution.error.as_deref().unwrap_or("response mismatch")
            ),
        }

        self.fixture_mut(category_id, fixture_id)?.prior_result = Some(execution.clone());
        Ok(execution)
    }

    /// Run a category's fixtures in declared order
    pub async fn execute_category_tests(
        &mut self,
        category_id: &str,
        mut on_each: impl FnMut(&TestExecution),
    ) -> Result<Vec<TestExecution>> {
        let fixture_ids: Vec<String> = self
            .get_category(category_id)?
            .examples
            .iter()
            .map(|f| f.id.clone())
            .collect();

        let mut executions = Vec::with_capacity(fixture_ids.len());
        for fixture_id in fixture_ids {
            let execution = self.execute_test(category_id, &fixture_id).await?;
            on_each(&execution);
            let failed = execution.status == ExecutionStatus::Failed;
            executions.push(execution);
            if failed && self.config.skip_on_first_failure {
                warn!("Stopping category {} at first failure", category_id);
                break;
            }
        }
        Ok(executions)
    }

    /// Run every category, resetting the schema before each when configured
    pub async fn execute_all_tests(
        &mut self,
        mut on_each: impl FnMut(&TestExecution),
        mut on_category_done: impl FnMut(&str, &Stats),
    ) -> Result<SuiteResult<TestExecution>> {
        let category_ids: Vec<String> = self.categories.iter().map(|c| c.id.clone()).collect();

        for category_id in category_ids {
            if let Some(reset_sql) = &self.config.schema_reset_sql {
                let mut logger = TestLogger::new();
                if let Err(e) = self.engine.seeder().seed(reset_sql, &mut logger).await {
                    warn!("Schema reset before {} failed: {}", category_id, e);
                }
            }
            self.execute_category_tests(&category_id, &mut on_each).await?;
            let stats = self.get_category_stats(&category_id)?;
            on_category_done(&category_id, &stats);
        }

        let result = self.suite_result();
        info!(
            "Compliance: {} passed, {} failed, {} skipped of {}",
            result.stats.passed, result.stats.failed, result.stats.skipped, result.stats.total
        );
        Ok(result)
    }

    pub fn get_category_stats(&self, category_id: &str) -> Result<Stats> {
        Ok(category_stats(self.get_category(category_id)?))
    }

    pub fn get_overall_stats(&self) -> Stats {
        self.categories.iter().fold(Stats::default(), |mut acc, c| {
            acc.merge(&category_stats(c));
            acc
        })
    }

    /// Forget every recorded result; statistics return to all-pending
    pub fn reset_all_results(&mut self) {
        for fixture in self.categories.iter_mut().flat_map(|c| c.examples.iter_mut()) {
            fixture.prior_result = None;
        }
    }

    pub fn suite_result(&self) -> SuiteResult<TestExecution> {
        SuiteResult {
            stats: self.get_overall_stats(),
            groups: self
                .categories
                .iter()
                .map(|c| GroupResult {
                    id: c.id.clone(),
                    title: c.title.clone(),
                    stats: category_stats(c),
                    results: c
                        .examples
                        .iter()
                        .filter_map(|f| f.prior_result.clone())
                        .collect(),
                })
                .collect(),
        }
    }

    fn fixture_mut(&mut self, category_id: &str, fixture_id: &str) -> Result<&mut Fixture> {
        self.categories
            .iter_mut()
            .find(|c| c.id == category_id)
            .and_then(|c| c.examples.iter_mut().find(|f| f.id == fixture_id))
            .ok_or_else(|| Error::not_found("fixture", fixture_id))
    }
}

fn category_stats(category: &Category) -> Stats {
    let mut stats = Stats::default();
    for fixture in &category.examples {
        let status = if fixture.unsupported {
            Some(ExecutionStatus::Skipped)
        } else {
            fixture.prior_result.as_ref().map(|r| r.status)
        };
        stats.record(status);
    }
    stats
}

fn to_execution(
    category_id: &str,
    fixture_id: &str,
    start_time: chrono::DateTime<Utc>,
    outcome: TestOutcome,
) -> TestExecution {
    let status = if outcome.skipped {
        ExecutionStatus::Skipped
    } else if outcome.passed {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    };
    TestExecution {
        fixture_id: fixture_id.to_string(),
        category_id: category_id.to_string(),
        status,
        start_time,
        end_time: Some(Utc::now()),
        actual_result: outcome.actual_result,
        expected_result: outcome.expected_result,
        comparison: outcome.comparison,
        error: outcome.error,
        logs: outcome.logs,
    }
}
