use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use restcheck_common::{
    Error, ExecutionStatus, Result, Stats, WorkflowExample, WorkflowExecution, WorkflowGroup,
};

use crate::client::RestBackend;
use crate::config::{RunnerConfig, WorkflowConfig};
use crate::workflow::{ExampleOutcome, Session, WorkflowEngine};

use super::{GroupResult, SuiteResult};

/// Runs workflow examples group by group with one long-lived session
pub struct WorkflowRunner {
    engine: WorkflowEngine,
    config: RunnerConfig,
    session: Session,
    groups: Vec<WorkflowGroup>,
}

impl WorkflowRunner {
    pub fn new(
        backend: Arc<dyn RestBackend>,
        workflow: WorkflowConfig,
        config: RunnerConfig,
    ) -> Self {
        Self {
            engine: WorkflowEngine::new(backend, workflow),
            config,
            session: Session::new(),
            groups: Vec::new(),
        }
    }

    pub fn load_test_data(&mut self, groups: Vec<WorkflowGroup>) {
        info!(
            "Loaded {} workflow groups ({} examples)",
            groups.len(),
            groups.iter().map(|g| g.examples.len()).sum::<usize>()
        );
        self.groups = groups;
    }

    pub fn test_items(&self) -> &[WorkflowGroup] {
        &self.groups
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn get_test_item(&self, group_id: &str) -> Result<&WorkflowGroup> {
        self.groups
            .iter()
            .find(|g| g.id == group_id)
            .ok_or_else(|| Error::not_found("workflow group", group_id))
    }

    pub fn get_example(&self, group_id: &str, example_id: &str) -> Result<&WorkflowExample> {
        self.get_test_item(group_id)?
            .examples
            .iter()
            .find(|e| e.id == example_id)
            .ok_or_else(|| Error::not_found("workflow example", example_id))
    }

    /// Run one example from a fresh session and record the result on it
    pub async fn execute_example(
        &mut self,
        group_id: &str,
        example_id: &str,
    ) -> Result<WorkflowExecution> {
        let example = self.get_example(group_id, example_id)?.clone();

        self.session.reset();
        let start_time = Utc::now();
        let outcome = self.engine.execute_example(&mut self.session, &example).await;
        let execution = to_execution(group_id, example_id, start_time, outcome);

        match execution.status {
            ExecutionStatus::Completed => info!("✓ {}/{}", group_id, example_id),
            ExecutionStatus::Skipped => info!("- {}/{} (skipped)", group_id, example_id),
            _ => error!(
                "✗ {}/{} - {}",
                group_id,
                example_id,
                execution.error.as_deref().unwrap_or("unknown error")
            ),
        }

        self.example_mut(group_id, example_id)?.prior_result = Some(execution.clone());
        Ok(execution)
    }

    /// Run a group's examples in declared order
    pub async fn execute_test_item_examples(
        &mut self,
        group_id: &str,
        mut on_each: impl FnMut(&WorkflowExecution),
    ) -> Result<Vec<WorkflowExecution>> {
        let example_ids: Vec<String> = self
            .get_test_item(group_id)?
            .examples
            .iter()
            .map(|e| e.id.clone())
            .collect();

        let mut executions = Vec::with_capacity(example_ids.len());
        for example_id in example_ids {
            let execution = self.execute_example(group_id, &example_id).await?;
            on_each(&execution);
            let failed = execution.status == ExecutionStatus::Failed;
            executions.push(execution);
            if failed && self.config.skip_on_first_failure {
                warn!("Stopping group {} at first failure", group_id);
                break;
            }
        }
        Ok(executions)
    }

    pub async fn execute_all_tests(
        &mut self,
        mut on_each: impl FnMut(&WorkflowExecution),
        mut on_group_done: impl FnMut(&str, &Stats),
    ) -> Result<SuiteResult<WorkflowExecution>> {
        let group_ids: Vec<String> = self.groups.iter().map(|g| g.id.clone()).collect();
        for group_id in group_ids {
            self.execute_test_item_examples(&group_id, &mut on_each).await?;
            let stats = self.get_test_item_stats(&group_id)?;
            on_group_done(&group_id, &stats);
        }

        let result = self.suite_result();
        info!(
            "Workflows: {} passed, {} failed, {} skipped of {}",
            result.stats.passed, result.stats.failed, result.stats.skipped, result.stats.total
        );
        Ok(result)
    }

    pub fn get_test_item_stats(&self, group_id: &str) -> Result<Stats> {
        Ok(group_stats(self.get_test_item(group_id)?))
    }

    pub fn get_overall_stats(&self) -> Stats {
        self.groups.iter().fold(Stats::default(), |mut acc, g| {
            acc.merge(&group_stats(g));
            acc
        })
    }

    pub fn reset_all_results(&mut self) {
        for example in self.groups.iter_mut().flat_map(|g| g.examples.iter_mut()) {
            example.prior_result = None;
        }
    }

    pub fn suite_result(&self) -> SuiteResult<WorkflowExecution> {
        SuiteResult {
            stats: self.get_overall_stats(),
            groups: self
                .groups
                .iter()
                .map(|g| GroupResult {
                    id: g.id.clone(),
                    title: g.title.clone(),
                    stats: group_stats(g),
                    results: g
                        .examples
                        .iter()
                        .filter_map(|e| e.prior_result.clone())
                        .collect(),
                })
                .collect(),
        }
    }

    fn example_mut(&mut self, group_id: &str, example_id: &str) -> Result<&mut WorkflowExample> {
        self.groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .and_then(|g| g.examples.iter_mut().find(|e| e.id == example_id))
            .ok_or_else(|| Error::not_found("workflow example", example_id))
    }
}

fn group_stats(group: &WorkflowGroup) -> Stats {
    let mut stats = Stats::default();
    for example in &group.examples {
        let status = if example.skip || example.steps.is_empty() {
            Some(ExecutionStatus::Skipped)
        } else {
            example.prior_result.as_ref().map(|r| r.status)
        };
        stats.record(status);
    }
    stats
}

fn to_execution(
    group_id: &str,
    example_id: &str,
    start_time: chrono::DateTime<Utc>,
    outcome: ExampleOutcome,
) -> WorkflowExecution {
    let status = if outcome.skipped {
        ExecutionStatus::Skipped
    } else if outcome.passed {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    };
    WorkflowExecution {
        example_id: example_id.to_string(),
        group_id: group_id.to_string(),
        status,
        start_time,
        end_time: Some(Utc::now()),
        current_step_index: outcome.current_step_index,
        step_results: outcome.step_results,
        error: outcome.error,
        logs: outcome.logs,
    }
}
