//! Single-call compliance runs

use anyhow::Result;
use clap::Args;

use restcheck_common::{ExecutionStatus, Stats, TestExecution};
use restcheck_harness::{ComplianceRunner, SuiteResult};

use super::Context;
use crate::output::{print_execution, print_stats, StatsRow};

#[derive(Args, Debug, Clone, Default)]
pub struct ComplianceArgs {
    /// Run only this category
    #[arg(long)]
    pub category: Option<String>,

    /// Run only this fixture of the category
    #[arg(long, requires = "category")]
    pub fixture: Option<String>,
}

pub async fn execute(ctx: &Context, args: &ComplianceArgs) -> Result<SuiteResult<TestExecution>> {
    let mut runner = ComplianceRunner::new(ctx.backend.clone(), ctx.config.runner.clone());
    runner.load_test_data(ctx.compliance_catalog().await);

    let show = ctx.is_table();
    let on_each = |e: &TestExecution| {
        if show {
            let error = match (e.status, e.error.as_deref()) {
                (ExecutionStatus::Failed, None) => Some("response mismatch"),
                (_, error) => error,
            };
            print_execution(&format!("{}/{}", e.category_id, e.fixture_id), e.status, error);
        }
    };

    match (&args.category, &args.fixture) {
        (Some(category), Some(fixture)) => {
            let execution = runner.execute_test(category, fixture).await?;
            on_each(&execution);
        }
        (Some(category), None) => {
            runner.execute_category_tests(category, on_each).await?;
        }
        _ => {
            runner.execute_all_tests(on_each, |_, _| {}).await?;
        }
    }

    let result = runner.suite_result();
    if show {
        let rows: Vec<StatsRow> = result
            .groups
            .iter()
            .filter(|g| args.category.as_deref().map_or(true, |c| c == g.id))
            .map(|g| StatsRow {
                id: g.id.clone(),
                stats: g.stats,
            })
            .collect();
        let total = rows.iter().fold(Stats::default(), |mut acc, row| {
            acc.merge(&row.stats);
            acc
        });
        print_stats("Category", &rows, &total);
    }
    Ok(result)
}
