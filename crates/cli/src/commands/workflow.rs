//! Auth-context workflow runs

use anyhow::Result;
use clap::Args;

use restcheck_common::{Stats, WorkflowExecution};
use restcheck_harness::{SuiteResult, WorkflowRunner};

use super::Context;
use crate::output::{print_execution, print_stats, StatsRow};

#[derive(Args, Debug, Clone, Default)]
pub struct WorkflowArgs {
    /// Run only this group
    #[arg(long)]
    pub group: Option<String>,

    /// Run only this example of the group
    #[arg(long, requires = "group")]
    pub example: Option<String>,
}

pub async fn execute(ctx: &Context, args: &WorkflowArgs) -> Result<SuiteResult<WorkflowExecution>> {
    let mut runner = WorkflowRunner::new(
        ctx.backend.clone(),
        ctx.config.workflow.clone(),
        ctx.config.runner.clone(),
    );
    runner.load_test_data(ctx.workflow_catalog().await);

    let show = ctx.is_table();
    let on_each = |e: &WorkflowExecution| {
        if show {
            print_execution(
                &format!("{}/{}", e.group_id, e.example_id),
                e.status,
                e.error.as_deref(),
            );
        }
    };

    match (&args.group, &args.example) {
        (Some(group), Some(example)) => {
            let execution = runner.execute_example(group, example).await?;
            on_each(&execution);
        }
        (Some(group), None) => {
            runner.execute_test_item_examples(group, on_each).await?;
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
            .filter(|g| args.group.as_deref().map_or(true, |id| id == g.id))
            .map(|g| StatsRow {
                id: g.id.clone(),
                stats: g.stats,
            })
            .collect();
        let total = rows.iter().fold(Stats::default(), |mut acc, row| {
            acc.merge(&row.stats);
            acc
        });
        print_stats("Group", &rows, &total);
    }
    Ok(result)
}
