use restcheck_common::{parse_workflow_groups, Category, ExecutionStatus, Stats, WorkflowGroup};
use restcheck_harness::loader::FALLBACK_WORKFLOW;
use restcheck_harness::{
    ComplianceRunner, FakeBackend, RunnerConfig, WorkflowConfig, WorkflowRunner,
};
use serde_json::{json, Value};
use std::sync::Arc;

const SEED: &str = "DROP TABLE IF EXISTS letters;\ncreate table letters (id int8 primary key, name text);\ninsert into letters (id, name) values (1, 'a'), (2, 'b');";

fn fixture(id: &str, expected_name: &str) -> Value {
    json!({
        "id": id,
        "name": id,
        "code": "await supabase.from('letters').select('name').eq('id', 1)",
        "seedSql": SEED,
        "expectedResponse": json!({
            "data": [{"name": expected_name}],
            "status": 200,
            "statusText": "OK"
        }).to_string(),
    })
}

fn catalog() -> Vec<Category> {
    serde_json::from_value(json!([
        {
            "id": "first",
            "title": "First",
            "examples": [
                fixture("pass", "a"),
                fixture("fail", "z"),
                fixture("after-fail", "a"),
                {"id": "skipped", "name": "skipped", "code": "", "unsupported": true}
            ]
        },
        {
            "id": "second",
            "title": "Second",
            "examples": [fixture("pass-again", "a")]
        }
    ]))
    .unwrap()
}

fn compliance_runner(config: RunnerConfig) -> (Arc<FakeBackend>, ComplianceRunner) {
    let backend = Arc::new(FakeBackend::new());
    let mut runner = ComplianceRunner::new(backend.clone(), config);
    runner.load_test_data(catalog());
    (backend, runner)
}

fn reset_sql() -> Option<String> {
    Some("drop table if exists letters;".to_string())
}

#[tokio::test]
async fn stats_add_up_across_categories() {
    let (_, mut runner) = compliance_runner(RunnerConfig {
        schema_reset_sql: reset_sql(),
        ..Default::default()
    });

    let before = runner.get_overall_stats();
    assert_eq!(before.pending, 4);
    assert_eq!(before.skipped, 1);

    let mut seen = Vec::new();
    let mut finished = Vec::new();
    let result = runner
        .execute_all_tests(
            |execution| seen.push(execution.fixture_id.clone()),
            |category, stats| finished.push((category.to_string(), *stats)),
        )
        .await
        .unwrap();

    assert_eq!(
        result.stats,
        Stats {
            total: 5,
            passed: 3,
            failed: 1,
            skipped: 1,
            pending: 0,
        }
    );
    assert_eq!(seen.len(), 5);
    assert_eq!(finished.len(), 2);
    assert!(!result.all_passed());

    let stats = result.stats;
    assert_eq!(stats.total, stats.passed + stats.failed + stats.skipped + stats.pending);
}

#[tokio::test]
async fn skip_on_first_failure_stops_only_the_category() {
    let (_, mut runner) = compliance_runner(RunnerConfig {
        skip_on_first_failure: true,
        schema_reset_sql: reset_sql(),
    });

    runner.execute_all_tests(|_| {}, |_, _| {}).await.unwrap();

    let first = runner.get_category_stats("first").unwrap();
    assert_eq!(first.passed, 1);
    assert_eq!(first.failed, 1);
    assert_eq!(first.pending, 1);
    assert_eq!(runner.get_category_stats("second").unwrap().passed, 1);
}

#[tokio::test]
async fn schema_reset_runs_before_each_category() {
    let (backend, mut runner) = compliance_runner(RunnerConfig {
        schema_reset_sql: reset_sql(),
        ..Default::default()
    });

    runner.execute_all_tests(|_| {}, |_, _| {}).await.unwrap();

    let resets = backend
        .sql_log()
        .iter()
        .filter(|s| s.starts_with("drop table if exists letters"))
        .count();
    assert_eq!(resets, 2);
}

#[tokio::test]
async fn reset_returns_everything_to_pending() {
    let (_, mut runner) = compliance_runner(RunnerConfig::default());

    let execution = runner.execute_test("first", "pass").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(runner.get_fixture("first", "pass").unwrap().prior_result.is_some());

    runner.reset_all_results();
    let stats = runner.get_overall_stats();
    assert_eq!(stats.pending, 4);
    assert_eq!(stats.passed, 0);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let (_, mut runner) = compliance_runner(RunnerConfig::default());
    assert!(runner.execute_test("first", "nope").await.is_err());
    assert!(runner.get_category_stats("nope").is_err());
}

fn workflow_catalog() -> Vec<WorkflowGroup> {
    let mut groups = parse_workflow_groups(FALLBACK_WORKFLOW).unwrap();
    groups.push(
        serde_json::from_value(json!({
            "id": "extras",
            "title": "Extras",
            "examples": [
                {"id": "empty", "name": "no steps"},
                {
                    "id": "skip", "name": "skipped", "skip": true,
                    "steps": [{"id": "s", "name": "s", "operation": "cleanup"}]
                },
                {
                    "id": "broken", "name": "unknown op",
                    "steps": [{"id": "s", "name": "s", "operation": "teleport"}]
                }
            ]
        }))
        .unwrap(),
    );
    groups
}

fn workflow_runner() -> WorkflowRunner {
    let backend = Arc::new(FakeBackend::new());
    let mut runner = WorkflowRunner::new(
        backend,
        WorkflowConfig {
            step_delay_ms: 0,
            ..Default::default()
        },
        RunnerConfig::default(),
    );
    runner.load_test_data(workflow_catalog());
    runner
}

#[tokio::test]
async fn embedded_workflow_passes_and_extras_are_tallied() {
    let mut runner = workflow_runner();

    let result = runner.execute_all_tests(|_| {}, |_, _| {}).await.unwrap();

    let basic = &result.groups[0];
    assert_eq!(basic.stats.passed, 1, "{:?}", basic.results[0].error);

    let extras = runner.get_test_item_stats("extras").unwrap();
    assert_eq!(extras.skipped, 2);
    assert_eq!(extras.failed, 1);
    assert_eq!(result.stats.total, 4);
}

#[tokio::test]
async fn rerunning_an_example_starts_from_a_fresh_session() {
    let mut runner = workflow_runner();

    let first = runner.execute_example("basic-rls", "own-posts-only").await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);
    let second = runner.execute_example("basic-rls", "own-posts-only").await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Completed, "{:?}", second.error);
    assert_eq!(second.step_results.len(), first.step_results.len());

    // test users from the first run survive the second cleanup
    assert!(runner.session().users_purged());
}
