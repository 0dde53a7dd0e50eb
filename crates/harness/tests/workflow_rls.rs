use restcheck_common::{ExecutionStatus, WorkflowExample, WorkflowStep};
use restcheck_harness::{FakeBackend, Session, WorkflowConfig, WorkflowEngine};
use serde_json::{json, Value};
use std::sync::Arc;

fn engine(backend: &Arc<FakeBackend>) -> WorkflowEngine {
    let config = WorkflowConfig {
        step_delay_ms: 0,
        ..Default::default()
    };
    WorkflowEngine::new(backend.clone(), config)
}

fn example(steps: Value) -> WorkflowExample {
    serde_json::from_value(json!({
        "id": "example",
        "name": "example",
        "steps": steps,
    }))
    .unwrap()
}

fn step(value: Value) -> WorkflowStep {
    serde_json::from_value(value).unwrap()
}

/// Scratch `posts` table guarded by an owner policy
fn posts_setup() -> Vec<Value> {
    vec![
        json!({"id": "cleanup", "name": "cleanup", "operation": "cleanup"}),
        json!({"id": "svc", "name": "service role", "operation": "set_service_role"}),
        json!({
            "id": "ddl", "name": "create posts", "operation": "raw_sql",
            "sql": "create table posts (id serial primary key, title text, user_id uuid not null);"
        }),
        json!({
            "id": "rls", "name": "enable rls", "operation": "raw_sql",
            "sql": "alter table posts enable row level security;"
        }),
        json!({
            "id": "policy", "name": "owner policy", "operation": "raw_sql",
            "sql": "create policy \"own\" on posts using (auth.uid() = user_id);"
        }),
    ]
}

fn with_setup(steps: Vec<Value>) -> WorkflowExample {
    let mut all = posts_setup();
    all.extend(steps);
    example(Value::Array(all))
}

fn signup(email: &str) -> Value {
    json!({
        "id": format!("signup-{}", email), "name": "sign up", "operation": "auth_signup",
        "params": {"email": email, "password": "password123"}
    })
}

#[tokio::test]
async fn users_only_see_their_own_rows() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &with_setup(vec![
                signup("alice@rlstest.com"),
                json!({"id": "a1", "name": "alice insert", "operation": "table_insert", "table": "posts", "data": {"title": "a"}}),
                signup("bob@rlstest.com"),
                json!({"id": "b1", "name": "bob insert", "operation": "table_insert", "table": "posts", "data": [{"title": "b1"}, {"title": "b2"}]}),
                json!({
                    "id": "b2", "name": "bob select", "operation": "table_select", "table": "posts",
                    "expectedResult": {"rowCount": 2, "notContains": {"title": "a"}}
                }),
                json!({"id": "out", "name": "sign out", "operation": "auth_signout"}),
                json!({"id": "anon", "name": "anon select", "operation": "table_select", "table": "posts", "expectedResult": {"rowCount": 0}}),
            ]),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    assert_eq!(backend.table_rows("posts").len(), 3);
}

#[tokio::test]
async fn expected_rls_violation_completes_step() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();
    let alice_id = backend.add_user("alice@rlstest.com", "elsewhere");

    let outcome = engine
        .execute_example(
            &mut session,
            &with_setup(vec![
                signup("bob@rlstest.com"),
                json!({
                    "id": "forge", "name": "bob writes as alice", "operation": "table_insert",
                    "table": "posts", "data": {"title": "forged", "user_id": alice_id},
                    "expectedError": true
                }),
            ]),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    let last = outcome.step_results.last().unwrap();
    assert_eq!(last.status, ExecutionStatus::Completed);
    assert!(last.expected_error);
    assert!(last.error.as_deref().unwrap().contains("row-level security"));
    assert!(backend.table_rows("posts").is_empty());
}

#[tokio::test]
async fn expected_error_inside_expected_result_is_honoured() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &with_setup(vec![
                json!({"id": "out", "name": "drop service role", "operation": "auth_signout"}),
                json!({
                    "id": "anon-insert", "name": "anonymous insert", "operation": "table_insert",
                    "table": "posts", "data": {"title": "nobody"},
                    "expectedResult": {"shouldError": true}
                }),
            ]),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    assert!(outcome.step_results.last().unwrap().expected_error);
}

#[tokio::test]
async fn first_failed_step_aborts_example() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &example(json!([
                {"id": "one", "name": "select nothing", "operation": "table_select", "table": "missing"},
                {"id": "two", "name": "never runs", "operation": "set_service_role"}
            ])),
        )
        .await;

    assert!(!outcome.passed);
    assert_eq!(outcome.current_step_index, 0);
    assert_eq!(outcome.step_results.len(), 1);
    assert!(outcome.error.unwrap().starts_with("Step 1 'select nothing' failed"));
    assert!(!session.is_service_role());
}

#[tokio::test]
async fn raw_sql_insert_is_stamped_with_signed_in_user() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &with_setup(vec![
                signup("alice@rlstest.com"),
                json!({
                    "id": "sql-insert", "name": "insert through sql", "operation": "raw_sql",
                    "sql": "INSERT INTO public.posts (title) VALUES ('from sql');"
                }),
            ]),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    let alice_id = backend.user_id("alice@rlstest.com").unwrap();
    let rows = backend.table_rows("posts");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_id"], json!(alice_id));
    assert!(backend.sql_log().last().unwrap().contains(&alice_id));
}

#[tokio::test]
async fn sign_in_heals_missing_user() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let result = engine
        .execute_workflow_step(
            &mut session,
            &step(json!({
                "id": "in", "name": "sign in", "operation": "auth_signin",
                "params": {"email": "carol@rlstest.com", "password": "password123"}
            })),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(backend.user_exists("carol@rlstest.com"));
    assert_eq!(
        session.current_identity().unwrap().email,
        "carol@rlstest.com"
    );
}

#[tokio::test]
async fn heal_failure_reports_both_errors() {
    let backend = Arc::new(FakeBackend::new());
    backend.add_user("dave@rlstest.com", "the-real-password");
    let engine = engine(&backend);
    let mut session = Session::new();

    let result = engine
        .execute_workflow_step(
            &mut session,
            &step(json!({
                "id": "in", "name": "sign in", "operation": "auth_signin",
                "params": {"email": "dave@rlstest.com", "password": "wrong"}
            })),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    let error = result.error.unwrap();
    assert!(error.contains("self-heal failed for dave@rlstest.com"));
    assert!(error.contains("original error"));
    assert!(error.contains("retry error"));
    assert!(session.current_identity().is_none());
}

#[tokio::test]
async fn sign_up_without_session_falls_back_to_sign_in() {
    let backend = Arc::new(FakeBackend::new().without_signup_sessions());
    let engine = engine(&backend);
    let mut session = Session::new();

    let result = engine
        .execute_workflow_step(&mut session, &step(signup("erin@rlstest.com")))
        .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(session.credential().label(), "authenticated");
}

#[tokio::test]
async fn cleanup_purges_users_once_per_session() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();
    let cleanup = step(json!({"id": "c", "name": "cleanup", "operation": "cleanup"}));

    backend.add_user("alice@rlstest.com", "password123");
    let first = engine.execute_workflow_step(&mut session, &cleanup).await;
    assert_eq!(first.result.unwrap()["usersDeleted"], json!(true));
    assert!(!backend.user_exists("alice@rlstest.com"));

    backend.add_user("alice@rlstest.com", "password123");
    backend.create_table("posts", Some("user_id"));
    backend.insert_rows("posts", vec![json!({"title": "left over", "user_id": "u-1"})]);
    assert_eq!(backend.table_rows("posts").len(), 1);

    session.reset();
    let second = engine.execute_workflow_step(&mut session, &cleanup).await;
    assert_eq!(second.result.unwrap()["usersDeleted"], json!(false));
    assert!(backend.user_exists("alice@rlstest.com"));
    assert!(!backend.table_exists("posts"));
    assert!(backend.table_rows("posts").is_empty());
}

#[tokio::test]
async fn sign_in_reuses_cached_password() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &example(json!([
                signup("gina@rlstest.com"),
                signup("hank@rlstest.com"),
                {
                    "id": "back", "name": "sign in again", "operation": "auth_signin",
                    "params": {"email": "gina@rlstest.com"}
                }
            ])),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    let current = session.current_identity().unwrap();
    assert_eq!(current.email, "gina@rlstest.com");
    assert_eq!(Some(current.id.clone()), backend.user_id("gina@rlstest.com"));

    let unknown = step(json!({
        "id": "who", "name": "sign in", "operation": "auth_signin",
        "params": {"email": "nobody@rlstest.com"}
    }));
    let result = engine.execute_workflow_step(&mut session, &unknown).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.unwrap().contains("none cached"));
}

#[tokio::test]
async fn update_user_merges_metadata() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &example(json!([
                {
                    "id": "up", "name": "sign up", "operation": "auth_signup",
                    "params": {"email": "frank@rlstest.com", "password": "password123", "data": {"role": "editor"}}
                },
                {
                    "id": "meta", "name": "update", "operation": "auth_update_user",
                    "params": {"data": {"team": "red"}}
                }
            ])),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    assert_eq!(
        backend.user_metadata("frank@rlstest.com").unwrap(),
        json!({"role": "editor", "team": "red"})
    );
}

#[tokio::test]
async fn update_and_delete_touch_only_visible_rows() {
    let backend = Arc::new(FakeBackend::new());
    let engine = engine(&backend);
    let mut session = Session::new();

    let outcome = engine
        .execute_example(
            &mut session,
            &with_setup(vec![
                signup("alice@rlstest.com"),
                json!({"id": "a", "name": "alice insert", "operation": "table_insert", "table": "posts", "data": {"title": "keep"}}),
                signup("bob@rlstest.com"),
                json!({
                    "id": "u", "name": "bob updates everything", "operation": "table_update", "table": "posts",
                    "data": {"title": "hijacked"}, "expectedResult": {"rowCount": 0}
                }),
                json!({
                    "id": "d", "name": "bob deletes everything", "operation": "table_delete", "table": "posts",
                    "filter": {"title": {"eq": "keep"}}, "expectedResult": {"rowCount": 0}
                }),
            ]),
        )
        .await;

    assert!(outcome.passed, "{:?}", outcome.error);
    assert_eq!(backend.table_rows("posts")[0]["title"], json!("keep"));
}
