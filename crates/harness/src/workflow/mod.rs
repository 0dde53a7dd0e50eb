//! Auth-context workflow engine
//!
//! A workflow example is an ordered list of steps run under changing
//! identities (anonymous, a signed-in user, the service role). The
//! [`Session`] carrying that identity is owned by the caller and threaded
//! through every step.
//!
//! # Step error policy
//!
//! ```text
//! call fails      + expected error  -> completed (expected_error = true)
//! call fails      + no expectation  -> failed, example aborts
//! call succeeds   + expected error  -> failed
//! call succeeds   + expected_result -> completed iff rows validate
//! unknown/invalid operation         -> failed, regardless of expectations
//! ```

mod action;
mod session;
mod validate;

pub use action::{parse_filters, StepAction};
pub use session::{Identity, IdentityState, Session};
pub use validate::{row_contains, validate_rows};

use chrono::Utc;
use serde_json::{json, Value};
use std::convert::TryFrom;
use std::sync::Arc;
use tracing::{debug, warn};

use restcheck_common::{
    AuthSession, AuthUser, Error, ExecutionStatus, Result, StepResult, TestLog, TestLogger,
    WorkflowExample, WorkflowStep,
};

use crate::call::ClientCall;
use crate::client::{is_already_registered, is_invalid_credentials, Credential, RestBackend};
use crate::config::WorkflowConfig;
use crate::ownership::{ownership_column, stamp_payload};
use crate::seeder::SqlSeeder;

/// Result of running one workflow example
#[derive(Debug, Clone)]
pub struct ExampleOutcome {
    pub passed: bool,
    pub skipped: bool,
    /// Index of the last step that ran
    pub current_step_index: usize,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
    pub logs: Vec<TestLog>,
}

/// Executes workflow steps against a backend
#[derive(Clone)]
pub struct WorkflowEngine {
    backend: Arc<dyn RestBackend>,
    seeder: SqlSeeder,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(backend: Arc<dyn RestBackend>, config: WorkflowConfig) -> Self {
        let seeder = SqlSeeder::new(backend.clone());
        Self {
            backend,
            seeder,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run one step. Never fails: the outcome, including unknown
    /// operations, is reported in the returned [`StepResult`].
    pub async fn execute_workflow_step(
        &self,
        session: &mut Session,
        step: &WorkflowStep,
    ) -> StepResult {
        let start_time = Utc::now();
        let mut logger = TestLogger::new();
        logger.info(format!("Step '{}' ({})", step.name, step.operation));

        let (status, result, error, expected_error) = match StepAction::try_from(step) {
            Err(e) => {
                logger.error(e.to_string());
                (ExecutionStatus::Failed, None, Some(e.to_string()), false)
            }
            Ok(action) => match self.perform(session, &action, &mut logger).await {
                Err(e) if step.expects_error() => {
                    logger.info(format!("Failed as expected: {}", e));
                    (ExecutionStatus::Completed, None, Some(e.to_string()), true)
                }
                Err(e) => {
                    logger.error(e.to_string());
                    (ExecutionStatus::Failed, None, Some(e.to_string()), false)
                }
                Ok(_) if step.expects_error() => {
                    let message = "expected an error but the operation succeeded".to_string();
                    logger.error(&message);
                    (ExecutionStatus::Failed, None, Some(message), false)
                }
                Ok(value) => {
                    session.scratch_mut().insert(step.id.clone(), value.clone());
                    match self.check_expectations(step, &value, &mut logger) {
                        Ok(()) => (ExecutionStatus::Completed, Some(value), None, false),
                        Err(e) => (ExecutionStatus::Failed, Some(value), Some(e.to_string()), false),
                    }
                }
            },
        };

        StepResult {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            status,
            start_time,
            end_time: Utc::now(),
            result,
            error,
            expected_error,
            logs: logger.into_entries(),
        }
    }

    /// Run an example's steps in order, stopping at the first failed step.
    ///
    /// The session is used as given; callers reset it between examples.
    pub async fn execute_example(
        &self,
        session: &mut Session,
        example: &WorkflowExample,
    ) -> ExampleOutcome {
        let mut logger = TestLogger::new();

        if example.skip || example.steps.is_empty() {
            logger.info(format!("Skipped example: {}", example.name));
            return ExampleOutcome {
                passed: false,
                skipped: true,
                current_step_index: 0,
                step_results: Vec::new(),
                error: None,
                logs: logger.into_entries(),
            };
        }

        logger.info(format!(
            "Running example: {} ({} steps)",
            example.name,
            example.steps.len()
        ));

        let mut step_results = Vec::with_capacity(example.steps.len());
        let mut error = None;
        let mut current_step_index = 0;

        for (index, step) in example.steps.iter().enumerate() {
            if index > 0 && !self.config.step_delay().is_zero() {
                tokio::time::sleep(self.config.step_delay()).await;
            }
            current_step_index = index;

            let result = self.execute_workflow_step(session, step).await;
            logger.extend(result.logs.iter().cloned());
            let failed = result.status == ExecutionStatus::Failed;
            let message = result.error.clone().unwrap_or_default();
            step_results.push(result);

            if failed {
                let message = format!("Step {} '{}' failed: {}", index + 1, step.name, message);
                logger.error(&message);
                error = Some(message);
                break;
            }
        }

        let passed = error.is_none();
        if passed {
            logger.info(format!("Example passed: {}", example.name));
        }
        ExampleOutcome {
            passed,
            skipped: false,
            current_step_index,
            step_results,
            error,
            logs: logger.into_entries(),
        }
    }

    fn check_expectations(
        &self,
        step: &WorkflowStep,
        value: &Value,
        logger: &mut TestLogger,
    ) -> Result<()> {
        let expected = match &step.expected_result {
            Some(expected) => expected,
            None => return Ok(()),
        };
        let rows = match value {
            Value::Array(rows) => rows.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        let failures = validate_rows(&rows, expected);
        if failures.is_empty() {
            logger.info(format!("Result validated ({} row(s))", rows.len()));
            Ok(())
        } else {
            for failure in &failures {
                logger.error(format!("Validation failed: {}", failure));
            }
            Err(Error::Expectation(failures.join("; ")))
        }
    }

    async fn perform(
        &self,
        session: &mut Session,
        action: &StepAction,
        logger: &mut TestLogger,
    ) -> Result<Value> {
        match action {
            StepAction::Cleanup => self.cleanup(session, logger).await,
            StepAction::SignUp {
                email,
                password,
                data,
            } => self.sign_up(session, email, password, data, logger).await,
            StepAction::SignIn { email, password } => {
                let password = match password {
                    Some(password) => password.clone(),
                    None => session
                        .cached_user(email)
                        .map(|user| user.password.clone())
                        .ok_or_else(|| {
                            Error::Operation(format!(
                                "No password given for {} and none cached this session",
                                email
                            ))
                        })?,
                };
                self.sign_in(session, email, &password, logger).await
            }
            StepAction::SignOut => {
                let credential = session.credential();
                session.sign_out();
                if let Credential::User { .. } = credential {
                    if let Some(err) = self.backend.sign_out(&credential).await {
                        return Err(Error::Operation(format!("Sign out failed: {}", err)));
                    }
                }
                logger.info("Signed out");
                Ok(Value::Null)
            }
            StepAction::UpdateUser { data } => {
                if session.current_identity().is_none() {
                    return Err(Error::Operation(
                        "update user requires a signed-in user".to_string(),
                    ));
                }
                let response = self.backend.update_user(&session.credential(), data).await;
                if let Some(err) = response.error {
                    return Err(Error::Operation(format!("Update user failed: {}", err)));
                }
                logger.info("Updated user metadata");
                Ok(response
                    .user
                    .map(|u| u.user_metadata)
                    .unwrap_or(Value::Null))
            }
            StepAction::SetServiceRole => {
                session.use_service_role();
                logger.info("Using service role");
                Ok(Value::Null)
            }
            StepAction::RawSql { sql, insert } => {
                let credential = session.credential();
                let mut statement = sql.clone();
                if let (Some(identity), Some(insert)) = (session.current_identity(), insert) {
                    if let Some(column) = ownership_column(&self.config.ownership, &insert.table) {
                        let mut stamped = insert.clone();
                        if stamped.stamp_owner(column, &identity.id) {
                            logger.debug(format!("Stamped {} into {}", column, insert.table));
                            statement = stamped.to_sql();
                        }
                    }
                }
                logger.info(format!("Executing SQL as {}", credential.label()));
                logger.debug(&statement);
                let rows = self.seeder.execute_statement(&credential, &statement).await?;
                Ok(Value::Array(rows))
            }
            StepAction::Insert { table, data } => {
                let mut payload = data.clone();
                if let Some(identity) = session.current_identity() {
                    if let Some(column) = ownership_column(&self.config.ownership, table) {
                        let stamped = stamp_payload(&mut payload, column, &identity.id);
                        if stamped > 0 {
                            logger.debug(format!("Stamped {} on {} row(s)", column, stamped));
                        }
                    }
                }
                let call = ClientCall::insert(table.clone(), payload).returning("*");
                self.run_call(session, &call, logger).await
            }
            StepAction::Select {
                table,
                columns,
                filters,
            } => {
                let call = ClientCall::select(table.clone(), columns.clone())
                    .with_filters(filters.clone());
                self.run_call(session, &call, logger).await
            }
            StepAction::Update {
                table,
                data,
                filters,
            } => {
                let call = ClientCall::update(table.clone(), data.clone())
                    .with_filters(filters.clone())
                    .returning("*");
                self.run_call(session, &call, logger).await
            }
            StepAction::Delete { table, filters } => {
                let call = ClientCall::delete(table.clone())
                    .with_filters(filters.clone())
                    .returning("*");
                self.run_call(session, &call, logger).await
            }
        }
    }

    async fn run_call(
        &self,
        session: &Session,
        call: &ClientCall,
        logger: &mut TestLogger,
    ) -> Result<Value> {
        let credential = session.credential();
        logger.info(format!(
            "{:?} on '{}' as {}",
            call.verb(),
            call.target_name(),
            credential.label()
        ));
        let response = self.backend.query(&credential, call).await;
        if let Some(err) = response.error {
            return Err(Error::Operation(err.to_string()));
        }
        let rows = response.rows();
        logger.info(format!("Returned {} row(s)", rows.len()));
        Ok(Value::Array(rows))
    }

    async fn sign_up(
        &self,
        session: &mut Session,
        email: &str,
        password: &str,
        data: &Value,
        logger: &mut TestLogger,
    ) -> Result<Value> {
        let response = self.backend.sign_up(email, password, data).await;
        if let Some(err) = response.error {
            if is_already_registered(&err) {
                logger.info(format!("{} already exists; signing in", email));
                let (user, auth) = self
                    .password_sign_in(email, password)
                    .await
                    .map_err(|e| Error::Operation(format!("Sign in after sign up failed: {}", e)))?;
                return Ok(self.establish(session, user, auth, password, logger));
            }
            return Err(Error::Operation(format!("Sign up failed: {}", err)));
        }

        let user = response
            .user
            .ok_or_else(|| Error::Operation("sign up returned no user".to_string()))?;
        let auth = match response.session {
            Some(auth) => auth,
            None => {
                debug!(email, "sign up returned no session; signing in");
                self.password_sign_in(email, password)
                    .await
                    .map_err(|e| Error::Operation(format!("Sign in after sign up failed: {}", e)))?
                    .1
            }
        };
        logger.info(format!("Signed up {}", email));
        Ok(self.establish(session, user, auth, password, logger))
    }

    async fn sign_in(
        &self,
        session: &mut Session,
        email: &str,
        password: &str,
        logger: &mut TestLogger,
    ) -> Result<Value> {
        let original = match self.password_sign_in(email, password).await {
            Ok((user, auth)) => return Ok(self.establish(session, user, auth, password, logger)),
            Err(err) if is_invalid_credentials(&err) => err,
            Err(err) => return Err(Error::Operation(format!("Sign in failed: {}", err))),
        };

        logger.info(format!(
            "Sign in for {} failed ({}); signing up and retrying",
            email, original
        ));
        warn!(email, error = %original, "self-healing sign in");

        let signup = self.backend.sign_up(email, password, &Value::Null).await;
        if let Some(err) = signup.error.filter(|e| !is_already_registered(e)) {
            logger.error(format!("Self-heal sign up failed: {}", err));
            return Err(Error::Heal {
                email: email.to_string(),
                original: original.to_string(),
                retry: err.to_string(),
            });
        }

        match self.password_sign_in(email, password).await {
            Ok((user, auth)) => Ok(self.establish(session, user, auth, password, logger)),
            Err(retry) => {
                logger.error(format!("Sign in retry failed: {}", retry));
                Err(Error::Heal {
                    email: email.to_string(),
                    original: original.to_string(),
                    retry: retry.to_string(),
                })
            }
        }
    }

    async fn password_sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> std::result::Result<(AuthUser, AuthSession), restcheck_common::ApiError> {
        let response = self.backend.sign_in_with_password(email, password).await;
        if let Some(err) = response.error {
            return Err(err);
        }
        match (response.user, response.session) {
            (Some(user), Some(auth)) => Ok((user, auth)),
            _ => Err(restcheck_common::ApiError::new(
                "sign in returned no user session",
            )),
        }
    }

    fn establish(
        &self,
        session: &mut Session,
        user: AuthUser,
        auth: AuthSession,
        password: &str,
        logger: &mut TestLogger,
    ) -> Value {
        let email = user.email.clone().unwrap_or_default();
        logger.info(format!("Authenticated as {} ({})", email, user.id));
        session.authenticate(Identity {
            id: user.id.clone(),
            email: email.clone(),
            password: password.to_string(),
            access_token: auth.access_token,
        });
        json!({"id": user.id, "email": email})
    }

    async fn cleanup(&self, session: &mut Session, logger: &mut TestLogger) -> Result<Value> {
        let service = Credential::ServiceRole;

        for table in &self.config.scratch_tables {
            let sql = format!("DROP TABLE IF EXISTS public.{} CASCADE;", table);
            self.seeder.execute_statement(&service, &sql).await?;
        }
        logger.info(format!(
            "Dropped {} scratch table(s)",
            self.config.scratch_tables.len()
        ));

        let mut users_deleted = false;
        if !session.users_purged() {
            if !self.config.test_user_emails.is_empty() {
                let emails: Vec<String> = self
                    .config
                    .test_user_emails
                    .iter()
                    .map(|e| format!("'{}'", e.replace('\'', "''")))
                    .collect();
                let sql = format!(
                    "DELETE FROM auth.users WHERE email IN ({});",
                    emails.join(", ")
                );
                self.seeder.execute_statement(&service, &sql).await?;
                logger.info(format!("Deleted {} test user(s)", emails.len()));
            }

            let credential = session.credential();
            if let Credential::User { .. } = credential {
                if let Some(err) = self.backend.sign_out(&credential).await {
                    logger.debug(format!("Sign out during cleanup: {}", err));
                }
            }
            session.forget_users();
            session.mark_users_purged();
            users_deleted = true;
        } else {
            logger.debug("Test users kept (already purged this run)");
        }

        session.sign_out();
        Ok(json!({
            "droppedTables": self.config.scratch_tables.len(),
            "usersDeleted": users_deleted,
        }))
    }
}
