//! Single-call compliance engine
//!
//! One fixture is one call: seed, execute the parsed call, normalise the
//! result into an envelope, and compare it with the expected response.

use serde_json::Value;
use std::sync::Arc;

use restcheck_common::{compare, ComparisonResult, Error, Fixture, Result, TestLog, TestLogger};

use crate::call::ClientCall;
use crate::client::{Credential, RestBackend};
use crate::envelope::{build_envelope, ExpectedResponse};
use crate::seeder::SqlSeeder;

/// A fixture with its call and expectation parsed up front
#[derive(Debug, Clone)]
pub struct CompiledFixture {
    pub fixture_id: String,
    pub name: String,
    pub seed_sql: Option<String>,
    pub unsupported: bool,
    pub call: std::result::Result<ClientCall, String>,
    pub expected: std::result::Result<ExpectedResponse, String>,
}

impl CompiledFixture {
    pub fn compile(fixture: &Fixture) -> Self {
        let expected = match &fixture.expected_response {
            Some(text) => ExpectedResponse::parse(text).map_err(|e| e.to_string()),
            None => Err("fixture has no expected response".to_string()),
        };
        Self {
            fixture_id: fixture.id.clone(),
            name: fixture.name.clone(),
            seed_sql: fixture
                .seed_sql
                .clone()
                .filter(|sql| !sql.trim().is_empty()),
            unsupported: fixture.unsupported,
            call: ClientCall::parse(&fixture.code).map_err(|e| e.to_string()),
            expected,
        }
    }
}

/// Result of running one fixture
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: bool,
    pub skipped: bool,
    pub actual_result: Option<Value>,
    pub expected_result: Option<Value>,
    pub comparison: Option<ComparisonResult>,
    pub error: Option<String>,
    pub logs: Vec<TestLog>,
}

/// Executes compiled fixtures against a backend
#[derive(Clone)]
pub struct ComplianceEngine {
    backend: Arc<dyn RestBackend>,
    seeder: SqlSeeder,
}

struct Evaluation {
    passed: bool,
    actual: Option<Value>,
    expected: Option<Value>,
    comparison: Option<ComparisonResult>,
}

impl ComplianceEngine {
    pub fn new(backend: Arc<dyn RestBackend>) -> Self {
        let seeder = SqlSeeder::new(backend.clone());
        Self { backend, seeder }
    }

    pub fn seeder(&self) -> &SqlSeeder {
        &self.seeder
    }

    /// Compile and run a raw fixture
    pub async fn execute_fixture(&self, fixture: &Fixture) -> TestOutcome {
        self.execute_test(&CompiledFixture::compile(fixture)).await
    }

    /// Run one compiled fixture. Never fails: errors become a failed
    /// outcome carrying the message and the log trail so far.
    pub async fn execute_test(&self, fixture: &CompiledFixture) -> TestOutcome {
        let mut logger = TestLogger::new();
        logger.info(format!("Running test: {}", fixture.name));

        if fixture.unsupported {
            logger.info("Skipped: marked unsupported");
            return TestOutcome {
                passed: false,
                skipped: true,
                actual_result: None,
                expected_result: None,
                comparison: None,
                error: None,
                logs: logger.into_entries(),
            };
        }

        match self.evaluate(fixture, &mut logger).await {
            Ok(eval) => TestOutcome {
                passed: eval.passed,
                skipped: false,
                actual_result: eval.actual,
                expected_result: eval.expected,
                error: None,
                comparison: eval.comparison,
                logs: logger.into_entries(),
            },
            Err(e) => {
                logger.error(format!("Test failed: {}", e));
                TestOutcome {
                    passed: false,
                    skipped: false,
                    actual_result: None,
                    expected_result: fixture.expected.as_ref().ok().map(|e| e.as_value()),
                    comparison: None,
                    error: Some(e.to_string()),
                    logs: logger.into_entries(),
                }
            }
        }
    }

    async fn evaluate(&self, fixture: &CompiledFixture, logger: &mut TestLogger) -> Result<Evaluation> {
        if let Some(seed) = &fixture.seed_sql {
            let count = self.seeder.seed(seed, logger).await?;
            logger.info(format!("Seeded {} statement(s)", count));
        }

        let expected = fixture
            .expected
            .as_ref()
            .map_err(|e| Error::ExpectedResponse(e.clone()))?;

        // type assertions cannot run; the snippet is usually not a call at all
        if let ExpectedResponse::TypeCheck(_) = expected {
            logger.info("Expected response is a type check; passing automatically");
            return Ok(Evaluation {
                passed: true,
                actual: None,
                expected: Some(expected.as_value()),
                comparison: None,
            });
        }

        let call = match (&fixture.call, expected) {
            (Ok(call), _) => call,
            (Err(e), ExpectedResponse::RawText(_)) => {
                logger.debug(format!("Call not executable ({}); raw-text expectation passes", e));
                return Ok(Evaluation {
                    passed: true,
                    actual: None,
                    expected: Some(expected.as_value()),
                    comparison: None,
                });
            }
            (Err(e), _) => return Err(Error::CallParse(e.clone())),
        };

        logger.info(format!(
            "Executing {:?} on '{}'",
            call.verb(),
            call.target_name()
        ));
        let response = self.backend.query(&Credential::Anon, call).await;
        if let Some(error) = &response.error {
            logger.info(format!("Call returned error: {}", error));
        }

        let envelope = build_envelope(call, &response);
        logger.debug(format!("Envelope: {}", envelope));

        if call.modifiers.explain || expected.is_auto_pass() {
            if call.modifiers.explain {
                logger.info("Call requests a query plan; passing automatically");
            } else {
                logger.info(format!(
                    "Expected response is {}; passing automatically",
                    expected.kind()
                ));
            }
            return Ok(Evaluation {
                passed: true,
                actual: Some(envelope),
                expected: Some(expected.as_value()),
                comparison: None,
            });
        }

        let expected_value = expected.as_value();
        let comparison = compare(&envelope, &expected_value);
        if comparison.matches {
            logger.info("Response matches expected");
        } else {
            logger.error(format!(
                "Response mismatch: {}",
                comparison.differences.as_deref().unwrap_or("")
            ));
        }
        Ok(Evaluation {
            passed: comparison.matches,
            actual: Some(envelope),
            expected: Some(expected_value),
            comparison: Some(comparison),
        })
    }
}
