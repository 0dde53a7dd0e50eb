//! restcheck harness
//!
//! Declarative compliance testing for PostgREST/GoTrue-compatible backends:
//! - a single-call engine that seeds, runs one client call and compares the
//!   normalised `{data, error, count, status}` envelope with an expectation
//! - a workflow engine that runs multi-step examples under changing auth
//!   contexts and checks row-level-security outcomes
//! - runners that execute catalogs of either kind and keep statistics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ComplianceRunner                 WorkflowRunner             │
//! │    └── ComplianceEngine             ├── Session              │
//! │          ├── snippet -> ClientCall  └── WorkflowEngine       │
//! │          ├── SqlSeeder                    ├── StepAction     │
//! │          └── envelope + compare           └── ownership      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  RestBackend: HttpBackend (reqwest) | FakeBackend (memory)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  CatalogLoader: file / URL source, embedded fallback         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod call;
pub mod client;
pub mod compliance;
pub mod config;
pub mod envelope;
pub mod fake;
pub mod http;
pub mod loader;
pub mod ownership;
pub mod runner;
pub mod seeder;
pub mod snippet;
pub mod text;
pub mod workflow;

pub use call::{CallAction, CallTarget, ClientCall, CountMode, Filter, FilterOp, Verb};
pub use client::{Credential, RestBackend};
pub use compliance::{CompiledFixture, ComplianceEngine, TestOutcome};
pub use config::{BackendConfig, CatalogConfig, HarnessConfig, RunnerConfig, WorkflowConfig};
pub use envelope::{build_envelope, ExpectedResponse};
pub use fake::FakeBackend;
pub use http::HttpBackend;
pub use loader::{compliance_loader, workflow_loader, CatalogLoader, CatalogOrigin};
pub use ownership::{OwnershipRule, SqlInsert};
pub use runner::{ComplianceRunner, GroupResult, SuiteResult, WorkflowRunner};
pub use seeder::SqlSeeder;
pub use workflow::{ExampleOutcome, Session, StepAction, WorkflowEngine};
