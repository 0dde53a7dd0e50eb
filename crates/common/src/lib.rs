//! restcheck Common Library
//!
//! Shared types for the restcheck compliance harness: the fixture data
//! model, backend result shapes, execution records, the structured test log
//! and the wildcard-aware comparator.

pub mod compare;
pub mod error;
pub mod fixture;
pub mod log;
pub mod types;

// Re-export commonly used types
pub use compare::{compare, values_match, ComparisonResult, WILDCARD};
pub use error::{Error, Result};
pub use fixture::{
    categories_from_file, parse_categories, parse_workflow_groups, workflow_groups_from_file,
    Category, ExpectedResult, Fixture, InsertSpec, OperationKind, WorkflowExample, WorkflowGroup,
    WorkflowStep,
};
pub use log::{LogKind, TestLog, TestLogger};
pub use types::*;

/// restcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
