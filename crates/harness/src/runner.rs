//! Runners: load catalogs, drive the engines in declared order, record
//! results on the fixtures and derive statistics from them.

mod compliance;
mod workflow;

pub use compliance::ComplianceRunner;
pub use workflow::WorkflowRunner;

use serde::{Deserialize, Serialize};

use restcheck_common::Stats;

/// Results of one category or workflow group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResult<T> {
    pub id: String,
    pub title: String,
    pub stats: Stats,
    pub results: Vec<T>,
}

/// Serializable summary of a whole catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult<T> {
    pub stats: Stats,
    pub groups: Vec<GroupResult<T>>,
}

impl<T> SuiteResult<T> {
    pub fn all_passed(&self) -> bool {
        self.stats.failed == 0
    }
}
