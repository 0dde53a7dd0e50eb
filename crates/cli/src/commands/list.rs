//! Catalog listing

use anyhow::Result;
use serde::Serialize;

use super::Context;
use crate::output::{print_list, TableDisplay};

/// One category or workflow group
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub kind: &'static str,
    pub id: String,
    pub title: String,
    pub tests: usize,
    pub skipped: usize,
}

impl TableDisplay for CatalogEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "ID", "Title", "Tests", "Skipped"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.kind.to_string(),
            self.id.clone(),
            self.title.clone(),
            self.tests.to_string(),
            self.skipped.to_string(),
        ]
    }
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let mut entries: Vec<CatalogEntry> = ctx
        .compliance_catalog()
        .await
        .into_iter()
        .map(|c| CatalogEntry {
            kind: "compliance",
            skipped: c.examples.iter().filter(|f| f.unsupported).count(),
            tests: c.examples.len(),
            id: c.id,
            title: c.title,
        })
        .collect();

    entries.extend(ctx.workflow_catalog().await.into_iter().map(|g| CatalogEntry {
        kind: "workflow",
        skipped: g
            .examples
            .iter()
            .filter(|e| e.skip || e.steps.is_empty())
            .count(),
        tests: g.examples.len(),
        id: g.id,
        title: g.title,
    }));

    print_list(&entries, ctx.format);
    Ok(())
}
