//! Fixture catalog loading with an embedded offline fallback

use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use restcheck_common::{Category, Error, Result, WorkflowGroup};

/// Minimal single-call catalog used when the configured one is unavailable
pub const FALLBACK_COMPLIANCE: &str = include_str!("../fixtures/fallback_compliance.json");

/// Minimal workflow catalog used when the configured one is unavailable
pub const FALLBACK_WORKFLOW: &str = include_str!("../fixtures/fallback_workflow.json");

/// Where a loaded catalog actually came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrigin {
    Source,
    Fallback,
}

/// Loads one catalog once per process and caches it.
///
/// A fetch or parse failure never reaches the caller: the embedded fallback
/// is substituted and cached instead.
pub struct CatalogLoader<T> {
    source: Option<String>,
    fallback: &'static str,
    client: reqwest::Client,
    cache: OnceCell<(CatalogOrigin, Vec<T>)>,
}

impl<T: DeserializeOwned> CatalogLoader<T> {
    pub fn new(source: Option<String>, fallback: &'static str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            source,
            fallback,
            client,
            cache: OnceCell::new(),
        }
    }

    pub async fn load(&self) -> &[T] {
        &self.load_with_origin().await.1
    }

    pub async fn load_with_origin(&self) -> &(CatalogOrigin, Vec<T>) {
        self.cache
            .get_or_init(|| async {
                match self.fetch().await {
                    Ok(items) => (CatalogOrigin::Source, items),
                    Err(e) => {
                        warn!("Using embedded fallback catalog: {}", e);
                        (CatalogOrigin::Fallback, self.parse_fallback())
                    }
                }
            })
            .await
    }

    /// Fetch and parse the configured source, bypassing cache and fallback
    pub async fn fetch(&self) -> Result<Vec<T>> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("no catalog source configured".to_string()))?;

        let body = if source.starts_with("http://") || source.starts_with("https://") {
            info!("Fetching catalog from {}", source);
            let response = self
                .client
                .get(source)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| Error::Network(e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| Error::Network(e.to_string()))?
        } else {
            info!("Reading catalog from {}", source);
            tokio::fs::read_to_string(Path::new(source)).await?
        };

        Ok(serde_json::from_str(&body)?)
    }

    fn parse_fallback(&self) -> Vec<T> {
        serde_json::from_str(self.fallback).unwrap_or_else(|e| {
            error!("Embedded fallback catalog is invalid: {}", e);
            Vec::new()
        })
    }
}

pub fn compliance_loader(source: Option<String>, timeout: Duration) -> CatalogLoader<Category> {
    CatalogLoader::new(source, FALLBACK_COMPLIANCE, timeout)
}

pub fn workflow_loader(source: Option<String>, timeout: Duration) -> CatalogLoader<WorkflowGroup> {
    CatalogLoader::new(source, FALLBACK_WORKFLOW, timeout)
}
