use restcheck_common::Category;
use restcheck_harness::loader::{compliance_loader, workflow_loader, CatalogOrigin};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CATALOG: &str = r#"[
  {
    "id": "filters",
    "title": "Filters",
    "examples": [
      { "id": "eq", "name": "Equal", "code": "await supabase.from('t').select().eq('id', 1)" }
    ]
  }
]"#;

fn catalog_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn loads_catalog_from_file() {
    let file = catalog_file(CATALOG);
    let loader = compliance_loader(
        Some(file.path().display().to_string()),
        Duration::from_secs(1),
    );

    let (origin, categories) = loader.load_with_origin().await;
    assert_eq!(*origin, CatalogOrigin::Source);
    assert_eq!(categories[0].id, "filters");
}

#[tokio::test]
async fn load_is_cached_for_the_process() {
    let file = catalog_file(CATALOG);
    let loader = compliance_loader(
        Some(file.path().display().to_string()),
        Duration::from_secs(1),
    );
    assert_eq!(loader.load().await.len(), 1);

    std::fs::write(file.path(), "[]").unwrap();
    assert_eq!(loader.load().await.len(), 1);
    // fetch bypasses the cache
    assert!(loader.fetch().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_json_falls_back() {
    let file = catalog_file("{ not json");
    let loader = workflow_loader(
        Some(file.path().display().to_string()),
        Duration::from_secs(1),
    );

    let (origin, groups) = loader.load_with_origin().await;
    assert_eq!(*origin, CatalogOrigin::Fallback);
    assert_eq!(groups[0].id, "basic-rls");
}

#[tokio::test]
async fn missing_file_is_an_error_from_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let loader = compliance_loader(
        Some(dir.path().join("absent.json").display().to_string()),
        Duration::from_secs(1),
    );
    assert!(loader.fetch().await.is_err());

    let categories: &[Category] = loader.load().await;
    assert_eq!(categories[0].id, "fetch-data");
}

#[tokio::test]
async fn unreachable_url_falls_back() {
    let loader = compliance_loader(
        Some("http://127.0.0.1:9/catalog.json".to_string()),
        Duration::from_millis(500),
    );

    let (origin, categories) = loader.load_with_origin().await;
    assert_eq!(*origin, CatalogOrigin::Fallback);
    assert!(!categories.is_empty());
}
