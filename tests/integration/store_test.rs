//! Dataset store integration tests.
//!
//! PostgreSQL tests require a running database; set DATABASE_URL to run them.

use std::sync::Arc;
use std::time::Duration;

use tabletalk::api::DatasetListRequest;
use tabletalk::ingest::parse_csv;
use tabletalk::llm::MockLlmClient;
use tabletalk::store::{DatasetStore, PostgresStore, SqliteStore, StoreBackend, Value};
use tabletalk::{Tabletalk, TabletalkError};
use tempfile::TempDir;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test store.
async fn get_test_store() -> Option<PostgresStore> {
    let url = get_test_database_url()?;
    PostgresStore::connect(&url).await.ok()
}

#[tokio::test]
async fn test_sqlite_catalog_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");

    let store = SqliteStore::open(&path).await.unwrap();
    let table = parse_csv("a,b\n1,x\n2,y\n".as_bytes(), "first").unwrap();
    let record = store.store_table("a@x.io", &table).await.unwrap();
    store.close().await;

    let store = SqliteStore::open(&path).await.unwrap();
    let listed = store.list_datasets("a@x.io").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].dataset_id, record.dataset_id);
    assert_eq!(listed[0].columns, vec!["a", "b"]);
    assert_eq!(
        store.sample_columns(&table.name).await.unwrap(),
        vec!["a", "b"]
    );
}

#[tokio::test]
async fn test_sqlite_listing_through_facade_is_newest_first() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn DatasetStore> =
        Arc::new(SqliteStore::open(&dir.path().join("store.db")).await.unwrap());
    let app = Tabletalk::with_mock_llm(store, MockLlmClient::new());

    let first = app.upload_csv("a@x.io", "first", "n\n1\n").await.unwrap();
    let second = app.upload_csv("a@x.io", "second", "n\n1\n2\n").await.unwrap();

    let listed = app
        .list_datasets(&DatasetListRequest {
            user_email: "a@x.io".to_string(),
        })
        .await
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|d| d.dataset_id.clone()).collect();
    assert_eq!(ids, vec![second.dataset_id, first.dataset_id]);
    assert_eq!(listed[0].rows, 2);
}

#[tokio::test]
async fn test_sqlite_malformed_csv_registers_nothing() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn DatasetStore> =
        Arc::new(SqliteStore::open(&dir.path().join("store.db")).await.unwrap());
    let app = Tabletalk::with_mock_llm(store.clone(), MockLlmClient::new());

    let err = app
        .upload_csv("a@x.io", "broken", "a,b\n1,2\n3\n")
        .await
        .unwrap_err();
    assert!(matches!(err, TabletalkError::Ingest(_)));
    assert!(store.list_datasets("a@x.io").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_postgres_store_and_query() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    assert_eq!(store.backend(), StoreBackend::Postgres);

    let table = parse_csv(
        "region,sales,price\neast,10,1.5\nwest,20,2.25\neast,5,\n".as_bytes(),
        "pg_sales",
    )
    .unwrap();
    let record = store.store_table("pg@x.io", &table).await.unwrap();
    assert_eq!(record.rows, 3);

    let sql = format!(
        r#"SELECT "region", SUM("sales") AS "total" FROM {} GROUP BY "region" ORDER BY "region""#,
        table.name.quoted()
    );
    let result = store.query_table(&sql, Duration::from_secs(5)).await.unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0][0], Value::from("east"));
    assert_eq!(result.rows[0][1], Value::Int(15));

    let listed = store.list_datasets("pg@x.io").await.unwrap();
    assert!(listed.iter().any(|d| d.dataset_id == record.dataset_id));

    store.close().await;
}

#[tokio::test]
async fn test_postgres_ask_end_to_end() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let app = Tabletalk::with_mock_llm(Arc::new(store), MockLlmClient::new());

    let uploaded = app
        .upload_csv("pg@x.io", "pg_ask", "city,visits\nrome,3\nparis,4\nrome,1\n")
        .await
        .unwrap();

    let response = app
        .ask(&tabletalk::api::AskRequest {
            dataset_id: uploaded.dataset_id,
            query: "average visits by city".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.answer_text, "The result contains 2 records.");
    let chart = response.chart.unwrap();
    assert_eq!((chart.x.as_str(), chart.y.as_str()), ("city", "avg_visits"));

    app.close().await;
}

#[tokio::test]
async fn test_postgres_query_error_is_execution_error() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = store
        .query_table("SELECT no_such_column FROM pg_class_missing", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, TabletalkError::QueryExecution(_)));

    store.close().await;
}
