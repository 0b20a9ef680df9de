//! End-to-end ask tests with the mock generation backend and a SQLite store.

use std::sync::Arc;

use tabletalk::api::{AskRequest, ChartHint};
use tabletalk::config::Config;
use tabletalk::llm::MockLlmClient;
use tabletalk::safety::RejectReason;
use tabletalk::store::{DatasetStore, SqliteStore, Value};
use tabletalk::{Tabletalk, TabletalkError};
use tempfile::TempDir;

const SALES_CSV: &str = "region,product,sales\n\
east,apples,10\n\
west,apples,20\n\
east,pears,5\n\
north,pears,\n";

struct Fixture {
    _dir: TempDir,
    store: Arc<dyn DatasetStore>,
    dataset_id: String,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn DatasetStore> =
            Arc::new(SqliteStore::open(&dir.path().join("store.db")).await.unwrap());
        let uploaded = Tabletalk::with_mock_llm(store.clone(), MockLlmClient::new())
            .upload_csv("a@x.io", "sales", SALES_CSV)
            .await
            .unwrap();
        Self {
            _dir: dir,
            store,
            dataset_id: uploaded.dataset_id,
        }
    }

    fn app(&self, llm: MockLlmClient) -> Tabletalk {
        Tabletalk::with_mock_llm(self.store.clone(), llm)
    }

    fn request(&self, query: &str) -> AskRequest {
        AskRequest {
            dataset_id: self.dataset_id.clone(),
            query: query.to_string(),
        }
    }
}

#[tokio::test]
async fn test_total_by_region_with_chart() {
    let fixture = Fixture::new().await;
    let app = fixture.app(MockLlmClient::new());

    let response = app
        .ask(&fixture.request("total sales by region"))
        .await
        .unwrap();

    assert_eq!(response.answer_text, "The result contains 3 records.");
    assert_eq!(
        response.chart,
        Some(ChartHint {
            x: "region".to_string(),
            y: "sales".to_string()
        })
    );

    let regions: Vec<_> = response
        .data
        .iter()
        .map(|r| r.get("region").cloned())
        .collect();
    assert_eq!(
        regions,
        vec![
            Some(Value::from("east")),
            Some(Value::from("north")),
            Some(Value::from("west"))
        ]
    );
    assert_eq!(response.data[0].get("sales"), Some(&Value::from(15)));
    // SUM over only NULLs is NULL.
    assert_eq!(response.data[1].get("sales"), Some(&Value::Null));

    let json = serde_json::to_value(&response).unwrap();
    let keys: Vec<_> = json["data"][0]
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert_eq!(keys.len(), 2);
}

#[tokio::test]
async fn test_two_region_totals_response() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn DatasetStore> =
        Arc::new(SqliteStore::open(&dir.path().join("store.db")).await.unwrap());
    let app = Tabletalk::with_mock_llm(store, MockLlmClient::new());
    let uploaded = app
        .upload_csv("a@x.io", "regions", "region,sales\neast,10\nwest,20")
        .await
        .unwrap();

    let response = app
        .ask(&AskRequest {
            dataset_id: uploaded.dataset_id,
            query: "total sales by region".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({
            "answer_text": "The result contains 2 records.",
            "data": [
                {"region": "east", "sales": 10},
                {"region": "west", "sales": 20}
            ],
            "chart": {"x": "region", "y": "sales"}
        })
    );
}

#[tokio::test]
async fn test_empty_result_is_not_an_error() {
    let fixture = Fixture::new().await;
    let sql = format!(
        "```sql\nSELECT \"region\", \"sales\" FROM \"{}\" WHERE \"sales\" > 1000\n```",
        fixture.dataset_id
    );
    let app = fixture.app(MockLlmClient::new().with_response("huge", sql));

    let response = app.ask(&fixture.request("huge sales")).await.unwrap();
    assert_eq!(response.answer_text, "No data found.");
    assert!(response.data.is_empty());
    assert_eq!(response.chart, None);
}

#[tokio::test]
async fn test_count_has_no_chart() {
    let fixture = Fixture::new().await;
    let app = fixture.app(MockLlmClient::new());

    let response = app.ask(&fixture.request("how many rows?")).await.unwrap();
    assert_eq!(response.answer_text, "The result contains 1 records.");
    assert_eq!(response.data[0].get("count"), Some(&Value::from(4)));
    assert_eq!(response.chart, None);
}

#[tokio::test]
async fn test_delete_is_rejected_and_data_survives() {
    let fixture = Fixture::new().await;
    let delete = format!("DELETE FROM \"{}\"", fixture.dataset_id);
    let app = fixture.app(MockLlmClient::new().with_response("remove", delete));

    let err = app.ask(&fixture.request("remove everything")).await.unwrap_err();
    assert!(matches!(
        err,
        TabletalkError::Rejected(RejectReason::ForbiddenKeyword(_))
    ));
    assert_eq!(err.category(), "Rejected");

    let response = app.ask(&fixture.request("show all")).await.unwrap();
    assert_eq!(response.data.len(), 4);
}

#[tokio::test]
async fn test_catalog_is_out_of_reach() {
    let fixture = Fixture::new().await;
    let app = fixture.app(
        MockLlmClient::new().with_response("emails", "SELECT \"user_email\" FROM datasets"),
    );

    let err = app.ask(&fixture.request("list emails")).await.unwrap_err();
    assert!(matches!(err, TabletalkError::Rejected(_)));
}

#[tokio::test]
async fn test_stacked_statements_are_rejected() {
    let fixture = Fixture::new().await;
    let stacked = format!(
        "SELECT * FROM \"{id}\"; SELECT * FROM \"{id}\"",
        id = fixture.dataset_id
    );
    let app = fixture.app(MockLlmClient::new().with_response("twice", stacked));

    let err = app.ask(&fixture.request("twice please")).await.unwrap_err();
    assert!(matches!(
        err,
        TabletalkError::Rejected(RejectReason::MultipleStatements(2))
    ));
}

#[tokio::test]
async fn test_prose_answer_is_rejected() {
    let fixture = Fixture::new().await;
    let app = fixture.app(MockLlmClient::new());

    let err = app
        .ask(&fixture.request("what is the meaning of life"))
        .await
        .unwrap_err();
    assert!(matches!(err, TabletalkError::Rejected(_)));
}

#[tokio::test]
async fn test_generation_failure() {
    let fixture = Fixture::new().await;
    let app = fixture.app(MockLlmClient::failing("connection refused"));

    let err = app
        .ask(&fixture.request("total sales by region"))
        .await
        .unwrap_err();
    assert!(matches!(err, TabletalkError::GenerationFailed(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_generation_timeout() {
    let fixture = Fixture::new().await;
    let mut config = Config::default();
    config.llm.timeout_secs = 1;
    let app = Tabletalk::new(
        fixture.store.clone(),
        Arc::new(MockLlmClient::hanging()),
        &config,
    );

    let err = app
        .ask(&fixture.request("total sales by region"))
        .await
        .unwrap_err();
    assert!(matches!(err, TabletalkError::GenerationFailed(_)));
}

#[tokio::test]
async fn test_unknown_dataset() {
    let fixture = Fixture::new().await;
    let app = fixture.app(MockLlmClient::new());

    for id in ["data_000000", "datasets", "not a table"] {
        let err = app
            .ask(&AskRequest {
                dataset_id: id.to_string(),
                query: "show all".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "DatasetNotFound", "id {id:?}");
    }
}

#[tokio::test]
async fn test_concurrent_asks_are_independent() {
    let fixture = Fixture::new().await;
    let app = Arc::new(fixture.app(MockLlmClient::new()));

    let mut handles = Vec::new();
    for question in ["total sales by region", "how many rows", "show all"] {
        let app = app.clone();
        let request = fixture.request(question);
        handles.push(tokio::spawn(async move { app.ask(&request).await }));
    }

    let mut sizes = Vec::new();
    for handle in handles {
        sizes.push(handle.await.unwrap().unwrap().data.len());
    }
    assert_eq!(sizes, vec![3, 1, 4]);
}
