//! Application facade for tabletalk.
//!
//! Wires the dataset store, the generation backend and the ask pipeline
//! together behind the four caller-facing operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::api::{AskRequest, AskResponse, DatasetListRequest, DatasetSummary, UploadResponse};
use crate::config::Config;
use crate::error::{Result, TabletalkError};
use crate::ingest::{self, ParsedTable};
use crate::llm::{self, LlmClient, MockLlmClient};
use crate::query::{AskPipeline, QueryExecutor, QuerySynthesizer, SchemaIntrospector};
use crate::safety::QueryValidator;
use crate::store::{self, DatasetStore};

/// The tabletalk service.
///
/// Holds no per-request state; share it behind an `Arc` across tasks.
#[derive(Clone)]
pub struct Tabletalk {
    store: Arc<dyn DatasetStore>,
    introspector: SchemaIntrospector,
    pipeline: AskPipeline,
}

impl Tabletalk {
    /// Builds the service from an open store and a generation backend.
    pub fn new(store: Arc<dyn DatasetStore>, llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        let backend = store.backend();
        let introspector = SchemaIntrospector::new(store.clone());
        let pipeline = AskPipeline::new(
            introspector.clone(),
            QuerySynthesizer::new(llm, backend, config.llm.timeout()),
            QueryValidator::new(backend),
            QueryExecutor::new(store.clone(), config.query.timeout())
                .with_max_rows(config.query.max_rows),
        );

        Self {
            store,
            introspector,
            pipeline,
        }
    }

    /// Opens the configured store and generation backend.
    ///
    /// `store_override` and `provider_override` come from CLI flags and win
    /// over the config file.
    pub async fn connect(
        config: &Config,
        store_override: Option<&str>,
        provider_override: Option<&str>,
    ) -> Result<Self> {
        let mut llm_config = config.llm.clone();
        if let Some(provider) = provider_override {
            llm_config.provider = provider.to_string();
        }
        let llm = llm::create_client(&llm_config)?;

        let target = config.store_target(store_override)?;
        let store = store::connect(&target).await?;
        info!("Opened {} store at {}", store.backend(), target.display_string());

        Ok(Self::new(store, llm, config))
    }

    /// Builds the service with the mock generation backend.
    pub fn with_mock_llm(store: Arc<dyn DatasetStore>, llm: MockLlmClient) -> Self {
        Self::new(store, Arc::new(llm), &Config::default())
    }

    /// Answers a question about one dataset.
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        self.pipeline.ask(&request.dataset_id, &request.query).await
    }

    /// Lists the caller's datasets, newest first.
    pub async fn list_datasets(&self, request: &DatasetListRequest) -> Result<Vec<DatasetSummary>> {
        let records = self.store.list_datasets(&request.user_email).await?;
        Ok(records.into_iter().map(DatasetSummary::from).collect())
    }

    /// Ingests a CSV file as a new dataset owned by `user_email`.
    pub async fn upload(&self, user_email: &str, path: &Path) -> Result<UploadResponse> {
        let path: PathBuf = path.to_path_buf();
        let table = tokio::task::spawn_blocking(move || ingest::read_csv_file(&path))
            .await
            .map_err(|e| TabletalkError::internal(format!("CSV reader task failed: {e}")))??;
        self.store_parsed(user_email, table).await
    }

    /// Ingests CSV text already in memory.
    pub async fn upload_csv(
        &self,
        user_email: &str,
        dataset_name: &str,
        csv: &str,
    ) -> Result<UploadResponse> {
        let table = ingest::parse_csv(csv.as_bytes(), dataset_name)?;
        self.store_parsed(user_email, table).await
    }

    async fn store_parsed(&self, user_email: &str, table: ParsedTable) -> Result<UploadResponse> {
        let record = self.store.store_table(user_email, &table).await?;
        info!(
            "Stored dataset {} ({}) with {} rows for {}",
            record.dataset_id, record.dataset_name, record.rows, user_email
        );
        Ok(UploadResponse::from(record))
    }

    /// Returns a dataset's columns in declaration order.
    pub async fn columns(&self, dataset_id: &str) -> Result<Vec<String>> {
        Ok(self.introspector.columns(dataset_id).await?.columns)
    }

    /// Closes the store.
    pub async fn close(&self) {
        self.store.close().await;
    }
}
