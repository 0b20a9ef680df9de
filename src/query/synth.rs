//! Asks the generation backend for a candidate query.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TabletalkError};
use crate::llm::{build_messages, LlmClient};
use crate::query::introspect::DatasetSchema;
use crate::store::StoreBackend;

/// Turns a question into raw, untrusted query text.
#[derive(Clone)]
pub struct QuerySynthesizer {
    llm: Arc<dyn LlmClient>,
    backend: StoreBackend,
    timeout: Duration,
}

impl QuerySynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, backend: StoreBackend, timeout: Duration) -> Self {
        Self {
            llm,
            backend,
            timeout,
        }
    }

    /// Generates raw text for `question` over the dataset's single table.
    ///
    /// Fails with `GenerationFailed` on backend errors, timeout, or an empty
    /// answer. Not retried.
    pub async fn synthesize(&self, question: &str, schema: &DatasetSchema) -> Result<String> {
        let messages = build_messages(self.backend, &schema.table, &schema.columns, question);

        let raw = tokio::time::timeout(self.timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| {
                TabletalkError::generation(format!(
                    "No answer from the generation backend within {} seconds",
                    self.timeout.as_secs_f64()
                ))
            })??;

        if raw.trim().is_empty() {
            return Err(TabletalkError::generation(
                "The generation backend returned an empty answer",
            ));
        }

        debug!("Generated {} characters for {}", raw.len(), schema.table);
        Ok(raw)
    }
}
