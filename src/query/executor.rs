//! Runs validated queries against the dataset store.
//!
//! Only accepts [`ValidatedQuery`], so nothing reaches the store without
//! passing the allow-list gate first.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::safety::ValidatedQuery;
use crate::store::{DatasetStore, QueryResult};

/// Executes validated queries with a timeout and an optional row cap.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn DatasetStore>,
    timeout: Duration,
    max_rows: Option<usize>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DatasetStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            max_rows: None,
        }
    }

    /// Caps the number of returned rows.
    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Runs the query. Store failures and timeouts are `QueryExecution` errors.
    pub async fn execute(&self, query: &ValidatedQuery) -> Result<QueryResult> {
        let mut result = self.store.query_table(query.as_str(), self.timeout).await?;

        if let Some(max_rows) = self.max_rows {
            if result.rows.len() > max_rows {
                warn!(
                    "Query on {} returned {} rows, truncating to {} rows",
                    query.table(),
                    result.rows.len(),
                    max_rows
                );
                result.rows.truncate(max_rows);
            }
        }

        debug!(
            "Query on {} returned {} rows in {:?}",
            query.table(),
            result.row_count(),
            result.execution_time
        );
        Ok(result)
    }
}
