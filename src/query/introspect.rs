//! Resolves a dataset identifier to its table and ordered column list.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TabletalkError};
use crate::store::{DatasetStore, TableName};

/// A dataset's table and its columns in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSchema {
    pub table: TableName,
    pub columns: Vec<String>,
}

/// Reads dataset column lists from the store. No side effects.
#[derive(Clone)]
pub struct SchemaIntrospector {
    store: Arc<dyn DatasetStore>,
}

impl SchemaIntrospector {
    pub fn new(store: Arc<dyn DatasetStore>) -> Self {
        Self { store }
    }

    /// Returns the ordered columns of a catalogued dataset.
    ///
    /// Identifiers that are not valid table names, are not in the catalog, or
    /// whose table has no columns all yield `DatasetNotFound`.
    pub async fn columns(&self, dataset_id: &str) -> Result<DatasetSchema> {
        let table = TableName::parse(dataset_id)
            .ok_or_else(|| TabletalkError::dataset_not_found(dataset_id))?;

        if self.store.dataset(&table).await?.is_none() {
            return Err(TabletalkError::dataset_not_found(dataset_id));
        }

        let columns = self.store.sample_columns(&table).await?;
        if columns.is_empty() {
            return Err(TabletalkError::dataset_not_found(dataset_id));
        }

        debug!("Dataset {} has {} columns", table, columns.len());
        Ok(DatasetSchema { table, columns })
    }
}
