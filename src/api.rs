//! Caller-facing request and response shapes.
//!
//! These are what the CLI prints as JSON and what an embedding service would
//! put on the wire.

use serde::{Deserialize, Serialize};

use crate::store::{DatasetRecord, Record};

pub use crate::query::ChartHint;

/// A question about one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub dataset_id: String,
    pub query: String,
}

/// Answer to an [`AskRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    /// `"No data found."` or `"The result contains N records."`.
    pub answer_text: String,
    /// Result rows, keys in column order.
    pub data: Vec<Record>,
    /// Suggested chart pairing, `null` when there is none.
    pub chart: Option<ChartHint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetListRequest {
    pub user_email: String,
}

/// One entry of a dataset listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub dataset_id: String,
    pub dataset_name: String,
    pub rows: i64,
    pub created_at: String,
}

impl From<DatasetRecord> for DatasetSummary {
    fn from(record: DatasetRecord) -> Self {
        Self {
            dataset_id: record.dataset_id,
            dataset_name: record.dataset_name,
            rows: record.rows,
            created_at: record.created_at,
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResponse {
    pub dataset_id: String,
    pub dataset_name: String,
    pub rows: i64,
    pub columns: Vec<String>,
}

impl From<DatasetRecord> for UploadResponse {
    fn from(record: DatasetRecord) -> Self {
        Self {
            dataset_id: record.dataset_id,
            dataset_name: record.dataset_name,
            rows: record.rows,
            columns: record.columns,
        }
    }
}
