//! Error types for tabletalk.
//!
//! Defines the main error enum used throughout the application. Each variant
//! is a terminal outcome for one request; none of them is fatal to the process.

use thiserror::Error;

use crate::safety::RejectReason;

/// Main error type for tabletalk operations.
#[derive(Error, Debug)]
pub enum TabletalkError {
    /// The dataset identifier does not resolve to a stored relation.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// The generation backend was unreachable, timed out, or answered with
    /// something unusable.
    #[error("Query generation failed: {0}")]
    GenerationFailed(String),

    /// The candidate query failed the allow-list gate and was never executed.
    #[error("Query rejected: {0}")]
    Rejected(RejectReason),

    /// The store rejected or failed a validated query.
    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    /// Dataset store errors outside query execution (connection, catalog, writes).
    #[error("Store error: {0}")]
    Store(String),

    /// CSV ingestion errors (unreadable file, malformed rows, etc.)
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Configuration errors (invalid config file, bad connection string, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TabletalkError {
    /// Creates a dataset-not-found error for the given identifier.
    pub fn dataset_not_found(dataset_id: impl Into<String>) -> Self {
        Self::DatasetNotFound(dataset_id.into())
    }

    /// Creates a generation error with the given message.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::GenerationFailed(msg.into())
    }

    /// Creates a query execution error with the given store diagnostic.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::QueryExecution(msg.into())
    }

    /// Creates a store error with the given message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Creates an ingest error with the given message.
    pub fn ingest(msg: impl Into<String>) -> Self {
        Self::Ingest(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DatasetNotFound(_) => "DatasetNotFound",
            Self::GenerationFailed(_) => "GenerationFailed",
            Self::Rejected(_) => "Rejected",
            Self::QueryExecution(_) => "QueryExecutionError",
            Self::Store(_) => "StoreError",
            Self::Ingest(_) => "IngestError",
            Self::Config(_) => "ConfigurationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Returns the message shown to the person who asked the question.
    pub fn user_message(&self) -> String {
        match self {
            Self::DatasetNotFound(id) => {
                format!("No dataset with id '{id}' exists. Check the id and try again.")
            }
            Self::GenerationFailed(msg) => {
                format!("Could not generate a query for this question ({msg}). Try again.")
            }
            Self::Rejected(reason) => {
                format!("The generated query was blocked by the safety check: {reason}.")
            }
            Self::QueryExecution(msg) => format!("The query could not be run: {msg}"),
            Self::Store(msg) => format!("The dataset store failed: {msg}"),
            Self::Ingest(msg) => format!("The file could not be read: {msg}"),
            Self::Config(msg) => format!("Invalid configuration: {msg}"),
            Self::Internal(msg) => format!("Something went wrong: {msg}"),
        }
    }

    /// Returns true if the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationFailed(_))
    }
}

impl From<RejectReason> for TabletalkError {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected(reason)
    }
}

/// Result type alias using TabletalkError.
pub type Result<T> = std::result::Result<T, TabletalkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_dataset_not_found() {
        let err = TabletalkError::dataset_not_found("data_abc123");
        assert_eq!(err.to_string(), "Dataset not found: data_abc123");
        assert_eq!(err.category(), "DatasetNotFound");
    }

    #[test]
    fn test_error_display_generation() {
        let err = TabletalkError::generation("Request timed out after 30s");
        assert_eq!(
            err.to_string(),
            "Query generation failed: Request timed out after 30s"
        );
        assert_eq!(err.category(), "GenerationFailed");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display_rejected() {
        let err = TabletalkError::from(RejectReason::MultipleStatements(2));
        assert_eq!(err.category(), "Rejected");
        assert!(err.to_string().starts_with("Query rejected:"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display_execution() {
        let err = TabletalkError::execution("no such column: profit");
        assert_eq!(
            err.to_string(),
            "Query execution failed: no such column: profit"
        );
        assert_eq!(err.category(), "QueryExecutionError");
    }

    #[test]
    fn test_core_categories_are_distinct() {
        let errors = [
            TabletalkError::dataset_not_found("x"),
            TabletalkError::generation("x"),
            TabletalkError::from(RejectReason::Empty),
            TabletalkError::execution("x"),
        ];
        let mut categories: Vec<_> = errors.iter().map(|e| e.category()).collect();
        categories.dedup();
        assert_eq!(categories.len(), 4);

        let mut messages: Vec<_> = errors.iter().map(|e| e.user_message()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TabletalkError>();
    }
}
