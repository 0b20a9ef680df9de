//! Dataset store abstraction for tabletalk.
//!
//! Provides a trait-based interface over the relational store that holds
//! uploaded datasets and the dataset catalog, allowing SQLite and PostgreSQL
//! backends to be used interchangeably.

mod migrations;
mod postgres;
mod sqlite;
mod types;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use types::{ColumnInfo, QueryResult, Record, Row, Value};

use crate::config::StoreTarget;
use crate::error::{Result, TabletalkError};
use crate::ingest::{ColumnType, ParsedTable};
use async_trait::async_trait;
use serde::Serialize;
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_TABLE_NAME_LEN: usize = 63;

/// Rows per INSERT batch are capped so the bound parameter count stays
/// below both backends' limits.
const MAX_BIND_PARAMS: usize = 30_000;

/// Supported dataset store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Postgres,
}

impl StoreBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    /// Human-readable SQL dialect name, used in generation prompts.
    pub fn dialect_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
        }
    }

    /// Runs `f` with the sqlparser dialect matching this backend.
    pub fn with_dialect<R>(&self, f: impl FnOnce(&dyn Dialect) -> R) -> R {
        match self {
            Self::Sqlite => f(&SQLiteDialect {}),
            Self::Postgres => f(&PostgreSqlDialect {}),
        }
    }

    /// SQL type used for an ingested column of the given type.
    pub fn column_type_sql(&self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Self::Sqlite, ColumnType::Integer) => "INTEGER",
            (Self::Sqlite, ColumnType::Real) => "REAL",
            (Self::Sqlite, ColumnType::Boolean) => "BOOLEAN",
            (Self::Sqlite, ColumnType::Text) => "TEXT",
            (Self::Postgres, ColumnType::Integer) => "BIGINT",
            (Self::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (Self::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (Self::Postgres, ColumnType::Text) => "TEXT",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated table identifier.
///
/// Letters, digits and underscores only, not starting with a digit, at most
/// 63 characters. Always rendered double-quoted into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Parses an identifier, returning `None` if it is not a valid table name.
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let first = chars.next()?;
        let valid = name.len() <= MAX_TABLE_NAME_LEN
            && (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| Self(name.to_string()))
    }

    /// Generates a fresh internal table name for an uploaded dataset.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("data_{}", &hex[..6]))
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier quoted for interpolation into SQL.
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Double-quotes an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A dataset catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRecord {
    /// Internal table identifier, also the public dataset id.
    pub dataset_id: String,
    /// User-facing name derived from the uploaded file.
    pub dataset_name: String,
    /// Owner of the dataset.
    pub user_email: String,
    /// Column names in declaration order.
    pub columns: Vec<String>,
    /// Number of rows stored.
    pub rows: i64,
    /// Creation timestamp as reported by the store.
    pub created_at: String,
}

/// Trait defining the interface for dataset stores.
///
/// All operations are async and return Results with TabletalkError.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// The backend kind, which decides the SQL dialect.
    fn backend(&self) -> StoreBackend;

    /// Creates the table, inserts all rows and registers the catalog entry
    /// in a single transaction.
    async fn store_table(&self, user_email: &str, table: &ParsedTable) -> Result<DatasetRecord>;

    /// Executes a read-only query with the given timeout.
    async fn query_table(&self, sql: &str, timeout: Duration) -> Result<QueryResult>;

    /// Returns the table's column names in declaration order, or an empty
    /// list if the table does not exist.
    async fn sample_columns(&self, table: &TableName) -> Result<Vec<String>>;

    /// Looks up a catalog entry.
    async fn dataset(&self, table: &TableName) -> Result<Option<DatasetRecord>>;

    /// Lists a user's datasets, newest first.
    async fn list_datasets(&self, user_email: &str) -> Result<Vec<DatasetRecord>>;

    /// Closes the store's connection pools.
    async fn close(&self);
}

/// Opens the dataset store described by `target`.
///
/// This is the central factory function for store connections.
pub async fn connect(target: &StoreTarget) -> Result<Arc<dyn DatasetStore>> {
    match target {
        StoreTarget::Sqlite(path) => Ok(Arc::new(SqliteStore::open(path).await?)),
        StoreTarget::Postgres(url) => Ok(Arc::new(PostgresStore::connect(url).await?)),
    }
}

/// CREATE TABLE statement for an ingested table.
fn create_table_sql(backend: StoreBackend, table: &ParsedTable) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), backend.column_type_sql(c.ty)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", table.name.quoted(), columns)
}

/// INSERT prefix (up to and excluding VALUES) for an ingested table.
fn insert_prefix_sql(table: &ParsedTable) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({}) ", table.name.quoted(), columns)
}

/// Catalog row as selected by the backends, in `DatasetRecord` field order.
type CatalogRow = (String, String, String, String, i64, String);

/// Converts a catalog row into a record, decoding the stored column list.
fn catalog_record(row: CatalogRow) -> Result<DatasetRecord> {
    let (dataset_id, dataset_name, user_email, columns, rows, created_at) = row;
    let columns: Vec<String> = serde_json::from_str(&columns).map_err(|e| {
        TabletalkError::store(format!("Corrupt column list for dataset {dataset_id}: {e}"))
    })?;
    Ok(DatasetRecord {
        dataset_id,
        dataset_name,
        user_email,
        columns,
        rows,
        created_at,
    })
}

/// Number of rows per INSERT batch for a table with `column_count` columns.
fn rows_per_batch(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ParsedColumn;

    #[test]
    fn test_table_name_parse() {
        assert!(TableName::parse("data_abc123").is_some());
        assert!(TableName::parse("_private").is_some());
        assert!(TableName::parse("").is_none());
        assert!(TableName::parse("1abc").is_none());
        assert!(TableName::parse("data\"; DROP TABLE x; --").is_none());
        assert!(TableName::parse("data abc").is_none());
        assert!(TableName::parse(&"a".repeat(64)).is_none());
    }

    #[test]
    fn test_table_name_generate() {
        let name = TableName::generate();
        assert!(name.as_str().starts_with("data_"));
        assert_eq!(name.as_str().len(), 11);
        assert!(TableName::parse(name.as_str()).is_some());
        assert_ne!(TableName::generate(), TableName::generate());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("sales"), "\"sales\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(TableName::parse("data_x").unwrap().quoted(), "\"data_x\"");
    }

    #[test]
    fn test_backend_strings() {
        assert_eq!(StoreBackend::Sqlite.as_str(), "sqlite");
        assert_eq!(StoreBackend::Postgres.to_string(), "postgres");
        assert_eq!(StoreBackend::Postgres.dialect_name(), "PostgreSQL");
        assert_eq!(StoreBackend::default(), StoreBackend::Sqlite);
    }

    #[test]
    fn test_create_table_sql() {
        let table = ParsedTable {
            name: TableName::parse("data_abc123").unwrap(),
            dataset_name: "sales".to_string(),
            columns: vec![
                ParsedColumn::new("region", ColumnType::Text),
                ParsedColumn::new("sales", ColumnType::Integer),
            ],
            rows: vec![],
        };

        assert_eq!(
            create_table_sql(StoreBackend::Postgres, &table),
            r#"CREATE TABLE "data_abc123" ("region" TEXT, "sales" BIGINT)"#
        );
        assert_eq!(
            insert_prefix_sql(&table),
            r#"INSERT INTO "data_abc123" ("region", "sales") "#
        );
    }

    #[test]
    fn test_rows_per_batch() {
        assert_eq!(rows_per_batch(0), MAX_BIND_PARAMS);
        assert_eq!(rows_per_batch(3), 10_000);
        assert_eq!(rows_per_batch(MAX_BIND_PARAMS * 2), 1);
    }
}
