//! SQLite dataset store.
//!
//! Uploaded tables and the dataset catalog live in one database file. Writes
//! go through a read-write pool; generated queries run on a separate pool
//! opened read-only, so the engine itself refuses any write they attempt.

use crate::error::{Result, TabletalkError};
use crate::ingest::{ColumnType, ParsedTable};
use crate::store::{
    catalog_record, create_table_sql, insert_prefix_sql, migrations, rows_per_batch, CatalogRow,
    ColumnInfo, DatasetRecord, DatasetStore, QueryResult, Row, StoreBackend, TableName, Value,
};
use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column as SqlxColumn, Executor, QueryBuilder, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Columns selected from the catalog, in `DatasetRecord` order.
const CATALOG_COLUMNS: &str = "dataset_id, dataset_name, user_email, columns, row_count, created_at";

/// Dataset store backed by a local SQLite file.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    read_pool: SqlitePool,
}

impl SqliteStore {
    /// Opens or creates the store at the given path and runs catalog migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_parent_dirs(path)?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                TabletalkError::store(format!("Failed to open store {}: {e}", path.display()))
            })?;

        migrations::run_migrations(&pool).await?;

        let read_options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));

        let read_pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(read_options)
            .await
            .map_err(|e| {
                TabletalkError::store(format!(
                    "Failed to open read-only connection to {}: {e}",
                    path.display()
                ))
            })?;

        info!("Dataset store opened at {}", path.display());

        Ok(Self {
            pool,
            read_pool,
        })
    }

    /// Column metadata for a query that returned no rows.
    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match (&self.read_pool).describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!("Could not describe empty result columns: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatasetStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn store_table(&self, user_email: &str, table: &ParsedTable) -> Result<DatasetRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TabletalkError::store(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(&create_table_sql(StoreBackend::Sqlite, table))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                TabletalkError::store(format!("Failed to create table {}: {e}", table.name))
            })?;

        let prefix = insert_prefix_sql(table);
        for chunk in table.rows.chunks(rows_per_batch(table.columns.len())) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(&prefix);
            builder.push_values(chunk, |mut values, row| {
                for (value, column) in row.iter().zip(&table.columns) {
                    push_bind_value(&mut values, value, column.ty);
                }
            });
            builder.build().execute(&mut *tx).await.map_err(|e| {
                TabletalkError::store(format!("Failed to insert rows into {}: {e}", table.name))
            })?;
        }

        let columns = table.column_names();
        let columns_json = serde_json::to_string(&columns)
            .map_err(|e| TabletalkError::internal(format!("Failed to encode columns: {e}")))?;

        let created_at: String = sqlx::query_scalar(
            "INSERT INTO datasets (dataset_id, dataset_name, user_email, columns, row_count) \
             VALUES (?, ?, ?, ?, ?) RETURNING created_at",
        )
        .bind(table.name.as_str())
        .bind(&table.dataset_name)
        .bind(user_email)
        .bind(&columns_json)
        .bind(table.rows.len() as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| TabletalkError::store(format!("Failed to register dataset: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| TabletalkError::store(format!("Failed to commit upload: {e}")))?;

        debug!("Stored {} rows in {}", table.rows.len(), table.name);

        Ok(DatasetRecord {
            dataset_id: table.name.as_str().to_string(),
            dataset_name: table.dataset_name.clone(),
            user_email: user_email.to_string(),
            columns,
            rows: table.rows.len() as i64,
            created_at,
        })
    }

    async fn query_table(&self, sql: &str, timeout: Duration) -> Result<QueryResult> {
        let start = Instant::now();

        let rows = tokio::time::timeout(timeout, sqlx::query(sql).fetch_all(&self.read_pool))
            .await
            .map_err(|_| {
                TabletalkError::execution(format!(
                    "Query timed out after {} seconds",
                    timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| TabletalkError::execution(format_query_error(e)))?;

        let execution_time = start.elapsed();

        let columns: Vec<ColumnInfo> = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => self.describe_columns(sql).await,
        };

        let rows: Vec<Row> = rows.iter().map(|row| convert_row(row, &columns)).collect();

        Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
    }

    async fn sample_columns(&self, table: &TableName) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(table.as_str())
            .fetch_all(&self.read_pool)
            .await
            .map_err(|e| {
                TabletalkError::store(format!("Failed to read columns of {table}: {e}"))
            })
    }

    async fn dataset(&self, table: &TableName) -> Result<Option<DatasetRecord>> {
        let row: Option<CatalogRow> = sqlx::query_as(&format!(
            "SELECT {CATALOG_COLUMNS} FROM datasets WHERE dataset_id = ?"
        ))
        .bind(table.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TabletalkError::store(format!("Failed to look up dataset: {e}")))?;

        row.map(catalog_record).transpose()
    }

    async fn list_datasets(&self, user_email: &str) -> Result<Vec<DatasetRecord>> {
        let rows: Vec<CatalogRow> = sqlx::query_as(&format!(
            "SELECT {CATALOG_COLUMNS} FROM datasets WHERE user_email = ? \
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(user_email)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TabletalkError::store(format!("Failed to list datasets: {e}")))?;

        rows.into_iter().map(catalog_record).collect()
    }

    async fn close(&self) {
        self.read_pool.close().await;
        self.pool.close().await;
    }
}

/// Ensures parent directories exist for the database path.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            TabletalkError::store(format!(
                "Failed to create data directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// Binds one cell, using a typed NULL so the column affinity is preserved.
fn push_bind_value(values: &mut Separated<'_, '_, Sqlite, &'static str>, value: &Value, ty: ColumnType) {
    match value {
        Value::Bool(b) => {
            values.push_bind(*b);
        }
        Value::Int(i) => {
            values.push_bind(*i);
        }
        Value::Float(f) => {
            values.push_bind(*f);
        }
        Value::String(s) => {
            values.push_bind(s.clone());
        }
        Value::Null => match ty {
            ColumnType::Integer => {
                values.push_bind(None::<i64>);
            }
            ColumnType::Real => {
                values.push_bind(None::<f64>);
            }
            ColumnType::Boolean => {
                values.push_bind(None::<bool>);
            }
            ColumnType::Text => {
                values.push_bind(None::<String>);
            }
        },
    }
}

fn convert_row(row: &SqliteRow, columns: &[ColumnInfo]) -> Row {
    (0..row.len())
        .map(|i| {
            let declared = columns.get(i).map(|c| c.data_type.as_str()).unwrap_or("");
            convert_value(row, i, declared)
        })
        .collect()
}

/// Converts a single cell by its runtime storage class. SQLite keeps booleans
/// as integers, so a declared BOOLEAN column maps integers back to `Bool`.
fn convert_value(row: &SqliteRow, index: usize, declared: &str) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match storage.as_str() {
        "INTEGER" | "BOOLEAN" => match row.try_get_unchecked::<i64, _>(index) {
            Ok(v) if declared.eq_ignore_ascii_case("BOOLEAN") => Value::Bool(v != 0),
            Ok(v) => Value::Int(v),
            Err(_) => Value::Null,
        },
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Extracts the engine's message from a query error.
fn format_query_error(error: sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => format!("ERROR: {}", db_error.message()),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ParsedColumn;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sales_table() -> ParsedTable {
        ParsedTable {
            name: TableName::generate(),
            dataset_name: "sales".to_string(),
            columns: vec![
                ParsedColumn::new("region", ColumnType::Text),
                ParsedColumn::new("sales", ColumnType::Integer),
                ParsedColumn::new("margin", ColumnType::Real),
                ParsedColumn::new("active", ColumnType::Boolean),
            ],
            rows: vec![
                vec![
                    Value::from("east"),
                    Value::Int(10),
                    Value::Float(0.5),
                    Value::Bool(true),
                ],
                vec![Value::from("west"), Value::Int(20), Value::Null, Value::Bool(false)],
            ],
        }
    }

    #[tokio::test]
    async fn test_open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let store = SqliteStore::open(&path).await.unwrap();
        assert!(path.exists());
        store.close().await;
    }

    #[tokio::test]
    async fn test_store_and_query_table() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
        let table = sales_table();

        let record = store.store_table("a@x.io", &table).await.unwrap();
        assert_eq!(record.dataset_id, table.name.as_str());
        assert_eq!(record.columns, vec!["region", "sales", "margin", "active"]);
        assert_eq!(record.rows, 2);

        let sql = format!(
            "SELECT region, sales, margin, active FROM {} ORDER BY sales",
            table.name.quoted()
        );
        let result = store.query_table(&sql, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.column_names(), vec!["region", "sales", "margin", "active"]);
        assert_eq!(
            result.rows,
            vec![
                vec![
                    Value::from("east"),
                    Value::Int(10),
                    Value::Float(0.5),
                    Value::Bool(true)
                ],
                vec![Value::from("west"), Value::Int(20), Value::Null, Value::Bool(false)],
            ]
        );
        store.close().await;
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
        let table = sales_table();
        store.store_table("a@x.io", &table).await.unwrap();

        let sql = format!("SELECT region FROM {} WHERE sales > 1000", table.name.quoted());
        let result = store.query_table(&sql, Duration::from_secs(5)).await.unwrap();

        assert!(result.is_empty());
        assert_eq!(result.column_names(), vec!["region"]);
        store.close().await;
    }

    #[tokio::test]
    async fn test_read_pool_refuses_writes() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
        let table = sales_table();
        store.store_table("a@x.io", &table).await.unwrap();

        let sql = format!("DELETE FROM {}", table.name.quoted());
        let err = store.query_table(&sql, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, TabletalkError::QueryExecution(_)));

        let count = store
            .query_table(
                &format!("SELECT COUNT(*) AS n FROM {}", table.name.quoted()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(count.rows[0][0], Value::Int(2));
        store.close().await;
    }

    #[tokio::test]
    async fn test_query_error_is_execution_error() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();

        let err = store
            .query_table("SELECT * FROM missing_table", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TabletalkError::QueryExecution(_)));
        assert!(err.to_string().contains("missing_table"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_sample_columns() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
        let table = sales_table();
        store.store_table("a@x.io", &table).await.unwrap();

        assert_eq!(
            store.sample_columns(&table.name).await.unwrap(),
            vec!["region", "sales", "margin", "active"]
        );
        let missing = TableName::parse("data_000000").unwrap();
        assert!(store.sample_columns(&missing).await.unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test]
    async fn test_catalog_listing_is_per_user_newest_first() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();

        let first = sales_table();
        let second = sales_table();
        let other = sales_table();
        store.store_table("a@x.io", &first).await.unwrap();
        store.store_table("a@x.io", &second).await.unwrap();
        store.store_table("b@x.io", &other).await.unwrap();

        let listed = store.list_datasets("a@x.io").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|d| d.dataset_id.as_str()).collect();
        assert_eq!(ids, vec![second.name.as_str(), first.name.as_str()]);

        assert!(store.list_datasets("nobody@x.io").await.unwrap().is_empty());

        let found = store.dataset(&other.name).await.unwrap().unwrap();
        assert_eq!(found.user_email, "b@x.io");
        assert_eq!(found.dataset_name, "sales");
        store.close().await;
    }

    #[tokio::test]
    async fn test_large_upload_is_batched() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();

        let rows = (0..25_000)
            .map(|i| vec![Value::Int(i), Value::Int(i * 2)])
            .collect::<Vec<_>>();
        let table = ParsedTable {
            name: TableName::generate(),
            dataset_name: "big".to_string(),
            columns: vec![
                ParsedColumn::new("a", ColumnType::Integer),
                ParsedColumn::new("b", ColumnType::Integer),
            ],
            rows,
        };
        let record = store.store_table("a@x.io", &table).await.unwrap();
        assert_eq!(record.rows, 25_000);

        let result = store
            .query_table(
                &format!("SELECT SUM(a) AS total FROM {}", table.name.quoted()),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Int((0..25_000i64).sum()));
        store.close().await;
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_catalog_entry() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
        let table = sales_table();
        store.store_table("a@x.io", &table).await.unwrap();

        // Same table name again: CREATE TABLE fails and nothing is registered.
        assert!(store.store_table("b@x.io", &table).await.is_err());
        assert!(store.list_datasets("b@x.io").await.unwrap().is_empty());
        store.close().await;
    }
}
