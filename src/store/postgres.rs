//! PostgreSQL dataset store.
//!
//! Uploaded tables live in the `public` schema next to a `datasets` catalog
//! table. Generated queries run inside a `READ ONLY` transaction that is
//! always rolled back.

use crate::error::{Result, TabletalkError};
use crate::ingest::{ColumnType, ParsedTable};
use crate::store::{
    catalog_record, create_table_sql, insert_prefix_sql, rows_per_batch, CatalogRow, ColumnInfo,
    DatasetRecord, DatasetStore, QueryResult, Row, StoreBackend, TableName, Value,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Column as SqlxColumn, Executor, Postgres, QueryBuilder, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

const CATALOG_SELECT: &str = "SELECT dataset_id, dataset_name, user_email, columns, row_count, \
                              created_at::text FROM datasets";

/// Dataset store backed by a PostgreSQL database.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects with retries on transient failures and ensures the catalog exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await;

            match result {
                Ok(pool) => {
                    let store = Self { pool };
                    store.ensure_catalog().await?;
                    info!("Connected to PostgreSQL dataset store");
                    return Ok(store);
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e),
            None => TabletalkError::store("Failed to connect to PostgreSQL"),
        })
    }

    /// Creates the catalog table if it does not exist yet.
    async fn ensure_catalog(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                dataset_id TEXT PRIMARY KEY,
                dataset_name TEXT NOT NULL,
                user_email TEXT NOT NULL,
                columns TEXT NOT NULL,
                row_count BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TabletalkError::store(format!("Failed to create datasets table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_datasets_user ON datasets(user_email)")
            .execute(&self.pool)
            .await
            .map_err(|e| TabletalkError::store(format!("Failed to create datasets index: {e}")))?;

        Ok(())
    }

    async fn run_read_only(&self, sql: &str) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query(sql).fetch_all(&mut *tx).await;
        tx.rollback().await?;
        rows
    }

    /// Column metadata for a query that returned no rows.
    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match (&self.pool).describe(sql).await {
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
impl DatasetStore for PostgresStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Postgres
    }

    async fn store_table(&self, user_email: &str, table: &ParsedTable) -> Result<DatasetRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TabletalkError::store(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(&create_table_sql(StoreBackend::Postgres, table))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                TabletalkError::store(format!("Failed to create table {}: {e}", table.name))
            })?;

        let prefix = insert_prefix_sql(table);
        for chunk in table.rows.chunks(rows_per_batch(table.columns.len())) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
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
             VALUES ($1, $2, $3, $4, $5) RETURNING created_at::text",
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

        let rows = tokio::time::timeout(timeout, self.run_read_only(sql))
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

        let rows = rows.iter().map(convert_row).collect::<Result<Vec<Row>>>()?;

        Ok(QueryResult::with_data(columns, rows).with_execution_time(execution_time))
    }

    async fn sample_columns(&self, table: &TableName) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TabletalkError::store(format!("Failed to read columns of {table}: {e}")))
    }

    async fn dataset(&self, table: &TableName) -> Result<Option<DatasetRecord>> {
        let row: Option<CatalogRow> =
            sqlx::query_as(&format!("{CATALOG_SELECT} WHERE dataset_id = $1"))
                .bind(table.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| TabletalkError::store(format!("Failed to look up dataset: {e}")))?;

        row.map(catalog_record).transpose()
    }

    async fn list_datasets(&self, user_email: &str) -> Result<Vec<DatasetRecord>> {
        let rows: Vec<CatalogRow> = sqlx::query_as(&format!(
            "{CATALOG_SELECT} WHERE user_email = $1 ORDER BY created_at DESC, dataset_id DESC"
        ))
        .bind(user_email)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TabletalkError::store(format!("Failed to list datasets: {e}")))?;

        rows.into_iter().map(catalog_record).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn push_bind_value(
    values: &mut Separated<'_, '_, Postgres, &'static str>,
    value: &Value,
    ty: ColumnType,
) {
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

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.name(), col.type_info().name()))
        .collect()
}

/// How a Postgres column type is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoded {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
}

/// Returns `None` for types with no lossless mapping to a result value.
fn decoded_as(type_name: &str) -> Option<Decoded> {
    let decoded = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => Decoded::Bool,
        "INT2" | "SMALLINT" => Decoded::Int2,
        "INT4" | "INT" | "INTEGER" => Decoded::Int4,
        "INT8" | "BIGINT" => Decoded::Int8,
        "FLOAT4" | "REAL" => Decoded::Float4,
        "FLOAT8" | "DOUBLE PRECISION" => Decoded::Float8,
        // AVG and SUM over BIGINT yield NUMERIC.
        "NUMERIC" => Decoded::Numeric,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" | "UNKNOWN" => Decoded::Text,
        _ => return None,
    };
    Some(decoded)
}

fn unsupported_type(column: &str, type_name: &str) -> TabletalkError {
    TabletalkError::execution(format!(
        "Column '{column}' has type {type_name}, which cannot be returned as is; cast it to text"
    ))
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, column: &str, type_name: &str) -> Result<Value> {
    let kind = decoded_as(type_name).ok_or_else(|| unsupported_type(column, type_name))?;
    let failed = |e: sqlx::Error| {
        TabletalkError::execution(format!("Could not read column '{column}': {e}"))
    };

    let value = match kind {
        Decoded::Bool => row
            .try_get::<Option<bool>, _>(index)
            .map_err(failed)?
            .map(Value::Bool),
        Decoded::Int2 => row
            .try_get::<Option<i16>, _>(index)
            .map_err(failed)?
            .map(|v| Value::Int(v as i64)),
        Decoded::Int4 => row
            .try_get::<Option<i32>, _>(index)
            .map_err(failed)?
            .map(|v| Value::Int(v as i64)),
        Decoded::Int8 => row
            .try_get::<Option<i64>, _>(index)
            .map_err(failed)?
            .map(Value::Int),
        Decoded::Float4 => row
            .try_get::<Option<f32>, _>(index)
            .map_err(failed)?
            .map(|v| Value::Float(v as f64)),
        Decoded::Float8 => row
            .try_get::<Option<f64>, _>(index)
            .map_err(failed)?
            .map(Value::Float),
        Decoded::Numeric => row
            .try_get::<Option<Decimal>, _>(index)
            .map_err(failed)?
            .map(|d| numeric_value(&d.normalize().to_string())),
        Decoded::Text => row
            .try_get::<Option<String>, _>(index)
            .map_err(failed)?
            .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn numeric_value(text: &str) -> Value {
    text.parse::<i64>()
        .map(Value::Int)
        .or_else(|_| text.parse::<f64>().map(Value::Float))
        .unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-facing messages.
fn map_connection_error(error: sqlx::Error) -> TabletalkError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        TabletalkError::store("Cannot connect to PostgreSQL. Check that the server is running.")
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        TabletalkError::store("PostgreSQL authentication failed. Check your credentials.")
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        TabletalkError::store("The configured PostgreSQL database does not exist.")
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        TabletalkError::store("Connection to PostgreSQL timed out.")
    } else {
        TabletalkError::store(error.to_string())
    }
}

/// Formats a query error with detail and hint if available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = format!("ERROR: {}", db_error.message());
    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }
    result
}
