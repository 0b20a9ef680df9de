//! Turns a query result into a summary line and an optional chart pairing.

use serde::Serialize;

use crate::store::{QueryResult, Value};

/// Suggested (categorical, numeric) column pairing for a chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartHint {
    /// Categorical column, used as labels.
    pub x: String,
    /// Numeric column, used as values.
    pub y: String,
}

/// Summary and chart hint for one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shaped {
    pub summary: String,
    pub chart: Option<ChartHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Numeric,
    Categorical,
    Other,
}

/// Shapes a result. Pure and deterministic.
pub fn shape(result: &QueryResult) -> Shaped {
    if result.is_empty() {
        return Shaped {
            summary: "No data found.".to_string(),
            chart: None,
        };
    }

    let kinds: Vec<ColumnKind> = (0..result.columns.len())
        .map(|index| classify(result, index))
        .collect();
    let first_of = |kind| {
        kinds
            .iter()
            .position(|k| *k == kind)
            .map(|index| result.columns[index].name.clone())
    };

    let chart = match (first_of(ColumnKind::Categorical), first_of(ColumnKind::Numeric)) {
        (Some(x), Some(y)) => Some(ChartHint { x, y }),
        _ => None,
    };

    Shaped {
        summary: format!("The result contains {} records.", result.row_count()),
        chart,
    }
}

/// Classifies a column by its first non-null value, falling back to the
/// declared store type when every value is null.
fn classify(result: &QueryResult, index: usize) -> ColumnKind {
    let first = result
        .rows
        .iter()
        .filter_map(|row| row.get(index))
        .find(|value| !value.is_null());

    match first {
        Some(Value::Int(_) | Value::Float(_)) => ColumnKind::Numeric,
        Some(Value::String(_)) => ColumnKind::Categorical,
        Some(_) => ColumnKind::Other,
        None => classify_declared(&result.columns[index].data_type),
    }
}

fn classify_declared(data_type: &str) -> ColumnKind {
    let upper = data_type.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();

    match base {
        "INT" | "INTEGER" | "INT2" | "INT4" | "INT8" | "SMALLINT" | "BIGINT" | "REAL"
        | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC"
        | "DECIMAL" => ColumnKind::Numeric,
        "TEXT" | "CHAR" | "VARCHAR" | "BPCHAR" | "CHARACTER" | "CHARACTER VARYING" | "CLOB"
        | "NAME" => ColumnKind::Categorical,
        _ => ColumnKind::Other,
    }
}
