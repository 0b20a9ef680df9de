//! CSV ingestion for uploaded datasets.
//!
//! Parses a CSV file into a typed table ready to be handed to the dataset
//! store: column names from the header row, one inferred type per column, and
//! a freshly generated internal table name.

use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TabletalkError};
use crate::store::{Row, TableName, Value};

/// Inferred type of an ingested column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    Text,
}

/// A column of an ingested table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedColumn {
    pub name: String,
    pub ty: ColumnType,
}

impl ParsedColumn {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A typed table parsed from CSV, not yet stored.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    /// Internal table name the store will create.
    pub name: TableName,
    /// User-facing dataset name.
    pub dataset_name: String,
    /// Columns in header order.
    pub columns: Vec<ParsedColumn>,
    /// Rows, one value per column.
    pub rows: Vec<Row>,
}

impl ParsedTable {
    /// Column names in header order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Reads and parses a CSV file from disk.
pub fn read_csv_file(path: &Path) -> Result<ParsedTable> {
    let file = std::fs::File::open(path)
        .map_err(|e| TabletalkError::ingest(format!("Cannot open {}: {e}", path.display())))?;
    parse_csv(file, &dataset_name_from_path(path))
}

/// Parses CSV data with a header row into a typed table.
pub fn parse_csv<R: Read>(reader: R, dataset_name: &str) -> Result<ParsedTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| TabletalkError::ingest(format!("Invalid CSV header: {e}")))?
        .clone();

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(TabletalkError::ingest("CSV file has no header row"));
    }

    let names = column_names(headers.iter());

    let mut cells: Vec<Vec<String>> = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| {
            // +2: one for the header row, one for 1-based line numbers
            TabletalkError::ingest(format!("Invalid CSV row {}: {e}", index + 2))
        })?;
        cells.push(record.iter().map(str::to_string).collect());
    }

    let types: Vec<ColumnType> = (0..names.len())
        .map(|i| infer_type(cells.iter().map(|row| row[i].as_str())))
        .collect();

    let rows = cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&types)
                .map(|(cell, ty)| convert_cell(cell, *ty))
                .collect()
        })
        .collect::<Vec<Row>>();

    let columns = names
        .into_iter()
        .zip(types)
        .map(|(name, ty)| ParsedColumn::new(name, ty))
        .collect::<Vec<_>>();

    debug!(
        "Parsed CSV '{}' with {} columns and {} rows",
        dataset_name,
        columns.len(),
        rows.len()
    );

    Ok(ParsedTable {
        name: TableName::generate(),
        dataset_name: dataset_name.to_string(),
        columns,
        rows,
    })
}

/// Derives the user-facing dataset name from an upload's file name.
pub fn dataset_name_from_path(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(".csv").unwrap_or(&file_name);
    stem.replace(' ', "_")
}

/// Normalizes header cells: blanks become `Unnamed: <index>`, duplicates get
/// `.1`, `.2`, ... suffixes.
fn column_names<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (index, header) in headers.enumerate() {
        let base = if header.trim().is_empty() {
            format!("Unnamed: {index}")
        } else {
            header.to_string()
        };

        let mut name = base.clone();
        let mut suffix = 1;
        while names.contains(&name) {
            name = format!("{base}.{suffix}");
            suffix += 1;
        }
        names.push(name);
    }
    names
}

fn is_missing(cell: &str) -> bool {
    cell.trim().is_empty()
}

/// Picks the narrowest type that fits every non-empty cell.
fn infer_type<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut seen_any = false;
    let mut all_int = true;
    let mut all_real = true;
    let mut all_bool = true;

    for cell in cells.filter(|c| !is_missing(c)) {
        seen_any = true;
        let cell = cell.trim();
        all_int &= cell.parse::<i64>().is_ok();
        all_real &= cell.parse::<f64>().is_ok();
        all_bool &= parse_bool(cell).is_some();
    }

    match (seen_any, all_int, all_real, all_bool) {
        (false, ..) => ColumnType::Text,
        (true, true, _, _) => ColumnType::Integer,
        (true, false, true, _) => ColumnType::Real,
        (true, false, false, true) => ColumnType::Boolean,
        _ => ColumnType::Text,
    }
}

fn parse_bool(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn convert_cell(cell: String, ty: ColumnType) -> Value {
    if is_missing(&cell) {
        return Value::Null;
    }
    let trimmed = cell.trim();
    match ty {
        ColumnType::Integer => trimmed.parse().map(Value::Int).unwrap_or(Value::Null),
        ColumnType::Real => trimmed.parse().map(Value::Float).unwrap_or(Value::Null),
        ColumnType::Boolean => parse_bool(trimmed).map(Value::Bool).unwrap_or(Value::Null),
        ColumnType::Text => Value::String(cell),
    }
}
