//! tabletalk - natural-language questions over uploaded CSV datasets.
//!
//! A question about one dataset goes through a fixed pipeline: introspect the
//! dataset's columns, generate a candidate query, sanitize it, validate it
//! against an allow-list, execute it read-only, and shape the result.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod query;
pub mod safety;
pub mod store;

pub use app::Tabletalk;
pub use error::{Result, TabletalkError};
