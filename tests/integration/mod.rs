//! Integration tests for tabletalk.
//!
//! SQLite tests run against temporary store files. PostgreSQL tests require a
//! running server; set DATABASE_URL to run them.

pub mod ask_test;
pub mod properties;
pub mod store_test;
