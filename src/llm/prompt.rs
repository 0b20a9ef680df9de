//! Prompt construction for query generation.
//!
//! The system prompt pins the dialect, the single allowed table and its
//! columns; the question goes in the user message.

use crate::llm::types::Message;
use crate::store::{quote_ident, StoreBackend, TableName};

/// System prompt template for query generation.
const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a SQL generator for a {dialect} database. Write one query that answers the user's question.

TABLE: {table}
COLUMNS: {columns}

RULES:
- Use only the table {table}. Never reference any other table.
- Use only the columns listed above.
- Wrap every column name in double quotes.
- Write a single read-only SELECT statement.
- Do not explain the query.
- Return only the SQL query."#;

/// Builds the system prompt for a table and its columns.
pub fn build_system_prompt(backend: StoreBackend, table: &TableName, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    SYSTEM_PROMPT_TEMPLATE
        .replace("{dialect}", backend.dialect_name())
        .replace("{table}", &table.quoted())
        .replace("{columns}", &column_list)
}

/// Builds the complete message list for a generation request.
pub fn build_messages(
    backend: StoreBackend,
    table: &TableName,
    columns: &[String],
    question: &str,
) -> Vec<Message> {
    vec![
        Message::system(build_system_prompt(backend, table, columns)),
        Message::user(question.trim()),
    ]
}
