//! Mock LLM client for testing.
//!
//! Provides deterministic responses based on input patterns, plus a small
//! heuristic that answers "<measure> by <group>" questions from the table and
//! columns named in the system prompt.

use async_trait::async_trait;

use crate::error::{Result, TabletalkError};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

/// How the mock behaves when asked for a completion.
#[derive(Debug, Clone, Default)]
enum Mode {
    #[default]
    Answer,
    Fail(String),
    Hang,
}

/// Mock LLM client that returns canned responses based on input patterns.
///
/// Used for tests and offline runs without making real API calls.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    /// Custom response mappings (pattern -> response).
    custom_responses: Vec<(String, String)>,
    mode: Mode,
}

impl MockLlmClient {
    /// Creates a new mock client with default responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom response mapping.
    ///
    /// When the question contains `pattern` (case-insensitive), the mock
    /// returns `response`.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.custom_responses.push((pattern.into(), response.into()));
        self
    }

    /// A mock whose every completion fails with a generation error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            mode: Mode::Fail(message.into()),
            ..Self::default()
        }
    }

    /// A mock that never answers.
    pub fn hanging() -> Self {
        Self {
            mode: Mode::Hang,
            ..Self::default()
        }
    }

    /// Generates a mock response for a question against the prompt's table.
    fn mock_response(&self, question: &str, context: &PromptContext) -> String {
        let question_lower = question.to_lowercase();

        for (pattern, response) in &self.custom_responses {
            if question_lower.contains(&pattern.to_lowercase()) {
                return response.clone();
            }
        }

        let Some(table) = context.table.as_deref() else {
            return "I don't understand that question. Could you please rephrase it?".to_string();
        };

        if let Some(sql) = grouped_aggregate(&question_lower, table, &context.columns) {
            return format!("```sql\n{sql}\n```");
        }

        if question_lower.contains("how many") || question_lower.contains("count") {
            return format!("```sql\nSELECT COUNT(*) AS \"count\" FROM {table};\n```");
        }

        if question_lower.contains("all") || question_lower.contains("show") {
            return format!("```sql\nSELECT * FROM {table};\n```");
        }

        "I don't understand that question. Could you please rephrase it?".to_string()
    }

    /// Extracts the last user message content from a message list.
    fn extract_user_input(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        match &self.mode {
            Mode::Fail(message) => return Err(TabletalkError::generation(message.clone())),
            Mode::Hang => std::future::pending::<()>().await,
            Mode::Answer => {}
        }

        let input = Self::extract_user_input(messages);
        let context = PromptContext::from_messages(messages);
        Ok(self.mock_response(&input, &context))
    }
}

/// Table and columns as announced in the system prompt.
#[derive(Debug, Default)]
struct PromptContext {
    /// Quoted table name.
    table: Option<String>,
    /// Unquoted column names.
    columns: Vec<String>,
}

impl PromptContext {
    fn from_messages(messages: &[Message]) -> Self {
        let mut context = Self::default();
        let Some(system) = messages.iter().find(|m| m.role == Role::System) else {
            return context;
        };

        for line in system.content.lines() {
            if let Some(table) = line.strip_prefix("TABLE: ") {
                context.table = Some(table.trim().to_string());
            } else if let Some(columns) = line.strip_prefix("COLUMNS: ") {
                context.columns = parse_quoted_list(columns);
            }
        }
        context
    }
}

/// Splits `"a", "b""c"` into `["a", "b\"c"]`.
fn parse_quoted_list(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut name = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    name.push('"');
                } else {
                    break;
                }
            } else {
                name.push(c);
            }
        }
        names.push(name);
    }
    names
}

/// Answers "<measure> by <group>" with a grouped aggregate, when both sides
/// name a declared column.
fn grouped_aggregate(question: &str, table: &str, columns: &[String]) -> Option<String> {
    let (before, after) = question.split_once(" by ")?;

    let mentioned = |text: &str| {
        columns
            .iter()
            .filter(|c| text.contains(&c.to_lowercase()))
            .max_by_key(|c| c.len())
            .cloned()
    };
    let measure = mentioned(before)?;
    let group = mentioned(after)?;
    if measure == group {
        return None;
    }

    // Totals keep the measure's own name; other aggregates get a prefix.
    let (function, alias) = if before.contains("average") || before.contains("mean") {
        ("AVG", format!("avg_{measure}"))
    } else if before.contains("count") || before.contains("number of") {
        ("COUNT", format!("count_{measure}"))
    } else {
        ("SUM", measure.clone())
    };

    let group_ident = crate::store::quote_ident(&group);
    let alias = crate::store::quote_ident(&alias);
    Some(format!(
        "SELECT {group_ident}, {function}({measure_ident}) AS {alias} FROM {table} GROUP BY {group_ident} ORDER BY {group_ident};",
        measure_ident = crate::store::quote_ident(&measure),
    ))
}
