//! Chat completions client for Groq and OpenAI.
//!
//! Both providers serve the same `/chat/completions` contract under different
//! base URLs, so one client covers them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::llm::{http, LlmClient, LlmProvider, Message};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Which hosted endpoint to call, and how long to wait for it.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Used to label errors and logs.
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    /// `/chat/completions` is appended.
    pub base_url: String,
    /// Deadline for each completion request.
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Groq with its default model.
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::hosted(LlmProvider::Groq, api_key.into(), GROQ_BASE_URL, DEFAULT_GROQ_MODEL)
    }

    /// OpenAI with its default model.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::hosted(
            LlmProvider::OpenAi,
            api_key.into(),
            OPENAI_BASE_URL,
            DEFAULT_OPENAI_MODEL,
        )
    }

    fn hosted(provider: LlmProvider, api_key: String, base_url: &str, model: &str) -> Self {
        Self {
            provider,
            api_key,
            model: model.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    endpoint: String,
    http: Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            config,
            endpoint,
            http: http::client()?,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let backend = self.config.provider.as_str();
        debug!(backend, model = %self.config.model, "Requesting chat completion");

        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&CompletionRequest {
                model: &self.config.model,
                messages,
                temperature: 0.0,
            });

        let reply: CompletionReply = http::send_json(backend, request, self.config.timeout).await?;
        http::require_answer(backend, reply.first_answer())
    }
}

/// Non-streaming request; `stream` defaults to off when omitted.
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionReply {
    fn first_answer(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
    }
}
