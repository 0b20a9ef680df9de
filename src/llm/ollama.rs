//! Client for a local Ollama server's `/api/chat` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::llm::{http, LlmClient, Message};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2:3b";

const BACKEND: &str = "ollama";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Deadline for each chat request. Local models can be slow to load.
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl OllamaConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    endpoint: String,
    http: Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let endpoint = format!("{}/api/chat", config.base_url.trim_end_matches('/'));
        Ok(Self {
            config,
            endpoint,
            http: http::client()?,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        debug!(model = %self.config.model, "Requesting chat from {}", self.endpoint);

        let request = self.http.post(&self.endpoint).json(&ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            options: Sampling { temperature: 0.0 },
        });

        let reply: ChatReply = http::send_json(BACKEND, request, self.config.timeout).await?;
        http::require_answer(BACKEND, reply.message.map(|message| message.content))
    }
}

/// Ollama streams by default, so `stream: false` must be sent explicitly.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: Sampling,
}

#[derive(Serialize)]
struct Sampling {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatReply {
    message: Option<ReplyMessage>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}
