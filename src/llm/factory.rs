//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients.

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{Result, TabletalkError};
use crate::llm::{
    LlmClient, LlmProvider, MockLlmClient, OllamaClient, OllamaConfig, OpenAiClient, OpenAiConfig,
};

/// Creates an LLM client from configuration.
///
/// API keys come from the environment:
/// - `GROQ_API_KEY` for `groq`
/// - `OPENAI_API_KEY` for `openai`
///
/// `model` and `base_url` in the config override the provider defaults.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    create_client_with_env(config, |key| std::env::var(key).ok())
}

fn create_client_with_env(
    config: &LlmConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LlmClient>> {
    let provider: LlmProvider = config.provider.parse().map_err(TabletalkError::config)?;

    let api_key = |key_var: &str| {
        env(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                TabletalkError::config(format!(
                    "No API key configured for {provider}. Set {key_var}."
                ))
            })
    };

    let hosted = |mut client_config: OpenAiConfig| -> Result<Arc<dyn LlmClient>> {
        if let Some(model) = &config.model {
            client_config = client_config.with_model(model);
        }
        if let Some(base_url) = &config.base_url {
            client_config = client_config.with_base_url(base_url);
        }
        let client = OpenAiClient::new(client_config.with_timeout(config.timeout()))?;
        Ok(Arc::new(client))
    };

    match provider {
        LlmProvider::Groq => hosted(OpenAiConfig::groq(api_key("GROQ_API_KEY")?)),
        LlmProvider::OpenAi => hosted(OpenAiConfig::openai(api_key("OPENAI_API_KEY")?)),
        LlmProvider::Ollama => {
            let mut client_config = OllamaConfig::default().with_timeout(config.timeout());
            if let Some(model) = &config.model {
                client_config = client_config.with_model(model);
            }
            if let Some(base_url) = &config.base_url {
                client_config = client_config.with_base_url(base_url);
            }
            Ok(Arc::new(OllamaClient::new(client_config)?))
        }
        LlmProvider::Mock => Ok(Arc::new(MockLlmClient::new())),
    }
}
