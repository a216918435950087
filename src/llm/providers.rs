use super::{missing_setting, ChatMessage, ModelClient, ModelConfig, ModelProvider};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Prompt relay provider
pub struct RelayProvider {
    config: ModelConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    prompt: &'a str,
}

impl RelayProvider {
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.endpoint.is_none() {
            return Err(missing_setting("relay endpoint"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ModelClient for RelayProvider {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let endpoint = self
            .config
            .endpoint
            .as_ref()
            .ok_or_else(|| missing_setting("relay endpoint"))?;

        debug!("Sending {} char prompt to relay at {}", prompt.len(), endpoint);

        let mut request = self.client.post(endpoint).json(&RelayRequest { prompt });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::from_response(response).await);
        }

        Ok(response.text().await?)
    }
}

/// OpenAI-style chat completions (LM Studio or OpenAI)
pub struct ChatCompletionsProvider {
    config: ModelConfig,
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl ChatCompletionsProvider {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let url = match config.provider {
            ModelProvider::OpenAI => {
                if config.api_key.is_none() {
                    return Err(missing_setting("API key"));
                }
                config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| OPENAI_CHAT_URL.to_string())
            }
            _ => config
                .endpoint
                .clone()
                .ok_or_else(|| missing_setting("endpoint"))?,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client, url })
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsProvider {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Sending chat request to {:?} at {}", self.config.provider, self.url);

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::from_response(response).await);
        }

        let chat: ChatResponse = response.json().await?;
        if let Some(usage) = &chat.usage {
            debug!("Model used {} tokens", usage.total_tokens);
        }

        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::Format("Chat response has no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_requires_endpoint() {
        let config = ModelConfig {
            provider: ModelProvider::Relay,
            endpoint: None,
            ..ModelConfig::default()
        };
        assert!(RelayProvider::new(config).is_err());
    }

    #[test]
    fn test_openai_requires_key_and_defaults_url() {
        let mut config = ModelConfig {
            provider: ModelProvider::OpenAI,
            endpoint: None,
            ..ModelConfig::default()
        };
        assert!(ChatCompletionsProvider::new(config.clone()).is_err());

        config.api_key = Some("sk-test".to_string());
        let provider = ChatCompletionsProvider::new(config).unwrap();
        assert_eq!(provider.url, OPENAI_CHAT_URL);
        assert_eq!(provider.config.provider, ModelProvider::OpenAI);
    }

    #[test]
    fn test_relay_request_body() {
        let body = serde_json::to_value(RelayRequest { prompt: "hi" }).unwrap();
        assert_eq!(body, serde_json::json!({"prompt": "hi"}));
    }
}
