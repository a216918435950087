pub mod parsing;
pub mod prompts;
pub mod providers;

pub use parsing::{
    parse_clips, parse_deep_eval, parse_ranked_list, ClipSuggestion, DeepEval, RankedCandidate,
    ScoredVideo, VideoClips, ID_NOT_FOUND,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Model provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelProvider {
    /// Prompt relay: `POST {"prompt"}` with bearer auth, plain-text answer
    Relay,
    LMStudio,
    OpenAI,
}

/// Model transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::LMStudio,
            endpoint: Some("http://localhost:1234/v1/chat/completions".to_string()),
            api_key: None,
            model: "local-model".to_string(),
            max_tokens: 4096,
            temperature: 0.1,
            timeout_seconds: 120,
        }
    }
}

/// Chat message for chat-completions providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Single-prompt, single-answer model transport
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one prompt and return the model's raw text answer.
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// Create a model client based on configuration
pub fn create_model_client(config: &ModelConfig) -> Result<Box<dyn ModelClient>> {
    match config.provider {
        ModelProvider::Relay => Ok(Box::new(providers::RelayProvider::new(config.clone())?)),
        ModelProvider::LMStudio | ModelProvider::OpenAI => Ok(Box::new(
            providers::ChatCompletionsProvider::new(config.clone())?,
        )),
    }
}

pub(crate) fn missing_setting(what: &str) -> PipelineError {
    PipelineError::Precondition(format!("Model {} not configured", what))
}
