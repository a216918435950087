use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::engine::DEFAULT_MAX_FINISHED;
use crate::llm::{ModelConfig, ModelProvider};
use crate::transcript::{FragmentJoin, DEFAULT_TOKEN_BUDGET};

/// Configuration for the YouTube curator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Language model transport
    pub model: ModelConfig,

    /// Transcript provider and chunking
    pub transcript: TranscriptConfig,

    /// Recommendation scenario tuning
    pub scenario: ScenarioConfig,

    /// Result persistence
    pub storage: StorageConfig,

    /// Log journal and tracing filter
    pub logging: LoggingConfig,

    /// HTTP control surface
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Transcript endpoint, queried as `?v=<id>&api_key=<key>`
    pub endpoint: String,

    /// Provider API key
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Token budget per transcript chunk
    pub token_budget: usize,

    /// How caption fragments are glued together
    pub fragment_join: FragmentJoin,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.scrapingdog.com/youtube/transcripts".to_string(),
            api_key: None,
            timeout_seconds: 60,
            token_budget: DEFAULT_TOKEN_BUDGET,
            // The hosted provider trims every fragment
            fragment_join: FragmentJoin::Space,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of incremental scrolls before scraping
    pub scroll_times: u32,

    /// Pause between scrolls (milliseconds)
    pub scroll_delay_ms: u64,

    /// Pixels per scroll
    pub scroll_step_px: u32,

    /// Candidates kept from the title ranking
    pub top_n: usize,

    /// Initial score for candidates the ranking step could not score
    pub default_initial_score: i64,

    /// Videos that get clip suggestions
    pub clip_videos: usize,

    /// Transcript chunks (0-based) sent for clip extraction
    pub clip_chunk_indices: Vec<usize>,

    /// Finished runs kept for status queries; older ones are dropped
    pub max_finished_instances: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scroll_times: 20,
            scroll_delay_ms: 1000,
            scroll_step_px: 1000,
            top_n: 10,
            default_initial_score: 8,
            clip_videos: 3,
            clip_chunk_indices: vec![0, 2, 5],
            max_finished_instances: DEFAULT_MAX_FINISHED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per stored key
    pub results_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let results_dir = dirs::data_dir()
            .map(|dir| dir.join("yt-curator"))
            .unwrap_or_else(|| PathBuf::from("./data"));
        Self { results_dir }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub filter: String,

    /// Entries retained by the log journal
    pub max_entries: usize,

    /// Mirror journal entries to `tracing`
    pub mirror_to_tracing: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "yt_curator=info,warn".to_string(),
            max_entries: 1000,
            mirror_to_tracing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from the first readable file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config_paths = vec![
            PathBuf::from("yt-curator.toml"),
            PathBuf::from("config/yt-curator.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            config_paths.push(dir.join("yt-curator").join("config.toml"));
        }

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        config.apply_env();
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Defaults overridden by `YT_CURATOR_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("YT_CURATOR_MODEL_PROVIDER") {
            match provider.to_lowercase().as_str() {
                "relay" => self.model.provider = ModelProvider::Relay,
                "lmstudio" => self.model.provider = ModelProvider::LMStudio,
                "openai" => self.model.provider = ModelProvider::OpenAI,
                other => tracing::warn!("Ignoring unknown model provider '{}'", other),
            }
        }

        if let Ok(endpoint) = std::env::var("YT_CURATOR_MODEL_ENDPOINT") {
            self.model.endpoint = Some(endpoint);
        }

        if let Ok(api_key) = std::env::var("YT_CURATOR_MODEL_API_KEY") {
            self.model.api_key = Some(api_key);
        }

        if let Ok(api_key) = std::env::var("YT_CURATOR_TRANSCRIPT_API_KEY") {
            self.transcript.api_key = Some(api_key);
        }

        if let Ok(results_dir) = std::env::var("YT_CURATOR_RESULTS_DIR") {
            self.storage.results_dir = PathBuf::from(results_dir);
        }

        if let Ok(filter) = std::env::var("YT_CURATOR_LOG_FILTER") {
            self.logging.filter = filter;
        }

        if let Ok(port) = std::env::var("YT_CURATOR_PORT") {
            self.server.port = port.parse().unwrap_or(self.server.port);
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.model.provider {
            ModelProvider::Relay | ModelProvider::LMStudio => {
                if self.model.endpoint.is_none() {
                    return Err(anyhow!("Model endpoint required for {:?}", self.model.provider));
                }
            }
            ModelProvider::OpenAI => {
                if self.model.api_key.is_none() {
                    return Err(anyhow!("API key required for OpenAI"));
                }
            }
        }

        let endpoint = &self.transcript.endpoint;
        Url::parse(endpoint)
            .map_err(|e| anyhow!("Invalid transcript endpoint '{}': {}", endpoint, e))?;

        if self.transcript.token_budget == 0 {
            return Err(anyhow!("token_budget must be greater than 0"));
        }

        if self.scenario.top_n == 0 || self.scenario.clip_videos == 0 {
            return Err(anyhow!("top_n and clip_videos must be greater than 0"));
        }

        if self.scenario.scroll_step_px == 0 {
            return Err(anyhow!("scroll_step_px must be greater than 0"));
        }

        if self.scenario.max_finished_instances == 0 {
            return Err(anyhow!("max_finished_instances must be greater than 0"));
        }

        if self.logging.max_entries == 0 {
            return Err(anyhow!("logging.max_entries must be greater than 0"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "YouTube Curator Configuration:\n\
            - Model Provider: {:?} ({})\n\
            - Transcript Endpoint: {}\n\
            - Token Budget: {}\n\
            - Scrolls: {} x {}px every {}ms\n\
            - Top N: {}, Clip Videos: {}\n\
            - Results Directory: {}",
            self.model.provider,
            self.model.endpoint.as_deref().unwrap_or("default"),
            self.transcript.endpoint,
            self.transcript.token_budget,
            self.scenario.scroll_times,
            self.scenario.scroll_step_px,
            self.scenario.scroll_delay_ms,
            self.scenario.top_n,
            self.scenario.clip_videos,
            self.storage.results_dir.display()
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    pub fn with_transcript_api_key(mut self, api_key: String) -> Self {
        self.config.transcript.api_key = Some(api_key);
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.config.transcript.token_budget = budget;
        self
    }

    pub fn with_scroll(mut self, times: u32, delay_ms: u64, step_px: u32) -> Self {
        self.config.scenario.scroll_times = times;
        self.config.scenario.scroll_delay_ms = delay_ms;
        self.config.scenario.scroll_step_px = step_px;
        self
    }

    pub fn with_results_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.results_dir = dir;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
