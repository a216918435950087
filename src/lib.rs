/// YouTube Curator
///
/// Resumable, cancellable scenario engine that drives a search results page,
/// ranks what it finds with a language model, pulls transcripts and suggests
/// clips worth watching.

#[cfg(feature = "api")]
pub mod api;
pub mod bridge;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod llm;
pub mod logging;
pub mod scenarios;
pub mod state;
pub mod transcript;

// Re-export main types for easy access
pub use crate::bridge::{HostBridge, HtmlPageHost, VideoRecord};
pub use crate::config::Config;
pub use crate::control::{Action, Controller, Reply};
pub use crate::engine::{Engine, InstanceId, InstanceStatus, RunInstance, Scenario, Step};
pub use crate::error::{PipelineError, Result};
pub use crate::llm::{ModelClient, ModelConfig, ModelProvider};
pub use crate::logging::{LogJournal, RunLog};
pub use crate::scenarios::RecommendationPipeline;
pub use crate::state::{JsonFileStore, MemoryStore, ResultStore};
pub use crate::transcript::{Segmenter, TranscriptSource};
