//! Message-passing control surface.
//!
//! Callers send `{"action": ..., ...}` messages and get back a
//! `{"status": "success" | "error" | "started", ...}` envelope. Full scenarios
//! are started and return immediately; the per-step debug actions run one
//! pipeline stage to completion against caller-supplied inputs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::{
    Engine, InstanceId, InstanceStatus, Params, Results, RunInstance, Scenario, Step, TargetHandle,
};
use crate::error::{PipelineError, Result};
use crate::llm::{RankedCandidate, ScoredVideo};
use crate::logging::LogJournal;
use crate::scenarios::{keys, RecommendationPipeline, USER_QUERY};
use crate::state::load_results;
use crate::transcript::VideoTranscript;

/// A JSON input given either inline or as a string holding JSON (what a
/// pasted text field produces)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonInput {
    Text(String),
    Value(Value),
}

impl JsonInput {
    pub fn parse<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        let parsed = match self {
            JsonInput::Text(text) => serde_json::from_str(text.trim()),
            JsonInput::Value(value) => T::deserialize(value),
        };
        parsed.map_err(|e| PipelineError::Precondition(format!("Invalid {} JSON: {}", what, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScrollParams {
    pub count: u32,
    pub delay_ms: u64,
    pub step: u32,
}

impl Default for ScrollParams {
    fn default() -> Self {
        Self {
            count: 10,
            delay_ms: 500,
            step: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub user_query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionParams {
    pub top10_json: JsonInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepEvalParams {
    pub user_query: String,
    pub video_json: JsonInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipParams {
    pub user_query: String,
    pub transcript_json: JsonInput,
    pub deep_eval_json: JsonInput,
}

/// Named actions accepted by the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    RunScenario {
        scenario_id: String,
        #[serde(default)]
        params: Params,
        #[serde(default)]
        target_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StopScenario { instance_id: InstanceId },
    StopAllScenarios,
    #[serde(rename_all = "camelCase")]
    GetStatus {
        #[serde(default)]
        instance_id: Option<InstanceId>,
    },
    ListScenarios,
    ClearLog,
    GetLogs,
    GetResults,
    PruneFinished,
    #[serde(rename_all = "camelCase")]
    RunScrollStep {
        #[serde(default)]
        params: ScrollParams,
        #[serde(default)]
        target_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RunParseVideosStep {
        #[serde(default)]
        target_id: Option<String>,
    },
    #[serde(rename = "runGPTGetTop10ByTitleStep", rename_all = "camelCase")]
    RunGptTop10ByTitleStep {
        params: QueryParams,
        #[serde(default)]
        target_id: Option<String>,
    },
    RunTranscriptionStep { params: TranscriptionParams },
    #[serde(rename = "runGPTDeepEvalStep")]
    RunGptDeepEvalStep { params: DeepEvalParams },
    RunClipGenerationStep { params: ClipParams },
}

/// Response envelope
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    #[serde(rename_all = "camelCase")]
    Started { instance_id: InstanceId },
    Success(Map<String, Value>),
    Error { message: String },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Success(Map::new())
    }

    /// Success carrying one named field
    pub fn with(key: &str, value: Value) -> Self {
        let mut body = Map::new();
        body.insert(key.to_string(), value);
        Reply::Success(body)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }
}

impl From<PipelineError> for Reply {
    fn from(error: PipelineError) -> Self {
        Reply::error(error.to_string())
    }
}

/// Dispatches control actions onto the engine
#[derive(Clone)]
pub struct Controller {
    engine: Engine,
    journal: Arc<LogJournal>,
    pipeline: RecommendationPipeline,
    default_target: TargetHandle,
}

impl Controller {
    pub fn new(
        engine: Engine,
        journal: Arc<LogJournal>,
        pipeline: RecommendationPipeline,
        default_target: TargetHandle,
    ) -> Self {
        Self {
            engine,
            journal,
            pipeline,
            default_target,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn pipeline(&self) -> &RecommendationPipeline {
        &self.pipeline
    }

    pub fn journal(&self) -> &Arc<LogJournal> {
        &self.journal
    }

    /// Decode a raw message and dispatch it.
    pub async fn handle(&self, message: Value) -> Reply {
        match serde_json::from_value::<Action>(message) {
            Ok(action) => self.dispatch(action).await,
            Err(e) => {
                warn!("Rejected control message: {}", e);
                Reply::error(format!("Unknown or malformed action: {}", e))
            }
        }
    }

    pub async fn dispatch(&self, action: Action) -> Reply {
        match self.try_dispatch(action).await {
            Ok(reply) => reply,
            Err(e) => e.into(),
        }
    }

    async fn try_dispatch(&self, action: Action) -> Result<Reply> {
        match action {
            Action::RunScenario {
                scenario_id,
                params,
                target_id,
            } => {
                let target = self.target(target_id);
                let instance_id = self.engine.run_registered(&scenario_id, params, target)?;
                debug!("Started scenario '{}' as {}", scenario_id, instance_id);
                Ok(Reply::Started { instance_id })
            }
            Action::StopScenario { instance_id } => {
                let cancelled = self.engine.cancel(instance_id)?;
                Ok(Reply::with("cancelled", json!(cancelled)))
            }
            Action::StopAllScenarios => {
                let cancelled = self.engine.cancel_all();
                Ok(Reply::with("cancelled", json!(cancelled)))
            }
            Action::GetStatus { instance_id } => match instance_id {
                Some(id) => {
                    let instance = self.engine.status(id)?;
                    Ok(Reply::with("instance", serde_json::to_value(instance)?))
                }
                None => {
                    let instances = self.engine.instances();
                    Ok(Reply::with("instances", serde_json::to_value(instances)?))
                }
            },
            Action::ListScenarios => Ok(Reply::with(
                "scenarios",
                serde_json::to_value(self.engine.registry().list())?,
            )),
            Action::ClearLog => {
                self.journal.clear();
                Ok(Reply::ok())
            }
            Action::GetLogs => {
                Ok(Reply::with("logs", serde_json::to_value(self.journal.entries())?))
            }
            Action::GetResults => {
                let results = load_results(self.pipeline.store().as_ref()).await?;
                Ok(Reply::with("results", serde_json::to_value(results)?))
            }
            Action::PruneFinished => {
                let pruned = self.engine.prune_finished();
                Ok(Reply::with("pruned", json!(pruned)))
            }
            Action::RunScrollStep { params, target_id } => {
                let step = self.pipeline.scroll_step(
                    params.count,
                    Duration::from_millis(params.delay_ms),
                    params.step,
                );
                self.run_step(step, Params::new(), self.target(target_id), Results::new())
                    .await?;
                Ok(Reply::ok())
            }
            Action::RunParseVideosStep { target_id } => {
                let results = self
                    .run_step(
                        self.pipeline.parse_step(),
                        Params::new(),
                        self.target(target_id),
                        Results::new(),
                    )
                    .await?;
                Ok(Reply::with("data", take(&results, keys::VIDEOS)))
            }
            Action::RunGptTop10ByTitleStep { params, target_id } => {
                let scenario = Scenario::new("debug:rank-by-title", "Parse and rank by title")
                    .with_shared_step(self.pipeline.parse_step())
                    .with_shared_step(self.pipeline.rank_step());
                let results = self
                    .run_scenario(
                        scenario,
                        query_params(&params.user_query)?,
                        self.target(target_id),
                        Results::new(),
                    )
                    .await?;
                Ok(Reply::with("data", take(&results, keys::RANKED)))
            }
            Action::RunTranscriptionStep { params } => {
                let ranked: Vec<RankedCandidate> = params.top10_json.parse("top-10")?;
                let mut seed = Results::new();
                seed.insert(keys::RANKED, &ranked)?;

                let results = self
                    .run_step(
                        self.pipeline.transcript_step(),
                        Params::new(),
                        self.default_target.clone(),
                        seed,
                    )
                    .await?;
                Ok(Reply::with("results", take(&results, keys::TRANSCRIPTS)))
            }
            Action::RunGptDeepEvalStep { params } => {
                let transcripts: Vec<VideoTranscript> =
                    params.video_json.parse("video transcript")?;
                let mut seed = Results::new();
                seed.insert(keys::TRANSCRIPTS, &transcripts)?;

                let results = self
                    .run_step(
                        self.pipeline.deep_eval_step(),
                        query_params(&params.user_query)?,
                        self.default_target.clone(),
                        seed,
                    )
                    .await?;
                Ok(Reply::with("results", take(&results, keys::EVALUATIONS)))
            }
            Action::RunClipGenerationStep { params } => {
                let transcripts: Vec<VideoTranscript> =
                    params.transcript_json.parse("transcript")?;
                let evaluations: Vec<ScoredVideo> =
                    params.deep_eval_json.parse("deep evaluation")?;
                let mut seed = Results::new();
                seed.insert(keys::TRANSCRIPTS, &transcripts)?;
                seed.insert(keys::EVALUATIONS, &evaluations)?;

                let results = self
                    .run_step(
                        self.pipeline.clip_step(),
                        query_params(&params.user_query)?,
                        self.default_target.clone(),
                        seed,
                    )
                    .await?;
                Ok(Reply::with("results", take(&results, keys::CLIPS)))
            }
        }
    }

    fn target(&self, target_id: Option<String>) -> TargetHandle {
        target_id
            .map(TargetHandle::new)
            .unwrap_or_else(|| self.default_target.clone())
    }

    async fn run_step(
        &self,
        step: Arc<dyn Step>,
        params: Params,
        target: TargetHandle,
        seed: Results,
    ) -> Result<Results> {
        self.run_scenario(Scenario::single(step), params, target, seed)
            .await
    }

    /// Run an ad-hoc scenario through the engine (so it is observable and
    /// cancellable like any other) and wait for it.
    async fn run_scenario(
        &self,
        scenario: Scenario,
        params: Params,
        target: TargetHandle,
        seed: Results,
    ) -> Result<Results> {
        let id = self
            .engine
            .run_seeded(Arc::new(scenario), params, target, seed);
        let finished = self.engine.wait(id).await?;
        outcome(finished)
    }
}

fn outcome(instance: RunInstance) -> Result<Results> {
    match instance.status {
        InstanceStatus::Succeeded => Ok(instance.results),
        InstanceStatus::Cancelled => Err(PipelineError::Cancelled),
        _ => Err(PipelineError::RunFailed(
            instance
                .error
                .unwrap_or_else(|| format!("Run {} did not finish", instance.id)),
        )),
    }
}

fn query_params(user_query: &str) -> Result<Params> {
    let query = user_query.trim();
    if query.is_empty() {
        return Err(PipelineError::Precondition("Empty user query".to_string()));
    }
    Ok(Params::new().with(USER_QUERY, query))
}

fn take(results: &Results, key: &str) -> Value {
    results.get_raw(key).cloned().unwrap_or(Value::Array(Vec::new()))
}
