use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use yt_curator::bridge::{ContentRequest, ContentResponse, HostBridge};
use yt_curator::config::ScenarioConfig;
use yt_curator::control::{Controller, Reply};
use yt_curator::engine::{Engine, InstanceStatus, Params, RunInstance, TargetHandle};
use yt_curator::error::{PipelineError, Result};
use yt_curator::llm::{ModelClient, VideoClips};
use yt_curator::logging::{LogJournal, LogLevel};
use yt_curator::scenarios::{self, keys, RecommendationPipeline, SCENARIO_ID, USER_QUERY};
use yt_curator::state::{load_results, save_results, MemoryStore, ResultStore};
use yt_curator::transcript::{CaptionFragment, Segmenter, TranscriptSource};

const OWNERSHIP: &str = "Rust ownership explained";
const ASYNC: &str = "Async Rust in depth";

/// Page host serving a fixed set of cards
struct CannedHost {
    scrolls: AtomicUsize,
}

#[async_trait]
impl HostBridge for CannedHost {
    async fn send_to_content(
        &self,
        target: &TargetHandle,
        request: ContentRequest,
    ) -> Result<ContentResponse> {
        if target.as_str() != "tab-1" {
            return Err(PipelineError::HostUnavailable(target.to_string()));
        }

        match request {
            ContentRequest::PerformSingleScroll { .. } => {
                self.scrolls.fetch_add(1, Ordering::SeqCst);
                Ok(ContentResponse::success(None))
            }
            ContentRequest::ParseAllVideoCards => Ok(ContentResponse::success(Some(json!([
                {"videoId": "own1", "title": OWNERSHIP, "duration": "10:00"},
                {"videoId": "asy2", "title": ASYNC, "duration": "20:00"},
                {"videoId": "asy2", "title": ASYNC, "duration": "20:00"},
                {"videoId": "pas3", "title": "Cooking pasta", "duration": "5:00"}
            ])))),
        }
    }
}

/// Answers by recognising which prompt it was handed
struct ScriptedModel {
    ranking: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(ranking: impl Into<String>) -> Self {
        Self {
            ranking: ranking.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn ask(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.contains("video-matching assistant") {
            return Ok(self.ranking.clone());
        }
        if prompt.contains("[Initial Score]") {
            return Ok("Revised Score: 9\nSummary: Covers futures and executors.".to_string());
        }
        if prompt.contains("video curator") {
            return Ok("Start: 00:05 – End: 01:10 | What a future is\n\
                       Start: 02:00 — End: 03:30 | Pinning in one picture\n\
                       noise line\n\
                       Start: 01:00:00 - End: 01:01:30 | Executors compared"
                .to_string());
        }
        Err(PipelineError::Format("unexpected prompt".to_string()))
    }
}

/// Captions for the async video only; the ownership video fails upstream.
struct CannedTranscripts {
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl TranscriptSource for CannedTranscripts {
    async fn fetch_transcript(&self, video_id: &str) -> Result<Vec<CaptionFragment>> {
        self.requested.lock().unwrap().push(video_id.to_string());
        match video_id {
            "asy2" => Ok(vec![
                CaptionFragment::new(0.0, "Futures are lazy."),
                CaptionFragment::new(4.2, "They do nothing until polled."),
                CaptionFragment::new(9.8, "Executors poll them."),
            ]),
            _ => Err(PipelineError::Transport {
                status: 429,
                body: "quota exceeded".to_string(),
            }),
        }
    }
}

struct Fixture {
    controller: Controller,
    store: Arc<MemoryStore>,
    model: Arc<ScriptedModel>,
    transcripts: Arc<CannedTranscripts>,
    host: Arc<CannedHost>,
}

fn default_ranking() -> String {
    format!("{};0.9\n{};0.8\nA video nobody scraped;0.5", ASYNC, OWNERSHIP)
}

fn fixture() -> Fixture {
    fixture_with(
        ScenarioConfig {
            scroll_times: 3,
            scroll_delay_ms: 0,
            ..ScenarioConfig::default()
        },
        default_ranking(),
    )
}

fn fixture_with(settings: ScenarioConfig, ranking: impl Into<String>) -> Fixture {
    let host = Arc::new(CannedHost {
        scrolls: AtomicUsize::new(0),
    });
    let model = Arc::new(ScriptedModel::new(ranking));
    let transcripts = Arc::new(CannedTranscripts {
        requested: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryStore::new());
    let journal = Arc::new(LogJournal::new(1000, false));

    let pipeline = RecommendationPipeline::new(
        model.clone(),
        transcripts.clone(),
        store.clone(),
        Segmenter::new(3000),
        settings,
    );

    let engine = Engine::new(host.clone(), journal.clone());
    scenarios::register_builtin(&engine, &pipeline).unwrap();

    Fixture {
        controller: Controller::new(engine, journal, pipeline, TargetHandle::from("tab-1")),
        store,
        model,
        transcripts,
        host,
    }
}

fn success_body(reply: Reply) -> serde_json::Map<String, Value> {
    match reply {
        Reply::Success(body) => body,
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_scenario_stores_clips() {
    let fx = fixture();
    let engine = fx.controller.engine();

    let id = engine
        .run_registered(
            SCENARIO_ID,
            Params::new().with(USER_QUERY, "how does async rust work"),
            TargetHandle::from("tab-1"),
        )
        .unwrap();
    let finished = engine.wait(id).await.unwrap();

    assert_eq!(finished.status, InstanceStatus::Succeeded, "{:?}", finished.error);
    assert_eq!(finished.steps_completed, 7);
    assert_eq!(fx.host.scrolls.load(Ordering::SeqCst), 3);

    // Duplicate card collapsed, all three cards kept
    let videos: Vec<Value> = finished.results.get(keys::VIDEOS).unwrap().unwrap();
    assert_eq!(videos.len(), 3);

    // The unscraped title is ranked but never fetched
    let ranked: Vec<Value> = finished.results.get(keys::RANKED).unwrap().unwrap();
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0]["relevanceScore10"], 9);
    assert_eq!(ranked[2]["videoId"], "ID_NOT_FOUND");
    assert_eq!(
        *fx.transcripts.requested.lock().unwrap(),
        vec!["asy2".to_string(), "own1".to_string()]
    );

    // rank + one evaluation + one clip request
    assert_eq!(fx.model.prompt_count(), 3);

    let stored = load_results(fx.store.as_ref()).await.unwrap();
    assert_eq!(stored.len(), 1);
    let clips: &VideoClips = &stored[0];
    assert_eq!(clips.video_id, "asy2");
    assert_eq!(clips.score, 9.0);
    assert_eq!(clips.clips.len(), 3);
    assert_eq!(clips.clips[0].start, "00:05");
    assert_eq!(clips.clips[1].title, "Pinning in one picture");
    assert_eq!(clips.clips[2].start, "1:00:00");
}

#[tokio::test]
async fn test_item_failure_is_logged_not_fatal() {
    let fx = fixture();
    let engine = fx.controller.engine();

    let id = engine
        .run_registered(
            SCENARIO_ID,
            Params::new().with(USER_QUERY, "async"),
            TargetHandle::from("tab-1"),
        )
        .unwrap();
    let finished = engine.wait(id).await.unwrap();
    assert_eq!(finished.status, InstanceStatus::Succeeded);

    let errors: Vec<String> = fx
        .controller
        .journal()
        .entries()
        .into_iter()
        .filter(|entry| entry.level == LogLevel::Error)
        .map(|entry| entry.message)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains(OWNERSHIP));
    assert!(errors[0].contains("429"));
}

#[tokio::test]
async fn test_missing_host_fails_at_scroll() {
    let fx = fixture();
    let engine = fx.controller.engine();

    let id = engine
        .run_registered(
            SCENARIO_ID,
            Params::new().with(USER_QUERY, "async"),
            TargetHandle::from("closed-tab"),
        )
        .unwrap();
    let finished = engine.wait(id).await.unwrap();

    assert_eq!(finished.status, InstanceStatus::Failed);
    assert_eq!(finished.steps_completed, 0);
    assert!(finished.error.unwrap().contains("closed-tab"));
    assert_eq!(fx.model.prompt_count(), 0);
}

#[tokio::test]
async fn test_save_overwrites_previous_results() {
    let store = MemoryStore::new();
    let first = vec![VideoClips {
        title: "Old".to_string(),
        video_id: "old".to_string(),
        score: 7.0,
        clips: Vec::new(),
    }];
    save_results(&store, &first).await.unwrap();
    save_results(&store, &[]).await.unwrap();

    assert!(load_results(&store).await.unwrap().is_empty());
    assert_eq!(store.get("aiScenarioResults").await.unwrap(), Some(json!([])));
}

#[tokio::test]
async fn test_run_scenario_envelope() {
    let fx = fixture();

    let reply = fx
        .controller
        .handle(json!({
            "action": "runScenario",
            "scenarioId": SCENARIO_ID,
            "params": {"userQuery": "async rust"}
        }))
        .await;
    let Reply::Started { instance_id } = reply else {
        panic!("expected started, got {:?}", reply);
    };

    let finished = fx.controller.engine().wait(instance_id).await.unwrap();
    assert_eq!(finished.status, InstanceStatus::Succeeded);

    let body = success_body(fx.controller.handle(json!({"action": "getResults"})).await);
    assert_eq!(body["results"][0]["videoId"], "asy2");

    let body = success_body(
        fx.controller
            .handle(json!({"action": "getStatus", "instanceId": instance_id}))
            .await,
    );
    assert_eq!(body["instance"]["status"], "succeeded");
}

#[tokio::test]
async fn test_envelope_errors() {
    let fx = fixture();

    let reply = fx
        .controller
        .handle(json!({"action": "runScenario", "scenarioId": "nope", "params": {}}))
        .await;
    assert_eq!(reply, Reply::error("Unknown scenario: nope"));

    let reply = fx
        .controller
        .handle(json!({"action": "runScenario", "scenarioId": SCENARIO_ID, "params": {}}))
        .await;
    assert!(matches!(reply, Reply::Error { ref message } if message.contains("userQuery")));

    let reply = fx.controller.handle(json!({"action": "launchRockets"})).await;
    assert!(!reply.is_success());
}

#[tokio::test]
async fn test_clear_log_and_list_scenarios() {
    let fx = fixture();
    fx.controller
        .handle(json!({"action": "runScenario", "scenarioId": "nope"}))
        .await;

    let body = success_body(fx.controller.handle(json!({"action": "listScenarios"})).await);
    assert_eq!(body["scenarios"][0]["id"], SCENARIO_ID);

    let reply = fx.controller.handle(json!({"action": "clearLog"})).await;
    assert!(reply.is_success());
    let body = success_body(fx.controller.handle(json!({"action": "getLogs"})).await);
    assert_eq!(body["logs"], json!([]));
}

#[tokio::test]
async fn test_debug_steps_chain_through_envelopes() {
    let fx = fixture();

    let body = success_body(
        fx.controller
            .handle(json!({"action": "runParseVideosStep"}))
            .await,
    );
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let body = success_body(
        fx.controller
            .handle(json!({
                "action": "runGPTGetTop10ByTitleStep",
                "params": {"userQuery": "async"}
            }))
            .await,
    );
    let ranked = body["data"].clone();
    assert_eq!(ranked[0]["title"], ASYNC);

    // Inputs may arrive as JSON text, the way a form field delivers them
    let body = success_body(
        fx.controller
            .handle(json!({
                "action": "runTranscriptionStep",
                "params": {"top10Json": ranked.to_string()}
            }))
            .await,
    );
    let transcripts = body["results"].clone();
    assert_eq!(transcripts.as_array().unwrap().len(), 1);
    assert_eq!(transcripts[0]["transcript"][0]["chunk"], 1);

    let body = success_body(
        fx.controller
            .handle(json!({
                "action": "runGPTDeepEvalStep",
                "params": {"userQuery": "async", "videoJson": transcripts}
            }))
            .await,
    );
    let evaluations = body["results"].clone();
    assert_eq!(evaluations[0]["revisedScore"], 9.0);

    let body = success_body(
        fx.controller
            .handle(json!({
                "action": "runClipGenerationStep",
                "params": {
                    "userQuery": "async",
                    "transcriptJson": transcripts,
                    "deepEvalJson": evaluations
                }
            }))
            .await,
    );
    assert_eq!(body["results"][0]["clips"].as_array().unwrap().len(), 3);

    // Debug steps never write the stored results
    assert!(fx.store.get("aiScenarioResults").await.unwrap().is_none());
}

#[tokio::test]
async fn test_scroll_step_envelope() {
    let fx = fixture();

    let reply = fx
        .controller
        .handle(json!({"action": "runScrollStep", "params": {"count": 2, "delayMs": 0}}))
        .await;
    assert!(reply.is_success());
    assert_eq!(fx.host.scrolls.load(Ordering::SeqCst), 2);

    let reply = fx
        .controller
        .handle(json!({
            "action": "runScrollStep",
            "params": {"count": 1, "delayMs": 0},
            "targetId": "elsewhere"
        }))
        .await;
    assert!(matches!(reply, Reply::Error { ref message } if message.contains("elsewhere")));
}

#[tokio::test]
async fn test_store_values_are_plain_json() {
    let store = MemoryStore::new();
    store
        .set(
            "aiScenarioResults",
            json!([{"title": "T", "videoId": "v", "score": 8.0, "clips": []}]),
        )
        .await
        .unwrap();

    let loaded = load_results(&store).await.unwrap();
    assert_eq!(loaded[0].video_id, "v");

    store.set("k", json!(1)).await.unwrap();
    store.set("k", json!({"n": 2})).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!({"n": 2})));
    assert!(store.get("missing").await.unwrap().is_none());
}

fn previous_results() -> Vec<VideoClips> {
    vec![VideoClips {
        title: "Kept from last run".to_string(),
        video_id: "old1".to_string(),
        score: 8.0,
        clips: Vec::new(),
    }]
}

async fn run_to_end(fx: &Fixture) -> RunInstance {
    let engine = fx.controller.engine();
    let id = engine
        .run_registered(
            SCENARIO_ID,
            Params::new().with(USER_QUERY, "quantum knitting"),
            TargetHandle::from("tab-1"),
        )
        .unwrap();
    engine.wait(id).await.unwrap()
}

#[tokio::test]
async fn test_no_matching_videos_keeps_previous_results() {
    let fx = fixture_with(
        ScenarioConfig {
            scroll_times: 1,
            scroll_delay_ms: 0,
            ..ScenarioConfig::default()
        },
        "No such videos available.",
    );
    save_results(fx.store.as_ref(), &previous_results()).await.unwrap();

    let finished = run_to_end(&fx).await;

    assert_eq!(finished.status, InstanceStatus::Failed);
    assert!(finished.error.unwrap().contains("No candidate"));
    assert_eq!(finished.steps_completed, 2);
    assert!(fx.transcripts.requested.lock().unwrap().is_empty());
    assert_eq!(fx.model.prompt_count(), 1);

    let stored = load_results(fx.store.as_ref()).await.unwrap();
    assert_eq!(stored, previous_results());
}

#[tokio::test]
async fn test_only_unscraped_titles_keeps_previous_results() {
    let fx = fixture_with(
        ScenarioConfig {
            scroll_times: 1,
            scroll_delay_ms: 0,
            ..ScenarioConfig::default()
        },
        "A video nobody scraped;0.9\nAnother one;0.4",
    );
    save_results(fx.store.as_ref(), &previous_results()).await.unwrap();

    let finished = run_to_end(&fx).await;

    assert_eq!(finished.status, InstanceStatus::Failed);
    let ranked: Vec<Value> = finished.results.get(keys::RANKED).unwrap().unwrap();
    assert!(ranked.iter().all(|r| r["videoId"] == "ID_NOT_FOUND"));
    assert!(fx.transcripts.requested.lock().unwrap().is_empty());
    assert_eq!(load_results(fx.store.as_ref()).await.unwrap(), previous_results());
}

#[tokio::test]
async fn test_clip_step_skips_transcript_without_usable_chunks() {
    let fx = fixture_with(
        ScenarioConfig {
            scroll_delay_ms: 0,
            clip_chunk_indices: vec![2, 5],
            ..ScenarioConfig::default()
        },
        default_ranking(),
    );

    let body = success_body(
        fx.controller
            .handle(json!({
                "action": "runClipGenerationStep",
                "params": {
                    "userQuery": "async",
                    "transcriptJson": [{
                        "title": ASYNC,
                        "videoId": "asy2",
                        "transcript": [{"chunk": 1, "start": 0.0, "text": "00:00:00: Short."}]
                    }],
                    "deepEvalJson": [{
                        "title": ASYNC,
                        "videoId": "asy2",
                        "revisedScore": 9.0,
                        "summary": "Short talk."
                    }]
                }
            }))
            .await,
    );

    assert_eq!(body["results"], json!([]));
    assert_eq!(fx.model.prompt_count(), 0);
    assert!(fx
        .controller
        .journal()
        .entries()
        .iter()
        .any(|entry| entry.level == LogLevel::Warn && entry.message.contains("no usable chunks")));
}

#[tokio::test]
async fn test_debug_step_failure_message_is_passed_through() {
    let fx = fixture();

    let reply = fx
        .controller
        .handle(json!({
            "action": "runTranscriptionStep",
            "params": {"top10Json": [{
                "title": "A video nobody scraped",
                "videoId": "ID_NOT_FOUND",
                "relevanceScore10": 5
            }]}
        }))
        .await;

    assert_eq!(reply, Reply::error("No candidate videos matched the query"));
    assert!(fx.transcripts.requested.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_prune_finished_action() {
    let fx = fixture();
    success_body(fx.controller.handle(json!({"action": "runParseVideosStep"})).await);

    let body = success_body(fx.controller.handle(json!({"action": "getStatus"})).await);
    assert_eq!(body["instances"].as_array().unwrap().len(), 1);

    let body = success_body(fx.controller.handle(json!({"action": "pruneFinished"})).await);
    assert_eq!(body["pruned"], 1);

    let body = success_body(fx.controller.handle(json!({"action": "getStatus"})).await);
    assert_eq!(body["instances"], json!([]));
}
