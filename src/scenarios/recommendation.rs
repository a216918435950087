//! The AI video recommendation pipeline:
//! scroll → scrape → rank by title → transcripts → deep evaluation → clips → persist.
//!
//! Every stage is its own [`Step`] so the control surface can run any of them
//! alone against caller-supplied inputs. Stages hand data to each other through
//! the results slot under the keys in [`keys`].

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{self, VideoRecord, MISSING_FIELD};
use crate::config::ScenarioConfig;
use crate::engine::{RunContext, Scenario, Step};
use crate::error::{PipelineError, Result};
use crate::llm::{
    parse_clips, parse_deep_eval, parse_ranked_list, prompts, ModelClient, RankedCandidate,
    ScoredVideo, VideoClips,
};
use crate::state::{save_results, ResultStore};
use crate::transcript::{Segmenter, TranscriptSource, VideoTranscript};

pub const SCENARIO_ID: &str = "ai-video-recommendation";

const MODULE: &str = "AIRecommendationScenario";

/// Input parameter holding the user's request
pub const USER_QUERY: &str = "userQuery";

/// Results slot keys shared by the pipeline stages
pub mod keys {
    pub const VIDEOS: &str = "videos";
    pub const RANKED: &str = "ranked";
    pub const TRANSCRIPTS: &str = "transcripts";
    pub const EVALUATIONS: &str = "evaluations";
    pub const CLIPS: &str = "clips";
}

/// Collaborators and tuning shared by all recommendation steps
#[derive(Clone)]
pub struct RecommendationPipeline {
    model: Arc<dyn ModelClient>,
    transcripts: Arc<dyn TranscriptSource>,
    store: Arc<dyn ResultStore>,
    segmenter: Segmenter,
    settings: ScenarioConfig,
}

impl RecommendationPipeline {
    pub fn new(
        model: Arc<dyn ModelClient>,
        transcripts: Arc<dyn TranscriptSource>,
        store: Arc<dyn ResultStore>,
        segmenter: Segmenter,
        settings: ScenarioConfig,
    ) -> Self {
        Self {
            model,
            transcripts,
            store,
            segmenter,
            settings,
        }
    }

    pub fn settings(&self) -> &ScenarioConfig {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// The full seven-stage scenario
    pub fn scenario(&self) -> Scenario {
        Scenario::new(SCENARIO_ID, "AI: video recommendation by query")
            .with_description(
                "Full pipeline: scroll -> parse -> rank titles -> transcripts -> \
                 deep evaluation -> clips -> save",
            )
            .with_required_param(USER_QUERY)
            .with_shared_step(self.scroll_step(
                self.settings.scroll_times,
                Duration::from_millis(self.settings.scroll_delay_ms),
                self.settings.scroll_step_px,
            ))
            .with_shared_step(self.parse_step())
            .with_shared_step(self.rank_step())
            .with_shared_step(self.transcript_step())
            .with_shared_step(self.deep_eval_step())
            .with_shared_step(self.clip_step())
            .with_shared_step(self.persist_step())
    }

    pub fn scroll_step(&self, times: u32, delay: Duration, step_px: u32) -> Arc<dyn Step> {
        Arc::new(ScrollStep {
            times,
            delay,
            step_px,
        })
    }

    pub fn parse_step(&self) -> Arc<dyn Step> {
        Arc::new(ParseVideosStep)
    }

    pub fn rank_step(&self) -> Arc<dyn Step> {
        Arc::new(RankByTitleStep {
            model: Arc::clone(&self.model),
            top_n: self.settings.top_n,
        })
    }

    pub fn transcript_step(&self) -> Arc<dyn Step> {
        Arc::new(TranscriptStep {
            source: Arc::clone(&self.transcripts),
            segmenter: self.segmenter,
        })
    }

    pub fn deep_eval_step(&self) -> Arc<dyn Step> {
        Arc::new(DeepEvalStep {
            model: Arc::clone(&self.model),
            default_initial_score: self.settings.default_initial_score,
        })
    }

    pub fn clip_step(&self) -> Arc<dyn Step> {
        Arc::new(ClipStep {
            model: Arc::clone(&self.model),
            clip_videos: self.settings.clip_videos,
            chunk_indices: self.settings.clip_chunk_indices.clone(),
        })
    }

    pub fn persist_step(&self) -> Arc<dyn Step> {
        Arc::new(PersistStep {
            store: Arc::clone(&self.store),
        })
    }
}

fn user_query(ctx: &RunContext) -> Result<String> {
    ctx.params()
        .get_str(USER_QUERY)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Precondition("Empty user query".to_string()))
}

/// Later stages have nothing to work on unless at least one ranked title
/// matched a scraped card.
fn require_resolved(ranked: &[RankedCandidate]) -> Result<()> {
    if ranked.iter().any(RankedCandidate::is_resolved) {
        Ok(())
    } else {
        Err(PipelineError::Precondition(
            "No candidate videos matched the query".to_string(),
        ))
    }
}

/// Item-level failures are logged and skipped; cancellation always propagates.
fn skip_item(ctx: &RunContext, what: &str, error: PipelineError) -> Result<()> {
    if error.is_cancelled() {
        return Err(error);
    }
    ctx.log().error(MODULE, format!("❌ {} failed: {}", what, error));
    Ok(())
}

struct ScrollStep {
    times: u32,
    delay: Duration,
    step_px: u32,
}

#[async_trait]
impl Step for ScrollStep {
    fn name(&self) -> &str {
        "scroll"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        bridge::scroll_page(ctx, self.times, self.delay, self.step_px).await
    }
}

struct ParseVideosStep;

#[async_trait]
impl Step for ParseVideosStep {
    fn name(&self) -> &str {
        "parse-videos"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let videos = bridge::scrape_video_cards(ctx).await?;
        ctx.log()
            .info(MODULE, format!("Found {} videos", videos.len()));
        ctx.results_mut().insert(keys::VIDEOS, &videos)
    }
}

struct RankByTitleStep {
    model: Arc<dyn ModelClient>,
    top_n: usize,
}

#[async_trait]
impl Step for RankByTitleStep {
    fn name(&self) -> &str {
        "rank-by-title"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let query = user_query(ctx)?;
        let videos: Vec<VideoRecord> = ctx.results().require(keys::VIDEOS)?;

        let video_list = prompts::format_video_list(&videos);
        if video_list.is_empty() {
            return Err(PipelineError::Precondition(
                "No videos with a known duration to rank".to_string(),
            ));
        }

        ctx.log().info(MODULE, format!("📝 User query: \"{}\"", query));
        let prompt = prompts::rank_by_title(&query, &video_list, self.top_n);
        let answer = ctx.checkpoint().settle(self.model.ask(&prompt)).await?;
        ctx.log().debug(MODULE, format!("📋 Raw ranking answer: {}", answer));

        let mut ranked = parse_ranked_list(&answer, &videos);
        ranked.truncate(self.top_n);

        let unresolved = ranked.iter().filter(|c| !c.is_resolved()).count();
        if unresolved > 0 {
            ctx.log().warn(
                MODULE,
                format!("⚠️ {} ranked title(s) matched no scraped video", unresolved),
            );
        }
        ctx.results_mut().insert(keys::RANKED, &ranked)?;
        require_resolved(&ranked)?;

        ctx.log()
            .success(MODULE, format!("✅ Ranked {} candidates", ranked.len()));
        Ok(())
    }
}

struct TranscriptStep {
    source: Arc<dyn TranscriptSource>,
    segmenter: Segmenter,
}

#[async_trait]
impl Step for TranscriptStep {
    fn name(&self) -> &str {
        "transcripts"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let ranked: Vec<RankedCandidate> = ctx.results().require(keys::RANKED)?;
        require_resolved(&ranked)?;
        let mut transcripts: Vec<VideoTranscript> = Vec::new();
        ctx.results_mut().insert(keys::TRANSCRIPTS, &transcripts)?;

        for candidate in &ranked {
            ctx.check()?;
            if !candidate.is_resolved() {
                ctx.log().warn(
                    MODULE,
                    format!("⚠️ Skipping \"{}\": no video id", candidate.title),
                );
                continue;
            }

            ctx.log().info(
                MODULE,
                format!("📝 Transcript for \"{}\" ({})", candidate.title, candidate.video_id),
            );
            let fetched = ctx
                .checkpoint()
                .settle(self.source.fetch_transcript(&candidate.video_id))
                .await;

            let fragments = match fetched {
                Ok(fragments) => fragments,
                Err(e) => {
                    skip_item(ctx, &format!("Transcript for \"{}\"", candidate.title), e)?;
                    continue;
                }
            };

            let chunks = self.segmenter.segment(&fragments);
            ctx.log().success(
                MODULE,
                format!(
                    "✅ Transcript for \"{}\" ready ({} chunks)",
                    candidate.title,
                    chunks.len()
                ),
            );

            transcripts.push(VideoTranscript {
                title: candidate.title.clone(),
                video_id: candidate.video_id.clone(),
                transcript: chunks,
            });
            ctx.results_mut().insert(keys::TRANSCRIPTS, &transcripts)?;
        }

        ctx.log().info(
            MODULE,
            format!("Transcripts processed: {}/{}", transcripts.len(), ranked.len()),
        );
        Ok(())
    }
}

struct DeepEvalStep {
    model: Arc<dyn ModelClient>,
    default_initial_score: i64,
}

#[async_trait]
impl Step for DeepEvalStep {
    fn name(&self) -> &str {
        "deep-eval"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let query = user_query(ctx)?;
        let transcripts: Vec<VideoTranscript> = ctx.results().require(keys::TRANSCRIPTS)?;
        let ranked: Vec<RankedCandidate> = ctx.results().get(keys::RANKED)?.unwrap_or_default();
        let videos: Vec<VideoRecord> = ctx.results().get(keys::VIDEOS)?.unwrap_or_default();

        let mut evaluations: Vec<ScoredVideo> = Vec::new();
        ctx.results_mut().insert(keys::EVALUATIONS, &evaluations)?;

        for video in &transcripts {
            ctx.check()?;
            ctx.log()
                .info(MODULE, format!("📝 Evaluating \"{}\"", video.title));

            let initial_score = ranked
                .iter()
                .find(|c| c.video_id == video.video_id)
                .map(|c| c.relevance_score10)
                .unwrap_or(self.default_initial_score);
            let duration = videos
                .iter()
                .find(|v| v.video_id == video.video_id)
                .map(|v| v.duration.as_str())
                .unwrap_or(MISSING_FIELD);
            let excerpt = video
                .transcript
                .first()
                .map(|chunk| chunk.text.as_str())
                .unwrap_or_default();

            let prompt = prompts::deep_eval(&query, &video.title, duration, initial_score, excerpt);
            let answer = match ctx.checkpoint().settle(self.model.ask(&prompt)).await {
                Ok(answer) => answer,
                Err(e) => {
                    skip_item(ctx, &format!("Evaluation of \"{}\"", video.title), e)?;
                    continue;
                }
            };

            let eval = parse_deep_eval(&answer);
            ctx.log().success(
                MODULE,
                format!(
                    "✅ \"{}\" scored {} (initial {})",
                    video.title, eval.revised_score, initial_score
                ),
            );

            evaluations.push(ScoredVideo {
                title: video.title.clone(),
                video_id: video.video_id.clone(),
                revised_score: eval.revised_score,
                summary: eval.summary,
            });
            ctx.results_mut().insert(keys::EVALUATIONS, &evaluations)?;
        }

        ctx.log()
            .info(MODULE, format!("Evaluations done: {}", evaluations.len()));
        Ok(())
    }
}

struct ClipStep {
    model: Arc<dyn ModelClient>,
    clip_videos: usize,
    chunk_indices: Vec<usize>,
}

#[async_trait]
impl Step for ClipStep {
    fn name(&self) -> &str {
        "clips"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let query = user_query(ctx)?;
        let transcripts: Vec<VideoTranscript> = ctx.results().require(keys::TRANSCRIPTS)?;
        let mut evaluations: Vec<ScoredVideo> = ctx.results().require(keys::EVALUATIONS)?;

        // Stable sort keeps model order among equal scores
        evaluations.sort_by(|a, b| {
            b.revised_score
                .partial_cmp(&a.revised_score)
                .unwrap_or(Ordering::Equal)
        });
        evaluations.truncate(self.clip_videos);

        let mut results: Vec<VideoClips> = Vec::new();
        ctx.results_mut().insert(keys::CLIPS, &results)?;

        for video in &evaluations {
            ctx.check()?;

            let Some(transcript) = transcripts.iter().find(|t| t.video_id == video.video_id) else {
                ctx.log().warn(
                    MODULE,
                    format!("⚠️ No transcript for video {}", video.video_id),
                );
                continue;
            };

            let excerpt = self
                .chunk_indices
                .iter()
                .filter_map(|&i| transcript.transcript.get(i))
                .map(|chunk| chunk.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            if excerpt.is_empty() {
                ctx.log().warn(
                    MODULE,
                    format!("⚠️ Transcript for \"{}\" has no usable chunks", video.title),
                );
                continue;
            }

            ctx.log()
                .info(MODULE, format!("📝 Clips for \"{}\"", video.title));
            let prompt = prompts::clips(&query, &excerpt);
            let answer = match ctx.checkpoint().settle(self.model.ask(&prompt)).await {
                Ok(answer) => answer,
                Err(e) => {
                    skip_item(ctx, &format!("Clips for \"{}\"", video.title), e)?;
                    continue;
                }
            };

            let clips = parse_clips(&answer);
            ctx.log().success(
                MODULE,
                format!("✅ {} clip(s) for \"{}\"", clips.len(), video.title),
            );

            results.push(VideoClips {
                title: video.title.clone(),
                video_id: video.video_id.clone(),
                score: video.revised_score,
                clips,
            });
            ctx.results_mut().insert(keys::CLIPS, &results)?;
        }

        Ok(())
    }
}

struct PersistStep {
    store: Arc<dyn ResultStore>,
}

#[async_trait]
impl Step for PersistStep {
    fn name(&self) -> &str {
        "persist"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let clips: Vec<VideoClips> = ctx.results().require(keys::CLIPS)?;
        ctx.check()?;
        save_results(self.store.as_ref(), &clips).await?;
        ctx.log()
            .success(MODULE, format!("💾 Saved {} result(s)", clips.len()));
        Ok(())
    }
}
