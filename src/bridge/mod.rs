//! Host bridge: page scroll and card scrape as engine-callable operations.
//!
//! Steps never touch a page directly. They go through the [`HostBridge`] held by
//! their `RunContext`, which speaks the content-script message protocol
//! (`performSingleScroll`, `parseAllVideoCards`) to whatever host owns the target.

pub mod html;

pub use html::{parse_video_cards, HtmlPageHost};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

use crate::engine::{RunContext, TargetHandle};
use crate::error::{PipelineError, Result};

const MODULE: &str = "HostBridge";

/// Placeholder for scraped text fields the page did not provide
pub const MISSING_FIELD: &str = "—";

/// Message sent to the content side of a target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ContentRequest {
    PerformSingleScroll { step: u32 },
    ParseAllVideoCards,
}

/// `{status, data?, message?}` envelope returned by the content side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ContentResponse {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            status: "success".to_string(),
            data,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    fn error_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "Unknown content script error".to_string())
    }
}

/// One scraped video card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub video_id: String,
    #[serde(default = "missing")]
    pub title: String,
    #[serde(default = "missing")]
    pub duration: String,
    #[serde(default = "missing")]
    pub channel_name: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "missing")]
    pub views: String,
    #[serde(default = "missing")]
    pub published: String,
    #[serde(default)]
    pub thumbnail_url: String,
}

fn missing() -> String {
    MISSING_FIELD.to_string()
}

/// Capability interface to the page host
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Deliver one request to the content side of `target`. Transport-level
    /// failures (no such target, host gone) are `HostUnavailable`.
    async fn send_to_content(
        &self,
        target: &TargetHandle,
        request: ContentRequest,
    ) -> Result<ContentResponse>;

    /// Single incremental scroll of `step_px` pixels
    async fn scroll(&self, target: &TargetHandle, step_px: u32) -> Result<()> {
        let response = self
            .send_to_content(target, ContentRequest::PerformSingleScroll { step: step_px })
            .await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(PipelineError::HostUnavailable(response.error_message()))
        }
    }

    /// All distinct video cards currently rendered on the target
    async fn scrape(&self, target: &TargetHandle) -> Result<Vec<VideoRecord>> {
        let response = match self
            .send_to_content(target, ContentRequest::ParseAllVideoCards)
            .await
        {
            Ok(response) => response,
            Err(PipelineError::HostUnavailable(message)) => {
                return Err(PipelineError::Scrape(message))
            }
            Err(e) => return Err(e),
        };

        if !response.is_success() {
            return Err(PipelineError::Scrape(response.error_message()));
        }

        let records: Vec<VideoRecord> = match response.data {
            Some(data) => serde_json::from_value(data)
                .map_err(|e| PipelineError::Format(format!("Video card payload: {}", e)))?,
            None => Vec::new(),
        };
        Ok(dedup_by_video_id(records))
    }
}

/// Keep the first record for every videoId, preserving page order.
pub fn dedup_by_video_id(records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.video_id.clone()))
        .collect()
}

/// Scroll the run's target `times` times, pausing `delay` between scrolls and
/// checkpointing around every page action.
pub async fn scroll_page(
    ctx: &RunContext,
    times: u32,
    delay: Duration,
    step_px: u32,
) -> Result<()> {
    ctx.log().info(
        MODULE,
        format!("📜 Scrolling {} times ({} px, {} ms pause)", times, step_px, delay.as_millis()),
    );

    for i in 0..times {
        ctx.check()?;
        let host = ctx.host();
        ctx.checkpoint()
            .settle(host.scroll(ctx.target(), step_px))
            .await?;
        ctx.log().debug(MODULE, format!("Scroll {}/{}", i + 1, times));

        if i + 1 < times {
            ctx.checkpoint().sleep(delay).await?;
        }
    }

    ctx.log().success(MODULE, "✅ Scrolling finished");
    Ok(())
}

/// Scrape distinct video cards from the run's target.
pub async fn scrape_video_cards(ctx: &RunContext) -> Result<Vec<VideoRecord>> {
    ctx.check()?;
    ctx.log().info(MODULE, "🔍 Requesting video card parse");

    let host = ctx.host();
    match ctx.checkpoint().settle(host.scrape(ctx.target())).await {
        Ok(videos) => {
            ctx.log()
                .success(MODULE, format!("✅ Parsed {} videos", videos.len()));
            Ok(videos)
        }
        Err(e) => {
            if !e.is_cancelled() {
                ctx.log().error(MODULE, format!("❌ Parse failed: {}", e));
            }
            Err(e)
        }
    }
}
