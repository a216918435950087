use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::CaptionFragment;
use crate::config::TranscriptConfig;
use crate::error::{PipelineError, Result};

/// Anything that can produce raw caption fragments for a video id
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_transcript(&self, video_id: &str) -> Result<Vec<CaptionFragment>>;
}

/// Transcript provider reached over HTTPS (`GET endpoint?v=<id>&api_key=<key>`)
pub struct HttpTranscriptClient {
    config: TranscriptConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptPayload {
    transcripts: Option<Value>,
}

impl HttpTranscriptClient {
    pub fn new(config: TranscriptConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl TranscriptSource for HttpTranscriptClient {
    async fn fetch_transcript(&self, video_id: &str) -> Result<Vec<CaptionFragment>> {
        debug!("Fetching transcript for {} from {}", video_id, self.config.endpoint);

        let mut query = vec![("v", video_id)];
        if let Some(api_key) = self.config.api_key.as_deref() {
            query.push(("api_key", api_key));
        }

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::from_response(response).await);
        }

        let body = response.text().await?;
        decode_body(video_id, &body)
    }
}

/// A 200 whose body is not a JSON object is a format problem, not a transport one.
fn decode_body(video_id: &str, body: &str) -> Result<Vec<CaptionFragment>> {
    let payload: TranscriptPayload = serde_json::from_str(body).map_err(|e| {
        PipelineError::Format(format!("Transcript response for {} is not JSON: {}", video_id, e))
    })?;
    parse_transcripts(video_id, payload.transcripts)
}

/// The payload must carry a `transcripts` array of `{start, text}` fragments.
fn parse_transcripts(video_id: &str, transcripts: Option<Value>) -> Result<Vec<CaptionFragment>> {
    match transcripts {
        Some(items @ Value::Array(_)) => serde_json::from_value(items).map_err(|e| {
            PipelineError::Format(format!("Malformed transcript fragments for {}: {}", video_id, e))
        }),
        _ => Err(PipelineError::Format(format!(
            "Transcript missing or not an array for video {}",
            video_id
        ))),
    }
}
