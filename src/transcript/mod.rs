pub mod client;
pub mod segmenter;

pub use client::{HttpTranscriptClient, TranscriptSource};
pub use segmenter::{
    estimate_tokens, format_timestamp, FragmentJoin, Segmenter, DEFAULT_TOKEN_BUDGET,
};

use serde::{Deserialize, Deserializer, Serialize};

/// Raw caption fragment as returned by the transcript provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptionFragment {
    /// Start offset in seconds
    #[serde(deserialize_with = "lenient_seconds")]
    pub start: f64,
    #[serde(default)]
    pub text: String,
}

impl CaptionFragment {
    pub fn new(start: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            text: text.into(),
        }
    }
}

/// Token-budgeted block of transcript lines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptChunk {
    /// 1-based position within the transcript
    pub chunk: usize,
    /// Start offset of the first line, in seconds
    pub start: f64,
    /// Newline-joined `HH:MM:SS: sentence` lines
    pub text: String,
}

/// Chunked transcript of one ranked video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoTranscript {
    pub title: String,
    pub video_id: String,
    pub transcript: Vec<TranscriptChunk>,
}

/// Providers disagree on whether offsets are numbers or numeric strings.
fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(f64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid start offset: {}", s))),
    }
}
