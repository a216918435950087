//! Parsers for free-text model answers.
//!
//! The model is untrusted: every parser here degrades to skipping lines or to
//! defaults instead of failing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bridge::VideoRecord;

/// videoId used when a ranked title matches no scraped card
pub const ID_NOT_FOUND: &str = "ID_NOT_FOUND";

const CLIP_LINE: &str =
    r"Start:\s*(\d{1,2}(?::\d{1,2}){1,2})\s*[–—-]\s*End:\s*(\d{1,2}(?::\d{1,2}){1,2})\s*\|\s*(.+)";

/// Title-ranking result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    pub title: String,
    pub video_id: String,
    /// Model score in [0, 1] scaled to 0..=10
    pub relevance_score10: i64,
}

impl RankedCandidate {
    pub fn is_resolved(&self) -> bool {
        self.video_id != ID_NOT_FOUND
    }
}

/// Parsed deep-evaluation answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeepEval {
    pub revised_score: f64,
    pub summary: String,
}

impl Default for DeepEval {
    fn default() -> Self {
        Self {
            revised_score: 0.0,
            summary: "N/A".to_string(),
        }
    }
}

/// Deep-evaluation result for one video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoredVideo {
    pub title: String,
    pub video_id: String,
    pub revised_score: f64,
    pub summary: String,
}

/// Highlight segment suggested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipSuggestion {
    pub start: String,
    pub end: String,
    pub title: String,
}

impl ClipSuggestion {
    pub fn start_seconds(&self) -> Option<u32> {
        time_to_seconds(&self.start)
    }

    pub fn end_seconds(&self) -> Option<u32> {
        time_to_seconds(&self.end)
    }
}

/// Final pipeline item: clips for one top-scoring video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoClips {
    pub title: String,
    pub video_id: String,
    pub score: f64,
    pub clips: Vec<ClipSuggestion>,
}

/// Parse `Title;Score` lines. Lines without `;` or without a leading number in
/// the score field are skipped (this also drops a `Video Title;Relevance Score`
/// header). Titles resolve to videoIds by exact match against `known`.
pub fn parse_ranked_list(text: &str, known: &[VideoRecord]) -> Vec<RankedCandidate> {
    let mut ranked = Vec::new();

    for line in text.lines() {
        let mut fields = line.split(';');
        let (Some(title), Some(score)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some(score) = leading_number(score) else {
            debug!("Skipping ranked line without a numeric score: {}", line);
            continue;
        };

        let title = title.trim().to_string();
        let video_id = known
            .iter()
            .find(|video| video.title == title)
            .map(|video| video.video_id.clone())
            .unwrap_or_else(|| ID_NOT_FOUND.to_string());

        ranked.push(RankedCandidate {
            title,
            video_id,
            relevance_score10: (score * 10.0 + 0.5).floor() as i64,
        });
    }

    ranked
}

/// Extract `Revised Score:` and `Summary:` lines. Later lines win; a missing
/// or non-numeric score is 0 and a missing summary is "N/A".
pub fn parse_deep_eval(text: &str) -> DeepEval {
    let mut eval = DeepEval::default();

    for line in text.lines().map(str::trim_start) {
        if let Some(rest) = line.strip_prefix("Revised Score:") {
            eval.revised_score = leading_number(rest).unwrap_or(0.0);
        }
        if let Some(rest) = line.strip_prefix("Summary:") {
            eval.summary = rest.trim().to_string();
        }
    }

    eval
}

/// Parse `Start: <t> – End: <t> | <title>` lines.
pub fn parse_clips(text: &str) -> Vec<ClipSuggestion> {
    let re = match Regex::new(CLIP_LINE) {
        Ok(re) => re,
        Err(e) => {
            warn!("Clip pattern failed to compile: {}", e);
            return Vec::new();
        }
    };

    let mut clips = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match re.captures(line) {
            Some(caps) => clips.push(ClipSuggestion {
                start: normalize_time(&caps[1]),
                end: normalize_time(&caps[2]),
                title: caps[3].trim().to_string(),
            }),
            None => debug!("Skipping unmatched clip line: {}", line),
        }
    }

    clips
}

/// `00:MM:SS` becomes `MM:SS`; a non-zero hour is kept as `H:MM:SS`.
fn normalize_time(time: &str) -> String {
    let parts: Vec<&str> = time.split(':').collect();
    match parts.as_slice() {
        [hours, minutes, seconds] => match hours.parse::<u32>() {
            Ok(0) => format!("{}:{}", minutes, seconds),
            Ok(h) => format!("{}:{}:{}", h, minutes, seconds),
            Err(_) => time.to_string(),
        },
        _ => time.to_string(),
    }
}

fn time_to_seconds(time: &str) -> Option<u32> {
    let parts = time
        .split(':')
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [m, s] => Some(m * 60 + s),
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}

/// Longest numeric prefix after leading whitespace, the way a lenient float
/// reader treats `0.8 (good match)`.
fn leading_number(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, title: &str) -> VideoRecord {
        serde_json::from_value(serde_json::json!({"videoId": id, "title": title})).unwrap()
    }

    #[test]
    fn test_ranked_list_tolerates_garbage() {
        let ranked = parse_ranked_list("Foo;0.80\ngarbage no semicolon", &[video("f1", "Foo")]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "Foo");
        assert_eq!(ranked[0].video_id, "f1");
        assert_eq!(ranked[0].relevance_score10, 8);
    }

    #[test]
    fn test_ranked_list_header_and_unknown_titles() {
        let text = "Video Title;Relevance Score\n Bar ;0.45 (partial)\nBaz;n/a";
        let ranked = parse_ranked_list(text, &[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "Bar");
        assert_eq!(ranked[0].video_id, ID_NOT_FOUND);
        assert!(!ranked[0].is_resolved());
        assert_eq!(ranked[0].relevance_score10, 5);
    }

    #[test]
    fn test_deep_eval_defaults() {
        assert_eq!(parse_deep_eval("I cannot help with that."), DeepEval::default());

        let eval = parse_deep_eval("Revised Score: seven\nSummary: ");
        assert_eq!(eval.revised_score, 0.0);
        assert_eq!(eval.summary, "");
    }

    #[test]
    fn test_deep_eval_reads_fields_anywhere() {
        let text =
            "Some preamble\n  Revised Score: 8.5/10\nSummary: Видео о Rust.\nRevised Score: 9";
        let eval = parse_deep_eval(text);
        assert_eq!(eval.revised_score, 9.0);
        assert_eq!(eval.summary, "Видео о Rust.");
    }

    #[test]
    fn test_clip_normalization() {
        let clips = parse_clips("Start: 00:01:30 – End: 00:02:00 | Заголовок");
        assert_eq!(
            clips,
            vec![ClipSuggestion {
                start: "01:30".to_string(),
                end: "02:00".to_string(),
                title: "Заголовок".to_string(),
            }]
        );
        assert_eq!(clips[0].start_seconds(), Some(90));
        assert_eq!(clips[0].end_seconds(), Some(120));
    }

    #[test]
    fn test_clip_dash_variants_and_hours() {
        let text = "Here you go:\n\
                    Start: 1:02:03 - End: 1:03:00 | Long one\n\n\
                    Start: 04:10 — End: 05:00 | Short\n\
                    nonsense";
        let clips = parse_clips(text);
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].start, "1:02:03");
        assert_eq!(clips[0].start_seconds(), Some(3723));
        assert_eq!(clips[1].end, "05:00");
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("0.80"), Some(0.8));
        assert_eq!(leading_number("  .5x"), Some(0.5));
        assert_eq!(leading_number("7/10"), Some(7.0));
        assert_eq!(leading_number("1e1"), Some(10.0));
        assert_eq!(leading_number("abc"), None);
        assert_eq!(leading_number("."), None);
    }
}
