//! Prompt builders for the recommendation pipeline

use crate::bridge::{VideoRecord, MISSING_FIELD};

/// `Title;Duration` per line, skipping cards without a known duration.
pub fn format_video_list(videos: &[VideoRecord]) -> String {
    videos
        .iter()
        .filter(|v| !v.title.is_empty() && v.title != MISSING_FIELD)
        .filter(|v| !v.duration.is_empty() && v.duration != MISSING_FIELD)
        .map(|v| format!("{};{}", v.title, v.duration))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn rank_by_title(user_query: &str, video_list: &str, top_n: usize) -> String {
    format!(
        "You are a precise video-matching assistant. You receive a user request and a list of \
videos as \"Video Title;Duration\" lines (duration in HH:MM:SS or MM:SS).\n\
If the request mentions available viewing time, drop videos longer than that (allow about two \
minutes of tolerance). Score every remaining title from 0.0 (unrelated) to 1.0 (perfect match) \
using the title only. Keep titles scoring at least 0.4, sorted by score descending, at most \
{top_n}.\n\
Answer with one \"Video Title;Relevance Score\" line per video, copying the title exactly and \
rounding the score to two decimals. No other text. If nothing qualifies, answer: \
No such videos available.\n\
User request: {user_query}\n\
Available videos:\n{video_list}"
    )
}

pub fn deep_eval(
    user_query: &str,
    title: &str,
    duration: &str,
    initial_score: i64,
    transcript_excerpt: &str,
) -> String {
    format!(
        "You are an expert video analyst refining recommendations. Judge one video against the \
user's intent using its title, duration, an initial score (1-10) and the start of its transcript. \
Adjust the initial score up or down on the same 1-10 scale.\n\
If the revised score is 7 or higher, write a factual 3-5 sentence summary of what the video \
covers, based only on the transcript and without mentioning the user's query. Otherwise the \
summary is N/A.\n\
[User Query]: {user_query}\n\
[Video Title]: {title}\n\
[Duration]: {duration}\n\
[Initial Score]: {initial_score}\n\
[Transcript Excerpt]: {transcript_excerpt}\n\n\
Respond strictly as:\n\
Revised Score: <score>\n\
Summary: <summary or N/A>\n"
    )
}

pub fn clips(user_query: &str, transcript: &str) -> String {
    format!(
        "You are a video curator. From the transcript below pick the three most compelling \
self-contained segments (each at most two minutes) that show why the video is worth watching: \
a clear answer to an interesting question, a short story, or a focused debate. Use the user's \
query to judge relevance.\n\
Output exactly three lines and nothing else, each as:\n\
Start: MM:SS – End: MM:SS | Short catchy title\n\
[User Query]: {user_query}\n\
[Full Transcript]: {transcript}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_list_skips_unknown_durations() {
        let videos: Vec<VideoRecord> = serde_json::from_value(serde_json::json!([
            {"videoId": "a", "title": "Tokio tutorial", "duration": "12:01"},
            {"videoId": "b", "title": "No duration"},
            {"videoId": "c", "title": "Async book", "duration": "1:02:03"}
        ]))
        .unwrap();

        assert_eq!(
            format_video_list(&videos),
            "Tokio tutorial;12:01\nAsync book;1:02:03"
        );
    }

    #[test]
    fn test_prompts_embed_inputs() {
        let prompt = deep_eval("learn rust", "Rust in 10 min", "10:00", 8, "00:00:01: Hi.");
        assert!(prompt.contains("[Initial Score]: 8"));
        assert!(prompt.contains("Revised Score:"));
        assert!(rank_by_title("q", "A;1:00", 10).contains("at most 10"));
    }
}
