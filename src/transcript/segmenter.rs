//! Sentence-bounded, token-budgeted transcript chunking.
//!
//! Caption providers cut fragments on timing, not on grammar. The segmenter
//! first re-cuts them on sentence terminators, stamps each sentence block with
//! its start time, then packs the stamped lines greedily into chunks whose
//! estimated token count stays within the budget.

use serde::{Deserialize, Serialize};

use super::{CaptionFragment, TranscriptChunk};

/// Default token budget per chunk
pub const DEFAULT_TOKEN_BUDGET: usize = 3000;

/// Average characters per token used for the estimate
const CHARS_PER_TOKEN: f64 = 2.7;

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// How consecutive fragment texts are glued inside one block
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FragmentJoin {
    /// Verbatim, for providers that keep inter-word spacing inside fragments
    #[default]
    Concat,
    /// One space, for providers that trim every fragment
    Space,
}

/// A merged sentence block
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceBlock {
    pub start: f64,
    pub text: String,
}

impl SentenceBlock {
    /// `HH:MM:SS: text`
    pub fn to_line(&self) -> String {
        format!("{}: {}", format_timestamp(self.start), self.text)
    }
}

/// Transcript segmenter
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    budget: usize,
    join: FragmentJoin,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_BUDGET)
    }
}

impl Segmenter {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            join: FragmentJoin::default(),
        }
    }

    pub fn with_join(mut self, join: FragmentJoin) -> Self {
        self.join = join;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Full pipeline: merge, stamp, pack.
    pub fn segment(&self, fragments: &[CaptionFragment]) -> Vec<TranscriptChunk> {
        let blocks = self.merge_sentences(fragments);
        self.pack(&blocks)
    }

    /// Re-cut fragments on sentence terminators. A split remainder opens a new
    /// block that inherits the start time of the fragment it came from.
    pub fn merge_sentences(&self, fragments: &[CaptionFragment]) -> Vec<SentenceBlock> {
        let Some((first, rest)) = fragments.split_first() else {
            return Vec::new();
        };

        let mut blocks = Vec::new();
        let mut current_text = first.text.clone();
        let mut current_start = first.start;

        for next in rest {
            if is_sentence_end(&current_text) {
                push_block(&mut blocks, current_start, &current_text);
                current_text = next.text.clone();
                current_start = next.start;
                continue;
            }

            match first_sentence_end(&next.text) {
                None => self.append(&mut current_text, &next.text),
                Some(pos) => {
                    self.append(&mut current_text, &next.text[..pos]);
                    push_block(&mut blocks, current_start, &current_text);
                    current_text = next.text[pos..].trim().to_string();
                    current_start = next.start;
                }
            }
        }

        push_block(&mut blocks, current_start, &current_text);
        blocks
    }

    /// Greedy packing of stamped lines into budgeted chunks. A line that alone
    /// exceeds the budget is emitted as its own chunk, unsplit.
    pub fn pack(&self, blocks: &[SentenceBlock]) -> Vec<TranscriptChunk> {
        let mut chunks: Vec<(f64, Vec<String>)> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_start = 0.0;
        let mut current_chars = 0usize;

        for block in blocks {
            let line = block.to_line();
            let line_chars = line.chars().count();
            let candidate_chars = if current.is_empty() {
                line_chars
            } else {
                current_chars + 1 + line_chars
            };

            if tokens_for_chars(candidate_chars) <= self.budget {
                if current.is_empty() {
                    current_start = block.start;
                }
                current.push(line);
                current_chars = candidate_chars;
            } else if current.is_empty() {
                chunks.push((block.start, vec![line]));
            } else {
                chunks.push((current_start, std::mem::take(&mut current)));
                current.push(line);
                current_start = block.start;
                current_chars = line_chars;
            }
        }

        if !current.is_empty() {
            chunks.push((current_start, current));
        }

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, (start, lines))| TranscriptChunk {
                chunk: i + 1,
                start,
                text: lines.join("\n"),
            })
            .collect()
    }

    fn append(&self, current: &mut String, text: &str) {
        if self.join == FragmentJoin::Space && !current.is_empty() {
            current.push(' ');
        }
        current.push_str(text);
    }
}

/// Estimated token count: characters / 2.7, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.chars().count())
}

fn tokens_for_chars(chars: usize) -> usize {
    (chars as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// `HH:MM:SS`, flooring fractional seconds. Hours are not wrapped at 24.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Empty or whitespace-only text counts as a sentence end.
fn is_sentence_end(text: &str) -> bool {
    text.trim()
        .chars()
        .last()
        .map_or(true, |c| TERMINATORS.contains(&c))
}

/// Byte offset just past the first terminator
fn first_sentence_end(text: &str) -> Option<usize> {
    text.find(TERMINATORS).map(|i| i + 1)
}

fn push_block(blocks: &mut Vec<SentenceBlock>, start: f64, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        blocks.push(SentenceBlock {
            start,
            text: text.to_string(),
        });
    }
}
