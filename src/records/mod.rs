//! Typed records written to the output stores.
//!
//! All structs in this module mirror how harvested data is serialized to
//! disk: one JSON object per line, UTF-8. Counts are integers; durations are
//! ISO-8601 strings passed through from upstream verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line in `videos.jsonl`. Written exactly once per video; the ledger
/// enforces the once-ness across reruns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    /// ISO-8601 duration (e.g. `PT4M13S`), upstream representation untouched.
    pub duration: String,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub comment_count: u64,
}

/// Which path produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    /// Remote caption track fetched from the captions service.
    Captions,
    /// Locally transcribed from downloaded audio.
    Transcribed,
}

/// A single timed chunk of transcript text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start offset in seconds.
    pub start: f64,
    /// Duration in seconds.
    pub duration: f64,
    pub text: String,
}

/// One line in `transcripts.jsonl`. At most one per video; absent when both
/// extraction paths come up empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub video_id: String,
    pub source: TranscriptSource,
    /// Detected language, only populated when `source` is `transcribed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub segments: Vec<TranscriptSegment>,
}

/// One line in `comments.jsonl`. Zero or many per video, in upstream page
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub video_id: String,
    pub text: String,
    pub author: String,
    #[serde(default)]
    pub like_count: u64,
    pub published_at: DateTime<Utc>,
}

/// An independent unit of per-video completion tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Metadata,
    Transcript,
    Comments,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Metadata => write!(f, "metadata"),
            Stage::Transcript => write!(f, "transcript"),
            Stage::Comments => write!(f, "comments"),
        }
    }
}

/// One line in `ledger.jsonl`. The union of all entries ever appended for a
/// video ID is its authoritative done-state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub video_id: String,
    pub stage: Stage,
}
