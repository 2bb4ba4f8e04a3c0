//! Upstream provider adapters and the contracts the orchestrator drives them
//! through.
//!
//! Each upstream (metadata listing, captions, comment threads) paginates
//! differently; they are unified here as independent pagers yielding pages
//! with a typed terminal outcome, rather than forced under a shared base
//! type. Every adapter validates upstream payloads into typed records at its
//! boundary so malformed data fails fast instead of propagating.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub mod captions;
pub mod youtube;

use crate::records::{CommentRecord, TranscriptSegment, VideoRecord};

/// How an upstream call failed, from the orchestrator's point of view. The
/// variant decides whether the stage completes, retries on the next run, or
/// stops the provider for the rest of the run.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Expected negative outcome: the resource does not exist or the feature
    /// is switched off upstream. The stage still completes.
    #[error("unavailable upstream: {0}")]
    Unavailable(String),

    /// Timeout, rate limit, 5xx, or malformed payload. Retryable: the stage
    /// is left incomplete so the next run picks it up again.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The provider's quota is burned for the day. No further calls are
    /// issued to it this run; already-fetched data is preserved.
    #[error("provider quota exhausted")]
    QuotaExhausted,

    /// Missing credential, unknown channel, and similar. Aborts the affected
    /// channel only, never the whole run.
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    /// Whether the error leaves the stage incomplete for a future run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_) | ProviderError::QuotaExhausted
        )
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A lazy finite sequence of pages. `Ok(None)` is the typed terminal
/// outcome; an `Err` mid-walk surfaces per the [`ProviderError`] taxonomy.
///
/// Page order matters: each page's fetch depends on the continuation token
/// from the previous one, so implementations are pulled strictly in order.
#[async_trait]
pub trait Pager: Send {
    type Item;

    async fn next_page(&mut self) -> ProviderResult<Option<Vec<Self::Item>>>;
}

/// Drain a pager to exhaustion, preserving page order.
pub async fn drain<P: Pager>(pager: &mut P) -> ProviderResult<Vec<P::Item>> {
    let mut items = Vec::new();
    while let Some(page) = pager.next_page().await? {
        items.extend(page);
    }
    Ok(items)
}

/// An entry from the channel's upload listing: just enough to decide whether
/// the video falls inside the lookback window.
#[derive(Debug, Clone)]
pub struct ListedVideo {
    pub video_id: String,
    pub published_at: DateTime<Utc>,
}

/// Channel/video listing and batched metadata lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// IDs of videos published since `since`, newest first. The upstream
    /// listing is assumed reverse-chronological; if it is not, the walk stops
    /// early rather than crashing.
    async fn list_recent_videos(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<String>>;

    /// Metadata for up to `video_ids.len()` videos, batched internally.
    /// Unknown or deleted IDs are simply absent from the result map.
    async fn fetch_metadata_batch(
        &self,
        video_ids: &[String],
    ) -> ProviderResult<HashMap<String, VideoRecord>>;
}

/// Outcome of asking the captions service for a video's caption track.
#[derive(Debug, Clone)]
pub enum CaptionsOutcome {
    /// An ordered caption track, ready to persist.
    Segments(Vec<TranscriptSegment>),
    /// Captions are disabled, missing, or the video itself is gone. A normal
    /// negative outcome, distinct from a transient fetch error.
    Unavailable(CaptionsUnavailable),
}

/// Why no caption track could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionsUnavailable {
    Disabled,
    NotFound,
    VideoUnavailable,
}

impl std::fmt::Display for CaptionsUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptionsUnavailable::Disabled => write!(f, "captions disabled"),
            CaptionsUnavailable::NotFound => write!(f, "no caption track found"),
            CaptionsUnavailable::VideoUnavailable => write!(f, "video unavailable"),
        }
    }
}

/// Remote captions lookup. Implementations must distinguish "no captions"
/// (an [`CaptionsOutcome::Unavailable`] value) from a transient fetch error
/// (an `Err`), since only the former completes the transcript stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptionSource: Send + Sync {
    async fn fetch_captions(&self, video_id: &str) -> ProviderResult<CaptionsOutcome>;
}

/// Outcome of walking a video's comment threads to exhaustion.
#[derive(Debug, Clone)]
pub enum CommentsOutcome {
    /// Comments are disabled for this video: a zero-length success.
    Disabled,
    /// Every top-level comment, concatenated in page order.
    Comments(Vec<CommentRecord>),
}

/// Paginated comment-thread walker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommentsProvider: Send + Sync {
    async fn fetch_all_comments(&self, video_id: &str) -> ProviderResult<CommentsOutcome>;
}
