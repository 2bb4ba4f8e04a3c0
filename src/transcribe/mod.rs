//! Two-tier transcript resolution: remote captions first, local
//! transcription second.
//!
//! The cheap path is always exhausted before the expensive one; a video with
//! captions available never triggers a local transcription job.

use async_trait::async_trait;
use std::sync::Arc;

use crate::providers::{CaptionSource, CaptionsOutcome, ProviderError, ProviderResult};
use crate::records::{TranscriptRecord, TranscriptSegment, TranscriptSource};

pub mod whisper;

/// What the local engine produces for one video.
#[derive(Debug, Clone)]
pub struct LocalTranscript {
    pub language: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Local speech-to-text over a video's audio. Synchronous from the caller's
/// point of view; a single job can take seconds to minutes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(&self, video_id: &str) -> ProviderResult<LocalTranscript>;
}

/// Per-video state machine:
/// `TryCaptions -> (hit: source=captions)
///              | (miss -> TryLocal) -> (hit: source=transcribed) | (miss: no record)`.
///
/// `Ok(None)` means both paths came up definitively empty: the stage is
/// complete with nothing to persist. A transient error from either path
/// surfaces as `Err` so the stage stays incomplete and retries next run.
pub struct TranscriptResolver {
    captions: Arc<dyn CaptionSource>,
    engine: Option<Arc<dyn SpeechEngine>>,
}

impl TranscriptResolver {
    /// `engine` is `None` when the local fallback is disabled; caption misses
    /// are then definitive.
    pub fn new(captions: Arc<dyn CaptionSource>, engine: Option<Arc<dyn SpeechEngine>>) -> Self {
        Self { captions, engine }
    }

    pub async fn resolve(&self, video_id: &str) -> ProviderResult<Option<TranscriptRecord>> {
        match self.captions.fetch_captions(video_id).await? {
            CaptionsOutcome::Segments(segments) => Ok(Some(TranscriptRecord {
                video_id: video_id.to_string(),
                source: TranscriptSource::Captions,
                language: None,
                segments,
            })),
            CaptionsOutcome::Unavailable(reason) => {
                let Some(engine) = &self.engine else {
                    tracing::debug!("{reason} for {video_id}, local fallback disabled");
                    return Ok(None);
                };
                tracing::info!("{reason} for {video_id}, falling back to local transcription");
                match engine.transcribe(video_id).await {
                    Ok(transcript) => Ok(Some(TranscriptRecord {
                        video_id: video_id.to_string(),
                        source: TranscriptSource::Transcribed,
                        language: Some(transcript.language),
                        segments: transcript.segments,
                    })),
                    Err(ProviderError::Unavailable(msg)) => {
                        tracing::debug!(
                            "local transcription produced nothing for {video_id}: {msg}"
                        );
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }
}
