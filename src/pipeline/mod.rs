//! The orchestration engine: per-channel, per-video extraction across the
//! three upstream sources.
//!
//! For every channel the pipeline discovers candidate videos, then runs the
//! metadata, transcript, and comment stages per video, consulting the ledger
//! before each stage and marking it complete only after the stage's output
//! is durably written. Failures are isolated per video and per stage: a
//! transient error leaves its stage incomplete for the next run and never
//! aborts sibling videos, sibling stages, or other channels.

use chrono::{Duration, Utc};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::sync::Arc;

use crate::providers::{CommentsOutcome, CommentsProvider, MetadataProvider};
use crate::records::{Stage, TranscriptRecord, TranscriptSource, VideoRecord};
use crate::store::{Ledger, OutputStores};
use crate::transcribe::TranscriptResolver;

/// Knobs the orchestration core consumes; everything here is opaque
/// configuration to it.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// How far back to harvest, in days.
    pub lookback_days: i64,
    pub skip_transcripts: bool,
    pub skip_comments: bool,
    /// Concurrent per-video workers. Network-bound; local transcription has
    /// its own serialization inside the speech engine.
    pub workers: usize,
    /// Politeness pause after each caption fetch, since that path hits
    /// endpoints without a quota-managed credential.
    pub caption_delay: std::time::Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            lookback_days: 2 * 365,
            skip_transcripts: false,
            skip_comments: false,
            workers: 4,
            caption_delay: std::time::Duration::from_millis(1500),
        }
    }
}

/// Per-channel, per-stage summary. Nonzero failure counts are reported, not
/// fatal.
#[derive(Debug, Default)]
pub struct ChannelStats {
    pub channel_id: String,
    /// The listing call itself failed; nothing could be processed.
    pub listing_failed: bool,
    pub videos_listed: usize,
    pub metadata_written: usize,
    pub metadata_already: usize,
    /// Listed but absent from the batch response (deleted or private).
    pub metadata_missing: usize,
    pub metadata_failed: usize,
    pub transcripts_captions: usize,
    pub transcripts_transcribed: usize,
    /// Definitive "no transcript exists" outcomes.
    pub transcripts_absent: usize,
    pub transcript_failures: usize,
    pub comment_videos: usize,
    pub comments_written: usize,
    pub comments_disabled: usize,
    pub comment_failures: usize,
}

impl ChannelStats {
    fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: VideoOutcome) {
        self.transcripts_captions += outcome.transcripts_captions;
        self.transcripts_transcribed += outcome.transcripts_transcribed;
        self.transcripts_absent += outcome.transcripts_absent;
        self.transcript_failures += outcome.transcript_failures;
        self.comment_videos += outcome.comment_videos;
        self.comments_written += outcome.comments_written;
        self.comments_disabled += outcome.comments_disabled;
        self.comment_failures += outcome.comment_failures;
    }

    pub fn failures(&self) -> usize {
        self.metadata_failed + self.transcript_failures + self.comment_failures
    }
}

impl std::fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.listing_failed {
            return write!(f, "channel {}: listing failed, nothing processed", self.channel_id);
        }
        writeln!(
            f,
            "channel {}: {} videos in window",
            self.channel_id, self.videos_listed
        )?;
        writeln!(
            f,
            "  metadata:    {} written, {} already done, {} missing, {} failed",
            self.metadata_written, self.metadata_already, self.metadata_missing, self.metadata_failed
        )?;
        writeln!(
            f,
            "  transcripts: {} from captions, {} transcribed, {} absent, {} failed",
            self.transcripts_captions,
            self.transcripts_transcribed,
            self.transcripts_absent,
            self.transcript_failures
        )?;
        write!(
            f,
            "  comments:    {} across {} videos, {} disabled, {} failed",
            self.comments_written, self.comment_videos, self.comments_disabled, self.comment_failures
        )
    }
}

/// What one worker produced for one video.
#[derive(Debug, Default)]
struct VideoOutcome {
    transcripts_captions: usize,
    transcripts_transcribed: usize,
    transcripts_absent: usize,
    transcript_failures: usize,
    comment_videos: usize,
    comments_written: usize,
    comments_disabled: usize,
    comment_failures: usize,
}

/// The per-channel harvest driver.
pub struct HarvestPipeline {
    metadata: Arc<dyn MetadataProvider>,
    resolver: TranscriptResolver,
    comments: Arc<dyn CommentsProvider>,
    ledger: Arc<Ledger>,
    stores: Arc<OutputStores>,
    options: HarvestOptions,
}

impl HarvestPipeline {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        resolver: TranscriptResolver,
        comments: Arc<dyn CommentsProvider>,
        ledger: Arc<Ledger>,
        stores: Arc<OutputStores>,
        options: HarvestOptions,
    ) -> Self {
        Self {
            metadata,
            resolver,
            comments,
            ledger,
            stores,
            options,
        }
    }

    /// Harvest one channel. Always returns stats; per-video and per-stage
    /// errors are logged and counted, never propagated.
    pub async fn process_channel(&self, channel_id: &str) -> ChannelStats {
        let mut stats = ChannelStats::new(channel_id);
        let since = Utc::now() - Duration::days(self.options.lookback_days);

        let video_ids = match self.metadata.list_recent_videos(channel_id, since).await {
            Ok(ids) => dedup_preserving_order(ids),
            Err(err) => {
                tracing::error!("listing videos for channel {channel_id} failed: {err}");
                stats.listing_failed = true;
                return stats;
            }
        };
        stats.videos_listed = video_ids.len();
        tracing::info!(
            "channel {channel_id}: {} videos within lookback window",
            video_ids.len()
        );
        if video_ids.is_empty() {
            return stats;
        }

        self.metadata_stage(&video_ids, &mut stats).await;

        // Each video ID appears exactly once in the stream, so no two
        // workers ever claim the same video.
        let progress = ProgressBar::new(video_ids.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap(),
        );
        progress.set_message(format!("videos of {channel_id}"));

        let outcomes: Vec<VideoOutcome> = futures_util::stream::iter(video_ids.iter())
            .map(|video_id| {
                let progress = progress.clone();
                async move {
                    let outcome = self.process_video(video_id).await;
                    progress.inc(1);
                    outcome
                }
            })
            .buffer_unordered(self.options.workers.max(1))
            .collect()
            .await;
        progress.finish_and_clear();

        for outcome in outcomes {
            stats.absorb(outcome);
        }
        stats
    }

    /// Fetch and persist metadata for every listed video not already done.
    /// One batch call covers many videos, but completion is still tracked
    /// per video so a partial batch loses nothing.
    async fn metadata_stage(&self, video_ids: &[String], stats: &mut ChannelStats) {
        let pending = self.ledger.pending(video_ids, Stage::Metadata).await;
        stats.metadata_already = video_ids.len() - pending.len();
        if pending.is_empty() {
            tracing::debug!("all video metadata already harvested");
            return;
        }

        let records = match self.metadata.fetch_metadata_batch(&pending).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("metadata batch failed: {err}");
                stats.metadata_failed += pending.len();
                return;
            }
        };

        for video_id in &pending {
            match records.get(video_id) {
                Some(record) => match self.persist_metadata(record).await {
                    Ok(()) => stats.metadata_written += 1,
                    Err(err) => {
                        tracing::error!("persisting metadata for {video_id} failed: {err:#}");
                        stats.metadata_failed += 1;
                    }
                },
                None => {
                    tracing::debug!("no metadata returned for {video_id}");
                    stats.metadata_missing += 1;
                }
            }
        }
    }

    async fn persist_metadata(&self, record: &VideoRecord) -> crate::Result<()> {
        self.stores.videos.append(record).await?;
        self.ledger
            .mark_complete(&record.video_id, Stage::Metadata)
            .await
    }

    /// Run the transcript and comment stages for one video. The stages are
    /// independent: one failing never blocks the other.
    async fn process_video(&self, video_id: &str) -> VideoOutcome {
        let mut outcome = VideoOutcome::default();

        if !self.options.skip_transcripts
            && !self.ledger.is_complete(video_id, Stage::Transcript).await
        {
            self.transcript_stage(video_id, &mut outcome).await;
            if !self.options.caption_delay.is_zero() {
                tokio::time::sleep(self.options.caption_delay).await;
            }
        }

        if !self.options.skip_comments && !self.ledger.is_complete(video_id, Stage::Comments).await
        {
            self.comment_stage(video_id, &mut outcome).await;
        }

        outcome
    }

    async fn transcript_stage(&self, video_id: &str, outcome: &mut VideoOutcome) {
        match self.resolver.resolve(video_id).await {
            Ok(Some(record)) => {
                let source = record.source;
                match self.persist_transcript(&record).await {
                    Ok(()) => match source {
                        TranscriptSource::Captions => outcome.transcripts_captions += 1,
                        TranscriptSource::Transcribed => outcome.transcripts_transcribed += 1,
                    },
                    Err(err) => {
                        tracing::error!("persisting transcript for {video_id} failed: {err:#}");
                        outcome.transcript_failures += 1;
                    }
                }
            }
            // Definitive "nothing there": complete with no output line.
            Ok(None) => match self.ledger.mark_complete(video_id, Stage::Transcript).await {
                Ok(()) => outcome.transcripts_absent += 1,
                Err(err) => {
                    tracing::error!("ledger update for {video_id} failed: {err:#}");
                    outcome.transcript_failures += 1;
                }
            },
            Err(err) => {
                tracing::warn!("transcript stage for {video_id} failed: {err}");
                outcome.transcript_failures += 1;
            }
        }
    }

    async fn persist_transcript(&self, record: &TranscriptRecord) -> crate::Result<()> {
        self.stores.transcripts.append(record).await?;
        self.ledger
            .mark_complete(&record.video_id, Stage::Transcript)
            .await
    }

    /// Comment completeness is all-or-nothing per video: every line lands
    /// before the stage is marked, and a failure before the mark means the
    /// whole video's comments are re-fetched next run.
    async fn comment_stage(&self, video_id: &str, outcome: &mut VideoOutcome) {
        match self.comments.fetch_all_comments(video_id).await {
            Ok(CommentsOutcome::Disabled) => {
                match self.ledger.mark_complete(video_id, Stage::Comments).await {
                    Ok(()) => outcome.comments_disabled += 1,
                    Err(err) => {
                        tracing::error!("ledger update for {video_id} failed: {err:#}");
                        outcome.comment_failures += 1;
                    }
                }
            }
            Ok(CommentsOutcome::Comments(records)) => {
                for record in &records {
                    if let Err(err) = self.stores.comments.append(record).await {
                        tracing::error!("persisting comments for {video_id} failed: {err:#}");
                        outcome.comment_failures += 1;
                        return;
                    }
                }
                match self.ledger.mark_complete(video_id, Stage::Comments).await {
                    Ok(()) => {
                        outcome.comment_videos += 1;
                        outcome.comments_written += records.len();
                    }
                    Err(err) => {
                        tracing::error!("ledger update for {video_id} failed: {err:#}");
                        outcome.comment_failures += 1;
                    }
                }
            }
            Err(err) => {
                tracing::warn!("comment stage for {video_id} failed: {err}");
                outcome.comment_failures += 1;
            }
        }
    }
}

/// The upstream listing occasionally repeats entries across page boundaries;
/// a video must only be claimed once.
fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        CaptionsOutcome, CaptionsUnavailable, MockCaptionSource, MockCommentsProvider,
        MockMetadataProvider, ProviderError,
    };
    use crate::records::{CommentRecord, TranscriptSegment};
    use crate::store::{JsonlStore, ledger_path};
    use crate::transcribe::{LocalTranscript, MockSpeechEngine, SpeechEngine};
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn video_record(id: &str) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            title: format!("video {id}"),
            published_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            duration: "PT4M13S".to_string(),
            view_count: 100,
            like_count: 10,
            comment_count: 2,
        }
    }

    fn metadata_map(ids: &[&str]) -> HashMap<String, VideoRecord> {
        ids.iter().map(|id| (id.to_string(), video_record(id))).collect()
    }

    fn segments() -> Vec<TranscriptSegment> {
        vec![TranscriptSegment {
            start: 0.0,
            duration: 2.0,
            text: "hello".to_string(),
        }]
    }

    fn comment(video_id: &str, text: &str) -> CommentRecord {
        CommentRecord {
            video_id: video_id.to_string(),
            text: text.to_string(),
            author: "viewer".to_string(),
            like_count: 0,
            published_at: Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap(),
        }
    }

    fn test_options() -> HarvestOptions {
        HarvestOptions {
            workers: 2,
            caption_delay: std::time::Duration::ZERO,
            ..HarvestOptions::default()
        }
    }

    async fn build_pipeline(
        dir: &Path,
        metadata: MockMetadataProvider,
        captions: MockCaptionSource,
        engine: Option<MockSpeechEngine>,
        comments: MockCommentsProvider,
        options: HarvestOptions,
    ) -> HarvestPipeline {
        let stores = Arc::new(OutputStores::open(dir).await.unwrap());
        let ledger = Arc::new(Ledger::open(ledger_path(dir)).await.unwrap());
        let resolver = TranscriptResolver::new(
            Arc::new(captions),
            engine.map(|e| Arc::new(e) as Arc<dyn SpeechEngine>),
        );
        HarvestPipeline::new(
            Arc::new(metadata),
            resolver,
            Arc::new(comments),
            ledger,
            stores,
            options,
        )
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        if !path.exists() {
            return Vec::new();
        }
        fs_err::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_full_run_covers_every_listed_video() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Ok(vec!["v1".to_string(), "v2".to_string()]));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Ok(metadata_map(&["v1", "v2"])));

        let mut captions = MockCaptionSource::new();
        captions
            .expect_fetch_captions()
            .returning(|_| Ok(CaptionsOutcome::Segments(segments())));

        let mut comments = MockCommentsProvider::new();
        comments
            .expect_fetch_all_comments()
            .returning(|id| Ok(CommentsOutcome::Comments(vec![comment(id, "nice")])));

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCtest").await;

        assert_eq!(stats.videos_listed, 2);
        assert_eq!(stats.metadata_written, 2);
        assert_eq!(stats.transcripts_captions, 2);
        assert_eq!(stats.comment_videos, 2);
        assert_eq!(stats.comments_written, 2);
        assert_eq!(stats.failures(), 0);

        assert_eq!(read_lines(&dir.path().join("videos.jsonl")).len(), 2);
        assert_eq!(read_lines(&dir.path().join("transcripts.jsonl")).len(), 2);
        assert_eq!(read_lines(&dir.path().join("comments.jsonl")).len(), 2);
        // Three stages completed per video.
        assert_eq!(read_lines(&dir.path().join("ledger.jsonl")).len(), 6);
    }

    #[tokio::test]
    async fn test_rerun_produces_no_duplicate_lines() {
        let dir = TempDir::new().unwrap();

        let run = |dir: std::path::PathBuf, first: bool| {
            async move {
                let mut metadata = MockMetadataProvider::new();
                metadata
                    .expect_list_recent_videos()
                    .returning(|_, _| Ok(vec!["v1".to_string()]));
                let mut captions = MockCaptionSource::new();
                let mut comments = MockCommentsProvider::new();
                if first {
                    metadata
                        .expect_fetch_metadata_batch()
                        .returning(|_| Ok(metadata_map(&["v1"])));
                    captions
                        .expect_fetch_captions()
                        .returning(|_| Ok(CaptionsOutcome::Segments(segments())));
                    comments
                        .expect_fetch_all_comments()
                        .returning(|id| Ok(CommentsOutcome::Comments(vec![comment(id, "hi")])));
                }
                // On the rerun no provider expectations are registered: any
                // unexpected call panics the test.
                let pipeline = build_pipeline(
                    &dir,
                    metadata,
                    captions,
                    None,
                    comments,
                    test_options(),
                )
                .await;
                pipeline.process_channel("UCtest").await
            }
        };

        let first = run(dir.path().to_path_buf(), true).await;
        assert_eq!(first.failures(), 0);
        let second = run(dir.path().to_path_buf(), false).await;
        assert_eq!(second.failures(), 0);
        assert_eq!(second.metadata_already, 1);

        assert_eq!(read_lines(&dir.path().join("videos.jsonl")).len(), 1);
        assert_eq!(read_lines(&dir.path().join("transcripts.jsonl")).len(), 1);
        assert_eq!(read_lines(&dir.path().join("comments.jsonl")).len(), 1);
    }

    #[tokio::test]
    async fn test_transient_transcript_failure_is_isolated_and_retried() {
        let dir = TempDir::new().unwrap();
        let ids = vec!["v1".to_string(), "v2".to_string(), "v3".to_string()];

        let mut metadata = MockMetadataProvider::new();
        let listed = ids.clone();
        metadata
            .expect_list_recent_videos()
            .returning(move |_, _| Ok(listed.clone()));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Ok(metadata_map(&["v1", "v2", "v3"])));

        let mut captions = MockCaptionSource::new();
        captions.expect_fetch_captions().returning(|id| {
            if id == "v2" {
                Err(ProviderError::Transient("timeout".to_string()))
            } else {
                Ok(CaptionsOutcome::Segments(segments()))
            }
        });

        let mut comments = MockCommentsProvider::new();
        comments
            .expect_fetch_all_comments()
            .returning(|id| Ok(CommentsOutcome::Comments(vec![comment(id, "ok")])));

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCtest").await;

        // The failing video's other stages still complete.
        assert_eq!(stats.transcripts_captions, 2);
        assert_eq!(stats.transcript_failures, 1);
        assert_eq!(stats.comment_videos, 3);

        let ledger = Ledger::open(ledger_path(dir.path())).await.unwrap();
        assert!(ledger.is_complete("v1", Stage::Transcript).await);
        assert!(!ledger.is_complete("v2", Stage::Transcript).await);
        assert!(ledger.is_complete("v3", Stage::Transcript).await);
        assert!(ledger.is_complete("v2", Stage::Metadata).await);
        assert!(ledger.is_complete("v2", Stage::Comments).await);
        drop(ledger);

        // The rerun touches only the one incomplete stage.
        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(move |_, _| Ok(vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]));
        let mut captions = MockCaptionSource::new();
        captions
            .expect_fetch_captions()
            .with(eq("v2"))
            .returning(|_| Ok(CaptionsOutcome::Segments(segments())));
        let comments = MockCommentsProvider::new();

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCtest").await;
        assert_eq!(stats.transcripts_captions, 1);
        assert_eq!(stats.failures(), 0);

        assert_eq!(read_lines(&dir.path().join("transcripts.jsonl")).len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_comments_is_success_with_zero_lines() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Ok(vec!["v1".to_string()]));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Ok(metadata_map(&["v1"])));

        let mut captions = MockCaptionSource::new();
        captions
            .expect_fetch_captions()
            .returning(|_| Ok(CaptionsOutcome::Segments(segments())));

        let mut comments = MockCommentsProvider::new();
        comments
            .expect_fetch_all_comments()
            .returning(|_| Ok(CommentsOutcome::Disabled));

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCtest").await;

        assert_eq!(stats.comments_disabled, 1);
        assert_eq!(stats.comment_failures, 0);
        assert!(read_lines(&dir.path().join("comments.jsonl")).is_empty());

        let ledger = Ledger::open(ledger_path(dir.path())).await.unwrap();
        assert!(ledger.is_complete("v1", Stage::Comments).await);
    }

    #[tokio::test]
    async fn test_fallback_writes_transcribed_record() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Ok(vec!["v1".to_string()]));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Ok(metadata_map(&["v1"])));

        let mut captions = MockCaptionSource::new();
        captions
            .expect_fetch_captions()
            .returning(|_| Ok(CaptionsOutcome::Unavailable(CaptionsUnavailable::Disabled)));
        let mut engine = MockSpeechEngine::new();
        engine.expect_transcribe().returning(|_| {
            Ok(LocalTranscript {
                language: "de".to_string(),
                segments: segments(),
            })
        });

        let mut comments = MockCommentsProvider::new();
        comments
            .expect_fetch_all_comments()
            .returning(|_| Ok(CommentsOutcome::Comments(Vec::new())));

        let pipeline = build_pipeline(
            dir.path(),
            metadata,
            captions,
            Some(engine),
            comments,
            test_options(),
        )
        .await;
        let stats = pipeline.process_channel("UCtest").await;

        assert_eq!(stats.transcripts_transcribed, 1);
        let transcripts = read_lines(&dir.path().join("transcripts.jsonl"));
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0]["source"], "transcribed");
        assert_eq!(transcripts[0]["language"], "de");
        assert!(!transcripts[0]["segments"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_exhaustion_preserves_fetched_data() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Ok(vec!["v1".to_string(), "v2".to_string()]));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Err(ProviderError::QuotaExhausted));

        let mut captions = MockCaptionSource::new();
        captions
            .expect_fetch_captions()
            .returning(|_| Ok(CaptionsOutcome::Segments(segments())));

        let mut comments = MockCommentsProvider::new();
        comments
            .expect_fetch_all_comments()
            .returning(|_| Err(ProviderError::QuotaExhausted));

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCtest").await;

        // Metadata and comments burn quota, but caption fetches still land
        // and nothing already written is lost.
        assert_eq!(stats.metadata_failed, 2);
        assert_eq!(stats.comment_failures, 2);
        assert_eq!(stats.transcripts_captions, 2);
        assert!(read_lines(&dir.path().join("videos.jsonl")).is_empty());
        assert_eq!(read_lines(&dir.path().join("transcripts.jsonl")).len(), 2);

        let ledger = Ledger::open(ledger_path(dir.path())).await.unwrap();
        assert!(!ledger.is_complete("v1", Stage::Metadata).await);
        assert!(!ledger.is_complete("v1", Stage::Comments).await);
        assert!(ledger.is_complete("v1", Stage::Transcript).await);
    }

    #[tokio::test]
    async fn test_skip_flags_short_circuit_stages() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Ok(vec!["v1".to_string()]));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Ok(metadata_map(&["v1"])));

        // No expectations: a call to either stage provider panics.
        let captions = MockCaptionSource::new();
        let comments = MockCommentsProvider::new();

        let options = HarvestOptions {
            skip_transcripts: true,
            skip_comments: true,
            ..test_options()
        };
        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, options).await;
        let stats = pipeline.process_channel("UCtest").await;

        assert_eq!(stats.metadata_written, 1);
        assert_eq!(stats.transcripts_captions + stats.transcripts_absent, 0);
        assert_eq!(stats.comment_videos, 0);
    }

    #[tokio::test]
    async fn test_deleted_video_omitted_from_batch_stays_pending() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Ok(vec!["v1".to_string(), "gone".to_string()]));
        metadata
            .expect_fetch_metadata_batch()
            .returning(|_| Ok(metadata_map(&["v1"])));

        let mut captions = MockCaptionSource::new();
        captions
            .expect_fetch_captions()
            .returning(|_| Ok(CaptionsOutcome::Unavailable(CaptionsUnavailable::VideoUnavailable)));
        let mut comments = MockCommentsProvider::new();
        comments
            .expect_fetch_all_comments()
            .returning(|_| Ok(CommentsOutcome::Comments(Vec::new())));

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCtest").await;

        assert_eq!(stats.metadata_written, 1);
        assert_eq!(stats.metadata_missing, 1);
        // The omitted video's other stages still ran independently.
        assert_eq!(stats.transcripts_absent, 2);

        let ledger = Ledger::open(ledger_path(dir.path())).await.unwrap();
        assert!(!ledger.is_complete("gone", Stage::Metadata).await);
        assert!(ledger.is_complete("gone", Stage::Transcript).await);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_channel_only() {
        let dir = TempDir::new().unwrap();

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_list_recent_videos()
            .returning(|_, _| Err(ProviderError::Fatal("channel not found".to_string())));
        let captions = MockCaptionSource::new();
        let comments = MockCommentsProvider::new();

        let pipeline =
            build_pipeline(dir.path(), metadata, captions, None, comments, test_options()).await;
        let stats = pipeline.process_channel("UCbroken").await;
        assert!(stats.listing_failed);
        assert_eq!(stats.videos_listed, 0);
    }

    #[test]
    fn test_dedup_preserving_order() {
        let ids = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
        ];
        assert_eq!(dedup_preserving_order(ids), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_output_store_helper_is_quiet_on_missing_file() {
        // Guards the test helper itself: an absent store reads as empty.
        let dir = TempDir::new().unwrap();
        assert!(read_lines(&dir.path().join("nope.jsonl")).is_empty());
        let store = JsonlStore::open(dir.path().join("x.jsonl")).await.unwrap();
        assert!(read_lines(store.path()).is_empty());
    }
}
