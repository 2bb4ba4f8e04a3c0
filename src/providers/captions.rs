//! Remote caption-track adapter, built on yt-dlp.
//!
//! Track discovery runs `yt-dlp --dump-json` for the video, picks the best
//! caption track (manual over auto-generated, original language over
//! others), then fetches the track's `json3` payload over HTTP and converts
//! its events into timed segments.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{CaptionSource, CaptionsOutcome, CaptionsUnavailable, ProviderError, ProviderResult};
use crate::records::TranscriptSegment;
use crate::utils::watch_url;

pub struct CaptionTrackClient {
    yt_dlp_path: String,
    http: reqwest::Client,
}

impl CaptionTrackClient {
    pub fn new(yt_dlp_path: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            yt_dlp_path: yt_dlp_path.into(),
            http,
        })
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Enumerate the video's caption tracks without downloading media.
    async fn probe(&self, video_id: &str) -> ProviderResult<VideoProbe> {
        let url = watch_url(video_id);
        tracing::debug!("probing caption tracks for {video_id}");

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-playlist", "--skip-download", &url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_yt_dlp_failure(&stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ProviderError::Transient(format!("malformed yt-dlp output: {e}")))
    }

    async fn fetch_track(&self, url: &str) -> ProviderResult<Vec<TranscriptSegment>> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Transient(format!("caption fetch timed out: {e}"))
            } else {
                ProviderError::Transient(format!("caption fetch failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "caption fetch failed: HTTP {}",
                response.status()
            )));
        }

        let track: Json3Track = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("malformed caption payload: {e}")))?;

        Ok(events_to_segments(track))
    }
}

#[async_trait]
impl CaptionSource for CaptionTrackClient {
    async fn fetch_captions(&self, video_id: &str) -> ProviderResult<CaptionsOutcome> {
        let probe = match self.probe(video_id).await {
            Ok(probe) => probe,
            // A gone/private video is a definitive negative, not a retry.
            Err(ProviderError::Unavailable(_)) => {
                return Ok(CaptionsOutcome::Unavailable(
                    CaptionsUnavailable::VideoUnavailable,
                ));
            }
            Err(err) => return Err(err),
        };

        let Some(track_url) = select_track(&probe) else {
            let reason = if probe.subtitles.is_empty() && probe.automatic_captions.is_empty() {
                CaptionsUnavailable::Disabled
            } else {
                CaptionsUnavailable::NotFound
            };
            return Ok(CaptionsOutcome::Unavailable(reason));
        };

        let segments = self.fetch_track(&track_url).await?;
        if segments.is_empty() {
            return Ok(CaptionsOutcome::Unavailable(CaptionsUnavailable::NotFound));
        }
        Ok(CaptionsOutcome::Segments(segments))
    }
}

/// Best caption track URL, or None when the video has no usable track.
/// Manual subtitles beat auto-generated ones; within each, the video's
/// original language beats English beats whatever else exists.
fn select_track(probe: &VideoProbe) -> Option<String> {
    let preferred = probe.language.as_deref().unwrap_or("en");
    pick_track(&probe.subtitles, preferred)
        .or_else(|| pick_track(&probe.automatic_captions, preferred))
}

fn pick_track(tracks: &BTreeMap<String, Vec<CaptionTrack>>, preferred: &str) -> Option<String> {
    let json3_url = |list: &[CaptionTrack]| {
        list.iter()
            .find(|t| t.ext == "json3")
            .map(|t| t.url.clone())
    };

    if let Some(url) = tracks.get(preferred).and_then(|list| json3_url(list)) {
        return Some(url);
    }
    // Regional variants ("en-US" when asked for "en").
    for (lang, list) in tracks {
        if lang.starts_with(preferred) {
            if let Some(url) = json3_url(list) {
                return Some(url);
            }
        }
    }
    if preferred != "en" {
        if let Some(url) = tracks.get("en").and_then(|list| json3_url(list)) {
            return Some(url);
        }
    }
    tracks.values().find_map(|list| json3_url(list))
}

/// Convert json3 events to segments, dropping styling-only events and the
/// newline placeholders the format pads transcripts with.
fn events_to_segments(track: Json3Track) -> Vec<TranscriptSegment> {
    track
        .events
        .into_iter()
        .filter_map(|event| {
            let segs = event.segs?;
            let text: String = segs.into_iter().map(|s| s.utf8).collect();
            let text = text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment {
                start: event.t_start_ms as f64 / 1000.0,
                duration: event.d_duration_ms as f64 / 1000.0,
                text,
            })
        })
        .collect()
}

/// Classify a failed yt-dlp invocation: a gone/private video is a definitive
/// negative, anything else (network, throttling, tool breakage) retries.
pub(crate) fn classify_yt_dlp_failure(stderr: &str) -> ProviderError {
    const GONE_MARKERS: &[&str] = &[
        "Video unavailable",
        "Private video",
        "This video has been removed",
        "account associated with this video has been terminated",
    ];
    if GONE_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        ProviderError::Unavailable("video unavailable".to_string())
    } else {
        ProviderError::Transient(format!("yt-dlp probe failed: {}", stderr.trim()))
    }
}

// ---------------------------------------------------------------------------
// yt-dlp and json3 wire formats (the subset this adapter reads).
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VideoProbe {
    /// Manually authored subtitle tracks, keyed by language code.
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<CaptionTrack>>,
    /// Auto-generated tracks, keyed by language code.
    #[serde(default)]
    automatic_captions: BTreeMap<String, Vec<CaptionTrack>>,
    /// Original language of the video, when upstream knows it.
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CaptionTrack {
    #[serde(default)]
    ext: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct Json3Track {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: u64,
    #[serde(default)]
    d_duration_ms: u64,
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}
