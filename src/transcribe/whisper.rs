//! Local speech-to-text engine: yt-dlp audio download plus the Whisper CLI.
//!
//! Loading the model is memory-bound, so jobs are serialized through a
//! semaphore sized at construction (one permit unless configured otherwise).
//! The engine is built once at startup and shared by handle.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::{LocalTranscript, SpeechEngine};
use crate::providers::captions::classify_yt_dlp_failure;
use crate::providers::{ProviderError, ProviderResult};
use crate::records::TranscriptSegment;
use crate::utils::watch_url;

pub struct WhisperEngine {
    whisper_path: String,
    yt_dlp_path: String,
    model: String,
    jobs: Semaphore,
}

impl WhisperEngine {
    pub fn new(
        whisper_path: impl Into<String>,
        yt_dlp_path: impl Into<String>,
        model: impl Into<String>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            whisper_path: whisper_path.into(),
            yt_dlp_path: yt_dlp_path.into(),
            model: model.into(),
            jobs: Semaphore::new(max_concurrent_jobs.max(1)),
        }
    }

    /// Download the smallest usable audio rendition for transcription.
    async fn download_audio(&self, video_id: &str, output_path: &Path) -> ProviderResult<()> {
        let url = watch_url(video_id);
        tracing::debug!("downloading audio for {video_id}");

        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--output",
                &output_path.to_string_lossy(),
                "--extract-audio",
                "--audio-format",
                "mp3",
                // Lowest quality is still plenty for speech recognition.
                "--audio-quality",
                "9",
                "--format",
                "worstaudio[acodec^=mp4a]/worstaudio[ext=m4a]/worstaudio[ext=mp3]/worstaudio",
                "--no-playlist",
                "--concurrent-fragments",
                "4",
                "--newline",
                &url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_yt_dlp_failure(&stderr));
        }

        Ok(())
    }

    async fn run_whisper(&self, audio_path: &Path, output_dir: &Path) -> ProviderResult<()> {
        let output = Command::new(&self.whisper_path)
            .arg(audio_path)
            .args(["--model", &self.model])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(output_dir)
            .args(["--verbose", "False"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to run whisper: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Transient(format!(
                "whisper failed: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl SpeechEngine for WhisperEngine {
    async fn transcribe(&self, video_id: &str) -> ProviderResult<LocalTranscript> {
        let _permit = self
            .jobs
            .acquire()
            .await
            .map_err(|_| ProviderError::Transient("transcription engine shut down".to_string()))?;

        let workdir = TempDir::new()
            .map_err(|e| ProviderError::Transient(format!("cannot create temp dir: {e}")))?;
        let audio_path = workdir.path().join(format!("{video_id}.mp3"));

        self.download_audio(video_id, &audio_path).await?;
        if !audio_path.exists() {
            return Err(ProviderError::Transient(format!(
                "audio file missing after download: {}",
                audio_path.display()
            )));
        }

        tracing::info!("transcribing {video_id} locally (model {})", self.model);
        self.run_whisper(&audio_path, workdir.path()).await?;

        let json_path = workdir.path().join(format!("{video_id}.json"));
        let content = fs_err::read_to_string(&json_path)
            .map_err(|e| ProviderError::Transient(format!("cannot read whisper output: {e}")))?;
        let parsed: WhisperOutput = serde_json::from_str(&content)
            .map_err(|e| ProviderError::Transient(format!("malformed whisper output: {e}")))?;

        let transcript = to_transcript(parsed);
        if transcript.segments.is_empty() {
            return Err(ProviderError::Unavailable(
                "no speech detected in audio".to_string(),
            ));
        }
        Ok(transcript)
    }
}

/// Whisper's JSON output (the subset this engine reads).
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperJsonSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonSegment {
    start: f64,
    end: f64,
    text: String,
}

fn to_transcript(output: WhisperOutput) -> LocalTranscript {
    let segments = output
        .segments
        .into_iter()
        .filter_map(|seg| {
            let text = seg.text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment {
                start: seg.start,
                duration: (seg.end - seg.start).max(0.0),
                text,
            })
        })
        .collect();

    let language = if output.language.is_empty() {
        "unknown".to_string()
    } else {
        output.language
    };

    LocalTranscript { language, segments }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_transcript_converts_end_times_to_durations() {
        let output: WhisperOutput = serde_json::from_str(
            r#"{
                "text": "hello there",
                "language": "en",
                "segments": [
                    {"id": 0, "start": 0.0, "end": 2.4, "text": " hello"},
                    {"id": 1, "start": 2.4, "end": 5.0, "text": " there "}
                ]
            }"#,
        )
        .unwrap();
        let transcript = to_transcript(output);
        assert_eq!(transcript.language, "en");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].text, "hello");
        assert!((transcript.segments[0].duration - 2.4).abs() < f64::EPSILON);
        assert!((transcript.segments[1].start - 2.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_to_transcript_drops_blank_segments() {
        let output = WhisperOutput {
            language: String::new(),
            segments: vec![
                WhisperJsonSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "   ".to_string(),
                },
                WhisperJsonSegment {
                    start: 1.0,
                    end: 0.5,
                    text: "clipped".to_string(),
                },
            ],
        };
        let transcript = to_transcript(output);
        assert_eq!(transcript.language, "unknown");
        assert_eq!(transcript.segments.len(), 1);
        // A segment whose end precedes its start clamps to zero duration.
        assert_eq!(transcript.segments[0].duration, 0.0);
    }
}
