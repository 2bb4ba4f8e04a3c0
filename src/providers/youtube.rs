//! YouTube Data API v3 adapter: channel resolution, upload listing, batched
//! video metadata, comment threads, and channel search.
//!
//! All responses deserialize into typed structs here at the boundary; a
//! payload that does not match is a transient failure, never data that leaks
//! downstream. Quota exhaustion latches the client for the rest of the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

use super::{
    CommentsOutcome, CommentsProvider, ListedVideo, MetadataProvider, Pager, ProviderError,
    ProviderResult, drain,
};
use crate::records::{CommentRecord, VideoRecord};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3/";

/// Upstream cap on `videos.list` IDs per call.
const MAX_METADATA_BATCH: usize = 50;

/// Page sizes the API accepts for the two paginated endpoints.
const LIST_PAGE_SIZE: &str = "50";
const COMMENT_PAGE_SIZE: &str = "100";

const REASON_COMMENTS_DISABLED: &str = "commentsDisabled";

/// Client for the Data API. One instance per run; holds the credential and
/// the quota latch shared by every endpoint it serves.
pub struct DataApiClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    quota_exhausted: AtomicBool,
}

impl DataApiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: Url::parse(API_BASE).expect("static API base URL"),
            api_key: api_key.into(),
            quota_exhausted: AtomicBool::new(false),
        })
    }

    /// Point the client at a different API host (test servers, proxies).
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = base;
        self
    }

    fn ensure_quota(&self) -> ProviderResult<()> {
        if self.quota_exhausted.load(Ordering::Relaxed) {
            Err(ProviderError::QuotaExhausted)
        } else {
            Ok(())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> ProviderResult<T> {
        self.ensure_quota()?;

        let url = self
            .base
            .join(endpoint)
            .map_err(|e| ProviderError::Fatal(format!("bad API endpoint {endpoint}: {e}")))?;

        let response = self
            .http
            .get(url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_error(status, &body);
            if matches!(err, ProviderError::QuotaExhausted) {
                self.quota_exhausted.store(true, Ordering::Relaxed);
                tracing::warn!("Data API quota exhausted; no further calls this run");
            }
            return Err(err);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Transient(format!("malformed API payload: {e}")))
    }

    /// Canonical uploads playlist for a channel. An unknown channel is fatal
    /// for that channel only.
    pub async fn resolve_uploads_playlist(&self, channel_id: &str) -> ProviderResult<String> {
        let response: ChannelListResponse = self
            .get_json(
                "channels",
                &[("part", "contentDetails"), ("id", channel_id)],
            )
            .await?;

        response
            .items
            .into_iter()
            .next()
            .map(|c| c.content_details.related_playlists.uploads)
            .ok_or_else(|| ProviderError::Fatal(format!("channel {channel_id} not found")))
    }

    /// Search for channels matching a free-text query, best match first.
    pub async fn search_channels(&self, query: &str) -> ProviderResult<Vec<ChannelMatch>> {
        let response: SearchListResponse = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("q", query),
                    ("type", "channel"),
                    ("maxResults", "5"),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .map(|item| ChannelMatch {
                channel_id: item.snippet.channel_id,
                title: item.snippet.title,
                description: item.snippet.description,
            })
            .collect())
    }

    /// Legacy lookup of a channel ID from a custom username.
    pub async fn channel_id_for_username(&self, username: &str) -> ProviderResult<Option<String>> {
        let response: ChannelIdListResponse = self
            .get_json("channels", &[("part", "id"), ("forUsername", username)])
            .await?;

        Ok(response.items.into_iter().next().map(|item| item.id))
    }
}

/// A channel candidate returned by `search_channels`.
#[derive(Debug, Clone)]
pub struct ChannelMatch {
    pub channel_id: String,
    pub title: String,
    pub description: String,
}

#[async_trait]
impl MetadataProvider for DataApiClient {
    async fn list_recent_videos(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> ProviderResult<Vec<String>> {
        let playlist_id = self.resolve_uploads_playlist(channel_id).await?;
        let mut pager = PlaylistPager::new(self, &playlist_id);
        collect_recent(&mut pager, since).await
    }

    async fn fetch_metadata_batch(
        &self,
        video_ids: &[String],
    ) -> ProviderResult<HashMap<String, VideoRecord>> {
        let mut records = HashMap::new();

        for chunk in video_ids.chunks(MAX_METADATA_BATCH) {
            let ids = chunk.join(",");
            let response: Result<VideoListResponse, _> = self
                .get_json(
                    "videos",
                    &[
                        ("part", "snippet,contentDetails,statistics"),
                        ("id", &ids),
                        ("maxResults", LIST_PAGE_SIZE),
                    ],
                )
                .await;

            let response = match response {
                Ok(r) => r,
                // A later chunk failing must not lose earlier chunks; the
                // missing IDs stay unmarked and retry on the next run.
                Err(err) if err.is_retryable() && !records.is_empty() => {
                    tracing::warn!("metadata batch stopped early: {err}");
                    return Ok(records);
                }
                Err(err) => return Err(err),
            };

            for item in response.items {
                let record = VideoRecord {
                    video_id: item.id.clone(),
                    title: item.snippet.title,
                    published_at: item.snippet.published_at,
                    duration: item.content_details.duration,
                    view_count: item.statistics.view_count,
                    like_count: item.statistics.like_count,
                    comment_count: item.statistics.comment_count,
                };
                records.insert(item.id, record);
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl CommentsProvider for DataApiClient {
    async fn fetch_all_comments(&self, video_id: &str) -> ProviderResult<CommentsOutcome> {
        let mut pager = CommentPager::new(self, video_id);
        match drain(&mut pager).await {
            Ok(threads) => Ok(CommentsOutcome::Comments(flatten_threads(video_id, threads))),
            Err(ProviderError::Unavailable(reason)) if reason == REASON_COMMENTS_DISABLED => {
                Ok(CommentsOutcome::Disabled)
            }
            Err(err) => Err(err),
        }
    }
}

/// Walks the uploads playlist, newest first.
struct PlaylistPager<'a> {
    client: &'a DataApiClient,
    playlist_id: &'a str,
    token: Option<String>,
    exhausted: bool,
}

impl<'a> PlaylistPager<'a> {
    fn new(client: &'a DataApiClient, playlist_id: &'a str) -> Self {
        Self {
            client,
            playlist_id,
            token: None,
            exhausted: false,
        }
    }
}

#[async_trait]
impl Pager for PlaylistPager<'_> {
    type Item = ListedVideo;

    async fn next_page(&mut self) -> ProviderResult<Option<Vec<ListedVideo>>> {
        if self.exhausted {
            return Ok(None);
        }

        let token = self.token.clone();
        let mut query = vec![
            ("part", "contentDetails,snippet"),
            ("playlistId", self.playlist_id),
            ("maxResults", LIST_PAGE_SIZE),
        ];
        if let Some(token) = token.as_deref() {
            query.push(("pageToken", token));
        }

        let response: PlaylistItemsResponse =
            self.client.get_json("playlistItems", &query).await?;

        self.token = response.next_page_token;
        if self.token.is_none() {
            self.exhausted = true;
        }

        Ok(Some(
            response
                .items
                .into_iter()
                .map(|item| ListedVideo {
                    video_id: item.content_details.video_id,
                    published_at: item.snippet.published_at,
                })
                .collect(),
        ))
    }
}

/// Walks the top-level comment threads of a single video.
struct CommentPager<'a> {
    client: &'a DataApiClient,
    video_id: &'a str,
    token: Option<String>,
    exhausted: bool,
}

impl<'a> CommentPager<'a> {
    fn new(client: &'a DataApiClient, video_id: &'a str) -> Self {
        Self {
            client,
            video_id,
            token: None,
            exhausted: false,
        }
    }
}

#[async_trait]
impl Pager for CommentPager<'_> {
    type Item = CommentThread;

    async fn next_page(&mut self) -> ProviderResult<Option<Vec<CommentThread>>> {
        if self.exhausted {
            return Ok(None);
        }

        let token = self.token.clone();
        let mut query = vec![
            ("part", "snippet"),
            ("videoId", self.video_id),
            ("maxResults", COMMENT_PAGE_SIZE),
            ("textFormat", "plainText"),
        ];
        if let Some(token) = token.as_deref() {
            query.push(("pageToken", token));
        }

        let response: CommentThreadsResponse =
            self.client.get_json("commentThreads", &query).await?;

        self.token = response.next_page_token;
        if self.token.is_none() {
            self.exhausted = true;
        }

        Ok(Some(response.items))
    }
}

/// Collect video IDs until the pager runs dry or an item predates `since`.
/// The upstream listing is assumed reverse-chronological; if it is not, this
/// stops early, which loses coverage but never duplicates or crashes. A
/// retryable error after at least one good page also stops early so the IDs
/// gathered so far still get processed.
async fn collect_recent<P>(pager: &mut P, since: DateTime<Utc>) -> ProviderResult<Vec<String>>
where
    P: Pager<Item = ListedVideo>,
{
    let mut ids = Vec::new();
    loop {
        match pager.next_page().await {
            Ok(Some(page)) => {
                for video in page {
                    if video.published_at < since {
                        return Ok(ids);
                    }
                    ids.push(video.video_id);
                }
            }
            Ok(None) => return Ok(ids),
            Err(err) if err.is_retryable() && !ids.is_empty() => {
                tracing::warn!("upload listing stopped early after {} videos: {err}", ids.len());
                return Ok(ids);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Flatten threads into records, in page order. Concurrent upstream
/// moderation can shrink or duplicate pages mid-walk, so duplicate thread
/// IDs within this one call are dropped.
fn flatten_threads(video_id: &str, threads: Vec<CommentThread>) -> Vec<CommentRecord> {
    let mut seen = HashSet::new();
    threads
        .into_iter()
        .filter(|thread| seen.insert(thread.id.clone()))
        .map(|thread| {
            let comment = thread.snippet.top_level_comment.snippet;
            CommentRecord {
                video_id: video_id.to_string(),
                text: comment.text_display,
                author: comment.author_display_name,
                like_count: comment.like_count,
                published_at: comment.published_at,
            }
        })
        .collect()
}

fn request_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transient(format!("request timed out: {err}"))
    } else {
        ProviderError::Transient(format!("request failed: {err}"))
    }
}

/// Map an API error response onto the taxonomy. The envelope's first error
/// reason is more precise than the HTTP status, so it wins when present.
fn classify_error(status: StatusCode, body: &str) -> ProviderError {
    let envelope: Option<ApiErrorEnvelope> = serde_json::from_str(body).ok();
    let reason = envelope
        .as_ref()
        .and_then(|e| e.error.errors.first())
        .map(|e| e.reason.as_str())
        .unwrap_or_default();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .unwrap_or_else(|| format!("HTTP {status}"));

    match reason {
        "quotaExceeded" | "dailyLimitExceeded" => ProviderError::QuotaExhausted,
        "rateLimitExceeded" | "userRateLimitExceeded" => ProviderError::Transient(message),
        REASON_COMMENTS_DISABLED => {
            ProviderError::Unavailable(REASON_COMMENTS_DISABLED.to_string())
        }
        _ if status == StatusCode::NOT_FOUND => ProviderError::Unavailable(message),
        _ if status == StatusCode::FORBIDDEN => ProviderError::Unavailable(message),
        _ if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED => {
            ProviderError::Fatal(message)
        }
        _ => ProviderError::Transient(message),
    }
}

// ---------------------------------------------------------------------------
// Wire formats. Field names follow the API's camelCase JSON.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
struct ChannelIdListResponse {
    #[serde(default)]
    items: Vec<ChannelIdResource>,
}

#[derive(Debug, Deserialize)]
struct ChannelIdResource {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
    content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    snippet: VideoSnippet,
    content_details: VideoContentDetails,
    #[serde(default)]
    statistics: VideoStatistics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: String,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    comment_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadsResponse {
    #[serde(default)]
    items: Vec<CommentThread>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentThread {
    id: String,
    snippet: CommentThreadSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet {
    top_level_comment: TopLevelComment,
}

#[derive(Debug, Deserialize)]
struct TopLevelComment {
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    text_display: String,
    author_display_name: String,
    #[serde(default)]
    like_count: u64,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    channel_id: String,
    title: String,
    description: String,
}
