//! YouTube Data API v3 client.
//!
//! # Request flow
//!
//! | Query kind | Calls |
//! |------------|-------|
//! | `search` | `search.list` (ids, newest first, `publishedAfter`) then `videos.list` |
//! | `channel` | `channels.list` (uploads playlist) then `playlistItems.list` then `videos.list` |
//!
//! `videos.list` is used in both cases because search snippets truncate the
//! description. Ids are resolved in batches of 50, the API maximum.
//!
//! # Error mapping
//!
//! | Response | [`FetchErrorKind`] |
//! |----------|--------------------|
//! | 429, or 403 with a quota/rate reason | `rate_limited` |
//! | 401, 403, or 400 `keyInvalid` | `auth` |
//! | 404, other 4xx, unknown channel | `not_found` |
//! | 5xx, transport and decoding failures | `network` |

use super::{FetchError, FetchErrorKind, VideoSource};
use crate::models::{Query, QueryKind, RawVideo};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3/";

/// Maximum ids per `videos.list` call and items per page.
const PAGE_SIZE: u32 = 50;

const RATE_LIMIT_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

#[derive(Debug, Clone)]
pub struct YouTubeClient {
    http: reqwest::Client,
    api_key: String,
    base_url: Url,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Point the client at another API root (a proxy or a local fake).
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self, FetchError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| FetchError::network(format!("invalid API base URL {base_url:?}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url,
        })
    }

    /// Build the request URL for an endpoint. The API key is appended last.
    fn endpoint_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|e| FetchError::network(format!("invalid endpoint {endpoint}: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = self.endpoint_url(endpoint, params)?;
        // reqwest errors embed the URL, which carries the API key.
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(format!("{endpoint}: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::network(format!("decoding {endpoint} response: {}", e.without_url())))
    }

    /// Video ids from `search.list`, newest first.
    async fn search_ids(
        &self,
        term: &str,
        published_after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<String>, FetchError> {
        let published_after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let published_after = published_after.as_str();

        collect_pages(max_results, move |page_size, page_token| async move {
            let page_size = page_size.to_string();
            let mut params = vec![
                ("part", "id"),
                ("type", "video"),
                ("order", "date"),
                ("q", term),
                ("publishedAfter", published_after),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: ListResponse<SearchItem> = self.get_json("search", &params).await?;
            Ok::<_, FetchError>(IdPage {
                ids: page.items.into_iter().filter_map(|item| item.id.video_id).collect(),
                next_page_token: page.next_page_token,
                window_end: false,
            })
        })
        .await
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<String, FetchError> {
        let response: ListResponse<ChannelItem> = self
            .get_json("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;
        response
            .items
            .into_iter()
            .next()
            .and_then(|c| c.content_details.related_playlists.uploads)
            .ok_or_else(|| FetchError::not_found(format!("channel {channel_id} has no uploads playlist")))
    }

    /// Video ids from a channel's uploads, stopping at the lookback window.
    async fn channel_ids(
        &self,
        channel_id: &str,
        published_after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<String>, FetchError> {
        let playlist_id = self.uploads_playlist(channel_id).await?;
        let playlist_id = playlist_id.as_str();

        collect_pages(max_results, move |page_size, page_token| async move {
            let page_size = page_size.to_string();
            let mut params = vec![
                ("part", "snippet"),
                ("playlistId", playlist_id),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: ListResponse<PlaylistItem> = self.get_json("playlistItems", &params).await?;
            let (ids, window_end) = recent_uploads(page.items, published_after);
            Ok::<_, FetchError>(IdPage {
                ids,
                next_page_token: page.next_page_token,
                window_end,
            })
        })
        .await
    }

    /// Full snippets for the given ids, in batches.
    async fn video_details(&self, ids: &[String]) -> Result<Vec<RawVideo>, FetchError> {
        let mut videos = Vec::with_capacity(ids.len());
        for joined in id_batches(ids) {
            let response: ListResponse<VideoItem> = self
                .get_json("videos", &[("part", "snippet"), ("id", joined.as_str())])
                .await?;
            videos.extend(response.items.into_iter().map(VideoItem::into_raw));
        }
        Ok(videos)
    }
}

impl VideoSource for YouTubeClient {
    #[instrument(level = "info", skip_all, fields(%query, max_results))]
    async fn search(
        &self,
        query: &Query,
        published_after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<RawVideo>, FetchError> {
        let ids = match query.kind {
            QueryKind::Search => self.search_ids(&query.value, published_after, max_results).await?,
            QueryKind::Channel => self.channel_ids(&query.value, published_after, max_results).await?,
        };
        debug!(ids = ids.len(), "Resolved video ids");

        let videos = self.video_details(&ids).await?;
        info!(count = videos.len(), "Fetched videos");
        Ok(videos)
    }
}

/// Upper bound on pages fetched for one query.
const MAX_PAGES: usize = 20;

/// One page of ids from a paged list endpoint.
#[derive(Debug, Default)]
struct IdPage {
    ids: Vec<String>,
    next_page_token: Option<String>,
    /// An item older than the lookback window was seen; later pages are older still.
    window_end: bool,
}

/// Drive a paged endpoint until `max_results` ids are collected, the last
/// page is reached, the window ends or [`MAX_PAGES`] pages were fetched.
///
/// `fetch_page` receives the page size to request and the page token.
/// Pages may come back empty while still carrying a token.
async fn collect_pages<F, Fut>(max_results: u32, mut fetch_page: F) -> Result<Vec<String>, FetchError>
where
    F: FnMut(u32, Option<String>) -> Fut,
    Fut: Future<Output = Result<IdPage, FetchError>>,
{
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;

    for page_no in 1..=MAX_PAGES {
        let remaining = max_results.saturating_sub(ids.len() as u32);
        if remaining == 0 {
            break;
        }
        let page = fetch_page(remaining.min(PAGE_SIZE), page_token.take()).await?;
        ids.extend(page.ids);

        if page.window_end {
            break;
        }
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
        if page_no == MAX_PAGES {
            debug!(pages = MAX_PAGES, ids = ids.len(), "Page limit reached");
        }
    }
    ids.truncate(max_results as usize);
    Ok(ids)
}

/// Comma-joined id lists for `videos.list`, at most [`PAGE_SIZE`] ids each.
fn id_batches(ids: &[String]) -> impl Iterator<Item = String> + '_ {
    ids.chunks(PAGE_SIZE as usize).map(|batch| batch.join(","))
}

/// Split a playlist page into ids inside the window, and whether an older upload was seen.
///
/// Upload playlists are ordered newest first, so the first item older than the
/// window ends the scan.
fn recent_uploads(items: Vec<PlaylistItem>, published_after: DateTime<Utc>) -> (Vec<String>, bool) {
    let mut ids = Vec::new();
    for item in items {
        if let Some(published) = item.snippet.published_at {
            if published < published_after {
                return (ids, true);
            }
        }
        if let Some(id) = item.snippet.resource_id.video_id {
            ids.push(id);
        }
    }
    (ids, false)
}

/// Map a non-success API response onto the fetch error taxonomy.
pub fn classify_error(status: u16, body: &str) -> FetchError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let (message, reasons) = match parsed {
        Some(body) => (
            body.error.message,
            body.error.errors.into_iter().map(|e| e.reason).collect::<Vec<_>>(),
        ),
        None => (String::new(), Vec::new()),
    };
    let has_reason = |wanted: &[&str]| reasons.iter().any(|r| wanted.contains(&r.as_str()));

    let kind = match status {
        429 => FetchErrorKind::RateLimited,
        403 if has_reason(RATE_LIMIT_REASONS) => FetchErrorKind::RateLimited,
        401 | 403 => FetchErrorKind::Auth,
        400 if has_reason(&["keyInvalid", "keyExpired"]) => FetchErrorKind::Auth,
        500..=599 => FetchErrorKind::Network,
        _ => FetchErrorKind::NotFound,
    };

    let message = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {message}")
    };
    FetchError::new(kind, message)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    published_at: Option<DateTime<Utc>>,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: VideoSnippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoSnippet {
    title: String,
    description: String,
    channel_id: String,
    channel_title: String,
    published_at: Option<DateTime<Utc>>,
    tags: Vec<String>,
}

impl VideoItem {
    fn into_raw(self) -> RawVideo {
        RawVideo {
            id: self.id,
            title: self.snippet.title,
            description: self.snippet.description,
            channel_id: self.snippet.channel_id,
            channel_title: self.snippet.channel_title,
            published_at: self.snippet.published_at,
            tags: self.snippet.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}
