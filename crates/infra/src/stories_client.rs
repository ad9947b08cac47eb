use std::time::Duration;

use karyera_domain::DomainResult;
use karyera_domain::creation::StoryDraft;
use karyera_domain::error::DomainError;
use karyera_domain::ports::BoxFuture;
use karyera_domain::ports::stories::StoryRepository;
use karyera_domain::stories::{StoryPayload, StoryRecord, validate_story_payload};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::time::sleep;

use crate::config::AppConfig;

const FEED_PATH: &str = "stories/";
const AUTHORED_PATH: &str = "profile/my_stories/";
/// Author id given to the viewer's own stories when the authored listing
/// omits the author object.
pub const SELF_AUTHOR_ID: &str = "self";

#[derive(Debug, thiserror::Error)]
pub enum StoryClientError {
    #[error("story api access token is not configured")]
    MissingToken,
    #[error("story api client could not be built: {0}")]
    ClientBuild(String),
    #[error("story api bad request: {0}")]
    BadRequest(String),
    #[error("story api unauthorized: {0}")]
    Unauthorized(String),
    #[error("story api forbidden: {0}")]
    Forbidden(String),
    #[error("story api not found: {0}")]
    NotFound(String),
    #[error("story api upstream error: {0}")]
    Upstream(String),
    #[error("story api transport error: {0}")]
    Transport(String),
    #[error("story api response decode error: {0}")]
    InvalidResponse(String),
}

impl From<StoryClientError> for DomainError {
    fn from(err: StoryClientError) -> Self {
        match err {
            StoryClientError::MissingToken | StoryClientError::Unauthorized(_) => {
                DomainError::Unauthenticated
            }
            StoryClientError::BadRequest(message) => DomainError::Validation(message),
            StoryClientError::Forbidden(message) => DomainError::Unauthorized(message),
            StoryClientError::NotFound(_) => DomainError::NotFound,
            StoryClientError::ClientBuild(_)
            | StoryClientError::Upstream(_)
            | StoryClientError::Transport(_)
            | StoryClientError::InvalidResponse(_) => DomainError::Transient(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    /// Idempotent listing reads.
    Retry,
    /// Anything with a server-side effect, including detail reads that
    /// count a view.
    Once,
}

#[derive(Debug, Clone)]
pub struct HttpStoryRepository {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    retry_max_attempts: u32,
    retry_backoff_base: Duration,
    retry_backoff_max: Duration,
}

impl HttpStoryRepository {
    pub fn from_config(config: &AppConfig) -> Result<Self, StoryClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StoryClientError::ClientBuild(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim().to_string(),
            access_token: config.token().map(ToOwned::to_owned),
            retry_max_attempts: config.read_retry_max_attempts.max(1),
            retry_backoff_base: Duration::from_millis(config.read_retry_backoff_base_ms),
            retry_backoff_max: Duration::from_millis(config.read_retry_backoff_max_ms),
        })
    }

    pub async fn list(
        &self,
        path: &str,
        authored: bool,
    ) -> Result<Vec<StoryRecord>, StoryClientError> {
        let url = endpoint_url(&self.base_url, path);
        let response = self
            .execute(|| Ok(self.http.get(&url)), RetryPolicy::Retry)
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| StoryClientError::InvalidResponse(err.to_string()))?;
        decode_listing(&body, authored)
    }

    pub async fn detail(&self, story_id: &str) -> Result<StoryRecord, StoryClientError> {
        let url = endpoint_url(&self.base_url, &story_path(story_id, "")?);
        let response = self
            .execute(|| Ok(self.http.get(&url)), RetryPolicy::Once)
            .await?;
        let wire = response
            .json::<WireStory>()
            .await
            .map_err(|err| StoryClientError::InvalidResponse(err.to_string()))?;
        validate_story_payload(wire.into_payload(false))
            .map_err(|err| StoryClientError::InvalidResponse(err.to_string()))
    }

    pub async fn like(&self, story_id: &str) -> Result<Option<StoryRecord>, StoryClientError> {
        let url = endpoint_url(&self.base_url, &story_path(story_id, "like_story/")?);
        let response = self
            .execute(
                || Ok(self.http.post(&url).json(&serde_json::json!({}))),
                RetryPolicy::Once,
            )
            .await?;
        let body = response.bytes().await.unwrap_or_default();
        Ok(decode_echo(&body))
    }

    pub async fn remove(&self, story_id: &str) -> Result<(), StoryClientError> {
        let url = endpoint_url(&self.base_url, &story_path(story_id, "")?);
        self.execute(|| Ok(self.http.delete(&url)), RetryPolicy::Once)
            .await?;
        Ok(())
    }

    pub async fn publish(&self, draft: &StoryDraft) -> Result<StoryRecord, StoryClientError> {
        let url = endpoint_url(&self.base_url, FEED_PATH);
        let response = self
            .execute(
                || Ok(self.http.post(&url).multipart(story_form(draft)?)),
                RetryPolicy::Once,
            )
            .await?;
        let wire = response
            .json::<WireStory>()
            .await
            .map_err(|err| StoryClientError::InvalidResponse(err.to_string()))?;
        validate_story_payload(wire.into_payload(true))
            .map_err(|err| StoryClientError::InvalidResponse(err.to_string()))
    }

    async fn execute<F>(
        &self,
        build: F,
        policy: RetryPolicy,
    ) -> Result<reqwest::Response, StoryClientError>
    where
        F: Fn() -> Result<reqwest::RequestBuilder, StoryClientError>,
    {
        let token = self
            .access_token
            .as_deref()
            .ok_or(StoryClientError::MissingToken)?;
        let attempts = match policy {
            RetryPolicy::Retry => self.retry_max_attempts.max(1),
            RetryPolicy::Once => 1,
        };

        for attempt in 0..attempts {
            let request = build()?
                .bearer_auth(token)
                .header("accept", "application/json");

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 < attempts {
                        tracing::warn!(attempt, error = %err, "story api request failed, retrying");
                        sleep(backoff_for_attempt(
                            self.retry_backoff_base,
                            self.retry_backoff_max,
                            attempt,
                        ))
                        .await;
                        continue;
                    }
                    return Err(StoryClientError::Transport(err.to_string()));
                }
            };

            let status = response.status();
            if status.is_success() {
                tracing::debug!(status = status.as_u16(), url = %response.url(), "story api response");
                return Ok(response);
            }

            let message = response.text().await.unwrap_or_default();
            if is_retryable_status(status) && attempt + 1 < attempts {
                tracing::warn!(
                    attempt,
                    status = status.as_u16(),
                    "story api returned a retryable status"
                );
                sleep(backoff_for_attempt(
                    self.retry_backoff_base,
                    self.retry_backoff_max,
                    attempt,
                ))
                .await;
                continue;
            }
            return Err(error_for_status(status, message));
        }

        Err(StoryClientError::Upstream(
            "retry loop exited unexpectedly".to_string(),
        ))
    }
}

impl StoryRepository for HttpStoryRepository {
    fn list_feed(&self) -> BoxFuture<'_, DomainResult<Vec<StoryRecord>>> {
        Box::pin(async move { Ok(self.list(FEED_PATH, false).await?) })
    }

    fn list_authored(&self) -> BoxFuture<'_, DomainResult<Vec<StoryRecord>>> {
        Box::pin(async move { Ok(self.list(AUTHORED_PATH, true).await?) })
    }

    fn fetch_detail(&self, story_id: &str) -> BoxFuture<'_, DomainResult<StoryRecord>> {
        let story_id = story_id.to_string();
        Box::pin(async move { Ok(self.detail(&story_id).await?) })
    }

    fn create(&self, draft: &StoryDraft) -> BoxFuture<'_, DomainResult<StoryRecord>> {
        let draft = draft.clone();
        Box::pin(async move { Ok(self.publish(&draft).await?) })
    }

    fn toggle_like(&self, story_id: &str) -> BoxFuture<'_, DomainResult<Option<StoryRecord>>> {
        let story_id = story_id.to_string();
        Box::pin(async move { Ok(self.like(&story_id).await?) })
    }

    fn delete(&self, story_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let story_id = story_id.to_string();
        Box::pin(async move { Ok(self.remove(&story_id).await?) })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireScalar {
    Int(i64),
    Text(String),
}

impl WireScalar {
    fn into_string(self) -> String {
        match self {
            WireScalar::Int(value) => value.to_string(),
            WireScalar::Text(value) => value,
        }
    }

    fn as_u32(&self) -> Option<u32> {
        match self {
            WireScalar::Int(value) => u32::try_from(*value).ok(),
            WireScalar::Text(value) => value.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireUser {
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireAuthor {
    id: Option<WireScalar>,
    full_name: Option<String>,
    profile_image: Option<String>,
    user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireStory {
    id: Option<WireScalar>,
    title: Option<String>,
    image: Option<String>,
    duration: Option<WireScalar>,
    created_at: Option<String>,
    views_count: Option<i64>,
    likes_count: Option<i64>,
    is_viewed: Option<bool>,
    is_liked: Option<bool>,
    is_author: Option<bool>,
    author: Option<WireAuthor>,
}

impl WireStory {
    fn into_payload(self, authored: bool) -> StoryPayload {
        let author = self.author.unwrap_or_default();
        let author_id = author
            .id
            .map(WireScalar::into_string)
            .or_else(|| authored.then(|| SELF_AUTHOR_ID.to_string()));
        StoryPayload {
            story_id: self.id.map(WireScalar::into_string),
            author_id,
            author_name: author.full_name,
            author_username: author.user.and_then(|user| user.username),
            author_avatar_url: author.profile_image,
            is_author: Some(authored || self.is_author.unwrap_or(false)),
            media_url: self.image,
            title: self.title,
            created_at: self.created_at,
            duration_hours: self.duration.as_ref().and_then(WireScalar::as_u32),
            view_seconds: None,
            view_count: self.views_count,
            like_count: self.likes_count,
            is_viewed: self.is_viewed,
            is_liked: self.is_liked,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireListing {
    Plain(Vec<WireStory>),
    Paged { results: Vec<WireStory> },
}

/// Decodes a listing, dropping records that fail validation instead of
/// failing the whole fetch.
fn decode_listing(body: &[u8], authored: bool) -> Result<Vec<StoryRecord>, StoryClientError> {
    let listing = serde_json::from_slice::<WireListing>(body)
        .map_err(|err| StoryClientError::InvalidResponse(err.to_string()))?;
    let stories = match listing {
        WireListing::Plain(stories) | WireListing::Paged { results: stories } => stories,
    };
    Ok(stories
        .into_iter()
        .filter_map(|wire| match validate_story_payload(wire.into_payload(authored)) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(error = %err, "dropping invalid story record");
                None
            }
        })
        .collect())
}

/// The like endpoint may or may not echo the story back.
fn decode_echo(body: &[u8]) -> Option<StoryRecord> {
    let wire = serde_json::from_slice::<WireStory>(body).ok()?;
    wire.id.as_ref()?;
    validate_story_payload(wire.into_payload(false)).ok()
}

fn story_form(draft: &StoryDraft) -> Result<Form, StoryClientError> {
    let media = draft
        .media
        .as_ref()
        .ok_or_else(|| StoryClientError::BadRequest("image is required".to_string()))?;
    let image = Part::bytes(media.bytes.clone())
        .file_name(media.file_name.clone())
        .mime_str(&media.content_type)
        .map_err(|err| StoryClientError::BadRequest(err.to_string()))?;
    Ok(Form::new()
        .text("title", draft.title.trim().to_string())
        .text("duration", draft.duration.hours().to_string())
        .part("image", image))
}

fn story_path(story_id: &str, action: &str) -> Result<String, StoryClientError> {
    let story_id = story_id.trim();
    if story_id.is_empty() || story_id.contains('/') {
        return Err(StoryClientError::BadRequest(format!(
            "invalid story id: {story_id:?}"
        )));
    }
    Ok(format!("stories/{story_id}/{action}"))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn error_for_status(status: StatusCode, message: String) -> StoryClientError {
    match status {
        StatusCode::BAD_REQUEST => StoryClientError::BadRequest(message),
        StatusCode::UNAUTHORIZED => StoryClientError::Unauthorized(message),
        StatusCode::FORBIDDEN => StoryClientError::Forbidden(message),
        StatusCode::NOT_FOUND => StoryClientError::NotFound(message),
        _ => StoryClientError::Upstream(format!("status {}: {}", status.as_u16(), message)),
    }
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::from_millis(1);
    }
    let multiplier = 1u64 << attempt.min(8);
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(multiplier).max(1);
    if max_ms == 0 {
        Duration::from_millis(delay_ms)
    } else {
        Duration::from_millis(delay_ms.min(max_ms))
    }
}
