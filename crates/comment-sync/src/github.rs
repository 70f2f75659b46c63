//! # GitHub Review Comment Client
//!
//! REST client for the review comments of one pull request. Implements both
//! [`AnnotationStore`] and [`PermissionLookup`], and maps HTTP failures onto
//! the crate's error taxonomy so the executor can classify them.

use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::annotation::{DesiredAnnotation, ExistingAnnotation, Location, Side};
use crate::error::{Result, SyncError};
use crate::store::{AnnotationStore, DeleteOutcome, PermissionLevel, PermissionLookup};

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "cto-comment-sync/1.0";
const API_VERSION: &str = "2022-11-28";
const DEFAULT_PAGE_SIZE: usize = 100;

/// GitHub API client scoped to one pull request.
#[derive(Clone)]
pub struct GitHubClient {
    http_client: HttpClient,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
    pr_number: u64,
    commit_sha: Option<String>,
    page_size: usize,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("pr_number", &self.pr_number)
            .field("commit_sha", &self.commit_sha)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    path: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    original_line: Option<u32>,
    #[serde(default)]
    side: Option<Side>,
    body: String,
    #[serde(default)]
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawCreated {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    resources: RawResources,
}

#[derive(Debug, Deserialize)]
struct RawResources {
    core: RawQuota,
}

#[derive(Debug, Deserialize)]
struct RawQuota {
    remaining: u64,
}

#[derive(Debug, Deserialize)]
struct RawPermission {
    permission: String,
    #[serde(default)]
    role_name: Option<String>,
}

impl GitHubClient {
    /// Create a client for `owner/repo#pr_number`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        pr_number: u64,
    ) -> Result<Self> {
        let http_client = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
            pr_number,
            commit_sha: None,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Commit new comments are anchored to.
    #[must_use]
    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", self.base_url, self.owner, self.repo)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send a request, turning any non-success status into a classified error.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_failure(response).await)
        }
    }
}

/// Map a failed response onto [`SyncError`].
async fn classify_failure(response: Response) -> SyncError {
    let status = response.status();
    let remaining = header_value(&response, "x-ratelimit-remaining");
    let reset =
        header_value(&response, "x-ratelimit-reset").and_then(|s| s.parse::<i64>().ok());
    let retry_after_header =
        header_value(&response, "retry-after").and_then(|s| s.parse::<u64>().ok());

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GitHubError>(&text)
        .map(|e| e.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    let lower = message.to_lowercase();
    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (remaining.as_deref() == Some("0")
                || lower.contains("rate limit")
                || lower.contains("abuse")));

    if throttled {
        let retry_after = retry_after_header.map(Duration::from_secs).or_else(|| {
            reset.map(|reset_timestamp| {
                let now = chrono::Utc::now().timestamp();
                Duration::from_secs((reset_timestamp - now).max(0) as u64)
            })
        });
        return SyncError::RateLimited {
            message,
            retry_after,
        };
    }

    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Authorization(message),
        _ => SyncError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

impl From<RawComment> for ExistingAnnotation {
    fn from(raw: RawComment) -> Self {
        let line = raw.line.or(raw.original_line).unwrap_or(0);
        let author = raw
            .user
            .map_or_else(|| "ghost".to_string(), |user| user.login);
        ExistingAnnotation::new(
            raw.id,
            Location::new(raw.path, line, raw.side.unwrap_or_default()),
            raw.body,
            author,
        )
    }
}

#[async_trait]
impl AnnotationStore for GitHubClient {
    #[instrument(skip(self), fields(pr_number = %self.pr_number))]
    async fn list(&self) -> Result<Vec<ExistingAnnotation>> {
        let url = format!("{}/pulls/{}/comments", self.repo_url(), self.pr_number);
        let mut comments = Vec::new();
        let mut page = 1_u32;

        loop {
            let request = self.request(Method::GET, &url).query(&[
                ("per_page", self.page_size.to_string()),
                ("page", page.to_string()),
            ]);
            let batch: Vec<RawComment> = self.send(request).await?.json().await?;
            let fetched = batch.len();
            comments.extend(batch.into_iter().map(ExistingAnnotation::from));

            if fetched < self.page_size {
                break;
            }
            page += 1;
        }

        debug!(count = comments.len(), pages = page, "Retrieved review comments");
        Ok(comments)
    }

    #[instrument(skip(self, annotation), fields(location = %annotation.location))]
    async fn create(&self, annotation: &DesiredAnnotation) -> Result<u64> {
        let commit_id = self.commit_sha.as_deref().ok_or_else(|| {
            SyncError::Validation("a commit SHA is required to create review comments".to_string())
        })?;
        let url = format!("{}/pulls/{}/comments", self.repo_url(), self.pr_number);
        let body = serde_json::json!({
            "body": annotation.body,
            "commit_id": commit_id,
            "path": annotation.location.path,
            "line": annotation.location.line,
            "side": annotation.location.side,
        });

        let created: RawCreated = self
            .send(self.request(Method::POST, &url).json(&body))
            .await?
            .json()
            .await?;
        debug!(id = created.id, "Created review comment");
        Ok(created.id)
    }

    #[instrument(skip(self, body))]
    async fn update(&self, id: u64, body: &str) -> Result<u64> {
        let url = format!("{}/pulls/comments/{id}", self.repo_url());
        let payload = serde_json::json!({ "body": body });

        let updated: RawCreated = self
            .send(self.request(Method::PATCH, &url).json(&payload))
            .await?
            .json()
            .await?;
        debug!(id = updated.id, "Updated review comment");
        Ok(updated.id)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: u64) -> Result<DeleteOutcome> {
        let url = format!("{}/pulls/comments/{id}", self.repo_url());

        match self.send(self.request(Method::DELETE, &url)).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(SyncError::NotFound(_)) => {
                debug!(id, "Review comment already deleted");
                Ok(DeleteOutcome::NotFound)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    async fn check_quota(&self) -> Result<u64> {
        let url = format!("{}/rate_limit", self.base_url);
        let limits: RawRateLimit = self
            .send(self.request(Method::GET, &url))
            .await?
            .json()
            .await?;
        Ok(limits.resources.core.remaining)
    }
}

#[async_trait]
impl PermissionLookup for GitHubClient {
    #[instrument(skip(self))]
    async fn permission_level(&self, user: &str) -> Result<PermissionLevel> {
        let url = format!("{}/collaborators/{user}/permission", self.repo_url());

        let raw: RawPermission = match self.send(self.request(Method::GET, &url)).await {
            Ok(response) => response.json().await?,
            Err(SyncError::NotFound(_)) => {
                debug!(user, "User is not a collaborator");
                return Ok(PermissionLevel::None);
            }
            Err(err) => return Err(err),
        };

        let level = raw
            .role_name
            .as_deref()
            .and_then(|role| role.parse::<PermissionLevel>().ok())
            .unwrap_or_else(|| PermissionLevel::from_remote(&raw.permission));
        debug!(user, %level, "Resolved permission level");
        Ok(level)
    }
}
