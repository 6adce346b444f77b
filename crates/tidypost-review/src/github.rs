use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tidypost_core::{Annotation, Comment, ExistingComment, RetryConfig, TidypostError};
use tokio::sync::OnceCell;

use crate::api::{ArtifactApi, PullRequestApi, PullRequestHandle, RunArtifact};

/// The check-runs API accepts at most this many annotations per request.
pub const ANNOTATIONS_PER_REQUEST: usize = 50;

const PER_PAGE: usize = 100;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// GitHub client scoped to one pull request.
///
/// JSON endpoints go through `octocrab`; artifact archives are downloaded
/// with `reqwest` because they redirect to blob storage.
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
    handle: PullRequestHandle,
    retry: RetryConfig,
    check_run_name: String,
    head_sha: OnceCell<String>,
}

impl GitHubClient {
    /// Create a client from an explicit token or the `GITHUB_TOKEN` environment variable.
    ///
    /// `GITHUB_API_URL` overrides the API base, for GitHub Enterprise.
    ///
    /// # Errors
    ///
    /// Returns [`TidypostError::Config`] if no token is available or a client
    /// cannot be built.
    pub fn new(
        handle: PullRequestHandle,
        token: Option<&str>,
        retry: &RetryConfig,
        check_run_name: &str,
    ) -> Result<Self, TidypostError> {
        let token = match token {
            Some(t) => t.to_string(),
            None => std::env::var("GITHUB_TOKEN").map_err(|_| {
                TidypostError::Config(
                    "GITHUB_TOKEN not set. Pass --token or set GITHUB_TOKEN env var".into(),
                )
            })?,
        };

        let mut builder = octocrab::Octocrab::builder().personal_token(token.clone());
        if let Ok(base) = std::env::var("GITHUB_API_URL") {
            builder = builder.base_uri(base.as_str()).map_err(|e| {
                TidypostError::Config(format!("invalid GITHUB_API_URL '{base}': {e}"))
            })?;
        }
        let octocrab = builder
            .build()
            .map_err(|e| TidypostError::Config(format!("failed to create GitHub client: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs.max(1)))
            .build()
            .map_err(|e| TidypostError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            octocrab,
            http,
            token,
            handle,
            retry: retry.clone(),
            check_run_name: check_run_name.to_string(),
            head_sha: OnceCell::new(),
        })
    }

    fn repo_route(&self, rest: &str) -> String {
        let repo = self.handle.repo();
        format!("/repos/{}/{}/{rest}", repo.owner, repo.name)
    }

    fn pull_route(&self, rest: &str) -> Result<String, TidypostError> {
        let number = self.handle.require_number()?;
        Ok(self.repo_route(&format!("pulls/{number}/{rest}")))
    }

    async fn head_sha(&self) -> Result<&str, TidypostError> {
        let sha = self
            .head_sha
            .get_or_try_init(|| async move {
                let number = self.handle.require_number()?;
                let repo = self.handle.repo();
                let pr = with_retry(&self.retry, "fetch pull request", || async move {
                    self.octocrab
                        .pulls(&repo.owner, &repo.name)
                        .get(number)
                        .await
                        .map_err(|e| map_octocrab_error("fetch pull request", e))
                })
                .await?;
                Ok::<_, TidypostError>(pr.head.sha)
            })
            .await?;
        Ok(sha.as_str())
    }

    async fn post_json(
        &self,
        operation: &str,
        route: String,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TidypostError> {
        let route = route.as_str();
        let body = &body;
        with_retry(&self.retry, operation, || async move {
            self.octocrab
                .post(route, Some(body))
                .await
                .map_err(|e| map_octocrab_error(operation, e))
        })
        .await
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    fn handle(&self) -> &PullRequestHandle {
        &self.handle
    }

    async fn fetch_existing_comments(&self) -> Result<Vec<ExistingComment>, TidypostError> {
        let base = self.pull_route("comments")?;
        let mut page = 1_u32;
        let mut comments = Vec::new();
        loop {
            let route = format!("{base}?per_page={PER_PAGE}&page={page}");
            let route = route.as_str();
            let chunk: Vec<ExistingComment> =
                with_retry(&self.retry, "list review comments", || async move {
                    self.octocrab
                        .get(route, None::<&()>)
                        .await
                        .map_err(|e| map_octocrab_error("list review comments", e))
                })
                .await?;
            let chunk_len = chunk.len();
            comments.extend(chunk);
            if chunk_len < PER_PAGE {
                break;
            }
            page = page.saturating_add(1);
        }
        tracing::debug!(count = comments.len(), "fetched existing review comments");
        Ok(comments)
    }

    async fn post_review(
        &self,
        comments: &[Comment],
        body: Option<&str>,
    ) -> Result<(), TidypostError> {
        let route = self.pull_route("reviews")?;
        let payload = review_payload(comments, body);
        tracing::debug!(payload = %payload, "posting review");
        self.post_json("post review", route, payload).await?;
        Ok(())
    }

    async fn post_single_comment(&self, comment: &Comment) -> Result<(), TidypostError> {
        let route = self.pull_route("comments")?;
        let mut payload = comment_payload(comment);
        payload["commit_id"] = serde_json::Value::String(self.head_sha().await?.to_string());
        self.post_json("post review comment", route, payload).await?;
        Ok(())
    }

    async fn post_acknowledgement(&self, body: &str) -> Result<(), TidypostError> {
        let number = self.handle.require_number()?;
        let route = self.repo_route(&format!("issues/{number}/comments"));
        self.post_json("post comment", route, serde_json::json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn post_annotations(&self, annotations: &[Annotation]) -> Result<(), TidypostError> {
        let head_sha = self.head_sha().await?.to_string();
        let mut chunks = annotations.chunks(ANNOTATIONS_PER_REQUEST);
        let first = chunks.next().unwrap_or(&[]);

        let conclusion = if annotations.is_empty() {
            "success"
        } else {
            "neutral"
        };
        let created = self
            .post_json(
                "create check run",
                self.repo_route("check-runs"),
                serde_json::json!({
                    "name": self.check_run_name,
                    "head_sha": head_sha,
                    "status": "completed",
                    "conclusion": conclusion,
                    "output": check_run_output(annotations.len(), first),
                }),
            )
            .await?;

        let Some(check_run_id) = created.get("id").and_then(serde_json::Value::as_u64) else {
            return Err(TidypostError::Api {
                status: 0,
                message: "check run response has no id".into(),
            });
        };
        tracing::info!(check_run_id, "created check run");

        for chunk in chunks {
            let route = self.repo_route(&format!("check-runs/{check_run_id}"));
            let route = route.as_str();
            let body = serde_json::json!({ "output": check_run_output(annotations.len(), chunk) });
            let body = &body;
            let _updated: serde_json::Value =
                with_retry(&self.retry, "update check run", || async move {
                    self.octocrab
                        .patch(route, Some(body))
                        .await
                        .map_err(|e| map_octocrab_error("update check run", e))
                })
                .await?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ArtifactList {
    total_count: usize,
    artifacts: Vec<RunArtifact>,
}

#[async_trait]
impl ArtifactApi for GitHubClient {
    async fn list_run_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifact>, TidypostError> {
        let base = self.repo_route(&format!("actions/runs/{run_id}/artifacts"));
        let mut page = 1_u32;
        let mut artifacts = Vec::new();
        loop {
            let route = format!("{base}?per_page={PER_PAGE}&page={page}");
            let route = route.as_str();
            let list: ArtifactList = with_retry(&self.retry, "list artifacts", || async move {
                self.octocrab
                    .get(route, None::<&()>)
                    .await
                    .map_err(|e| map_octocrab_error("list artifacts", e))
            })
            .await?;
            let chunk_len = list.artifacts.len();
            artifacts.extend(list.artifacts);
            if chunk_len == 0 || artifacts.len() >= list.total_count {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(artifacts)
    }

    async fn download_artifact(&self, artifact: &RunArtifact) -> Result<Vec<u8>, TidypostError> {
        with_retry(&self.retry, "download artifact", || async move {
            let response = self
                .http
                .get(&artifact.archive_download_url)
                .header("Accept", "application/vnd.github+json")
                .header("Authorization", format!("Bearer {}", self.token))
                .header("User-Agent", "tidypost")
                .send()
                .await
                .map_err(|e| TidypostError::Api {
                    status: 0,
                    message: format!("failed to download artifact {}: {e}", artifact.id),
                })?;

            let status = response.status();
            if !status.is_success() {
                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                return Err(match classify_status(status.as_u16(), &body, &[]) {
                    TidypostError::RateLimited { .. } => TidypostError::RateLimited { retry_after },
                    other => other,
                });
            }

            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| TidypostError::Api {
                    status: status.as_u16(),
                    message: format!("failed to read artifact {}: {e}", artifact.id),
                })
        })
        .await
    }
}

/// Run `call`, retrying only rate-limit failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut call: F,
) -> Result<T, TidypostError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TidypostError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0_usize;
    loop {
        attempt = attempt.saturating_add(1);
        match call().await {
            Err(TidypostError::RateLimited { retry_after }) if attempt < max_attempts => {
                let delay = retry_delay(policy.base_delay_ms, attempt, retry_after);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Delay before retry number `attempt` (1-based), capped at one minute.
pub fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<u64>) -> Duration {
    let delay = match retry_after {
        Some(secs) => Duration::from_secs(secs),
        None => {
            let exponent = attempt.saturating_sub(1).min(16) as u32;
            Duration::from_millis(base_delay_ms.saturating_mul(1_u64 << exponent))
        }
    };
    delay.min(MAX_BACKOFF)
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn map_octocrab_error(operation: &str, err: octocrab::Error) -> TidypostError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            let details: Vec<String> = source
                .errors
                .iter()
                .flatten()
                .map(|e| match e {
                    serde_json::Value::String(s) => s.clone(),
                    other => other
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                })
                .collect();
            let message = format!("{operation}: {}", source.message);
            classify_status(source.status_code.as_u16(), &message, &details)
        }
        other => TidypostError::Api {
            status: 0,
            message: format!("{operation}: {other}"),
        },
    }
}

/// Map an API failure onto the error taxonomy.
pub fn classify_status(status: u16, message: &str, details: &[String]) -> TidypostError {
    let full = if details.is_empty() {
        message.to_string()
    } else {
        format!("{message} ({})", details.join("; "))
    };
    let lower = full.to_lowercase();

    match status {
        401 => TidypostError::Unauthorized(full),
        404 => TidypostError::NotFound(full),
        429 => TidypostError::RateLimited { retry_after: None },
        403 if lower.contains("rate limit") => TidypostError::RateLimited { retry_after: None },
        403 => TidypostError::Unauthorized(full),
        422 if is_anchor_rejection(&lower) => TidypostError::InvalidAnchor {
            rejected: rejected_indices(&full),
            message: full,
        },
        _ => TidypostError::Api {
            status,
            message: full,
        },
    }
}

fn is_anchor_rejection(lower: &str) -> bool {
    [
        "line could not be resolved",
        "path could not be resolved",
        "must be part of the diff",
        "pull_request_review_thread",
        "same hunk",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Indices `N` from any `comments[N]` references in an error message.
fn rejected_indices(message: &str) -> Vec<usize> {
    let mut indices: Vec<usize> = message
        .match_indices("comments[")
        .filter_map(|(start, needle)| {
            let rest = &message[start + needle.len()..];
            let end = rest.find(']')?;
            rest[..end].parse().ok()
        })
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

fn comment_payload(comment: &Comment) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "path": comment.file,
        "line": comment.line,
        "side": "RIGHT",
        "body": comment.body,
    });
    if let Some(start) = comment.start_line.filter(|s| *s < comment.line) {
        payload["start_line"] = start.into();
        payload["start_side"] = "RIGHT".into();
    }
    payload
}

fn review_payload(comments: &[Comment], body: Option<&str>) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "event": "COMMENT",
        "comments": comments.iter().map(comment_payload).collect::<Vec<_>>(),
    });
    if let Some(body) = body {
        payload["body"] = body.into();
    }
    payload
}

fn check_run_output(total: usize, chunk: &[Annotation]) -> serde_json::Value {
    let title = match total {
        0 => "No issues found".to_string(),
        1 => "1 finding".to_string(),
        n => format!("{n} findings"),
    };
    serde_json::json!({
        "title": title,
        "summary": format!("Static analysis reported {total} finding(s)."),
        "annotations": chunk,
    })
}
