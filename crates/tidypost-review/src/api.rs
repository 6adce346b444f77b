use std::sync::OnceLock;

use async_trait::async_trait;
use serde::Deserialize;
use tidypost_core::{Annotation, Comment, ExistingComment, RepoRef, TidypostError};

/// The pull request a client is scoped to.
///
/// The number may be unknown at construction time. It is set at most once,
/// either from the command line or from the metadata document, and never
/// changes afterwards.
///
/// # Examples
///
/// ```
/// use tidypost_core::RepoRef;
/// use tidypost_review::api::PullRequestHandle;
///
/// let handle = PullRequestHandle::new("octocat/hello".parse::<RepoRef>().unwrap(), None);
/// assert_eq!(handle.number(), None);
/// assert_eq!(handle.resolve(42).unwrap(), 42);
/// assert!(handle.resolve(43).is_err());
/// ```
#[derive(Debug)]
pub struct PullRequestHandle {
    repo: RepoRef,
    supplied: Option<u64>,
    number: OnceLock<u64>,
}

impl PullRequestHandle {
    /// Create a handle, optionally with an externally supplied number.
    pub fn new(repo: RepoRef, number: Option<u64>) -> Self {
        let cell = OnceLock::new();
        if let Some(n) = number {
            let _ = cell.set(n);
        }
        Self {
            repo,
            supplied: number,
            number: cell,
        }
    }

    /// Repository this handle points at.
    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// The resolved pull request number, if known yet.
    pub fn number(&self) -> Option<u64> {
        self.number.get().copied()
    }

    /// The resolved number, or a configuration error if it was never set.
    pub fn require_number(&self) -> Result<u64, TidypostError> {
        self.number().ok_or_else(|| {
            TidypostError::Config("pull request number has not been resolved".into())
        })
    }

    /// Reconcile the handle with the number recorded in the metadata.
    ///
    /// Adopts `from_metadata` when no number was set. Fails with
    /// [`TidypostError::ConflictingPrNumber`] when a different number was
    /// already set.
    pub fn resolve(&self, from_metadata: u64) -> Result<u64, TidypostError> {
        let resolved = *self.number.get_or_init(|| from_metadata);
        if resolved != from_metadata {
            return Err(TidypostError::ConflictingPrNumber {
                supplied: self.supplied.unwrap_or(resolved),
                metadata: from_metadata,
            });
        }
        Ok(resolved)
    }
}

/// An artifact uploaded by a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunArtifact {
    /// API identifier.
    pub id: u64,
    /// Name given at upload time.
    pub name: String,
    /// Where the zip archive can be downloaded.
    #[serde(default)]
    pub archive_download_url: String,
    /// Whether the retention period has passed.
    #[serde(default)]
    pub expired: bool,
}

/// Operations against one pull request on the hosting API.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// The pull request this client is scoped to.
    fn handle(&self) -> &PullRequestHandle;

    /// Every review comment currently on the pull request.
    async fn fetch_existing_comments(&self) -> Result<Vec<ExistingComment>, TidypostError>;

    /// Create one review containing `comments` and an optional summary body.
    async fn post_review(
        &self,
        comments: &[Comment],
        body: Option<&str>,
    ) -> Result<(), TidypostError>;

    /// Post one review comment on its own, outside a review.
    async fn post_single_comment(&self, comment: &Comment) -> Result<(), TidypostError>;

    /// Post a conversation comment that is not anchored to any line.
    async fn post_acknowledgement(&self, body: &str) -> Result<(), TidypostError>;

    /// Attach `annotations` to the pull request's head commit as a check run.
    async fn post_annotations(&self, annotations: &[Annotation]) -> Result<(), TidypostError>;
}

/// Repository-scoped access to workflow run artifacts.
#[async_trait]
pub trait ArtifactApi: Send + Sync {
    /// Every artifact uploaded by `run_id`.
    async fn list_run_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifact>, TidypostError>;

    /// Raw zip bytes of `artifact`.
    async fn download_artifact(&self, artifact: &RunArtifact) -> Result<Vec<u8>, TidypostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoRef {
        "owner/repo".parse().unwrap()
    }

    #[test]
    fn supplied_number_matching_metadata_is_kept() {
        let handle = PullRequestHandle::new(repo(), Some(8));
        assert_eq!(handle.resolve(8).unwrap(), 8);
        assert_eq!(handle.number(), Some(8));
    }

    #[test]
    fn supplied_number_conflicting_with_metadata_cites_both() {
        let handle = PullRequestHandle::new(repo(), Some(8));
        let err = handle.resolve(9).unwrap_err();
        match err {
            TidypostError::ConflictingPrNumber { supplied, metadata } => {
                assert_eq!(supplied, 8);
                assert_eq!(metadata, 9);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handle.number(), Some(8));
    }

    #[test]
    fn adopted_number_is_fixed() {
        let handle = PullRequestHandle::new(repo(), None);
        assert!(handle.require_number().is_err());
        assert_eq!(handle.resolve(3).unwrap(), 3);
        assert!(handle.resolve(4).is_err());
        assert_eq!(handle.require_number().unwrap(), 3);
    }

    #[test]
    fn run_artifact_parses_api_shape() {
        let json = r#"{
            "id": 11,
            "node_id": "MDg6QXJ0aWZhY3QxMQ==",
            "name": "tidy-review",
            "size_in_bytes": 556,
            "archive_download_url": "https://api.github.com/repos/o/r/actions/artifacts/11/zip",
            "expired": false
        }"#;
        let artifact: RunArtifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.id, 11);
        assert_eq!(artifact.name, "tidy-review");
        assert!(!artifact.expired);
    }
}
