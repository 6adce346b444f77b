use std::path::PathBuf;

/// Errors that can occur while loading and delivering a review.
///
/// Library crates use this type directly; the binary renders it through
/// `miette` at the boundary, so each variant carries a diagnostic code and
/// a hint for the person reading the CI log.
///
/// # Examples
///
/// ```
/// use tidypost_core::TidypostError;
///
/// let err = TidypostError::ConflictingPrNumber { supplied: 7, metadata: 9 };
/// assert!(err.to_string().contains("#7"));
/// assert!(err.to_string().contains("#9"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TidypostError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(tidypost::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(tidypost::config))]
    Config(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(tidypost::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(tidypost::toml))]
    Toml(#[from] toml::de::Error),

    /// No metadata document could be found locally or in a workflow run.
    #[error("couldn't find review metadata in {}{}", .searched.display(), run_fallback_suffix(.run_id_available))]
    #[diagnostic(
        code(tidypost::missing_metadata),
        help("run the analysis stage first, or pass --workflow-id so the artifacts can be downloaded")
    )]
    MissingMetadata {
        /// Local directory that was searched.
        searched: PathBuf,
        /// Whether a workflow run identifier was available for the remote fallback.
        run_id_available: bool,
    },

    /// Metadata was found but the review document was not.
    #[error("review metadata was found but the review document is missing")]
    #[diagnostic(
        code(tidypost::missing_review),
        help("the analysis stage must upload both the metadata and the review document")
    )]
    MissingReview,

    /// The supplied pull request number disagrees with the metadata.
    #[error("conflicting PR numbers: passed #{supplied} but metadata from the analysis run has #{metadata}")]
    #[diagnostic(
        code(tidypost::conflicting_pr_number),
        help("drop --pr-number, or make sure the artifacts belong to the pull request being reviewed")
    )]
    ConflictingPrNumber {
        /// Number given on the command line.
        supplied: u64,
        /// Number recorded in the metadata document.
        metadata: u64,
    },

    /// The workflow run has no artifacts matching the expected name.
    #[error("no artifact named '{name}' found for workflow run {run_id}")]
    #[diagnostic(
        code(tidypost::artifact_not_found),
        help("the run may still be in progress, or the analysis stage did not upload its output")
    )]
    ArtifactNotFound {
        /// Workflow run that was searched.
        run_id: u64,
        /// Artifact name that was expected.
        name: String,
    },

    /// A downloaded artifact could not be decoded.
    #[error("failed to decode artifacts from workflow run {run_id}: {reason}")]
    #[diagnostic(code(tidypost::artifact_decode))]
    ArtifactDecode {
        /// Workflow run the artifact came from.
        run_id: u64,
        /// What went wrong.
        reason: String,
    },

    /// The token was rejected by the hosting API.
    #[error("unauthorized: {0}")]
    #[diagnostic(
        code(tidypost::unauthorized),
        help("check that the token is set and has pull-request write permission")
    )]
    Unauthorized(String),

    /// The repository, pull request, or run does not exist.
    #[error("not found: {0}")]
    #[diagnostic(code(tidypost::not_found))]
    NotFound(String),

    /// The hosting API rate limit was hit and retries were exhausted.
    #[error("rate limited by the hosting API{}", retry_after_suffix(.retry_after))]
    #[diagnostic(code(tidypost::rate_limited))]
    RateLimited {
        /// Seconds the API asked us to wait, if it said.
        retry_after: Option<u64>,
    },

    /// One or more comments are anchored outside the current diff.
    #[error("invalid comment anchor: {message}")]
    #[diagnostic(code(tidypost::invalid_anchor))]
    InvalidAnchor {
        /// Message returned by the API.
        message: String,
        /// Indices (within the submitted batch) of the rejected comments, when known.
        rejected: Vec<usize>,
    },

    /// Any other hosting API failure.
    #[error("GitHub API error {status}: {message}")]
    #[diagnostic(code(tidypost::api))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message returned by the API.
        message: String,
    },
}

fn run_fallback_suffix(run_id_available: &bool) -> &'static str {
    if *run_id_available {
        " or in the workflow run artifacts"
    } else {
        ""
    }
}

fn retry_after_suffix(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|secs| format!(" (retry after {secs}s)"))
        .unwrap_or_default()
}

impl TidypostError {
    /// Returns `true` if this error must abort delivery rather than being
    /// recorded against a single batch or comment.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidypost_core::TidypostError;
    ///
    /// assert!(TidypostError::Unauthorized("bad token".into()).is_fatal());
    /// assert!(!TidypostError::InvalidAnchor { message: "x".into(), rejected: vec![] }.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TidypostError::InvalidAnchor { .. } | TidypostError::Api { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TidypostError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = TidypostError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn missing_metadata_mentions_run_fallback_only_when_available() {
        let local = TidypostError::MissingMetadata {
            searched: PathBuf::from("/tmp/out"),
            run_id_available: false,
        };
        assert_eq!(local.to_string(), "couldn't find review metadata in /tmp/out");

        let remote = TidypostError::MissingMetadata {
            searched: PathBuf::from("/tmp/out"),
            run_id_available: true,
        };
        assert!(remote.to_string().ends_with("or in the workflow run artifacts"));
    }

    #[test]
    fn rate_limited_shows_retry_hint() {
        let err = TidypostError::RateLimited {
            retry_after: Some(30),
        };
        assert_eq!(
            err.to_string(),
            "rate limited by the hosting API (retry after 30s)"
        );
        let err = TidypostError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "rate limited by the hosting API");
    }

    #[test]
    fn artifact_errors_cite_run_id() {
        let err = TidypostError::ArtifactNotFound {
            run_id: 42,
            name: "tidy-review".into(),
        };
        assert!(err.to_string().contains("42"));
        let err = TidypostError::ArtifactDecode {
            run_id: 42,
            reason: "not a zip".into(),
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn fatal_classification() {
        assert!(TidypostError::NotFound("repo".into()).is_fatal());
        assert!(TidypostError::RateLimited { retry_after: None }.is_fatal());
        assert!(!TidypostError::Api {
            status: 500,
            message: "boom".into()
        }
        .is_fatal());
    }
}
