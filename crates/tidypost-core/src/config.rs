use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TidypostError;
use crate::types::AnnotationLevel;

/// Top-level configuration loaded from `.tidypost.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use tidypost_core::TidypostConfig;
///
/// let config = TidypostConfig::default();
/// assert_eq!(config.post.max_comments, 25);
/// assert_eq!(config.artifacts.name, "tidy-review");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TidypostConfig {
    /// Delivery behavior.
    #[serde(default)]
    pub post: PostConfig,
    /// Where the review artifacts live.
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    /// Hosting API retry and timeout settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl TidypostConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TidypostError::Io`] if the file cannot be read, or
    /// [`TidypostError::Toml`] if the content is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, TidypostError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`TidypostError::Toml`] if parsing fails, or
    /// [`TidypostError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidypost_core::TidypostConfig;
    ///
    /// let toml = r#"
    /// [post]
    /// max_comments = 10
    /// "#;
    /// let config = TidypostConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.post.max_comments, 10);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, TidypostError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot constrain.
    ///
    /// # Errors
    ///
    /// Returns [`TidypostError::Config`] for a zero batch ceiling or zero retry attempts.
    pub fn validate(&self) -> Result<(), TidypostError> {
        if self.post.max_comments == 0 {
            return Err(TidypostError::Config(
                "max_comments must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(TidypostError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostConfig {
    /// Maximum inline comments per posted review (default: 25).
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,
    /// Comment posted when the review is clean; empty posts nothing.
    #[serde(default = "default_lgtm_comment_body")]
    pub lgtm_comment_body: String,
    /// Render findings as check-run annotations instead of review comments.
    #[serde(default)]
    pub annotations: bool,
    /// Name of the check run created in annotation mode.
    #[serde(default = "default_check_run_name")]
    pub check_run_name: String,
    /// Level given to annotations derived from comments (default: warning).
    #[serde(default)]
    pub annotation_level: AnnotationLevel,
}

fn default_max_comments() -> usize {
    25
}

fn default_lgtm_comment_body() -> String {
    r#"tidypost says "All clean, LGTM! :+1:""#.into()
}

fn default_check_run_name() -> String {
    "tidypost".into()
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            max_comments: default_max_comments(),
            lgtm_comment_body: default_lgtm_comment_body(),
            annotations: false,
            check_run_name: default_check_run_name(),
            annotation_level: AnnotationLevel::default(),
        }
    }
}

/// Local and remote artifact naming.
///
/// # Examples
///
/// ```
/// use tidypost_core::ArtifactConfig;
///
/// let config = ArtifactConfig::default();
/// assert_eq!(config.metadata_path(), std::path::Path::new("./tidy-review-metadata.json"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directory holding the documents locally (default: `.`).
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    /// Name of the CI artifact uploaded by the analysis stage.
    #[serde(default = "default_artifact_name")]
    pub name: String,
    /// File name of the metadata document.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
    /// File name of the review document.
    #[serde(default = "default_review_file")]
    pub review_file: String,
}

impl ArtifactConfig {
    /// Full local path of the metadata document.
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(&self.metadata_file)
    }

    /// Full local path of the review document.
    pub fn review_path(&self) -> PathBuf {
        self.dir.join(&self.review_file)
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifact_name() -> String {
    "tidy-review".into()
}

fn default_metadata_file() -> String {
    "tidy-review-metadata.json".into()
}

fn default_review_file() -> String {
    "tidy-review-output.json".into()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            name: default_artifact_name(),
            metadata_file: default_metadata_file(),
            review_file: default_review_file(),
        }
    }
}

/// Retry policy for rate-limited API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base backoff delay in milliseconds, doubled per attempt (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Transport timeout for artifact downloads in seconds (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Remove enclosing quotes: one layer of `"`, then of `'`, then of `"`.
///
/// CI inputs are frequently passed through with their quotes intact, and
/// action inputs may arrive double-wrapped as `'"..."'`.
///
/// # Examples
///
/// ```
/// use tidypost_core::strip_enclosing_quotes;
///
/// assert_eq!(strip_enclosing_quotes("\"All clean\""), "All clean");
/// assert_eq!(strip_enclosing_quotes("'It''s fine'"), "It''s fine");
/// assert_eq!(strip_enclosing_quotes("'\"All clean\"'"), "All clean");
/// assert_eq!(strip_enclosing_quotes("\"unbalanced"), "\"unbalanced");
/// ```
pub fn strip_enclosing_quotes(value: &str) -> &str {
    ['"', '\'', '"']
        .into_iter()
        .fold(value.trim(), |current, quote| {
            if current.len() >= 2 && current.starts_with(quote) && current.ends_with(quote) {
                &current[1..current.len() - 1]
            } else {
                current
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = TidypostConfig::default();
        assert_eq!(config.post.max_comments, 25);
        assert!(!config.post.annotations);
        assert!(config.post.lgtm_comment_body.contains("LGTM"));
        assert_eq!(config.post.check_run_name, "tidypost");
        assert_eq!(config.post.annotation_level, AnnotationLevel::Warning);
        assert_eq!(config.artifacts.dir, PathBuf::from("."));
        assert_eq!(config.artifacts.metadata_file, "tidy-review-metadata.json");
        assert_eq!(config.artifacts.review_file, "tidy-review-output.json");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.timeout_secs, 60);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[post]
max_comments = 10
lgtm_comment_body = ""
annotations = true
check_run_name = "clang-tidy"
annotation_level = "notice"

[artifacts]
dir = "out"
name = "clang-tidy-review"

[retry]
max_attempts = 5
base_delay_ms = 250
"#;
        let config = TidypostConfig::from_toml(toml).unwrap();
        assert_eq!(config.post.max_comments, 10);
        assert!(config.post.lgtm_comment_body.is_empty());
        assert!(config.post.annotations);
        assert_eq!(config.post.check_run_name, "clang-tidy");
        assert_eq!(config.post.annotation_level, AnnotationLevel::Notice);
        assert_eq!(config.artifacts.name, "clang-tidy-review");
        assert_eq!(
            config.artifacts.review_path(),
            PathBuf::from("out/tidy-review-output.json")
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.timeout_secs, 60);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = TidypostConfig::from_toml("").unwrap();
        assert_eq!(config.post.max_comments, 25);
        assert_eq!(config.artifacts.name, "tidy-review");
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(TidypostConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn zero_max_comments_is_rejected() {
        let err = TidypostConfig::from_toml("[post]\nmax_comments = 0\n").unwrap_err();
        assert!(matches!(err, TidypostError::Config(_)));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(TidypostConfig::from_toml("[retry]\nmax_attempts = 0\n").is_err());
    }

    #[test]
    fn strip_quotes_edge_cases() {
        assert_eq!(strip_enclosing_quotes(""), "");
        assert_eq!(strip_enclosing_quotes("\""), "\"");
        assert_eq!(strip_enclosing_quotes("\"\""), "");
        assert_eq!(strip_enclosing_quotes("  'x'  "), "x");
        assert_eq!(strip_enclosing_quotes("\"mixed'"), "\"mixed'");
        assert_eq!(
            strip_enclosing_quotes(r#""say "hi"""#),
            r#"say "hi""#
        );
    }

    #[test]
    fn strip_quotes_unwraps_nested_layers() {
        assert_eq!(strip_enclosing_quotes(r#"'"LGTM"'"#), "LGTM");
        assert_eq!(strip_enclosing_quotes(r#""'LGTM'""#), "LGTM");
        assert_eq!(strip_enclosing_quotes(r#""'"LGTM"'""#), "LGTM");
        assert_eq!(strip_enclosing_quotes(r#"""LGTM"""#), "LGTM");
        assert_eq!(strip_enclosing_quotes("''x''"), "'x'");
    }
}
