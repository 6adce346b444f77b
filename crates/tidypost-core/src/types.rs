use std::fmt;
use std::str::FromStr;

use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TidypostError;

/// Identifies which pull request and commit a review belongs to.
///
/// Written by the analysis stage and consumed read-only here.
///
/// # Examples
///
/// ```
/// use tidypost_core::Metadata;
///
/// let meta: Metadata = serde_json::from_str(r#"{"pr_number": 12}"#).unwrap();
/// assert_eq!(meta.pr_number, 12);
/// assert!(meta.head_sha.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Pull request the analysis ran against.
    pub pr_number: u64,
    /// Head commit that was analysed, if the analysis stage recorded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    /// Base commit of the diff, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,
}

/// A single inline finding anchored to a file and line.
///
/// Accepts `path` as an alias for `file`, which is what GitHub review
/// payloads use.
///
/// # Examples
///
/// ```
/// use tidypost_core::Comment;
///
/// let c: Comment = serde_json::from_str(
///     r#"{"path": "src/lib.cpp", "line": 3, "body": "unused variable"}"#,
/// ).unwrap();
/// assert_eq!(c.file, "src/lib.cpp");
/// assert_eq!(c.line, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comment {
    /// Path relative to the repository root.
    #[serde(alias = "path")]
    pub file: String,
    /// Line in the new version of the file (1-based).
    #[serde(deserialize_with = "one_based_line")]
    pub line: u32,
    /// First line of a multi-line range, when the finding spans several lines.
    #[serde(
        default,
        deserialize_with = "one_based_start_line",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_line: Option<u32>,
    /// Markdown body.
    pub body: String,
}

impl Comment {
    /// Convenience constructor for a single-line comment.
    pub fn new(file: impl Into<String>, line: u32, body: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            start_line: None,
            body: body.into(),
        }
    }
}

fn one_based_line<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let line = u32::deserialize(deserializer)?;
    if line == 0 {
        return Err(de::Error::invalid_value(
            Unexpected::Unsigned(0),
            &"a 1-based line number",
        ));
    }
    Ok(line)
}

fn one_based_start_line<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u32>, D::Error> {
    match Option::<u32>::deserialize(deserializer)? {
        Some(0) => Err(de::Error::invalid_value(
            Unexpected::Unsigned(0),
            &"a 1-based line number",
        )),
        other => Ok(other),
    }
}

/// Severity of a check-run annotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    /// Informational.
    Notice,
    /// Worth fixing.
    #[default]
    Warning,
    /// Must be fixed.
    Failure,
}

impl fmt::Display for AnnotationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationLevel::Notice => write!(f, "notice"),
            AnnotationLevel::Warning => write!(f, "warning"),
            AnnotationLevel::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for AnnotationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notice" | "note" | "info" => Ok(AnnotationLevel::Notice),
            "warning" => Ok(AnnotationLevel::Warning),
            "failure" | "error" => Ok(AnnotationLevel::Failure),
            other => Err(format!("unknown annotation level: {other}")),
        }
    }
}

/// A diagnostic rendered through the check-run mechanism.
///
/// # Examples
///
/// ```
/// use tidypost_core::{Annotation, AnnotationLevel, Comment};
///
/// let a = Annotation::from(&Comment::new("a.cpp", 7, "narrowing conversion"));
/// assert_eq!(a.start_line, 7);
/// assert_eq!(a.end_line, 7);
/// assert_eq!(a.annotation_level, AnnotationLevel::Warning);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Path relative to the repository root.
    #[serde(alias = "file")]
    pub path: String,
    /// First annotated line.
    pub start_line: u32,
    /// Last annotated line.
    pub end_line: u32,
    /// Severity.
    #[serde(default)]
    pub annotation_level: AnnotationLevel,
    /// Description of the finding.
    pub message: String,
    /// Short title shown above the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Annotation {
    /// Annotation covering `comment`'s line range at `level`.
    ///
    /// A start line after the comment's line is ignored, so the range is
    /// never inverted.
    pub fn from_comment(comment: &Comment, level: AnnotationLevel) -> Self {
        Self {
            path: comment.file.clone(),
            start_line: comment
                .start_line
                .filter(|start| *start <= comment.line)
                .unwrap_or(comment.line),
            end_line: comment.line,
            annotation_level: level,
            message: comment.body.clone(),
            title: None,
        }
    }
}

impl From<&Comment> for Annotation {
    fn from(comment: &Comment) -> Self {
        Self::from_comment(comment, AnnotationLevel::default())
    }
}

/// The analysis result to deliver.
///
/// # Examples
///
/// ```
/// use tidypost_core::Review;
///
/// let review: Review = serde_json::from_str(r#"{"comments": []}"#).unwrap();
/// assert!(review.is_clean());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Summary text attached to the first posted review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Ordered inline findings.
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Findings meant for the check-run channel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Review {
    /// Returns `true` when the analysis found nothing to report.
    pub fn is_clean(&self) -> bool {
        self.comments.is_empty()
    }

    /// Annotations to post in annotation mode: the dedicated field when the
    /// analysis stage filled it in, otherwise one per comment at `level`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidypost_core::{AnnotationLevel, Comment, Review};
    ///
    /// let review = Review {
    ///     comments: vec![Comment::new("a.cpp", 1, "x"), Comment::new("b.cpp", 2, "y")],
    ///     ..Review::default()
    /// };
    /// let annotations = review.to_annotations(AnnotationLevel::Notice);
    /// assert_eq!(annotations.len(), 2);
    /// assert_eq!(annotations[0].annotation_level, AnnotationLevel::Notice);
    /// ```
    pub fn to_annotations(&self, level: AnnotationLevel) -> Vec<Annotation> {
        if !self.annotations.is_empty() {
            return self.annotations.clone();
        }
        self.comments
            .iter()
            .map(|c| Annotation::from_comment(c, level))
            .collect()
    }
}

/// A review comment already present on the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExistingComment {
    /// API identifier.
    #[serde(default)]
    pub id: u64,
    /// File the comment is attached to.
    pub path: String,
    /// Current line, `None` when the comment is outdated.
    #[serde(default)]
    pub line: Option<u32>,
    /// Line the comment was originally made on.
    #[serde(default)]
    pub original_line: Option<u32>,
    /// Markdown body.
    pub body: String,
}

impl ExistingComment {
    /// The line used for duplicate detection.
    pub fn effective_line(&self) -> Option<u32> {
        self.line.or(self.original_line)
    }
}

/// Repository identifier in `owner/name` form.
///
/// # Examples
///
/// ```
/// use tidypost_core::RepoRef;
///
/// let repo: RepoRef = "octocat/hello-world".parse().unwrap();
/// assert_eq!(repo.owner, "octocat");
/// assert_eq!(repo.name, "hello-world");
/// assert_eq!(repo.to_string(), "octocat/hello-world");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    /// Account or organisation.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl FromStr for RepoRef {
    type Err = TidypostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((owner, name)) = s.trim().split_once('/') else {
            return Err(TidypostError::Config(format!(
                "invalid repository '{s}', expected owner/repo"
            )));
        };
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(TidypostError::Config(format!(
                "invalid repository '{s}', expected owner/repo"
            )));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// How the delivery report is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
