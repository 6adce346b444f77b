use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tidypost_core::{AnnotationLevel, Comment, ExistingComment, Review, TidypostError};

use crate::api::PullRequestApi;
use crate::source::{first_available, ArtifactSource};

/// How findings are rendered on the pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Inline review comments.
    #[default]
    Comments,
    /// Check-run annotations.
    Annotations,
}

/// Knobs for one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Maximum comments per posted review.
    pub max_comments: usize,
    /// Acknowledgement posted for a clean review; empty posts nothing.
    pub lgtm_comment_body: String,
    /// Compute everything but post nothing.
    pub dry_run: bool,
    /// Comments or annotations.
    pub mode: RenderMode,
    /// Level of annotations derived from comments.
    pub annotation_level: AnnotationLevel,
    /// Local directory searched for artifacts, for error messages.
    pub artifact_dir: PathBuf,
    /// Workflow run used as the remote fallback, if any.
    pub run_id: Option<u64>,
}

/// Step of the delivery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    ResolveArtifacts,
    ReconcilePr,
    EmptyReview,
    RenderComments,
    RenderAnnotations,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ResolveArtifacts => write!(f, "resolve-artifacts"),
            Stage::ReconcilePr => write!(f, "reconcile-pr"),
            Stage::EmptyReview => write!(f, "empty-review"),
            Stage::RenderComments => write!(f, "render-comments"),
            Stage::RenderAnnotations => write!(f, "render-annotations"),
        }
    }
}

/// A delivery that ended in the failed state.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("delivery failed during {stage}")]
pub struct DeliveryFailure {
    /// Step that failed.
    pub stage: Stage,
    /// Why it failed.
    #[source]
    #[diagnostic_source]
    pub source: TidypostError,
}

fn at(stage: Stage) -> impl FnOnce(TidypostError) -> DeliveryFailure {
    move |source| DeliveryFailure { stage, source }
}

/// What happened to one batch of comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BatchStatus {
    /// Posted as a single review.
    Posted,
    /// Dry run: would have been posted.
    Previewed,
    /// Some anchors were rejected; the batch was split.
    Split {
        /// Comments that went out in a review.
        in_review: usize,
        /// Comments posted one at a time.
        individually: usize,
    },
    /// The batch could not be posted.
    Failed {
        /// Error reported by the API.
        reason: String,
    },
}

/// One `post_review` call's worth of comments.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Position of the batch, from zero.
    pub index: usize,
    /// Comments in posting order.
    pub comments: Vec<Comment>,
    /// Outcome.
    #[serde(flatten)]
    pub status: BatchStatus,
}

/// A comment that could not be delivered.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedComment {
    /// The comment.
    pub comment: Comment,
    /// Why it was dropped.
    pub reason: String,
}

/// Which terminal path the delivery took.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Outcome {
    /// The review was clean.
    Acknowledged {
        /// Acknowledgement text, `None` when suppressed.
        body: Option<String>,
        /// Whether it was actually posted.
        posted: bool,
    },
    /// Findings went out as review comments.
    Reviewed {
        /// Comments already present on the pull request.
        duplicates_skipped: usize,
        /// Batches in posting order.
        batches: Vec<BatchReport>,
        /// Comments that could not be posted at all.
        dropped: Vec<DroppedComment>,
    },
    /// Findings went out as check-run annotations.
    Annotated {
        /// Number of annotations.
        annotations: usize,
        /// Whether they were actually posted.
        posted: bool,
    },
}

/// Result of a completed delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    /// Pull request the review was delivered to.
    pub pr_number: u64,
    /// Where the artifacts were loaded from.
    pub origin: String,
    /// Rendering mode.
    pub mode: RenderMode,
    /// Whether posting was skipped.
    pub dry_run: bool,
    /// Comments in the loaded review.
    pub total_comments: usize,
    /// Terminal path and its details.
    pub outcome: Outcome,
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would post" } else { "posted" };
        writeln!(
            f,
            "PR #{} ({} comments loaded from {})",
            self.pr_number, self.total_comments, self.origin
        )?;
        match &self.outcome {
            Outcome::Acknowledged { body: None, .. } => {
                writeln!(f, "No issues found; acknowledgement suppressed.")?;
            }
            Outcome::Acknowledged {
                body: Some(body),
                posted,
            } => {
                let verb = if *posted { "posted" } else { "would post" };
                writeln!(f, "No issues found; {verb} acknowledgement: {body}")?;
            }
            Outcome::Annotated { annotations, posted } => {
                let verb = if *posted { "posted" } else { "would post" };
                writeln!(f, "{verb} {annotations} annotation(s) as a check run")?;
            }
            Outcome::Reviewed {
                duplicates_skipped,
                batches,
                dropped,
            } => {
                if *duplicates_skipped > 0 {
                    writeln!(f, "Skipped {duplicates_skipped} comment(s) already on the PR")?;
                }
                if batches.is_empty() {
                    writeln!(f, "Everything already posted.")?;
                }
                for batch in batches {
                    let status = match &batch.status {
                        BatchStatus::Posted => verb.to_string(),
                        BatchStatus::Previewed => "would post".to_string(),
                        BatchStatus::Split {
                            in_review,
                            individually,
                        } => format!("split: {in_review} in review, {individually} individually"),
                        BatchStatus::Failed { reason } => format!("failed: {reason}"),
                    };
                    writeln!(
                        f,
                        "Batch {} ({} comments): {status}",
                        batch.index + 1,
                        batch.comments.len()
                    )?;
                    for c in &batch.comments {
                        writeln!(f, "  {}:{}  {}", c.file, c.line, first_line(&c.body))?;
                    }
                }
                for d in dropped {
                    writeln!(
                        f,
                        "Dropped {}:{} ({})",
                        d.comment.file, d.comment.line, d.reason
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn first_line(body: &str) -> &str {
    body.lines().next().unwrap_or_default()
}

/// Content hash of a comment's (file, line, body).
///
/// Fields are length-prefixed so that different splits of the same bytes
/// never collide.
pub fn fingerprint(file: &str, line: u32, body: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((file.len() as u64).to_le_bytes());
    hasher.update(file.as_bytes());
    hasher.update(line.to_le_bytes());
    hasher.update((body.len() as u64).to_le_bytes());
    hasher.update(body.as_bytes());
    hasher.finalize().into()
}

/// Drop candidates already present on the pull request, and repeats within
/// the candidates themselves. Order is preserved.
///
/// Returns the remaining comments and how many were dropped.
pub fn remove_duplicates(
    candidates: &[Comment],
    existing: &[ExistingComment],
) -> (Vec<Comment>, usize) {
    let mut seen: HashSet<[u8; 32]> = existing
        .iter()
        .filter_map(|e| Some(fingerprint(&e.path, e.effective_line()?, &e.body)))
        .collect();

    let fresh: Vec<Comment> = candidates
        .iter()
        .filter(|c| seen.insert(fingerprint(&c.file, c.line, &c.body)))
        .cloned()
        .collect();
    let removed = candidates.len() - fresh.len();
    (fresh, removed)
}

/// Split `comments` into consecutive batches of at most `max` comments.
pub fn into_batches(comments: Vec<Comment>, max: usize) -> Vec<Vec<Comment>> {
    comments
        .chunks(max.max(1))
        .map(<[Comment]>::to_vec)
        .collect()
}

/// Drives one delivery: resolve artifacts, reconcile the PR number, then
/// acknowledge, comment, or annotate.
pub struct DeliveryEngine<'a, C: PullRequestApi + ?Sized> {
    client: &'a C,
    sources: Vec<Box<dyn ArtifactSource + 'a>>,
    options: DeliveryOptions,
}

impl<'a, C: PullRequestApi + ?Sized> DeliveryEngine<'a, C> {
    /// `sources` are tried in order; the first one with metadata wins.
    pub fn new(
        client: &'a C,
        sources: Vec<Box<dyn ArtifactSource + 'a>>,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            client,
            sources,
            options,
        }
    }

    /// Run the delivery to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryFailure`] naming the step that failed. Missing
    /// artifacts and PR number conflicts are reported before anything is
    /// posted.
    pub async fn run(&self) -> Result<DeliveryReport, DeliveryFailure> {
        let Some(found) = first_available(&self.sources)
            .await
            .map_err(at(Stage::ResolveArtifacts))?
        else {
            return Err(DeliveryFailure {
                stage: Stage::ResolveArtifacts,
                source: TidypostError::MissingMetadata {
                    searched: self.options.artifact_dir.clone(),
                    run_id_available: self.options.run_id.is_some(),
                },
            });
        };

        let pr_number = self
            .client
            .handle()
            .resolve(found.metadata.pr_number)
            .map_err(at(Stage::ReconcilePr))?;

        let Some(review) = found.review else {
            return Err(DeliveryFailure {
                stage: Stage::ResolveArtifacts,
                source: TidypostError::MissingReview,
            });
        };

        tracing::info!(
            pr = pr_number,
            comments = review.comments.len(),
            annotations = review.annotations.len(),
            "loaded review"
        );
        if let Ok(dump) = serde_json::to_string_pretty(&review) {
            tracing::debug!("review contents:\n{dump}");
        }

        let outcome = match self.options.mode {
            RenderMode::Annotations => self.render_annotations(&review).await?,
            RenderMode::Comments if review.is_clean() => self.acknowledge().await?,
            RenderMode::Comments => self.render_comments(&review).await?,
        };

        Ok(DeliveryReport {
            pr_number,
            origin: found.origin,
            mode: self.options.mode,
            dry_run: self.options.dry_run,
            total_comments: review.comments.len(),
            outcome,
        })
    }

    async fn acknowledge(&self) -> Result<Outcome, DeliveryFailure> {
        let body = self.options.lgtm_comment_body.as_str();
        if body.is_empty() {
            tracing::info!("no issues found; acknowledgement disabled");
            return Ok(Outcome::Acknowledged {
                body: None,
                posted: false,
            });
        }
        if self.options.dry_run {
            tracing::info!("no issues found; dry run, not posting acknowledgement");
            return Ok(Outcome::Acknowledged {
                body: Some(body.to_string()),
                posted: false,
            });
        }

        tracing::info!("no issues found, LGTM");
        self.client
            .post_acknowledgement(body)
            .await
            .map_err(at(Stage::EmptyReview))?;
        Ok(Outcome::Acknowledged {
            body: Some(body.to_string()),
            posted: true,
        })
    }

    async fn render_annotations(&self, review: &Review) -> Result<Outcome, DeliveryFailure> {
        let annotations = review.to_annotations(self.options.annotation_level);
        if self.options.dry_run {
            tracing::info!(count = annotations.len(), "dry run, not posting annotations");
            return Ok(Outcome::Annotated {
                annotations: annotations.len(),
                posted: false,
            });
        }

        tracing::info!(
            count = annotations.len(),
            level = %self.options.annotation_level,
            "posting annotations"
        );
        self.client
            .post_annotations(&annotations)
            .await
            .map_err(at(Stage::RenderAnnotations))?;
        Ok(Outcome::Annotated {
            annotations: annotations.len(),
            posted: true,
        })
    }

    async fn render_comments(&self, review: &Review) -> Result<Outcome, DeliveryFailure> {
        let existing = self
            .client
            .fetch_existing_comments()
            .await
            .map_err(at(Stage::RenderComments))?;

        let (fresh, duplicates_skipped) = remove_duplicates(&review.comments, &existing);
        if duplicates_skipped > 0 {
            tracing::info!(duplicates_skipped, "removed comments already on the PR");
        }
        if fresh.is_empty() {
            tracing::info!("everything already posted");
        }

        let mut batches = Vec::new();
        let mut dropped = Vec::new();
        // Cleared once a review carrying the summary is accepted.
        let mut pending_body = review.body.as_deref();
        for (index, comments) in into_batches(fresh, self.options.max_comments)
            .into_iter()
            .enumerate()
        {
            let status = if self.options.dry_run {
                pending_body = None;
                BatchStatus::Previewed
            } else {
                tracing::info!(batch = index + 1, count = comments.len(), "posting review");
                match self.client.post_review(&comments, pending_body).await {
                    Ok(()) => {
                        pending_body = None;
                        BatchStatus::Posted
                    }
                    Err(TidypostError::InvalidAnchor { message, rejected }) => {
                        tracing::warn!(batch = index + 1, %message, "review rejected an anchor, splitting batch");
                        let (status, body_posted) = self
                            .split_batch(&comments, &rejected, pending_body, &mut dropped)
                            .await
                            .map_err(at(Stage::RenderComments))?;
                        if body_posted {
                            pending_body = None;
                        }
                        status
                    }
                    Err(e) if e.is_fatal() => return Err(at(Stage::RenderComments)(e)),
                    Err(e) => {
                        tracing::warn!(batch = index + 1, error = %e, "failed to post review batch");
                        BatchStatus::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            };
            batches.push(BatchReport {
                index,
                comments,
                status,
            });
        }

        if let Some(summary) = pending_body.filter(|_| !batches.is_empty()) {
            tracing::info!("no review carried the summary, posting it as a comment");
            match self.client.post_acknowledgement(summary).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(at(Stage::RenderComments)(e)),
                Err(e) => tracing::warn!(error = %e, "failed to post review summary"),
            }
        }

        Ok(Outcome::Reviewed {
            duplicates_skipped,
            batches,
            dropped,
        })
    }

    /// Retry a rejected batch: the comments the API accepted go out as a
    /// review, the rest one at a time in their original order. When the API
    /// did not say which comments were rejected, every comment is posted on
    /// its own.
    ///
    /// Also returns whether `body` went out with an accepted review.
    async fn split_batch(
        &self,
        comments: &[Comment],
        rejected: &[usize],
        body: Option<&str>,
        dropped: &mut Vec<DroppedComment>,
    ) -> Result<(BatchStatus, bool), TidypostError> {
        let known = !rejected.is_empty() && rejected.iter().all(|&i| i < comments.len());
        let (mut valid, mut invalid): (Vec<(usize, &Comment)>, Vec<(usize, &Comment)>) =
            if known {
                comments
                    .iter()
                    .enumerate()
                    .partition(|(i, _)| !rejected.contains(i))
            } else {
                (Vec::new(), comments.iter().enumerate().collect())
            };

        let mut in_review = 0;
        let mut body_posted = false;
        if !valid.is_empty() {
            let subset: Vec<Comment> = valid.iter().map(|(_, c)| (*c).clone()).collect();
            match self.client.post_review(&subset, body).await {
                Ok(()) => {
                    in_review = subset.len();
                    body_posted = body.is_some();
                }
                Err(TidypostError::InvalidAnchor { .. }) => {
                    tracing::warn!("accepted subset was rejected too, posting individually");
                    invalid.append(&mut valid);
                    invalid.sort_by_key(|(i, _)| *i);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to post accepted subset");
                    dropped.extend(subset.into_iter().map(|comment| DroppedComment {
                        comment,
                        reason: e.to_string(),
                    }));
                }
            }
        }

        let mut individually = 0;
        for (_, comment) in invalid {
            match self.client.post_single_comment(comment).await {
                Ok(()) => individually += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(file = %comment.file, line = comment.line, error = %e, "dropping comment");
                    dropped.push(DroppedComment {
                        comment: comment.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let status = BatchStatus::Split {
            in_review,
            individually,
        };
        Ok((status, body_posted))
    }
}
