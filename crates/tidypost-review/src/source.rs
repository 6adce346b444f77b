use async_trait::async_trait;
use tidypost_core::{ArtifactConfig, Metadata, Review, TidypostError};

use crate::api::ArtifactApi;
use crate::artifacts::download_artifacts;
use crate::store::ArtifactStore;

/// Documents found by an [`ArtifactSource`].
///
/// The review may be missing when only the metadata was present.
#[derive(Debug, Clone)]
pub struct Found {
    /// Metadata document.
    pub metadata: Metadata,
    /// Review document, if the source had one.
    pub review: Option<Review>,
    /// Where the documents came from, for logging.
    pub origin: String,
}

/// One place the review artifacts may be loaded from.
///
/// `Ok(None)` means "not here, try the next source".
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short human-readable description.
    fn describe(&self) -> String;

    /// Look for the documents.
    async fn load(&self) -> Result<Option<Found>, TidypostError>;
}

/// Reads the documents from the local artifact directory.
pub struct LocalSource {
    store: ArtifactStore,
}

impl LocalSource {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArtifactSource for LocalSource {
    fn describe(&self) -> String {
        format!("local directory {}", self.store.dir().display())
    }

    async fn load(&self) -> Result<Option<Found>, TidypostError> {
        let Some(metadata) = self.store.load_metadata()? else {
            return Ok(None);
        };
        Ok(Some(Found {
            metadata,
            review: self.store.load_review()?,
            origin: self.describe(),
        }))
    }
}

/// Downloads the documents from a completed workflow run.
pub struct RemoteSource<'a, A: ArtifactApi + ?Sized> {
    api: &'a A,
    run_id: u64,
    config: ArtifactConfig,
}

impl<'a, A: ArtifactApi + ?Sized> RemoteSource<'a, A> {
    pub fn new(api: &'a A, run_id: u64, config: ArtifactConfig) -> Self {
        Self {
            api,
            run_id,
            config,
        }
    }
}

#[async_trait]
impl<A: ArtifactApi + ?Sized> ArtifactSource for RemoteSource<'_, A> {
    fn describe(&self) -> String {
        format!("workflow run {}", self.run_id)
    }

    async fn load(&self) -> Result<Option<Found>, TidypostError> {
        tracing::info!(run_id = self.run_id, "attempting to download review artifacts");
        let (metadata, review) = download_artifacts(self.api, self.run_id, &self.config).await?;
        Ok(Some(Found {
            metadata,
            review: Some(review),
            origin: self.describe(),
        }))
    }
}

/// Try each source in order and return the first that has metadata.
///
/// Errors from a source stop the chain; they are never silently skipped.
pub async fn first_available(
    sources: &[Box<dyn ArtifactSource + '_>],
) -> Result<Option<Found>, TidypostError> {
    for source in sources {
        tracing::debug!(source = %source.describe(), "looking for review artifacts");
        if let Some(found) = source.load().await? {
            tracing::info!(origin = %found.origin, pr = found.metadata.pr_number, "loaded review metadata");
            return Ok(Some(found));
        }
    }
    Ok(None)
}
