use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tidypost_core::{ArtifactConfig, Metadata, Review, TidypostError};

/// Reads and writes the metadata and review documents in a local directory.
///
/// A missing document is not an error: the loaders return `Ok(None)` so the
/// caller can fall back to another source.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    metadata_path: PathBuf,
    review_path: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at the configured artifact directory.
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            metadata_path: config.metadata_path(),
            review_path: config.review_path(),
        }
    }

    /// Directory the documents are read from.
    pub fn dir(&self) -> &Path {
        self.metadata_path.parent().unwrap_or(Path::new("."))
    }

    /// Load the metadata document.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load_metadata(&self) -> Result<Option<Metadata>, TidypostError> {
        load_json(&self.metadata_path)
    }

    /// Load the review document.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load_review(&self) -> Result<Option<Review>, TidypostError> {
        load_json(&self.review_path)
    }

    /// Write the metadata document, creating the directory if needed.
    pub fn save_metadata(&self, metadata: &Metadata) -> Result<(), TidypostError> {
        save_json(&self.metadata_path, metadata)
    }

    /// Write the review document, creating the directory if needed.
    pub fn save_review(&self, review: &Review) -> Result<(), TidypostError> {
        save_json(&self.review_path, review)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, TidypostError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        TidypostError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let value = serde_json::from_str(&content).map_err(|e| {
        TidypostError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(Some(value))
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TidypostError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| {
                TidypostError::Config(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
    }

    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).map_err(|e| {
        TidypostError::Config(format!("failed to write {}: {e}", path.display()))
    })?;
    Ok(())
}
