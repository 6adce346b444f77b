use std::io::{Cursor, Read};
use std::path::Path;

use tidypost_core::{ArtifactConfig, Metadata, Review, TidypostError};

use crate::api::ArtifactApi;

/// Documents recovered from a workflow run.
#[derive(Debug, Default)]
struct Decoded {
    metadata: Option<Metadata>,
    review: Option<Review>,
}

/// Download the metadata and review produced by workflow run `run_id`.
///
/// Only artifacts named `config.name` are considered; expired ones are
/// skipped. Nothing is written to disk.
///
/// # Errors
///
/// Returns [`TidypostError::ArtifactNotFound`] if the run has no matching
/// artifact, or [`TidypostError::ArtifactDecode`] if an archive is corrupt or
/// lacks one of the documents.
pub async fn download_artifacts<A: ArtifactApi + ?Sized>(
    api: &A,
    run_id: u64,
    config: &ArtifactConfig,
) -> Result<(Metadata, Review), TidypostError> {
    let artifacts = api.list_run_artifacts(run_id).await?;
    let matching: Vec<_> = artifacts
        .iter()
        .filter(|a| a.name == config.name)
        .filter(|a| {
            if a.expired {
                tracing::warn!(artifact = a.id, name = %a.name, "skipping expired artifact");
            }
            !a.expired
        })
        .collect();

    if matching.is_empty() {
        return Err(TidypostError::ArtifactNotFound {
            run_id,
            name: config.name.clone(),
        });
    }

    let mut decoded = Decoded::default();
    for artifact in matching {
        tracing::info!(artifact = artifact.id, run_id, "downloading review artifact");
        let bytes = api.download_artifact(artifact).await?;
        let found = decode_archive(&bytes, config).map_err(|reason| {
            TidypostError::ArtifactDecode {
                run_id,
                reason: format!("artifact {}: {reason}", artifact.id),
            }
        })?;
        decoded.metadata = decoded.metadata.or(found.metadata);
        decoded.review = decoded.review.or(found.review);
    }

    let Some(metadata) = decoded.metadata else {
        return Err(TidypostError::ArtifactDecode {
            run_id,
            reason: format!("no {} in artifact '{}'", config.metadata_file, config.name),
        });
    };
    let Some(review) = decoded.review else {
        return Err(TidypostError::ArtifactDecode {
            run_id,
            reason: format!("no {} in artifact '{}'", config.review_file, config.name),
        });
    };
    Ok((metadata, review))
}

/// Pull the two documents out of a zip archive, matching on file name at any depth.
fn decode_archive(bytes: &[u8], config: &ArtifactConfig) -> Result<Decoded, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip archive: {e}"))?;

    let mut decoded = Decoded::default();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| format!("unreadable entry {index}: {e}"))?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        let Some(file_name) = Path::new(&entry_name).file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let is_metadata = file_name == config.metadata_file;
        let is_review = file_name == config.review_file;
        if !is_metadata && !is_review {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| format!("failed to read {entry_name}: {e}"))?;

        if is_metadata {
            let metadata = serde_json::from_str(&content)
                .map_err(|e| format!("invalid metadata in {entry_name}: {e}"))?;
            decoded.metadata = Some(metadata);
        } else {
            let review = serde_json::from_str(&content)
                .map_err(|e| format!("invalid review in {entry_name}: {e}"))?;
            decoded.review = Some(review);
        }
    }
    Ok(decoded)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::api::RunArtifact;

    pub(crate) fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub(crate) struct FakeRun {
        pub artifacts: Vec<(RunArtifact, Vec<u8>)>,
        pub downloads: Mutex<Vec<u64>>,
    }

    impl FakeRun {
        pub(crate) fn new(artifacts: Vec<(RunArtifact, Vec<u8>)>) -> Self {
            Self {
                artifacts,
                downloads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ArtifactApi for FakeRun {
        async fn list_run_artifacts(&self, _run_id: u64) -> Result<Vec<RunArtifact>, TidypostError> {
            Ok(self.artifacts.iter().map(|(a, _)| a.clone()).collect())
        }

        async fn download_artifact(&self, artifact: &RunArtifact) -> Result<Vec<u8>, TidypostError> {
            self.downloads.lock().unwrap().push(artifact.id);
            Ok(self
                .artifacts
                .iter()
                .find(|(a, _)| a.id == artifact.id)
                .map(|(_, bytes)| bytes.clone())
                .unwrap_or_default())
        }
    }

    pub(crate) fn artifact(id: u64, name: &str) -> RunArtifact {
        RunArtifact {
            id,
            name: name.into(),
            archive_download_url: format!("https://example.invalid/{id}.zip"),
            expired: false,
        }
    }

    fn good_archive() -> Vec<u8> {
        zip_of(&[
            ("tidy-review-metadata.json", r#"{"pr_number": 31}"#),
            (
                "tidy-review-output.json",
                r#"{"comments": [{"path": "a.cpp", "line": 2, "body": "x"}]}"#,
            ),
        ])
    }

    #[tokio::test]
    async fn downloads_and_decodes_matching_artifact() {
        let run = FakeRun::new(vec![
            (artifact(1, "coverage"), zip_of(&[("other.json", "{}")])),
            (artifact(2, "tidy-review"), good_archive()),
        ]);
        let (metadata, review) = download_artifacts(&run, 99, &ArtifactConfig::default())
            .await
            .unwrap();
        assert_eq!(metadata.pr_number, 31);
        assert_eq!(review.comments.len(), 1);
        assert_eq!(*run.downloads.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn documents_in_subdirectories_are_found() {
        let bytes = zip_of(&[
            ("out/tidy-review-metadata.json", r#"{"pr_number": 4}"#),
            ("out/tidy-review-output.json", r#"{"comments": []}"#),
        ]);
        let run = FakeRun::new(vec![(artifact(5, "tidy-review"), bytes)]);
        let (metadata, review) = download_artifacts(&run, 1, &ArtifactConfig::default())
            .await
            .unwrap();
        assert_eq!(metadata.pr_number, 4);
        assert!(review.is_clean());
    }

    #[tokio::test]
    async fn no_matching_artifact_is_not_found() {
        let run = FakeRun::new(vec![(artifact(1, "coverage"), good_archive())]);
        let err = download_artifacts(&run, 77, &ArtifactConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TidypostError::ArtifactNotFound { run_id: 77, .. }
        ));
    }

    #[tokio::test]
    async fn expired_artifact_is_not_found() {
        let mut expired = artifact(1, "tidy-review");
        expired.expired = true;
        let run = FakeRun::new(vec![(expired, good_archive())]);
        let err = download_artifacts(&run, 3, &ArtifactConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TidypostError::ArtifactNotFound { .. }));
        assert!(run.downloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_archive_is_decode_error() {
        let run = FakeRun::new(vec![(artifact(1, "tidy-review"), b"not a zip".to_vec())]);
        let err = download_artifacts(&run, 8, &ArtifactConfig::default())
            .await
            .unwrap_err();
        match err {
            TidypostError::ArtifactDecode { run_id, reason } => {
                assert_eq!(run_id, 8);
                assert!(reason.contains("not a zip archive"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_document_is_decode_error() {
        let bytes = zip_of(&[
            ("tidy-review-metadata.json", r#"{"number": 4}"#),
            ("tidy-review-output.json", r#"{"comments": []}"#),
        ]);
        let run = FakeRun::new(vec![(artifact(1, "tidy-review"), bytes)]);
        let err = download_artifacts(&run, 2, &ArtifactConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TidypostError::ArtifactDecode { .. }));
    }

    #[tokio::test]
    async fn archive_without_review_is_decode_error() {
        let bytes = zip_of(&[("tidy-review-metadata.json", r#"{"pr_number": 4}"#)]);
        let run = FakeRun::new(vec![(artifact(1, "tidy-review"), bytes)]);
        let err = download_artifacts(&run, 2, &ArtifactConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tidy-review-output.json"));
    }
}
