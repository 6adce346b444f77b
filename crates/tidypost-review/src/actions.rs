//! Step outputs for GitHub Actions.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tidypost_core::TidypostError;

/// Append `key=value` to the step output file at `path`.
pub fn write_output(path: &Path, key: &str, value: &str) -> Result<(), TidypostError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{key}={value}")?;
    Ok(())
}

/// Record `total_comments` in the file named by `GITHUB_OUTPUT`, if set.
///
/// Returns whether anything was written.
pub fn record_total_comments(total: usize) -> Result<bool, TidypostError> {
    match std::env::var_os("GITHUB_OUTPUT") {
        Some(path) if !path.is_empty() => {
            write_output(Path::new(&path), "total_comments", &total.to_string())?;
            tracing::debug!(total, "wrote total_comments step output");
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_without_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "earlier=1\n").unwrap();

        write_output(&path, "total_comments", "7").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "earlier=1\ntotal_comments=7\n");
    }

    #[test]
    fn creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh");
        write_output(&path, "total_comments", "0").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "total_comments=0\n");
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("output");
        let err = write_output(&path, "k", "v").unwrap_err();
        assert!(matches!(err, TidypostError::Io(_)));
    }
}
