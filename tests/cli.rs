use std::path::Path;
use std::process::{Command, Output};

fn write_artifacts(dir: &Path, metadata: &str, review: Option<&str>) {
    std::fs::write(dir.join("tidy-review-metadata.json"), metadata).unwrap();
    if let Some(review) = review {
        std::fs::write(dir.join("tidy-review-output.json"), review).unwrap();
    }
}

fn tidypost(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tidypost"))
        .args(["--repo", "octo/repo", "--token", "dummy", "--artifact-dir"])
        .arg(dir)
        .args(args)
        .current_dir(dir)
        .env_remove("GITHUB_OUTPUT")
        .env_remove("GITHUB_API_URL")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn conflicting_pr_number_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, Some(r#"{"comments": []}"#));

    let output = tidypost(dir.path(), &["--pr-number", "3", "--dry-run"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("#3"), "stderr: {stderr}");
    assert!(stderr.contains("#4"), "stderr: {stderr}");
}

#[test]
fn missing_metadata_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = tidypost(dir.path(), &["--dry-run"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("couldn't find review metadata"), "stderr: {stderr}");
}

#[test]
fn missing_review_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, None);

    let output = tidypost(dir.path(), &["--dry-run"]);

    assert!(!output.status.success());
}

#[test]
fn dry_run_on_clean_review_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, Some(r#"{"comments": []}"#));

    let output = tidypost(dir.path(), &["--dry-run"]);

    assert!(
        output.status.success(),
        "tidypost failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PR #4"));
    assert!(stdout.contains("would post acknowledgement"));
    assert!(stdout.contains("All clean, LGTM!"));
}

#[test]
fn annotation_dry_run_reports_json_and_step_output() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(
        dir.path(),
        r#"{"pr_number": 9}"#,
        Some(
            r#"{"comments": [
                {"path": "src/a.cpp", "line": 3, "body": "unused variable"},
                {"path": "src/b.cpp", "line": 8, "body": "narrowing conversion"}
            ]}"#,
        ),
    );
    let step_output = dir.path().join("step-output");

    let output = Command::new(env!("CARGO_BIN_EXE_tidypost"))
        .args(["--repo", "octo/repo", "--token", "dummy", "--artifact-dir"])
        .arg(dir.path())
        .args(["--annotations", "--dry-run", "--format", "json"])
        .current_dir(dir.path())
        .env("GITHUB_OUTPUT", &step_output)
        .env_remove("GITHUB_API_URL")
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "tidypost failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["pr_number"], 9);
    assert_eq!(report["total_comments"], 2);
    assert_eq!(report["outcome"]["kind"], "annotated");
    assert_eq!(report["outcome"]["posted"], false);

    let written = std::fs::read_to_string(&step_output).unwrap();
    assert_eq!(written, "total_comments=2\n");
}

#[test]
fn zero_max_comments_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, Some(r#"{"comments": []}"#));

    let output = tidypost(dir.path(), &["--max-comments", "0", "--dry-run"]);

    assert!(!output.status.success());
}

#[test]
fn config_file_sets_acknowledgement() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, Some(r#"{"comments": []}"#));
    std::fs::write(
        dir.path().join(".tidypost.toml"),
        "[post]\nlgtm_comment_body = '\"Nothing to report\"'\n",
    )
    .unwrap();

    let output = tidypost(dir.path(), &["--dry-run"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("would post acknowledgement: Nothing to report\n"), "stdout: {stdout}");
}

#[test]
fn double_wrapped_acknowledgement_is_unquoted() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, Some(r#"{"comments": []}"#));

    let output = tidypost(
        dir.path(),
        &["--dry-run", "--lgtm-comment-body", r#"'"Ship it"'"#],
    );

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("would post acknowledgement: Ship it\n"), "stdout: {stdout}");
}

#[test]
fn unknown_annotation_level_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), r#"{"pr_number": 4}"#, Some(r#"{"comments": []}"#));

    let output = tidypost(dir.path(), &["--annotations", "--annotation-level", "fatal"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown annotation level"), "stderr: {stderr}");
}

#[test]
fn zero_line_in_review_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(
        dir.path(),
        r#"{"pr_number": 4}"#,
        Some(r#"{"comments": [{"path": "a.cpp", "line": 0, "body": "x"}]}"#),
    );

    let output = tidypost(dir.path(), &["--dry-run", "--annotations"]);

    assert!(!output.status.success());
}
