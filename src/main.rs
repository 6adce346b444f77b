use std::path::{Path, PathBuf};

use clap::builder::BoolishValueParser;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tidypost_core::{
    strip_enclosing_quotes, AnnotationLevel, OutputFormat, RepoRef, TidypostConfig,
};
use tidypost_review::api::PullRequestHandle;
use tidypost_review::deliver::{DeliveryEngine, DeliveryOptions, RenderMode};
use tidypost_review::github::GitHubClient;
use tidypost_review::source::{ArtifactSource, LocalSource, RemoteSource};
use tidypost_review::store::ArtifactStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tidypost",
    version,
    about = "Post static-analysis findings to a pull request",
    long_about = "Post static-analysis findings to a pull request.\n\n\
                   Reads the metadata and review documents produced by the analysis run,\n\
                   from the artifact directory or from a workflow run's artifacts, and\n\
                   delivers them as batched review comments or check-run annotations.\n\
                   Comments already on the pull request are never posted twice.\n\n\
                   Examples:\n  \
                     tidypost --repo owner/repo                     Post from ./tidy-review-*.json\n  \
                     tidypost --repo owner/repo --workflow-id 42    Fall back to run 42's artifacts\n  \
                     tidypost --repo owner/repo --dry-run           Show what would be posted\n  \
                     tidypost --repo owner/repo --annotations       Post a check run instead"
)]
struct Cli {
    /// Repository as owner/name
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repo: String,

    /// API token (default: GITHUB_TOKEN)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Pull request number; must agree with the metadata if both are present
    #[arg(long)]
    pr_number: Option<u64>,

    /// Maximum comments per posted review (default: 25)
    #[arg(long)]
    max_comments: Option<usize>,

    /// Comment posted when there are no findings; empty posts nothing
    #[arg(long)]
    lgtm_comment_body: Option<String>,

    /// Show what would be posted without posting anything
    #[arg(long)]
    dry_run: bool,

    /// Workflow run to download artifacts from when they are not local
    #[arg(long)]
    workflow_id: Option<u64>,

    /// Post findings as check-run annotations instead of review comments
    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    annotations: Option<bool>,

    /// Level of annotations derived from comments: notice, warning or failure
    #[arg(long)]
    annotation_level: Option<AnnotationLevel>,

    /// Directory holding the review artifacts (default: .)
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Path to configuration file (default: .tidypost.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// Layer command-line flags over the file configuration.
    fn apply_to(&self, config: &mut TidypostConfig) {
        if let Some(max) = self.max_comments {
            config.post.max_comments = max;
        }
        if let Some(body) = &self.lgtm_comment_body {
            config.post.lgtm_comment_body = body.clone();
        }
        if let Some(annotations) = self.annotations {
            config.post.annotations = annotations;
        }
        if let Some(level) = self.annotation_level {
            config.post.annotation_level = level;
        }
        if let Some(dir) = &self.artifact_dir {
            config.artifacts.dir = dir.clone();
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TidypostConfig> {
    let config = match path {
        Some(path) => TidypostConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".tidypost.toml");
            if default_path.exists() {
                TidypostConfig::from_file(default_path)?
            } else {
                TidypostConfig::default()
            }
        }
    };
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    config.validate()?;

    let repo: RepoRef = cli.repo.parse()?;
    let handle = PullRequestHandle::new(repo, cli.pr_number);
    let client = GitHubClient::new(
        handle,
        cli.token.as_deref(),
        &config.retry,
        &config.post.check_run_name,
    )?;

    let mut sources: Vec<Box<dyn ArtifactSource + '_>> = vec![Box::new(LocalSource::new(
        ArtifactStore::new(&config.artifacts),
    ))];
    if let Some(run_id) = cli.workflow_id {
        sources.push(Box::new(RemoteSource::new(
            &client,
            run_id,
            config.artifacts.clone(),
        )));
    }

    let options = DeliveryOptions {
        max_comments: config.post.max_comments,
        lgtm_comment_body: strip_enclosing_quotes(&config.post.lgtm_comment_body).to_string(),
        dry_run: cli.dry_run,
        mode: if config.post.annotations {
            RenderMode::Annotations
        } else {
            RenderMode::Comments
        },
        annotation_level: config.post.annotation_level,
        artifact_dir: config.artifacts.dir.clone(),
        run_id: cli.workflow_id,
    };

    let report = DeliveryEngine::new(&client, sources, options).run().await?;

    match cli.format {
        OutputFormat::Text => print!("{report}"),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
            println!("{json}");
        }
    }

    tidypost_review::actions::record_total_comments(report.total_comments)?;
    Ok(())
}
