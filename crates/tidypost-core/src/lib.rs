//! Core types, configuration, and error handling for tidypost.
//!
//! This crate provides the shared foundation used by the delivery crate and
//! the binary:
//! - [`TidypostError`]: unified error type using `thiserror` and `miette`
//! - [`TidypostConfig`]: configuration loaded from `.tidypost.toml`
//! - The review documents: [`Metadata`], [`Review`], [`Comment`], [`Annotation`]

mod config;
mod error;
mod types;

pub use config::{
    strip_enclosing_quotes, ArtifactConfig, PostConfig, RetryConfig, TidypostConfig,
};
pub use error::TidypostError;
pub use types::{
    Annotation, AnnotationLevel, Comment, ExistingComment, Metadata, OutputFormat, RepoRef, Review,
};

/// A convenience `Result` type for tidypost operations.
pub type Result<T> = std::result::Result<T, TidypostError>;
