//! Delivery of static-analysis reviews to pull requests.
//!
//! Loads the review artifacts (locally or from a workflow run), reconciles the
//! pull request number, and posts the findings as batched review comments or
//! check-run annotations.

pub mod actions;
pub mod api;
pub mod artifacts;
pub mod deliver;
pub mod github;
pub mod source;
pub mod store;
