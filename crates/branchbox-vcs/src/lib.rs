//! Version-control client for Branchbox.
//!
//! Resolves a branch to its commit sha through the GitHub refs API and
//! materializes a checkout into an environment workdir via git. The
//! [`VcsClient`] trait keeps the engine independent of GitHub; [`MockVcs`]
//! serves the test suites.

pub mod github;
pub mod mock;

pub use github::{GithubClient, VcsConfig};
pub use mock::MockVcs;

use branchbox_runtime::RuntimeError;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("branch not found: {0}")]
    BranchNotFound(String),
    #[error("vcs configuration error: {0}")]
    Config(String),
    #[error("vcs http error: {0}")]
    Http(String),
    #[error("unexpected vcs response: {0}")]
    Response(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Branch lookup and checkout, as the lifecycle manager consumes them.
pub trait VcsClient: Send + Sync {
    /// Resolve `branch` to its commit sha, or [`VcsError::BranchNotFound`].
    fn resolve_branch(&self, branch: &str) -> Result<String, VcsError>;

    /// Clone the repository and check out `branch` into `workdir`.
    /// The workdir already exists and is empty.
    fn checkout(&self, workdir: &Path, branch: &str) -> Result<(), VcsError>;
}
