use crate::{VcsClient, VcsError};
use std::collections::HashMap;
use std::path::Path;

/// Test VCS: a fixed branch table, and checkout materializes configured
/// files into the workdir so stack detection sees a real tree.
pub struct MockVcs {
    branches: HashMap<String, String>,
    files: Vec<(String, String)>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self {
            branches: HashMap::new(),
            files: vec![("Dockerfile".to_owned(), "FROM scratch\n".to_owned())],
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: &str, sha: &str) -> Self {
        self.branches.insert(branch.to_owned(), sha.to_owned());
        self
    }

    /// Replace the files written at checkout.
    #[must_use]
    pub fn with_files(mut self, files: Vec<(String, String)>) -> Self {
        self.files = files;
        self
    }
}

impl Default for MockVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsClient for MockVcs {
    fn resolve_branch(&self, branch: &str) -> Result<String, VcsError> {
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::BranchNotFound(branch.to_owned()))
    }

    fn checkout(&self, workdir: &Path, branch: &str) -> Result<(), VcsError> {
        // Same failure surface as a real clone of a deleted branch
        self.resolve_branch(branch)?;
        for (name, content) in &self.files {
            std::fs::write(workdir.join(name), content)
                .map_err(branchbox_runtime::RuntimeError::Io)?;
        }
        Ok(())
    }
}
