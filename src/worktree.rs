//! Git worktree provisioning for a claimed workspace.
//!
//! Each configured repository must already be cloned under the repos root.
//! Provisioning is all-or-nothing per issue: the first failure stops it and
//! is reported with the repository that caused it.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::config::Repository;
use crate::subprocess::Tool;
use crate::tracker::IssueKey;

/// Branch created in every repository for an issue.
pub fn branch_name(key: &IssueKey) -> String {
    format!("agent/{key}-resolve")
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("repository {url}: clone not found at {}", path.display())]
    MissingClone { url: String, path: PathBuf },

    #[error("repository {url}: resolving path: {source}")]
    Path {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("repository {url}: creating worktree failed: {message}")]
    Git { url: String, message: String },
}

impl ProvisionError {
    /// The repository the failure belongs to.
    pub fn repository(&self) -> &str {
        match self {
            Self::MissingClone { url, .. } | Self::Path { url, .. } | Self::Git { url, .. } => url,
        }
    }
}

/// A worktree created for an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub repository: String,
    pub path: PathBuf,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct WorktreeProvisioner {
    repos_root: PathBuf,
    repositories: Vec<Repository>,
}

impl WorktreeProvisioner {
    pub fn new(repos_root: &Path, repositories: Vec<Repository>) -> Self {
        Self {
            repos_root: repos_root.to_path_buf(),
            repositories,
        }
    }

    /// Create one worktree per repository inside `workspace`, in order.
    #[instrument(skip_all, fields(key = %key))]
    pub fn provision(
        &self,
        workspace: &Path,
        key: &IssueKey,
    ) -> Result<Vec<Worktree>, ProvisionError> {
        if self.repositories.is_empty() {
            debug!("no repositories configured, skipping worktree setup");
            return Ok(Vec::new());
        }

        let branch = branch_name(key);
        let mut created = Vec::with_capacity(self.repositories.len());
        for repo in &self.repositories {
            created.push(self.create_worktree(workspace, repo, &branch)?);
        }
        Ok(created)
    }

    fn create_worktree(
        &self,
        workspace: &Path,
        repo: &Repository,
        branch: &str,
    ) -> Result<Worktree, ProvisionError> {
        let path_error = |source| ProvisionError::Path {
            url: repo.url.clone(),
            source,
        };
        let clone_dir = std::path::absolute(self.repos_root.join(repo.name())).map_err(path_error)?;
        let worktree_dir = std::path::absolute(workspace.join(repo.name())).map_err(path_error)?;

        if !clone_dir.is_dir() {
            return Err(ProvisionError::MissingClone {
                url: repo.url.clone(),
                path: clone_dir,
            });
        }

        info!(
            repo = repo.name(),
            branch,
            worktree_dir = %worktree_dir.display(),
            "creating git worktree"
        );

        let worktree_arg = worktree_dir.to_string_lossy();
        Tool::new("git")
            .args(&["worktree", "add", "-b", branch, &*worktree_arg, repo.branch.as_str()])
            .current_dir(&clone_dir)
            .run_ok()
            .map_err(|e| ProvisionError::Git {
                url: repo.url.clone(),
                message: format!("{e:#}"),
            })?;

        info!(
            repo = repo.name(),
            worktree_dir = %worktree_dir.display(),
            "git worktree created successfully"
        );

        Ok(Worktree {
            repository: repo.url.clone(),
            path: worktree_dir,
            branch: branch.to_string(),
        })
    }
}
