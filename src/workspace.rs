//! Per-issue workspaces on disk.
//!
//! A workspace directory's existence is the claim on its issue: it is
//! created with an exclusive `create_dir`, so across threads, processes and
//! restarts exactly one caller ever sees [`Claim::Claimed`] for a key. The
//! store never deletes workspaces.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

use crate::tracker::IssueKey;

/// Agent output log inside each workspace.
pub const OUTPUT_LOG: &str = "output.log";

/// Written into a workspace whose setup failed after the claim.
pub const SETUP_FAILED_MARKER: &str = "setup-failed";

/// Written into a workspace whose agent could not be started or waited on.
pub const DISPATCH_FAILED_MARKER: &str = "dispatch-failed";

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The workspace was created by this call; the caller owns the issue.
    Claimed(PathBuf),
    /// The workspace already existed; the issue was handled before.
    AlreadyClaimed(PathBuf),
}

#[derive(Debug, thiserror::Error)]
#[error("creating workspace {}: {source}", path.display())]
pub struct ClaimError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// State of one workspace as seen on disk.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceEntry {
    pub key: String,
    pub path: PathBuf,
    pub has_output_log: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Open the store at `root`, creating the directory if needed.
    ///
    /// The root is made absolute so workspace paths stay valid for child
    /// processes running elsewhere.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("creating workspaces directory {}", root.display()))?;
        let root = std::path::absolute(root)
            .with_context(|| format!("resolving {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that belongs to `key`.
    pub fn path_for(&self, key: &IssueKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Atomically claim `key` by creating its workspace directory.
    pub fn claim(&self, key: &IssueKey) -> Result<Claim, ClaimError> {
        let path = self.path_for(key);
        match fs::create_dir(&path) {
            Ok(()) => Ok(Claim::Claimed(path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(key = %key, "issue was already handled");
                Ok(Claim::AlreadyClaimed(path))
            }
            Err(source) => Err(ClaimError { path, source }),
        }
    }

    /// Record why setup failed for a claimed workspace. The claim stays.
    pub fn mark_setup_failed(workspace: &Path, reason: &str) -> io::Result<()> {
        fs::write(workspace.join(SETUP_FAILED_MARKER), format!("{reason}\n"))
    }

    /// Record why the agent never ran to completion. The claim stays.
    pub fn mark_dispatch_failed(workspace: &Path, reason: &str) -> io::Result<()> {
        fs::write(workspace.join(DISPATCH_FAILED_MARKER), format!("{reason}\n"))
    }

    /// All workspaces under the root, sorted by key.
    pub fn list(&self) -> anyhow::Result<Vec<WorkspaceEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("reading {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            entries.push(WorkspaceEntry {
                key: entry.file_name().to_string_lossy().into_owned(),
                has_output_log: path.join(OUTPUT_LOG).is_file(),
                setup_failure: read_marker(&path, SETUP_FAILED_MARKER),
                dispatch_failure: read_marker(&path, DISPATCH_FAILED_MARKER),
                path,
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn read_marker(workspace: &Path, marker: &str) -> Option<String> {
    fs::read_to_string(workspace.join(marker))
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn key(s: &str) -> IssueKey {
        s.parse().unwrap()
    }

    #[test]
    fn open_creates_root_and_makes_it_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("workspaces");
        let store = WorkspaceStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert!(store.root().is_absolute());
    }

    #[test]
    fn first_claim_wins_then_already_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(dir.path()).unwrap();
        let k = key("PROJ-1");

        let first = store.claim(&k).unwrap();
        assert_eq!(first, Claim::Claimed(store.path_for(&k)));
        assert!(store.path_for(&k).is_dir());

        let second = store.claim(&k).unwrap();
        assert_eq!(second, Claim::AlreadyClaimed(store.path_for(&k)));
    }

    #[test]
    fn claim_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("PROJ-2");
        let store = WorkspaceStore::open(dir.path()).unwrap();
        assert!(matches!(store.claim(&k).unwrap(), Claim::Claimed(_)));

        let reopened = WorkspaceStore::open(dir.path()).unwrap();
        assert!(matches!(reopened.claim(&k).unwrap(), Claim::AlreadyClaimed(_)));
    }

    #[test]
    fn concurrent_claims_yield_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.claim(&key("RACE-7")).unwrap()
                })
            })
            .collect();

        let results: Vec<Claim> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let claimed = results
            .iter()
            .filter(|c| matches!(c, Claim::Claimed(_)))
            .count();
        assert_eq!(claimed, 1);
        assert_eq!(results.len() - claimed, threads - 1);
    }

    #[test]
    fn claim_error_when_root_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(&dir.path().join("ws")).unwrap();
        fs::remove_dir(store.root()).unwrap();
        fs::write(store.root(), "not a directory").unwrap();

        let err = store.claim(&key("PROJ-3")).unwrap_err();
        assert!(err.path.ends_with("PROJ-3"));
        // Nothing was claimed, so a later attempt can still succeed.
        fs::remove_file(store.root()).unwrap();
        fs::create_dir(store.root()).unwrap();
        assert!(matches!(store.claim(&key("PROJ-3")).unwrap(), Claim::Claimed(_)));
    }

    #[test]
    fn list_reports_logs_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(dir.path()).unwrap();

        let Claim::Claimed(ok) = store.claim(&key("B-2")).unwrap() else {
            panic!("expected claim");
        };
        fs::write(ok.join(OUTPUT_LOG), "agent output").unwrap();

        let Claim::Claimed(failed) = store.claim(&key("A-1")).unwrap() else {
            panic!("expected claim");
        };
        WorkspaceStore::mark_setup_failed(&failed, "repository acme/server: clone not found")
            .unwrap();
        let Claim::Claimed(unlaunched) = store.claim(&key("C-3")).unwrap() else {
            panic!("expected claim");
        };
        WorkspaceStore::mark_dispatch_failed(&unlaunched, "tool not found: agent").unwrap();
        fs::write(dir.path().join("stray-file"), "").unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, "A-1");
        assert!(!entries[0].has_output_log);
        assert_eq!(
            entries[0].setup_failure.as_deref(),
            Some("repository acme/server: clone not found")
        );
        assert_eq!(entries[1].key, "B-2");
        assert!(entries[1].has_output_log);
        assert!(entries[1].setup_failure.is_none());
        assert!(entries[1].dispatch_failure.is_none());
        assert_eq!(entries[2].key, "C-3");
        assert!(entries[2].setup_failure.is_none());
        assert_eq!(entries[2].dispatch_failure.as_deref(), Some("tool not found: agent"));
    }
}
