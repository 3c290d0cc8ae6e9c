//! Error types for the git toolkit.
//!
//! [`GitError`] is a plain command-failure record — it is what
//! `opensprint-core`'s `OrchestratorError::GitError` wraps directly. The
//! conflict-bearing outcomes the spec calls out by name (`BranchInUse`,
//! `RebaseConflict`, `MergeConflict`) are kept as distinct variants of
//! [`ToolkitError`] rather than folded into `GitError`'s string fields, so
//! callers can pattern-match `stage` and `conflictedFiles` instead of
//! parsing stderr.

use std::fmt;
use std::path::PathBuf;

/// A failed git command invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitError {
    /// The command that was run, e.g. `"git worktree add ..."`.
    pub command: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

impl GitError {
    #[must_use]
    pub fn new(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stderr: stderr.into(),
        }
    }
}

impl fmt::Display for GitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` failed: {}", self.command, self.stderr)
    }
}

impl std::error::Error for GitError {}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        Self::new("git", err.to_string())
    }
}

/// Errors surfaced by the higher-level toolkit operations in this crate.
///
/// Plain command failures are wrapped in [`Self::Command`]; the three
/// structured outcomes the orchestrator must pattern-match on on get their
/// own variants carrying the data the spec names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolkitError {
    /// A git subprocess exited non-zero.
    Command(GitError),
    /// `createTaskWorktree` found the branch checked out in another worktree
    /// whose heartbeat is still fresh.
    BranchInUse {
        branch: String,
        other_path: PathBuf,
    },
    /// `rebaseOntoMain` hit conflicts; rebase state was left for the caller.
    RebaseConflict(Vec<PathBuf>),
    /// `mergeToMainNoCommit` hit conflicts outside the runtime-exclude
    /// prefix; merge state was left for the caller.
    MergeConflict(Vec<PathBuf>),
}

impl fmt::Display for ToolkitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(e) => write!(f, "{e}"),
            Self::BranchInUse { branch, other_path } => {
                write!(
                    f,
                    "branch '{branch}' is already checked out at {}",
                    other_path.display()
                )
            }
            Self::RebaseConflict(files) => {
                write!(f, "rebase conflict in {} file(s)", files.len())
            }
            Self::MergeConflict(files) => {
                write!(f, "merge conflict in {} file(s)", files.len())
            }
        }
    }
}

impl std::error::Error for ToolkitError {}

impl From<GitError> for ToolkitError {
    fn from(err: GitError) -> Self {
        Self::Command(err)
    }
}

impl From<std::io::Error> for ToolkitError {
    fn from(err: std::io::Error) -> Self {
        Self::Command(GitError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_error_display() {
        let e = GitError::new("git push", "rejected");
        assert_eq!(format!("{e}"), "`git push` failed: rejected");
    }

    #[test]
    fn branch_in_use_display() {
        let e = ToolkitError::BranchInUse {
            branch: "opensprint/t1".to_owned(),
            other_path: PathBuf::from("/tmp/other"),
        };
        let msg = format!("{e}");
        assert!(msg.contains("opensprint/t1"));
        assert!(msg.contains("/tmp/other"));
    }

    #[test]
    fn conflict_display_counts_files() {
        let e = ToolkitError::MergeConflict(vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")]);
        assert_eq!(format!("{e}"), "merge conflict in 2 file(s)");
    }
}
