//! Conflict introspection (spec §4.2): `getConflictedFiles`,
//! `isRebaseInProgress`, `isMergeInProgress`.

use std::path::{Path, PathBuf};

use crate::error::ToolkitError;
use crate::run::git_stdout;

/// Files currently listed as unmerged (`U`, `AA`, `DD`, ...) in the index.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if `git diff --name-only` fails.
pub fn get_conflicted_files(path: &Path) -> Result<Vec<PathBuf>, ToolkitError> {
    let out = git_stdout(path, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(out.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect())
}

/// `true` if a rebase is currently in progress in `path`'s `.git` metadata.
#[must_use]
pub fn is_rebase_in_progress(path: &Path) -> bool {
    git_metadata_dir(path).is_some_and(|dir| {
        dir.join("rebase-merge").is_dir() || dir.join("rebase-apply").is_dir()
    })
}

/// `true` if a merge is currently in progress (`MERGE_HEAD` present).
#[must_use]
pub fn is_merge_in_progress(path: &Path) -> bool {
    git_metadata_dir(path).is_some_and(|dir| dir.join("MERGE_HEAD").is_file())
}

/// Resolve the real `.git` metadata directory for `path`, following the
/// `gitdir: <path>` indirection a linked worktree's `.git` file uses.
fn git_metadata_dir(path: &Path) -> Option<PathBuf> {
    let dotgit = path.join(".git");
    if dotgit.is_dir() {
        return Some(dotgit);
    }
    let contents = std::fs::read_to_string(&dotgit).ok()?;
    let target = contents.trim().strip_prefix("gitdir: ")?;
    Some(path.join(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn no_rebase_or_merge_in_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").args(["init", "-q"]).current_dir(dir.path()).output().unwrap();
        assert!(!is_rebase_in_progress(dir.path()));
        assert!(!is_merge_in_progress(dir.path()));
    }

    #[test]
    fn no_conflicts_in_clean_repo() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").args(["init", "-q"]).current_dir(dir.path()).output().unwrap();
        let files = get_conflicted_files(dir.path()).unwrap();
        assert!(files.is_empty());
    }
}
