//! `mergeToMainNoCommit` (spec §4.2, §4.3).

use std::path::Path;

use crate::conflict::get_conflicted_files;
use crate::error::ToolkitError;
use crate::exclude::is_runtime_excluded;
use crate::run::{git_output, git_run};

/// Attempt `git merge --no-commit --no-ff <branch>` against the checkout at
/// `repo` (expected to have `main_branch` checked out).
///
/// Conflicts under a runtime-exclude prefix are auto-resolved by removing
/// the conflicting side and staging the result (no orchestrator state
/// should ever reach `main`, so there is no meaningful "other side" to
/// prefer). Any remaining conflict raises [`ToolkitError::MergeConflict`]
/// with the repo left in merge state for an external resolver.
///
/// # Errors
/// Returns [`ToolkitError::MergeConflict`] if unresolvable conflicts remain,
/// or [`ToolkitError::Command`] for any other git failure.
pub fn merge_to_main_no_commit(repo: &Path, branch: &str) -> Result<(), ToolkitError> {
    let (ok, _, stderr) = git_output(repo, &["merge", "--no-commit", "--no-ff", branch])?;
    if ok {
        return Ok(());
    }

    let conflicts = get_conflicted_files(repo)?;
    if conflicts.is_empty() {
        // Merge failed for a reason other than a content conflict
        // (e.g. local changes would be overwritten).
        return Err(ToolkitError::Command(crate::error::GitError::new(
            format!("git merge --no-commit --no-ff {branch}"),
            stderr,
        )));
    }

    let mut remaining = Vec::new();
    for path in conflicts {
        let rel = path.to_string_lossy().replace('\\', "/");
        if is_runtime_excluded(&rel) {
            let _ = git_run(repo, &["rm", "-f", "--ignore-unmatch", &rel]);
        } else {
            remaining.push(path);
        }
    }

    if remaining.is_empty() {
        Ok(())
    } else {
        Err(ToolkitError::MergeConflict(remaining))
    }
}

/// Abort an in-progress `--no-commit` merge, restoring the pre-merge state.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if `git merge --abort` fails.
pub fn abort_merge(repo: &Path) -> Result<(), ToolkitError> {
    git_run(repo, &["merge", "--abort"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;

    fn init_repo_with_main() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for args in [
            vec!["init", "-q", "-b", "main"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        fs::write(dir.path().join("a.txt"), "base\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "initial"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn merges_clean_branch_without_commit() {
        let dir = init_repo_with_main();
        Command::new("git")
            .args(["checkout", "-q", "-b", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        fs::write(dir.path().join("b.txt"), "feature\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "feature"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        Command::new("git").args(["checkout", "-q", "main"]).current_dir(dir.path()).output().unwrap();

        merge_to_main_no_commit(dir.path(), "opensprint/t1").unwrap();

        let status = Command::new("git").args(["status", "--porcelain"]).current_dir(dir.path()).output().unwrap();
        assert!(String::from_utf8_lossy(&status.stdout).contains("b.txt"));
    }

    #[test]
    fn real_conflict_raises_merge_conflict() {
        let dir = init_repo_with_main();
        Command::new("git")
            .args(["checkout", "-q", "-b", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        fs::write(dir.path().join("a.txt"), "branch version\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "branch change"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        Command::new("git").args(["checkout", "-q", "main"]).current_dir(dir.path()).output().unwrap();
        fs::write(dir.path().join("a.txt"), "main version\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "main change"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let result = merge_to_main_no_commit(dir.path(), "opensprint/t1");
        match result {
            Err(ToolkitError::MergeConflict(files)) => {
                assert_eq!(files, vec![std::path::PathBuf::from("a.txt")]);
            }
            other => panic!("expected MergeConflict, got {other:?}"),
        }
    }
}
