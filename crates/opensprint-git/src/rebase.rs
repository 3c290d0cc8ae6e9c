//! Rebase and revert primitives (spec §4.2).

use std::path::Path;

use crate::conflict::get_conflicted_files;
use crate::error::ToolkitError;
use crate::run::{git_output, git_run, git_run_hooks_off};

/// Rebase the branch checked out at `path` onto `main_branch`.
///
/// # Errors
/// Returns [`ToolkitError::RebaseConflict`] with the conflicted files if the
/// rebase stops on a conflict; the rebase is left in progress for the
/// caller's external resolver. Returns [`ToolkitError::Command`] for any
/// other git failure.
pub fn rebase_onto_main(path: &Path, main_branch: &str) -> Result<(), ToolkitError> {
    let (ok, _, stderr) = git_output(path, &["rebase", "--no-verify", main_branch])?;
    if ok {
        return Ok(());
    }
    let conflicts = get_conflicted_files(path)?;
    if conflicts.is_empty() {
        return Err(ToolkitError::Command(crate::error::GitError::new(
            format!("git rebase {main_branch}"),
            stderr,
        )));
    }
    Err(ToolkitError::RebaseConflict(conflicts))
}

/// Continue an in-progress rebase after conflicts have been resolved
/// (staged) by an external resolver (the merger agent).
///
/// # Errors
/// Returns [`ToolkitError::RebaseConflict`] if further conflicts remain, or
/// [`ToolkitError::Command`] on any other failure.
pub fn rebase_continue(path: &Path) -> Result<(), ToolkitError> {
    let (ok, _, stderr) = git_output(path, &["rebase", "--continue"])?;
    if ok {
        return Ok(());
    }
    let conflicts = get_conflicted_files(path)?;
    if conflicts.is_empty() {
        return Err(ToolkitError::Command(crate::error::GitError::new(
            "git rebase --continue",
            stderr,
        )));
    }
    Err(ToolkitError::RebaseConflict(conflicts))
}

/// Abandon an in-progress rebase, restoring the branch to its
/// pre-rebase state.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if `git rebase --abort` fails.
pub fn rebase_abort(path: &Path) -> Result<(), ToolkitError> {
    git_run(path, &["rebase", "--abort"])?;
    Ok(())
}

/// Hard-reset, clean, check out `main_branch`, and delete `branch`.
/// Tolerant to a branch that no longer exists.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if checkout or reset fails (branch
/// deletion failures are swallowed — this is a best-effort return-to-main).
pub fn revert_and_return_to_main(repo: &Path, main_branch: &str, branch: &str) -> Result<(), ToolkitError> {
    git_run(repo, &["checkout", main_branch])?;
    let _ = git_run(repo, &["reset", "--hard", "HEAD"]);
    let _ = git_run(repo, &["clean", "-fd"]);
    let _ = git_run_hooks_off(repo, &["branch", "-D", branch]);
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
    fn rebase_onto_main_no_conflict() {
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
        fs::write(dir.path().join("a.txt"), "base updated\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "main update"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        Command::new("git")
            .args(["checkout", "-q", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        rebase_onto_main(dir.path(), "main").unwrap();
        assert!(!is_rebase_metadata_present(dir.path()));
    }

    fn is_rebase_metadata_present(path: &Path) -> bool {
        path.join(".git/rebase-merge").is_dir() || path.join(".git/rebase-apply").is_dir()
    }

    #[test]
    fn revert_returns_to_main_and_deletes_branch() {
        let dir = init_repo_with_main();
        Command::new("git")
            .args(["checkout", "-q", "-b", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        revert_and_return_to_main(dir.path(), "main", "opensprint/t1").unwrap();

        let branch_out = Command::new("git")
            .args(["branch", "--list", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&branch_out.stdout).trim().is_empty());
    }

    #[test]
    fn revert_tolerates_missing_branch() {
        let dir = init_repo_with_main();
        let result = revert_and_return_to_main(dir.path(), "main", "opensprint/does-not-exist");
        assert!(result.is_ok());
    }
}
