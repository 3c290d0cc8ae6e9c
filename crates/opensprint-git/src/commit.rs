//! WIP commit: `commitWip` (spec §4.2).

use std::path::Path;

use crate::error::ToolkitError;
use crate::exclude::RUNTIME_EXCLUDE_PATHS;
use crate::run::{git_output, git_run, git_run_hooks_off, git_stdout};

/// Stage everything in the worktree, unstage the runtime-exclude paths, and
/// commit `WIP: <task_id>` with hooks disabled.
///
/// Returns `true` if a commit was produced, `false` if there was nothing to
/// commit (a clean worktree is not an error).
///
/// # Errors
/// Returns [`ToolkitError::Command`] if staging or committing fails for a
/// reason other than "nothing to commit".
pub fn commit_wip(path: &Path, task_id: &str) -> Result<bool, ToolkitError> {
    git_run(path, &["add", "-A"])?;

    for excluded in RUNTIME_EXCLUDE_PATHS {
        // Best-effort: the path may not exist in this worktree at all.
        let _ = git_run(path, &["reset", "--", excluded]);
    }

    let (has_staged, _, _) = git_output(path, &["diff", "--cached", "--quiet"])?;
    if has_staged {
        return Ok(false);
    }

    let message = format!("WIP: {task_id}");
    git_run_hooks_off(path, &["commit", "--no-verify", "-m", &message])?;
    Ok(true)
}

/// Finalize an in-progress `--no-commit` merge (see [`crate::merge::merge_to_main_no_commit`])
/// with hooks disabled and an explicit `message`.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if the commit fails.
pub fn commit_merge(path: &Path, message: &str) -> Result<(), ToolkitError> {
    git_run_hooks_off(path, &["commit", "--no-verify", "-m", message])?;
    Ok(())
}

/// Subject line of `rev`'s most recent commit, if any. Used to attribute a
/// push-rebase conflict (which has no single task in its own right) to the
/// task whose `Closed <taskId>: <title>` commit last landed on the branch.
#[must_use]
pub fn most_recent_subject(repo: &Path, rev: &str) -> Option<String> {
    git_stdout(repo, &["log", "-1", "--format=%s", rev]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "initial"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn commits_when_dirty() {
        let dir = init_repo();
        fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        let committed = commit_wip(dir.path(), "t1").unwrap();
        assert!(committed);
        let log = Command::new("git")
            .args(["log", "-1", "--format=%s"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "WIP: t1");
    }

    #[test]
    fn no_commit_when_clean() {
        let dir = init_repo();
        let committed = commit_wip(dir.path(), "t1").unwrap();
        assert!(!committed);
    }

    #[test]
    fn excludes_runtime_only_paths() {
        let dir = init_repo();
        fs::create_dir_all(dir.path().join(".opensprint/sessions")).unwrap();
        fs::write(dir.path().join(".opensprint/sessions/t1-1.json"), "{}").unwrap();
        fs::write(dir.path().join("real.txt"), "x\n").unwrap();

        commit_wip(dir.path(), "t1").unwrap();

        let show = Command::new("git")
            .args(["show", "--name-only", "--format=", "HEAD"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let files = String::from_utf8_lossy(&show.stdout);
        assert!(files.contains("real.txt"));
        assert!(!files.contains(".opensprint/sessions"));
    }

    #[test]
    fn commit_merge_uses_given_message() {
        let dir = init_repo();
        fs::write(dir.path().join("staged.txt"), "x\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        commit_merge(dir.path(), "merge: opensprint/t1 — Add feature").unwrap();
        let log = Command::new("git")
            .args(["log", "-1", "--format=%s"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&log.stdout).trim(),
            "merge: opensprint/t1 — Add feature"
        );
    }

    #[test]
    fn most_recent_subject_reads_head_commit_message() {
        let dir = init_repo();
        assert_eq!(most_recent_subject(dir.path(), "HEAD").as_deref(), Some("initial"));
    }

    #[test]
    fn most_recent_subject_is_none_for_unknown_rev() {
        let dir = init_repo();
        assert!(most_recent_subject(dir.path(), "does-not-exist").is_none());
    }
}
