//! Diff capture: `captureBranchDiff` / `captureUncommittedDiff` (spec §4.2).

use std::path::Path;

use crate::error::ToolkitError;
use crate::run::{git_output, git_run, git_stdout};

/// The diff `main..branch` — everything `branch` has that `main` doesn't.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if the diff invocation fails.
pub fn capture_branch_diff(repo: &Path, main_branch: &str, branch: &str) -> Result<String, ToolkitError> {
    let range = format!("{main_branch}..{branch}");
    Ok(git_stdout(repo, &["diff", &range])?)
}

/// Stage everything in `path`, diff against `HEAD`, then unstage again.
///
/// Returns an empty string on any failure — this is a best-effort snapshot
/// used for progress display, never a step whose failure should abort a
/// coding attempt.
#[must_use]
pub fn capture_uncommitted_diff(path: &Path) -> String {
    if git_run(path, &["add", "-A"]).is_err() {
        return String::new();
    }
    let diff = git_stdout(path, &["diff", "--cached"]).unwrap_or_default();
    let _ = git_run(path, &["reset"]);
    diff
}

/// `true` if `git diff main..branch` (or the branch vs its merge-base) would
/// be non-empty, without materializing the full diff text.
#[must_use]
pub fn branch_has_changes(repo: &Path, main_branch: &str, branch: &str) -> bool {
    let range = format!("{main_branch}..{branch}");
    git_output(repo, &["diff", "--quiet", &range])
        .map(|(ok, _, _)| !ok)
        .unwrap_or(false)
}
