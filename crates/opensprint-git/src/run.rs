//! Thin `git` subprocess runner shared by every toolkit operation.
//!
//! Every function in this crate shells out to the real `git` binary rather
//! than re-implementing object/ref plumbing: the toolkit is porcelain-level
//! (worktree, rebase, merge `--no-commit`, push) and the system `git` is the
//! only thing that needs to agree with a developer's own checkout.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::error::GitError;

/// Default timeout for ordinary git commands (status, diff, commit, ...).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for rebase, which may run hooks-disabled but can still touch many
/// commits on a long-lived branch.
pub const REBASE_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for cheap status/read-only probes.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `git <args>` in `dir`, returning trimmed stdout on success.
///
/// # Errors
/// Returns [`GitError`] if the process fails to spawn or exits non-zero.
pub fn git_stdout(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(GitError::from)?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_owned())
    } else {
        Err(GitError::new(
            format!("git {}", args.join(" ")),
            String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ))
    }
}

/// Run `git <args>` in `dir`, discarding stdout.
///
/// # Errors
/// Returns [`GitError`] if the process fails to spawn or exits non-zero.
pub fn git_run(dir: &Path, args: &[&str]) -> Result<(), GitError> {
    git_stdout(dir, args)?;
    Ok(())
}

/// Run `git <args>` in `dir`, returning `(success, stdout, stderr)` without
/// converting a non-zero exit into an error. Used by callers that need to
/// classify the failure themselves (conflict detection, best-effort probes).
pub fn git_output(dir: &Path, args: &[&str]) -> Result<(bool, String, String), GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(GitError::from)?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Run `git <args>` in `dir` with hooks disabled (`-c core.hooksPath=/dev/null`
/// on POSIX; callers on other platforms should prefer `--no-verify` per
/// subcommand instead where supported).
///
/// # Errors
/// Returns [`GitError`] if the process fails to spawn or exits non-zero.
pub fn git_run_hooks_off(dir: &Path, args: &[&str]) -> Result<(), GitError> {
    let mut full = vec!["-c", "core.hooksPath=/dev/null"];
    full.extend_from_slice(args);
    git_run(dir, &full)
}

/// `true` if `dir` is inside a work tree at all (cheap existence probe used
/// before idempotent removal operations).
#[must_use]
pub fn is_git_dir(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .is_ok_and(|o| o.status.success())
}
