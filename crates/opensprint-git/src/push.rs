//! `pushMain` / `syncMainWithOrigin` (spec §4.2).

use std::path::Path;

use crate::error::ToolkitError;
use crate::run::{git_output, git_run, git_run_hooks_off, git_stdout};

/// Outcome of [`sync_main_with_origin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// Local `main` matches `origin/main`.
    UpToDate,
    /// Local `main` was behind and has been fast-forwarded by `n` commits.
    FastForwarded {
        by: u32,
    },
    /// Local `main` is ahead, or has diverged from `origin/main`; left
    /// untouched.
    Preserved {
        ahead: u32,
        behind: u32,
    },
    /// `origin/main` does not exist yet (first push of a new repo).
    NoRemoteBranch,
}

/// Fetch `origin`, check out `main_branch`, and fast-forward it to
/// `origin/<main_branch>` if local is strictly behind. If local is ahead or
/// diverged, local state is preserved untouched — the merge queue owns
/// advancing `main`, not this function.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if checkout or fast-forward fails.
/// Fetch failures are logged and swallowed (best-effort, per spec §5).
pub fn sync_main_with_origin(repo: &Path, main_branch: &str) -> Result<SyncStatus, ToolkitError> {
    let _ = git_run(repo, &["fetch", "origin", main_branch, "--quiet"]);
    git_run(repo, &["checkout", main_branch])?;

    let remote_ref = format!("origin/{main_branch}");
    let (remote_exists, _, _) = git_output(repo, &["rev-parse", "--verify", &remote_ref])?;
    if !remote_exists {
        return Ok(SyncStatus::NoRemoteBranch);
    }

    let (ahead, behind) = ahead_behind(repo, main_branch, &remote_ref)?;
    if ahead == 0 && behind == 0 {
        return Ok(SyncStatus::UpToDate);
    }
    if ahead == 0 {
        git_run(repo, &["merge", "--ff-only", &remote_ref])?;
        return Ok(SyncStatus::FastForwarded { by: behind });
    }
    Ok(SyncStatus::Preserved { ahead, behind })
}

fn ahead_behind(repo: &Path, local: &str, remote: &str) -> Result<(u32, u32), ToolkitError> {
    let spec = format!("{remote}...{local}");
    let out = git_stdout(repo, &["rev-list", "--left-right", "--count", &spec])?;
    let mut parts = out.split_whitespace();
    let behind: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let ahead: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok((ahead, behind))
}

/// Outcome of a successful [`push_main`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushOutcome {
    /// `true` if local commits were squashed into one before pushing.
    pub squashed: bool,
}

/// Push local `main_branch` to `origin`, squashing local-only commits into
/// one (deriving the message from the most recent `Closed <taskId>: <title>`
/// commit, if any) and rebasing onto `origin/<main_branch>` first.
///
/// # Errors
/// Returns [`ToolkitError::RebaseConflict`] if the pre-push rebase hits a
/// conflict (rebase state is left in progress for the caller); returns
/// [`ToolkitError::Command`] for any other git failure.
pub fn push_main(repo: &Path, main_branch: &str) -> Result<PushOutcome, ToolkitError> {
    let _ = git_run(repo, &["fetch", "origin", main_branch, "--quiet"]);

    let remote_ref = format!("origin/{main_branch}");
    let (remote_exists, _, _) = git_output(repo, &["rev-parse", "--verify", &remote_ref])?;

    let mut squashed = false;
    if remote_exists {
        squashed = squash_local_commits(repo, main_branch, &remote_ref)?;
        rebase_empty_drop(repo, &remote_ref)?;
    }

    force_push_main(repo, main_branch)?;
    Ok(PushOutcome { squashed })
}

/// The final force-push step of [`push_main`], split out so a caller that
/// resolved a mid-rebase conflict (via the merger agent, at
/// [`crate::error::ToolkitError::RebaseConflict`] escalation) can push once
/// `git rebase --continue` has landed, without re-running the fetch/squash
/// steps that already happened on the first attempt.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if the push fails.
pub fn force_push_main(repo: &Path, main_branch: &str) -> Result<(), ToolkitError> {
    git_run_hooks_off(repo, &["push", "--force", "--no-verify", "origin", main_branch])?;
    Ok(())
}

/// Squash every local-only commit (`origin/main..main`) into one, using the
/// most recent `Closed <taskId>: <title>` subject as the squash message if
/// one exists, else "merge: squashed local commits".
fn squash_local_commits(repo: &Path, main_branch: &str, remote_ref: &str) -> Result<bool, ToolkitError> {
    let range = format!("{remote_ref}..{main_branch}");
    let subjects = git_stdout(repo, &["log", "--format=%s", &range])?;
    if subjects.trim().is_empty() {
        return Ok(false);
    }

    let message = subjects
        .lines()
        .find(|line| line.starts_with("Closed "))
        .map(str::to_owned)
        .unwrap_or_else(|| "merge: squashed local commits".to_owned());

    git_run(repo, &["reset", "--soft", remote_ref])?;
    let (nothing_staged, _, _) = git_output(repo, &["diff", "--cached", "--quiet"])?;
    if nothing_staged {
        // Local commits net to a no-op; nothing left to commit.
        return Ok(true);
    }
    git_run(repo, &["commit", "--no-verify", "-m", &message])?;
    Ok(true)
}

fn rebase_empty_drop(repo: &Path, remote_ref: &str) -> Result<(), ToolkitError> {
    let (ok, _, stderr) = git_output(repo, &["rebase", "--empty=drop", remote_ref])?;
    if ok {
        return Ok(());
    }
    let conflicts = crate::conflict::get_conflicted_files(repo)?;
    if conflicts.is_empty() {
        return Err(ToolkitError::Command(crate::error::GitError::new(
            format!("git rebase --empty=drop {remote_ref}"),
            stderr,
        )));
    }
    Err(ToolkitError::RebaseConflict(conflicts))
}
