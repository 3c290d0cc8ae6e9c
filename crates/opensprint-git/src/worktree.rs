//! Worktree lifecycle: `createTaskWorktree` / `removeTaskWorktree` (spec §4.2).

use std::path::{Path, PathBuf};

use crate::error::ToolkitError;
use crate::run::{git_run, git_run_hooks_off, git_stdout, is_git_dir};

/// Caches worth carrying over from the primary checkout into a fresh
/// worktree so an agent doesn't pay a full dependency install on every task.
/// Only copied when the worktree doesn't already have them; never synced
/// back.
pub const DEPENDENCY_CACHE_DIRS: &[&str] = &["node_modules", "target", ".venv"];

/// Where a task's worktree lives relative to the configured base directory.
#[must_use]
pub fn worktree_path(base: &Path, task_id: &str) -> PathBuf {
    base.join(task_id)
}

/// The branch name a task worktree is checked out on.
#[must_use]
pub fn task_branch(task_id: &str) -> String {
    format!("opensprint/{task_id}")
}

/// Ensure `opensprint/<task_id>` exists (branching from `main_branch` if not),
/// reclaim it from any stale worktree, and add a fresh worktree at
/// `<base>/<task_id>` with hooks disabled.
///
/// `worktree_is_fresh` is the heartbeat-freshness predicate (the caller owns
/// heartbeat policy; this crate only knows about git state) — given the path
/// of an existing worktree already checked out on the branch, it returns
/// whether that worktree is still alive. If the branch is checked out
/// elsewhere and that worktree is *not* stale, [`ToolkitError::BranchInUse`]
/// is raised and the caller's task must wait or be requeued.
///
/// # Errors
/// Returns [`ToolkitError::BranchInUse`] if the branch is live elsewhere, or
/// [`ToolkitError::Command`] on any git failure.
pub fn create_task_worktree(
    repo: &Path,
    task_id: &str,
    main_branch: &str,
    base: &Path,
    worktree_is_fresh: impl Fn(&Path) -> bool,
) -> Result<PathBuf, ToolkitError> {
    let branch = task_branch(task_id);
    let target = worktree_path(base, task_id);

    reclaim_stale_worktree(repo, &branch, &target, &worktree_is_fresh)?;
    ensure_branch(repo, &branch, main_branch)?;

    std::fs::create_dir_all(base)?;
    if !target.exists() {
        git_run_hooks_off(
            repo,
            &["worktree", "add", target.to_str().unwrap_or_default(), &branch],
        )?;
    }

    link_dependency_caches(repo, &target);
    Ok(target)
}

/// Find any existing worktree already checked out on `branch`. If it's
/// stale, remove it so the branch is free; if it's fresh and is not the
/// worktree we're about to (re)create, raise `BranchInUse`.
fn reclaim_stale_worktree(
    repo: &Path,
    branch: &str,
    target: &Path,
    worktree_is_fresh: &impl Fn(&Path) -> bool,
) -> Result<(), ToolkitError> {
    let Some(existing) = find_worktree_for_branch(repo, branch)? else {
        return Ok(());
    };
    if existing == target {
        return Ok(());
    }
    if worktree_is_fresh(&existing) {
        return Err(ToolkitError::BranchInUse {
            branch: branch.to_owned(),
            other_path: existing,
        });
    }
    remove_worktree_dir(repo, &existing)?;
    Ok(())
}

fn find_worktree_for_branch(repo: &Path, branch: &str) -> Result<Option<PathBuf>, ToolkitError> {
    let listing = git_stdout(repo, &["worktree", "list", "--porcelain"])?;
    let mut current_path: Option<PathBuf> = None;
    for line in listing.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(path));
        } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
            if b == branch {
                return Ok(current_path);
            }
        }
    }
    Ok(None)
}

fn ensure_branch(repo: &Path, branch: &str, main_branch: &str) -> Result<(), ToolkitError> {
    let (exists, _, _) = crate::run::git_output(repo, &["rev-parse", "--verify", branch])?;
    if exists {
        return Ok(());
    }
    git_run(repo, &["branch", branch, main_branch])?;
    Ok(())
}

fn link_dependency_caches(repo: &Path, target: &Path) {
    for cache in DEPENDENCY_CACHE_DIRS {
        let src = repo.join(cache);
        let dst = target.join(cache);
        if dst.exists() || !src.exists() {
            continue;
        }
        let _ = copy_dir_best_effort(&src, &dst);
    }
}

fn copy_dir_best_effort(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_best_effort(&from, &to)?;
        } else {
            let _ = std::fs::copy(&from, &to);
        }
    }
    Ok(())
}

/// Remove a task worktree. Idempotent: a missing path or missing git
/// metadata is treated as already-removed, not an error.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if `git worktree remove` fails for a
/// reason other than the worktree already being gone.
pub fn remove_task_worktree(
    repo: &Path,
    task_id: &str,
    path: Option<&Path>,
    base: &Path,
) -> Result<(), ToolkitError> {
    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| worktree_path(base, task_id));
    remove_worktree_dir(repo, &target)
}

fn remove_worktree_dir(repo: &Path, target: &Path) -> Result<(), ToolkitError> {
    if !target.exists() {
        // Still ask git to forget it in case the metadata is dangling.
        let _ = git_run(repo, &["worktree", "prune"]);
        return Ok(());
    }

    let (ok, _, stderr) =
        crate::run::git_output(repo, &["worktree", "remove", "--force", target.to_str().unwrap_or_default()])?;
    if !ok && is_git_dir(target) {
        // Worktree is in a weird state (e.g. locked); fall back to removing
        // the directory and pruning metadata.
        let _ = std::fs::remove_dir_all(target);
        let _ = git_run(repo, &["worktree", "prune"]);
        return Ok(());
    }
    if !ok && !stderr.contains("is not a working tree") {
        return Err(ToolkitError::Command(crate::error::GitError::new(
            "git worktree remove",
            stderr,
        )));
    }
    Ok(())
}

/// Delete `branch`, tolerating one that's already gone.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if git fails for a reason other than
/// the branch not existing.
pub fn delete_task_branch(repo: &Path, branch: &str) -> Result<(), ToolkitError> {
    let (ok, _, stderr) = crate::run::git_output(repo, &["branch", "-D", branch])?;
    if ok || stderr.contains("not found") {
        return Ok(());
    }
    Err(ToolkitError::Command(crate::error::GitError::new("git branch -D", stderr)))
}

/// Check out `opensprint/<task_id>` directly in the primary checkout at
/// `repo` (branches mode: one task coded against the repo at a time,
/// no separate worktree). Creates the branch from `main_branch` if it
/// doesn't exist yet.
///
/// # Errors
/// Returns [`ToolkitError::Command`] if branch creation or checkout fails.
pub fn checkout_task_branch(repo: &Path, task_id: &str, main_branch: &str) -> Result<String, ToolkitError> {
    let branch = task_branch(task_id);
    ensure_branch(repo, &branch, main_branch)?;
    git_run(repo, &["checkout", &branch])?;
    Ok(branch)
}

/// `true` if `path` has a heartbeat-independent liveness signal: the worktree
/// directory still exists and git still considers it a registered worktree.
/// This is a best-effort fallback used only when the caller has no heartbeat
/// data at all (e.g. pre-heartbeat worktrees from an older version).
#[must_use]
pub fn worktree_registered(repo: &Path, path: &Path) -> bool {
    let Ok(listing) = git_stdout(repo, &["worktree", "list", "--porcelain"]) else {
        return false;
    };
    listing.lines().any(|l| {
        l.strip_prefix("worktree ")
            .is_some_and(|p| Path::new(p) == path)
    })
}
