//! Shared git-index lock guard.
//!
//! `git` takes `.git/index.lock` for the duration of any command that
//! touches the index. A crashed agent process (killed mid-command) can
//! leave that file behind; every toolkit operation that mutates the index
//! goes through [`await_lock_release`] first so a stale lock from a prior
//! crash doesn't wedge the next attempt forever.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// A lock file older than this is considered abandoned by a crashed process
/// rather than held by a command still running.
pub const STALE_LOCK_THRESHOLD: Duration = Duration::from_secs(60);

/// How long to poll for a lock holder to finish before giving up and
/// treating the lock as stale.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn index_lock_path(git_dir: &Path) -> PathBuf {
    git_dir.join("index.lock")
}

/// Wait for `.git/index.lock` (or the worktree-specific lock under
/// `.git/worktrees/<name>/`) to disappear, removing it if it is older than
/// [`STALE_LOCK_THRESHOLD`].
///
/// This never blocks indefinitely: after [`POLL_TIMEOUT`] it removes
/// whatever lock remains so a single wedged command cannot hang every
/// subsequent git operation on the repo.
pub fn await_lock_release(git_dir: &Path) {
    let lock_path = index_lock_path(git_dir);
    let deadline = Instant::now() + POLL_TIMEOUT;

    loop {
        let Ok(metadata) = std::fs::metadata(&lock_path) else {
            return;
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();

        if age >= STALE_LOCK_THRESHOLD || Instant::now() >= deadline {
            let _ = std::fs::remove_file(&lock_path);
            return;
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}
