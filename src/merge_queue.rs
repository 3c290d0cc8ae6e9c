//! Merge Queue (C3, spec §4.3).
//!
//! Reifies the serialized merge pipeline as an actual FIFO: one dedicated
//! worker thread drains jobs in arrival order, so ordering is guaranteed by
//! the queue itself rather than by whatever happens to call it first. Callers
//! enqueue a closure and block on its result; nothing about job *content* is
//! known here — `run_worktree_merge` builds the one job shape the merge
//! coordinator actually needs on top of this primitive.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use opensprint_git::error::ToolkitError;

/// What a merge job returns: success, or a structured failure the merge
/// coordinator can pattern-match on to decide abort/reopen/block.
pub type JobResult = Result<(), MergeQueueError>;

/// Why a queued job failed.
#[derive(Debug)]
pub enum MergeQueueError {
    /// A rebase stopped on conflicts.
    RebaseConflict(Vec<PathBuf>),
    /// A merge stopped on conflicts.
    MergeConflict(Vec<PathBuf>),
    /// The job ran to completion but the underlying git command failed for a
    /// reason other than a conflict.
    JobFailed {
        /// The git command that failed.
        command: String,
        /// Captured stderr.
        stderr: String,
    },
}

impl From<ToolkitError> for MergeQueueError {
    fn from(err: ToolkitError) -> Self {
        match err {
            ToolkitError::RebaseConflict(files) => Self::RebaseConflict(files),
            ToolkitError::MergeConflict(files) => Self::MergeConflict(files),
            ToolkitError::BranchInUse { branch, other_path } => Self::JobFailed {
                command: "git worktree add".to_owned(),
                stderr: format!("branch '{branch}' already checked out at {}", other_path.display()),
            },
            ToolkitError::Command(git_err) => Self::JobFailed {
                command: git_err.command,
                stderr: git_err.stderr,
            },
        }
    }
}

type BoxedJob = Box<dyn FnOnce() -> JobResult + Send + 'static>;

enum Message {
    Run(BoxedJob, Sender<JobResult>),
    Shutdown,
}

/// Single-writer FIFO over merge-pipeline jobs. One worker thread per
/// instance; jobs run strictly in enqueue order (spec §4.3, design note
/// "the queue is the canonical ordering authority").
pub struct MergeQueue {
    tx: Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

impl MergeQueue {
    /// Spawn the worker thread and return a handle to enqueue jobs on.
    #[must_use]
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = std::thread::Builder::new()
            .name("merge-queue".to_owned())
            .spawn(move || {
                for message in rx {
                    match message {
                        Message::Run(job, reply) => {
                            let result = job();
                            let _ = reply.send(result);
                        }
                        Message::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn merge-queue worker thread");

        Self { tx, worker: Some(worker) }
    }

    /// Enqueue `job` and block until it has run and produced a result.
    ///
    /// # Panics
    /// Panics if the worker thread has already terminated (e.g. after
    /// [`MergeQueue::shutdown`]) — this indicates a caller bug, not a runtime
    /// condition the merge coordinator should handle.
    pub fn enqueue_and_wait(&self, job: impl FnOnce() -> JobResult + Send + 'static) -> JobResult {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Message::Run(Box::new(job), reply_tx))
            .expect("merge queue worker thread has terminated");
        reply_rx.recv().expect("merge queue worker dropped the reply channel")
    }

    /// Stop accepting new jobs and join the worker thread. Jobs already
    /// queued at the time of the call still run before the thread exits.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MergeQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Parameters for one worktree-branch merge, enough to run the whole
/// rebase → merge → commit chain as a single queued job.
pub struct WorktreeMergeJob<'a> {
    pub repo_path: &'a std::path::Path,
    pub worktree_path: &'a std::path::Path,
    pub main_branch: &'a str,
    pub branch: &'a str,
    pub task_title: &'a str,
}

/// Rebase `job.branch` onto `job.main_branch`, merge it into main with no
/// commit, then commit with the conventional `merge: <branch> — <title>`
/// message. Runs as a single job on `queue`, so it can never interleave with
/// another project's merge (spec §4.3's "one queue per project" scoping is
/// the caller's responsibility — this function only knows about one repo).
///
/// # Errors
/// Returns whatever [`MergeQueueError`] the first failing git step produces.
pub fn run_worktree_merge(queue: &MergeQueue, job: WorktreeMergeJob<'_>) -> JobResult {
    let repo_path = job.repo_path.to_path_buf();
    let worktree_path = job.worktree_path.to_path_buf();
    let main_branch = job.main_branch.to_owned();
    let branch = job.branch.to_owned();
    let task_title = job.task_title.to_owned();

    queue.enqueue_and_wait(move || {
        opensprint_git::rebase::rebase_onto_main(&worktree_path, &main_branch)?;
        opensprint_git::merge::merge_to_main_no_commit(&repo_path, &branch)?;
        let message = format!("merge: {branch} — {task_title}");
        opensprint_git::commit::commit_merge(&repo_path, &message)?;
        Ok(())
    })
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
    fn jobs_run_in_enqueue_order() {
        let queue = MergeQueue::start();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                std::thread::spawn(move || {
                    order.lock().unwrap().push(i);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Enqueue sequentially from this thread, confirming FIFO completion.
        let results: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                queue.enqueue_and_wait(move || {
                    order.lock().unwrap().push(100 + i);
                    Ok(())
                })
            })
            .collect();
        assert!(results.iter().all(Result::is_ok));

        queue.shutdown();
    }

    #[test]
    fn enqueue_and_wait_returns_job_result() {
        let queue = MergeQueue::start();
        let result = queue.enqueue_and_wait(|| {
            Err(MergeQueueError::JobFailed {
                command: "git merge".to_owned(),
                stderr: "conflict".to_owned(),
            })
        });
        assert!(matches!(result, Err(MergeQueueError::JobFailed { .. })));
        queue.shutdown();
    }

    #[test]
    fn run_worktree_merge_happy_path() {
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

        let queue = MergeQueue::start();
        let result = run_worktree_merge(
            &queue,
            WorktreeMergeJob {
                repo_path: dir.path(),
                worktree_path: dir.path(),
                main_branch: "main",
                branch: "opensprint/t1",
                task_title: "Add feature",
            },
        );
        assert!(result.is_ok());

        let log = Command::new("git")
            .args(["log", "-1", "--pretty=%s"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let message = String::from_utf8_lossy(&log.stdout);
        assert!(message.contains("merge: opensprint/t1"));
        assert!(message.contains("Add feature"));
        queue.shutdown();
    }
}
