//! Merge Coordinator (C6, spec §4.6).
//!
//! Owns the single [`crate::merge_queue::MergeQueue`] worker thread for a
//! project: admission and coding run as many slots deep as the project's
//! concurrency allows, but every write to `main` funnels through here one at
//! a time. [`MergeCoordinator::perform_merge_and_done`] is the synchronous
//! half of one task's merge (rebase, merge, archive, task close, epic
//! completion check); [`MergeCoordinator::push_main_and_drain`] is the
//! deferred-push half, guarded so only one push is ever in flight and a
//! merged branch is only deleted once a push has actually shipped it (a
//! branch a concurrently running diff capture still reads must not vanish
//! out from under it).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::collaborators::{
    DeploymentTrigger, EpicReviewRequest, EpicReviewer, MergerAgent, MergerAgentRequest, TaskFieldUpdate, TaskRecord,
    TaskStore,
};
use crate::config::ProjectSettings;
use crate::event_log::EventLog;
use crate::merge_queue::{run_worktree_merge, MergeQueue, MergeQueueError, WorktreeMergeJob};
use crate::model::types::{
    Event, EventKind, GitWorkingMode, MergeStage, ProjectId, Session, SessionStatus, Slot, TaskId, TaskStatus,
};
use crate::scheduler::SchedulerHost;
use crate::session_archive::SessionStore;
use crate::OrchestratorError;

fn now_unix_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

/// A branch whose worktree has already been merged into `main` but whose
/// removal is deferred until the next successful push.
struct PendingCleanup {
    task_id: TaskId,
    branch: String,
    worktree_path: Option<PathBuf>,
}

/// Serializes every write to `main` for one project: the merge queue itself,
/// plus the push-to-origin and branch-cleanup bookkeeping layered on top of
/// it.
pub struct MergeCoordinator {
    task_store: Arc<dyn TaskStore>,
    sessions: Arc<SessionStore>,
    event_log: Arc<EventLog>,
    merge_queue: MergeQueue,
    merger_agent: Arc<dyn MergerAgent>,
    epic_reviewer: Arc<dyn EpicReviewer>,
    deployment: Arc<dyn DeploymentTrigger>,
    push_in_flight: Mutex<bool>,
    pending_cleanup: Mutex<Vec<PendingCleanup>>,
}

impl MergeCoordinator {
    #[must_use]
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        sessions: Arc<SessionStore>,
        event_log: Arc<EventLog>,
        merger_agent: Arc<dyn MergerAgent>,
        epic_reviewer: Arc<dyn EpicReviewer>,
        deployment: Arc<dyn DeploymentTrigger>,
    ) -> Self {
        Self {
            task_store,
            sessions,
            event_log,
            merge_queue: MergeQueue::start(),
            merger_agent,
            epic_reviewer,
            deployment,
            push_in_flight: Mutex::new(false),
            pending_cleanup: Mutex::new(Vec::new()),
        }
    }

    /// Merge `task`'s approved branch into `main` and close it out: rebase
    /// onto the current tip, merge with no commit, commit, archive the
    /// approved session, close the task, check for epic completion, and
    /// kick off a deferred push. A rebase or merge conflict is handed once
    /// to the merger agent before falling back to requeue/block.
    ///
    /// # Errors
    /// Propagates the first collaborator error encountered; git failures
    /// during conflict handling are logged and swallowed per spec §7.
    #[allow(clippy::too_many_arguments)]
    pub fn perform_merge_and_done(
        &self,
        project: &ProjectId,
        repo_path: &Path,
        worktree_base: &Path,
        main_branch: &str,
        git_working_mode: GitWorkingMode,
        task: &TaskRecord,
        slot: &Slot,
        settings: &ProjectSettings,
        host: &dyn SchedulerHost,
    ) -> Result<(), OrchestratorError> {
        let worktree_path = slot.worktree_path.clone().unwrap_or_else(|| repo_path.to_path_buf());

        if let Err(err) = opensprint_git::commit::commit_wip(&worktree_path, task.id.as_str()) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to commit WIP before merge");
        }

        let job = WorktreeMergeJob {
            repo_path,
            worktree_path: &worktree_path,
            main_branch,
            branch: &slot.branch,
            task_title: &task.title,
        };

        match run_worktree_merge(&self.merge_queue, job) {
            Ok(()) => {
                self.finish_merge_success(project, repo_path, worktree_base, main_branch, git_working_mode, task, slot, settings, host)
            }
            Err(MergeQueueError::RebaseConflict(files)) => self.resolve_with_merger_agent(
                project,
                repo_path,
                worktree_base,
                main_branch,
                git_working_mode,
                task,
                slot,
                settings,
                MergeStage::RebaseBeforeMerge,
                files,
                host,
            ),
            Err(MergeQueueError::MergeConflict(files)) => self.resolve_with_merger_agent(
                project,
                repo_path,
                worktree_base,
                main_branch,
                git_working_mode,
                task,
                slot,
                settings,
                MergeStage::MergeToMain,
                files,
                host,
            ),
            Err(MergeQueueError::JobFailed { command, stderr }) => {
                let reason = format!("{command}: {stderr}");
                opensprint_git::merge::abort_merge(repo_path).ok();
                self.requeue_or_block_merge_failure(project, task, slot, settings, MergeStage::MergeToMain, Vec::new(), &reason, host)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_with_merger_agent(
        &self,
        project: &ProjectId,
        repo_path: &Path,
        worktree_base: &Path,
        main_branch: &str,
        git_working_mode: GitWorkingMode,
        task: &TaskRecord,
        slot: &Slot,
        settings: &ProjectSettings,
        stage: MergeStage,
        conflicted_files: Vec<PathBuf>,
        host: &dyn SchedulerHost,
    ) -> Result<(), OrchestratorError> {
        let cwd = match stage {
            MergeStage::RebaseBeforeMerge => slot.worktree_path.clone().unwrap_or_else(|| repo_path.to_path_buf()),
            _ => repo_path.to_path_buf(),
        };

        let resolved = self.merger_agent.run(MergerAgentRequest {
            project: project.clone(),
            cwd,
            config: settings.complex_complexity_agent.clone(),
            phase: stage,
            task: task.id.clone(),
            branch: slot.branch.clone(),
            conflicted_files: conflicted_files.clone(),
            test_command: settings.test_command.clone(),
        })?;

        if !resolved {
            match stage {
                MergeStage::RebaseBeforeMerge => {
                    opensprint_git::rebase::rebase_abort(&cwd).ok();
                }
                _ => {
                    opensprint_git::merge::abort_merge(repo_path).ok();
                }
            }
            let reason = format!("merger agent could not resolve conflicts at {stage}");
            return self.requeue_or_block_merge_failure(project, task, slot, settings, stage, conflicted_files, &reason, host);
        }

        let continue_result = match stage {
            MergeStage::RebaseBeforeMerge => opensprint_git::rebase::rebase_continue(&cwd).map_err(Into::into).and_then(|()| {
                let job = WorktreeMergeJob {
                    repo_path,
                    worktree_path: &cwd,
                    main_branch,
                    branch: &slot.branch,
                    task_title: &task.title,
                };
                run_worktree_merge(&self.merge_queue, job)
            }),
            _ => {
                let message = format!("merge: {} — {}", slot.branch, task.title);
                opensprint_git::commit::commit_merge(repo_path, &message).map_err(MergeQueueError::from)
            }
        };

        match continue_result {
            Ok(()) => {
                self.finish_merge_success(project, repo_path, worktree_base, main_branch, git_working_mode, task, slot, settings, host)
            }
            Err(_) => {
                let reason = format!("merge still conflicted at {stage} after merger agent attempt");
                self.requeue_or_block_merge_failure(project, task, slot, settings, stage, conflicted_files, &reason, host)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[allow(clippy::too_many_arguments)]
    fn finish_merge_success(
        &self,
        project: &ProjectId,
        repo_path: &Path,
        worktree_base: &Path,
        main_branch: &str,
        git_working_mode: GitWorkingMode,
        task: &TaskRecord,
        slot: &Slot,
        settings: &ProjectSettings,
        host: &dyn SchedulerHost,
    ) -> Result<(), OrchestratorError> {
        let summary = task
            .last_execution_summary
            .clone()
            .unwrap_or_else(|| format!("Closed {}: {}", task.id, task.title));

        let session = Session {
            task_id: task.id.clone(),
            attempt: slot.attempt,
            agent_type: String::new(),
            model: String::new(),
            started_at_unix_ms: slot.agent_state.started_at_unix_ms,
            ended_at_unix_ms: now_unix_ms(),
            status: SessionStatus::Approved,
            output_log: slot.agent_state.output_log.clone(),
            branch: slot.branch.clone(),
            git_diff: slot.phase_result.as_ref().map(|r| r.diff.clone()).unwrap_or_default(),
            test_results: slot.phase_result.as_ref().and_then(|r| r.test_results.clone()),
            failure_reason: None,
            summary: Some(summary.clone()),
        };
        if let Err(err) = self.sessions.archive(session) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to archive approved session");
        }

        self.task_store.close(&task.id, &summary)?;
        self.task_store.set_merge_stage(&task.id, None)?;

        self.event_log.append(&Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: project.clone(),
            task_id: Some(task.id.clone()),
            kind: EventKind::TaskCompleted,
        })?;

        match git_working_mode {
            GitWorkingMode::Worktree => {
                if let Err(err) = opensprint_git::worktree::remove_task_worktree(
                    repo_path,
                    task.id.as_str(),
                    slot.worktree_path.as_deref(),
                    worktree_base,
                ) {
                    tracing::warn!(task_id = %task.id, error = %err, "failed to remove worktree after merge");
                }
                self.pending_cleanup.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(PendingCleanup {
                    task_id: task.id.clone(),
                    branch: slot.branch.clone(),
                    worktree_path: None,
                });
            }
            GitWorkingMode::Branches => {
                // Nothing to reclaim: the branch was coded directly against
                // the primary checkout and main now already contains it.
            }
        }

        self.check_epic_completion(project, task, settings, host)?;
        self.push_main_and_drain(project, repo_path, main_branch, settings, host);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn requeue_or_block_merge_failure(
        &self,
        project: &ProjectId,
        task: &TaskRecord,
        slot: &Slot,
        settings: &ProjectSettings,
        stage: MergeStage,
        conflicted_files: Vec<PathBuf>,
        reason: &str,
        host: &dyn SchedulerHost,
    ) -> Result<(), OrchestratorError> {
        let new_cumulative = task.cumulative_attempts + 1;
        self.task_store.set_cumulative_attempts(&task.id, new_cumulative)?;
        self.task_store.set_merge_stage(&task.id, None)?;

        let session = Session {
            task_id: task.id.clone(),
            attempt: slot.attempt,
            agent_type: String::new(),
            model: String::new(),
            started_at_unix_ms: slot.agent_state.started_at_unix_ms,
            ended_at_unix_ms: now_unix_ms(),
            status: SessionStatus::Failed,
            output_log: slot.agent_state.output_log.clone(),
            branch: slot.branch.clone(),
            git_diff: slot.phase_result.as_ref().map(|r| r.diff.clone()).unwrap_or_default(),
            test_results: slot.phase_result.as_ref().and_then(|r| r.test_results.clone()),
            failure_reason: Some(reason.to_owned()),
            summary: None,
        };
        if let Err(err) = self.sessions.archive(session) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to archive failed merge session");
        }

        let conflict_files: Vec<String> = conflicted_files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        self.event_log.append(&Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: project.clone(),
            task_id: Some(task.id.clone()),
            kind: EventKind::MergeFailed {
                stage,
                conflicted_files: conflict_files,
            },
        })?;

        // Merge failures are treated as infrastructure-class for backoff
        // purposes (spec §4.5 block reason "Merge Failure"), but the merge
        // pipeline doesn't grant infra-retries of its own — it blocks at
        // twice the ordinary backoff threshold rather than demoting, since a
        // repeatedly-conflicting branch is unlikely to resolve by priority
        // alone.
        let block_threshold = settings.backoff_threshold.saturating_mul(2);
        if block_threshold > 0 && new_cumulative >= block_threshold {
            self.task_store.update(
                &task.id,
                TaskFieldUpdate {
                    status: Some(TaskStatus::Blocked {
                        reason: "Merge Failure".to_owned(),
                    }),
                    assignee: Some(None),
                    ..Default::default()
                },
            )?;
            self.event_log.append(&Event {
                timestamp_unix_ms: now_unix_ms(),
                project_id: project.clone(),
                task_id: Some(task.id.clone()),
                kind: EventKind::TaskBlocked {
                    reason: "Merge Failure".to_owned(),
                },
            })?;
        } else {
            self.task_store.update(
                &task.id,
                TaskFieldUpdate {
                    status: Some(TaskStatus::Open),
                    assignee: Some(None),
                    last_execution_summary: Some(Some(format!("Requeued after merge failure: {reason}"))),
                    ..Default::default()
                },
            )?;
            self.event_log.append(&Event {
                timestamp_unix_ms: now_unix_ms(),
                project_id: project.clone(),
                task_id: Some(task.id.clone()),
                kind: EventKind::TaskRequeued,
            })?;
        }

        host.nudge(project);
        Ok(())
    }

    fn check_epic_completion(
        &self,
        project: &ProjectId,
        task: &TaskRecord,
        settings: &ProjectSettings,
        host: &dyn SchedulerHost,
    ) -> Result<(), OrchestratorError> {
        let Some(epic_id) = &task.epic_id else {
            return Ok(());
        };

        let siblings: Vec<TaskRecord> = self
            .task_store
            .list_all(project)
            .map(|all| all.into_iter().filter(|t| t.epic_id.as_ref() == Some(epic_id)).collect())?;

        if siblings.iter().any(|t| !t.status.is_closed()) {
            return Ok(());
        }

        let request = EpicReviewRequest {
            project: project.clone(),
            epic_id: epic_id.clone(),
            implementation_task_ids: siblings.iter().map(|t| t.id.clone()).collect(),
        };
        let passed = self.epic_reviewer.review(request)?;

        if passed {
            self.task_store.close(epic_id, "All implementation tasks closed; epic review passed.")?;
            for target in &self.deployment_targets_for(settings) {
                if let Err(err) = self.deployment.trigger(project, target) {
                    tracing::warn!(project = %project, target = %target, error = %err, "failed to trigger deployment");
                }
            }
        } else {
            self.task_store.create_follow_up_task(
                epic_id,
                &format!("Follow-up for {epic_id}"),
                "Epic review found outstanding work; see the epic's implementation tasks for context.",
            )?;
            host.nudge(project);
        }
        Ok(())
    }

    /// Deployment targets configured for the project owning this merge.
    /// Epic completion is the only caller; kept as its own method so a
    /// future project-scoped cache has one place to live.
    fn deployment_targets_for(&self, settings: &ProjectSettings) -> Vec<String> {
        settings.deployment.targets.clone()
    }

    /// Push `main` to `origin`, guarded so at most one push is ever in
    /// flight; a completion that finds a push already running defers to it
    /// and leaves its own cleanup in the pending queue for that push to
    /// drain. On a rebase conflict, try the merger agent once (spec §4.6
    /// step 5); on failure, abort and leave the push for the next completion
    /// to retry.
    pub fn push_main_and_drain(
        &self,
        project: &ProjectId,
        repo_path: &Path,
        main_branch: &str,
        settings: &ProjectSettings,
        host: &dyn SchedulerHost,
    ) {
        {
            let mut in_flight = self.push_in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if *in_flight {
                return;
            }
            *in_flight = true;
        }

        let outcome = opensprint_git::push::push_main(repo_path, main_branch);
        match outcome {
            Ok(_) => self.on_push_succeeded(project, repo_path, main_branch),
            Err(opensprint_git::ToolkitError::RebaseConflict(files)) => {
                self.resolve_push_rebase_conflict(project, repo_path, main_branch, settings, files);
            }
            Err(err) => {
                tracing::warn!(project = %project, error = %err, "push to origin failed");
                let _ = self.event_log.append(&Event {
                    timestamp_unix_ms: now_unix_ms(),
                    project_id: project.clone(),
                    task_id: None,
                    kind: EventKind::PushFailed { reason: err.to_string() },
                });
            }
        }

        *self.push_in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = false;
        host.nudge(project);
    }

    fn on_push_succeeded(&self, project: &ProjectId, repo_path: &Path, main_branch: &str) {
        self.drain_pending_cleanup(repo_path, main_branch);
        let _ = self.event_log.append(&Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: project.clone(),
            task_id: None,
            kind: EventKind::PushSucceeded,
        });
    }

    /// A `push_main` rebase hit a conflict: invoke the merger agent once
    /// against `main` with the conflicted files and the project's test
    /// command. `resolved: true` continues the rebase and force-pushes;
    /// anything else aborts the rebase and leaves the push for the next
    /// completion to retry (spec §4.6 step 5, scenario S6).
    ///
    /// Push-rebase has no task of its own to attribute the conflict to — it
    /// squashes whatever local commits are ahead of `origin/main` — so the
    /// merger agent request names the task from the most recent
    /// `Closed <taskId>: <title>` commit on `main`, falling back to a
    /// synthetic `main` task id if none is found (e.g. the very first push).
    fn resolve_push_rebase_conflict(
        &self,
        project: &ProjectId,
        repo_path: &Path,
        main_branch: &str,
        settings: &ProjectSettings,
        conflicted_files: Vec<PathBuf>,
    ) {
        let (task_id, branch) = push_rebase_attribution(repo_path, main_branch);

        let resolved = self.merger_agent.run(MergerAgentRequest {
            project: project.clone(),
            cwd: repo_path.to_path_buf(),
            config: settings.complex_complexity_agent.clone(),
            phase: MergeStage::PushRebase,
            task: task_id,
            branch,
            conflicted_files: conflicted_files.clone(),
            test_command: settings.test_command.clone(),
        });

        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::warn!(project = %project, error = %err, "merger agent failed to run for push rebase conflict");
                false
            }
        };

        if resolved {
            let continued = opensprint_git::rebase::rebase_continue(repo_path)
                .map_err(Into::into)
                .and_then(|()| opensprint_git::push::force_push_main(repo_path, main_branch).map_err(MergeQueueError::from));
            match continued {
                Ok(()) => {
                    self.on_push_succeeded(project, repo_path, main_branch);
                    return;
                }
                Err(_) => {
                    tracing::warn!(project = %project, "push still conflicted after merger agent attempt");
                }
            }
        }

        tracing::warn!(project = %project, conflicts = conflicted_files.len(), "push rebase conflicted, leaving for next completion");
        opensprint_git::rebase::rebase_abort(repo_path).ok();
        let _ = self.event_log.append(&Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: project.clone(),
            task_id: None,
            kind: EventKind::PushFailed {
                reason: "push rebase conflicted".to_owned(),
            },
        });
    }

    fn drain_pending_cleanup(&self, repo_path: &Path, _main_branch: &str) {
        let pending = std::mem::take(&mut *self.pending_cleanup.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
        for item in pending {
            if let Err(err) = opensprint_git::worktree::delete_task_branch(repo_path, &item.branch) {
                tracing::warn!(task_id = %item.task_id, error = %err, "failed to delete merged branch after push");
            }
            drop(item.worktree_path);
        }
    }
}

/// Best-effort task/branch attribution for a push-rebase `MergerAgentRequest`:
/// parse the `<taskId>` out of the most recent `Closed <taskId>: <title>`
/// commit on `main_branch`, falling back to a synthetic `main` task when none
/// is found (e.g. the very first push of a repo).
fn push_rebase_attribution(repo_path: &Path, main_branch: &str) -> (TaskId, String) {
    let fallback = || (TaskId::new("main").expect("'main' is a valid task id"), main_branch.to_owned());

    let Some(subject) = opensprint_git::commit::most_recent_subject(repo_path, main_branch) else {
        return fallback();
    };
    let Some(rest) = subject.strip_prefix("Closed ") else {
        return fallback();
    };
    let Some((raw_id, _title)) = rest.split_once(": ") else {
        return fallback();
    };
    match TaskId::new(raw_id) {
        Ok(task_id) => (task_id, main_branch.to_owned()),
        Err(_) => fallback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{AgentState, Phase, Priority as P, TaskId};
    use crate::testing::{FakeDeploymentTrigger, FakeEpicReviewer, FakeMergerAgent, FakeTaskStore};

    struct NoopHost;
    impl SchedulerHost for NoopHost {
        fn nudge(&self, _project: &ProjectId) {}
    }

    fn sample_task(id: &str) -> TaskRecord {
        TaskRecord {
            id: TaskId::new(id).unwrap(),
            title: "Add feature".to_owned(),
            status: TaskStatus::InProgress,
            priority: P::default(),
            labels: Vec::new(),
            cumulative_attempts: 0,
            epic_id: None,
            last_execution_summary: None,
            assignee: Some("agent".to_owned()),
            provider: None,
            touched_files: None,
        }
    }

    fn sample_slot(task_id: &str, branch: &str) -> Slot {
        Slot {
            task_id: TaskId::new(task_id).unwrap(),
            attempt: 1,
            phase: Phase::Merge,
            infra_retries: 0,
            worktree_path: None,
            branch: branch.to_owned(),
            phase_result: None,
            agent_state: AgentState::new(0),
        }
    }

    fn init_repo_with_feature_branch() -> tempfile::TempDir {
        use std::fs;
        use std::process::Command;

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
        Command::new("git").args(["commit", "-q", "-m", "initial"]).current_dir(dir.path()).output().unwrap();

        Command::new("git").args(["checkout", "-q", "-b", "opensprint/t1"]).current_dir(dir.path()).output().unwrap();
        fs::write(dir.path().join("b.txt"), "feature\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "feature"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["checkout", "-q", "main"]).current_dir(dir.path()).output().unwrap();
        dir
    }

    #[test]
    fn clean_merge_closes_task_and_appends_completed_event() {
        let dir = init_repo_with_feature_branch();
        let task_store = Arc::new(FakeTaskStore::new());
        task_store.insert(sample_task("t1"));

        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let event_log = Arc::new(EventLog::open(dir.path().join("events.jsonl")).unwrap());
        let coordinator = MergeCoordinator::new(
            task_store.clone(),
            sessions,
            event_log.clone(),
            Arc::new(FakeMergerAgent::new(true)),
            Arc::new(FakeEpicReviewer::new(true)),
            Arc::new(FakeDeploymentTrigger::new()),
        );

        let project = ProjectId::new("p1").unwrap();
        let task = task_store.show(&TaskId::new("t1").unwrap()).unwrap();
        let slot = sample_slot("t1", "opensprint/t1");
        let settings = ProjectSettings::default();

        coordinator
            .perform_merge_and_done(
                &project,
                dir.path(),
                dir.path(),
                "main",
                GitWorkingMode::Worktree,
                &task,
                &slot,
                &settings,
                &NoopHost,
            )
            .unwrap();

        assert_eq!(task_store.show(&TaskId::new("t1").unwrap()).unwrap().status, TaskStatus::Closed);
        let events = event_log.replay_since(0).unwrap();
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::TaskCompleted)));
    }

    #[test]
    fn merge_conflict_resolved_by_merger_agent_still_closes_task() {
        use std::fs;
        use std::process::Command;

        let dir = init_repo_with_feature_branch();
        fs::write(dir.path().join("a.txt"), "main changed\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "main change"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["checkout", "-q", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        fs::write(dir.path().join("a.txt"), "branch changed\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "branch change"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["checkout", "-q", "main"]).current_dir(dir.path()).output().unwrap();

        let task_store = Arc::new(FakeTaskStore::new());
        task_store.insert(sample_task("t1"));
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let event_log = Arc::new(EventLog::open(dir.path().join("events.jsonl")).unwrap());
        let merger_agent = Arc::new(FakeMergerAgent::new(true));

        let coordinator = MergeCoordinator::new(
            task_store.clone(),
            sessions,
            event_log,
            merger_agent.clone(),
            Arc::new(FakeEpicReviewer::new(true)),
            Arc::new(FakeDeploymentTrigger::new()),
        );

        let project = ProjectId::new("p1").unwrap();
        let task = task_store.show(&TaskId::new("t1").unwrap()).unwrap();
        let slot = sample_slot("t1", "opensprint/t1");
        let settings = ProjectSettings::default();

        // The rebase step in run_worktree_merge will hit the a.txt conflict
        // first; the fake merger agent reports resolved without actually
        // touching the worktree, so rebase_continue/merge still find the
        // conflict marker staged as-is. Simulate the agent "resolving" by
        // staging a.txt before the coordinator calls rebase_continue: since
        // the fake agent has no side effects, assert instead that the
        // coordinator at least reaches the merger-agent call path and
        // records it.
        let _ = coordinator.perform_merge_and_done(
            &project,
            dir.path(),
            dir.path(),
            "main",
            GitWorkingMode::Worktree,
            &task,
            &slot,
            &settings,
            &NoopHost,
        );

        assert_eq!(merger_agent.requests().len(), 1);
    }

    #[test]
    fn merge_conflict_requeues_task_when_merger_agent_cannot_resolve() {
        use std::fs;
        use std::process::Command;

        let dir = init_repo_with_feature_branch();
        fs::write(dir.path().join("a.txt"), "main changed\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "main change"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["checkout", "-q", "opensprint/t1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        fs::write(dir.path().join("a.txt"), "branch changed\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "branch change"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["checkout", "-q", "main"]).current_dir(dir.path()).output().unwrap();

        let task_store = Arc::new(FakeTaskStore::new());
        task_store.insert(sample_task("t1"));
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let event_log = Arc::new(EventLog::open(dir.path().join("events.jsonl")).unwrap());

        let coordinator = MergeCoordinator::new(
            task_store.clone(),
            sessions,
            event_log.clone(),
            Arc::new(FakeMergerAgent::new(false)),
            Arc::new(FakeEpicReviewer::new(true)),
            Arc::new(FakeDeploymentTrigger::new()),
        );

        let project = ProjectId::new("p1").unwrap();
        let task = task_store.show(&TaskId::new("t1").unwrap()).unwrap();
        let slot = sample_slot("t1", "opensprint/t1");
        let settings = ProjectSettings::default();

        let _ = coordinator.perform_merge_and_done(
            &project,
            dir.path(),
            dir.path(),
            "main",
            GitWorkingMode::Worktree,
            &task,
            &slot,
            &settings,
            &NoopHost,
        );

        assert_eq!(task_store.show(&TaskId::new("t1").unwrap()).unwrap().status, TaskStatus::Open);
        let events = event_log.replay_since(0).unwrap();
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::MergeFailed { .. })));
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::TaskRequeued)));
    }

    fn init_repo_with_diverged_origin() -> (tempfile::TempDir, tempfile::TempDir) {
        use std::fs;
        use std::process::Command;

        let remote = tempfile::tempdir().unwrap();
        Command::new("git")
            .args(["init", "-q", "--bare", "-b", "main"])
            .current_dir(remote.path())
            .output()
            .unwrap();

        let local = tempfile::tempdir().unwrap();
        Command::new("git")
            .args(["clone", "-q", remote.path().to_str().unwrap(), "."])
            .current_dir(local.path())
            .output()
            .unwrap();
        for args in [
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            Command::new("git").args(&args).current_dir(local.path()).output().unwrap();
        }
        fs::write(local.path().join("shared.txt"), "base\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(local.path()).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "initial"]).current_dir(local.path()).output().unwrap();
        Command::new("git").args(["push", "-q", "origin", "main"]).current_dir(local.path()).output().unwrap();

        // A second clone pushes a conflicting change to origin/main first,
        // simulating another completion winning the race to push.
        let other = tempfile::tempdir().unwrap();
        Command::new("git")
            .args(["clone", "-q", remote.path().to_str().unwrap(), "."])
            .current_dir(other.path())
            .output()
            .unwrap();
        for args in [
            vec!["config", "user.email", "o@o.com"],
            vec!["config", "user.name", "O"],
        ] {
            Command::new("git").args(&args).current_dir(other.path()).output().unwrap();
        }
        fs::write(other.path().join("shared.txt"), "origin changed\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(other.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "Closed t9: origin edit"])
            .current_dir(other.path())
            .output()
            .unwrap();
        Command::new("git").args(["push", "-q", "origin", "main"]).current_dir(other.path()).output().unwrap();

        // Local has a conflicting, unpushed commit on main.
        fs::write(local.path().join("shared.txt"), "local changed\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(local.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "Closed t1: local edit"])
            .current_dir(local.path())
            .output()
            .unwrap();

        (remote, local)
    }

    #[test]
    fn push_rebase_conflict_invokes_merger_agent_with_push_rebase_phase() {
        let (_remote, local) = init_repo_with_diverged_origin();

        let task_store = Arc::new(FakeTaskStore::new());
        let sessions = Arc::new(SessionStore::new(local.path().join("sessions")));
        let event_log = Arc::new(EventLog::open(local.path().join("events.jsonl")).unwrap());
        let merger_agent = Arc::new(FakeMergerAgent::new(true));

        let coordinator = MergeCoordinator::new(
            task_store,
            sessions,
            event_log,
            merger_agent.clone(),
            Arc::new(FakeEpicReviewer::new(true)),
            Arc::new(FakeDeploymentTrigger::new()),
        );

        let project = ProjectId::new("p1").unwrap();
        let settings = ProjectSettings::default();

        // The fake merger agent reports resolved without actually touching
        // the worktree, so the retried push still finds the conflict marker
        // staged as-is and falls back to abort; what this asserts is that
        // the escalation itself happens, with the right stage and
        // attribution, matching `merge_conflict_resolved_by_merger_agent_still_closes_task`'s
        // same fake-agent limitation above.
        coordinator.push_main_and_drain(&project, local.path(), "main", &settings, &NoopHost);

        let requests = merger_agent.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].phase, MergeStage::PushRebase);
        assert_eq!(requests[0].task, TaskId::new("t1").unwrap());
        assert!(!requests[0].conflicted_files.is_empty());
    }
}
