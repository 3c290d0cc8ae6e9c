//! Scheduler / State Machine (C7, spec §4.7).
//!
//! Owns one project's `slots` map and drives the cooperative loop described
//! in `SPEC_FULL.md` §5: a single thread per project calls [`Scheduler::tick`]
//! in a loop (see [`Scheduler::run`]), each tick admitting ready tasks up to
//! the project's concurrency, multiplexing agent output across every active
//! slot via short polls, and reacting to terminal events (approved diff,
//! failure, inactivity) by handing off to the [`crate::merge_coordinator::MergeCoordinator`]
//! or [`crate::failure_policy::FailurePolicy`]. [`SchedulerHost`] is the
//! narrow callback both of those already depend on to ask for
//! re-evaluation once their own side effects land.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::collaborators::{
    AgentEvent, AgentHandle, AgentInvocation, AgentPoll, AgentRunner, Broadcast, NotificationService, TaskFieldUpdate,
    TaskRecord, TaskStore,
};
use crate::config::{ProjectSettings, UnknownScopeStrategy};
use crate::event_log::EventLog;
use crate::exhaustion::ExhaustionRegistry;
use crate::failure_policy::{AttemptLocation, FailurePolicy, NextAction};
use crate::heartbeat;
use crate::merge_coordinator::MergeCoordinator;
use crate::model::types::{
    Event, EventKind, GitWorkingMode, Phase, PhaseResult, ProjectId, Slot, TaskId, TestResults,
};
use crate::session_archive::SessionStore;
use crate::OrchestratorError;

/// Assignee recorded on a task while it occupies a slot. Real agent identity
/// (which LLM, which config) lives in the archived [`crate::model::types::Session`],
/// not here — this is just "something currently owns this task".
const AGENT_ASSIGNEE: &str = "opensprint-agent";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an autonomous coding agent. Implement the described task completely, run any relevant tests yourself, and leave the working tree in a clean, reviewable state.";

/// How long a single `poll_event` call blocks before the scheduler moves on
/// to the next active slot.
const AGENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How many `tick()`s pass between orphan-recovery sweeps in [`Scheduler::run`].
const ORPHAN_RECOVERY_INTERVAL_TICKS: u32 = 30;

fn now_unix_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// SchedulerHost
// ---------------------------------------------------------------------------

/// The callback the Merge Coordinator and Failure Policy use to ask the
/// scheduler to re-evaluate its ready queue once their own side effects have
/// landed (a task got requeued, demoted, unblocked, or a push finished).
/// Object-safe so both collaborators can hold it as `&dyn SchedulerHost`
/// without knowing about [`Scheduler`] itself.
pub trait SchedulerHost: Send + Sync {
    /// Wake `project`'s loop so it re-checks admission on its next iteration
    /// instead of waiting out the rest of its poll interval.
    fn nudge(&self, project: &ProjectId);
}

// ---------------------------------------------------------------------------
// SchedulerStatus
// ---------------------------------------------------------------------------

/// Point-in-time counters exposed for operator introspection (spec §6 "read
/// access to scheduler state").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Tasks currently occupying a slot.
    pub active: u32,
    /// Tasks closed by a successful merge, cumulative since process start.
    pub total_done: u64,
    /// Tasks that reached a terminal non-infra failure (requeue, demote, or
    /// block), cumulative since process start.
    pub total_failed: u64,
}

enum PhaseOutcome {
    Approved,
    Failed(String),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives one project's admission/coding/review/merge/failure lifecycle.
/// Holds every collaborator the project needs; a host process constructs one
/// `Scheduler` per project and runs it on its own thread (spec §5: "one
/// cooperative loop per project, N projects run in parallel across OS
/// threads").
pub struct Scheduler {
    project: ProjectId,
    repo_path: PathBuf,
    worktree_base: PathBuf,
    main_branch: String,
    settings: ProjectSettings,

    task_store: Arc<dyn TaskStore>,
    agent_runner: Arc<dyn AgentRunner>,
    notifications: Arc<dyn NotificationService>,
    broadcast: Arc<dyn Broadcast>,
    event_log: Arc<EventLog>,
    sessions: Arc<SessionStore>,
    exhaustion: Arc<ExhaustionRegistry>,
    merge_coordinator: Arc<MergeCoordinator>,

    slots: Mutex<HashMap<TaskId, Slot>>,
    agent_handles: Mutex<HashMap<TaskId, Box<dyn AgentHandle>>>,
    last_activity: Mutex<HashMap<TaskId, u128>>,
    hil_notified: Mutex<HashSet<TaskId>>,
    status: Mutex<SchedulerStatus>,

    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl Scheduler {
    /// Build a scheduler for `project`. `repo_path` is the primary checkout;
    /// `worktree_base` is only consulted in [`GitWorkingMode::Worktree`].
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        project: ProjectId,
        repo_path: PathBuf,
        worktree_base: PathBuf,
        main_branch: String,
        settings: ProjectSettings,
        task_store: Arc<dyn TaskStore>,
        agent_runner: Arc<dyn AgentRunner>,
        notifications: Arc<dyn NotificationService>,
        broadcast: Arc<dyn Broadcast>,
        event_log: Arc<EventLog>,
        sessions: Arc<SessionStore>,
        exhaustion: Arc<ExhaustionRegistry>,
        merge_coordinator: Arc<MergeCoordinator>,
    ) -> Self {
        Self {
            project,
            repo_path,
            worktree_base,
            main_branch,
            settings,
            task_store,
            agent_runner,
            notifications,
            broadcast,
            event_log,
            sessions,
            exhaustion,
            merge_coordinator,
            slots: Mutex::new(HashMap::new()),
            agent_handles: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(HashMap::new()),
            hil_notified: Mutex::new(HashSet::new()),
            status: Mutex::new(SchedulerStatus::default()),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Current counters, for introspection (`forge-cli status`).
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of admittable tasks not currently occupying a slot.
    ///
    /// # Errors
    /// Propagates a `TaskStore` error.
    pub fn queue_depth(&self) -> Result<usize, OrchestratorError> {
        let slotted = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len();
        let admittable = self
            .task_store
            .list_all(&self.project)?
            .into_iter()
            .filter(|t| t.status.is_admittable())
            .count();
        Ok(admittable.saturating_sub(slotted.min(admittable)))
    }

    /// Run the project loop until `stop` is set, ticking every
    /// [`AGENT_POLL_INTERVAL`] (or sooner, if [`SchedulerHost::nudge`] wakes
    /// it early) and sweeping for orphaned work every
    /// [`ORPHAN_RECOVERY_INTERVAL_TICKS`] ticks.
    pub fn run(&self, stop: &std::sync::atomic::AtomicBool) {
        self.recover_orphans();
        let mut ticks_since_recovery = 0u32;
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            if let Err(err) = self.tick() {
                tracing::warn!(project = %self.project, error = %err, "scheduler tick failed");
            }
            ticks_since_recovery += 1;
            if ticks_since_recovery >= ORPHAN_RECOVERY_INTERVAL_TICKS {
                self.recover_orphans();
                ticks_since_recovery = 0;
            }
            self.wait_for_wake(AGENT_POLL_INTERVAL);
        }
    }

    fn wait_for_wake(&self, timeout: Duration) {
        let guard = self.wake_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = self.wake.wait_timeout(guard, timeout);
    }

    /// One pass of the loop: admit what can be admitted, then poll every
    /// active slot once. Safe to call directly in tests without [`Scheduler::run`]'s
    /// sleep/wake machinery.
    ///
    /// # Errors
    /// Propagates the first collaborator error encountered while admitting
    /// or finishing a slot.
    pub fn tick(&self) -> Result<(), OrchestratorError> {
        self.admit_ready_tasks()?;

        let active_ids: Vec<TaskId> = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for task_id in active_ids {
            self.poll_slot(&task_id)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------

    /// Admit as many ready tasks as the project's concurrency allows,
    /// respecting provider exhaustion and scope-conflict policy (spec §4.7
    /// "admit").
    ///
    /// # Errors
    /// Propagates the first collaborator error encountered.
    pub fn admit_ready_tasks(&self) -> Result<(), OrchestratorError> {
        let concurrency = self.settings.concurrency.max(1) as usize;
        loop {
            let active = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len();
            if active >= concurrency {
                break;
            }
            let Some(task) = self.next_admittable_task()? else {
                break;
            };
            self.admit(&task)?;
        }
        Ok(())
    }

    /// Pick the next task to admit: ascending priority (0 = most urgent),
    /// ties broken lexicographically by identifier (`SPEC_FULL.md` §9: the
    /// collaborator boundary exposes no arrival timestamp for tasks, so
    /// identifier order stands in for the spec's FIFO-arrival tie-break).
    fn next_admittable_task(&self) -> Result<Option<TaskRecord>, OrchestratorError> {
        let mut candidates: Vec<TaskRecord> = self
            .task_store
            .list_all(&self.project)?
            .into_iter()
            .filter(|t| t.status.is_admittable())
            .collect();
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let active_ids: Vec<TaskId> = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        let mut active_scopes: Vec<Option<Vec<PathBuf>>> = Vec::with_capacity(active_ids.len());
        for id in &active_ids {
            if let Ok(task) = self.task_store.show(id) {
                active_scopes.push(task.touched_files);
            }
        }

        for candidate in candidates {
            if let Some(provider) = &candidate.provider {
                if self.exhaustion.is_exhausted(&self.project, provider) {
                    continue;
                }
            }
            if self.has_scope_conflict(&candidate, &active_scopes)? {
                continue;
            }
            return Ok(Some(candidate));
        }
        Ok(None)
    }

    /// `true` if `candidate` must wait for a currently-active slot to clear
    /// before it can be admitted, per `settings.unknown_scope_strategy`
    /// (`SPEC_FULL.md` §10.6 "scope-conflict detection at admission").
    fn has_scope_conflict(&self, candidate: &TaskRecord, active_scopes: &[Option<Vec<PathBuf>>]) -> Result<bool, OrchestratorError> {
        match &candidate.touched_files {
            Some(files) => Ok(active_scopes.iter().any(|other| match other {
                Some(other_files) => other_files.iter().any(|f| files.contains(f)),
                None => false,
            })),
            None => match self.settings.unknown_scope_strategy {
                UnknownScopeStrategy::Permissive => Ok(false),
                UnknownScopeStrategy::Serialize => Ok(active_scopes.iter().any(Option::is_none)),
                UnknownScopeStrategy::AskHuman => {
                    if active_scopes.iter().any(Option::is_none) {
                        self.raise_hil_once(&candidate.id)?;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
            },
        }
    }

    /// Raise a human-in-the-loop approval notification at most once per
    /// task id, so a task parked behind `AskHuman` doesn't spam a
    /// notification on every tick while it waits.
    fn raise_hil_once(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        {
            let mut notified = self.hil_notified.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if notified.contains(task_id) {
                return Ok(());
            }
            notified.insert(task_id.clone());
        }
        self.notifications.create_hil_approval(
            &self.project,
            task_id,
            "unknown scope strategy requires human approval before concurrent admission",
        )?;
        self.event_log.append(&Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: self.project.clone(),
            task_id: Some(task_id.clone()),
            kind: EventKind::NotificationAdded {
                kind: "hil_approval".to_owned(),
            },
        })?;
        Ok(())
    }

    fn agent_config_for(&self, task: &TaskRecord) -> String {
        if task.labels.iter().any(|l| l == "complex") {
            self.settings.complex_complexity_agent.clone()
        } else {
            self.settings.simple_complexity_agent.clone()
        }
    }

    /// Admit `task`: mark it `in_progress`, allocate its working copy, and
    /// spawn its agent.
    fn admit(&self, task: &TaskRecord) -> Result<(), OrchestratorError> {
        self.task_store.update(
            &task.id,
            TaskFieldUpdate {
                status: Some(crate::model::types::TaskStatus::InProgress),
                assignee: Some(Some(AGENT_ASSIGNEE.to_owned())),
                ..Default::default()
            },
        )?;

        let branch = task.id.branch_name();
        let started_at = now_unix_ms();
        let mut slot = Slot::new(task.id.clone(), branch, 1, started_at);

        let cwd = match self.settings.git_working_mode {
            GitWorkingMode::Worktree => {
                let staleness = self.settings.heartbeat_staleness();
                let path = opensprint_git::worktree::create_task_worktree(
                    &self.repo_path,
                    task.id.as_str(),
                    &self.main_branch,
                    &self.worktree_base,
                    |p| heartbeat::is_worktree_fresh(p, staleness),
                )?;
                slot.worktree_path = Some(path.clone());
                path
            }
            GitWorkingMode::Branches => {
                opensprint_git::worktree::checkout_task_branch(&self.repo_path, task.id.as_str(), &self.main_branch)?;
                self.repo_path.clone()
            }
        };

        if let Err(err) = heartbeat::write_heartbeat(&cwd, &task.id) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to write initial heartbeat");
        }

        let invocation = AgentInvocation {
            config: self.agent_config_for(task),
            prompt: format!("Implement task {}: {}", task.id, task.title),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            cwd: cwd.clone(),
        };
        let handle = self.agent_runner.spawn(invocation)?;

        self.last_activity.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(task.id.clone(), started_at);
        self.agent_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(task.id.clone(), handle);
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(task.id.clone(), slot);

        let event = Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: self.project.clone(),
            task_id: Some(task.id.clone()),
            kind: EventKind::AgentSpawned,
        };
        self.event_log.append(&event)?;
        self.broadcast.broadcast(&self.project, &event);
        self.bump_active(1);
        Ok(())
    }

    /// Re-dispatch an existing slot on the same branch/worktree after an
    /// [`NextAction::InfrastructureRetry`] — no new worktree, no new branch,
    /// just a fresh agent process and a reset [`crate::model::types::AgentState`].
    fn redispatch_existing_slot(&self, task: &TaskRecord) -> Result<(), OrchestratorError> {
        let (cwd, config) = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(slot) = slots.get_mut(&task.id) else {
                return Ok(());
            };
            slot.phase = Phase::Coding;
            slot.phase_result = None;
            slot.agent_state = crate::model::types::AgentState::new(now_unix_ms());
            (
                slot.worktree_path.clone().unwrap_or_else(|| self.repo_path.clone()),
                self.agent_config_for(task),
            )
        };

        if let Err(err) = heartbeat::write_heartbeat(&cwd, &task.id) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to write heartbeat on infra-retry redispatch");
        }

        let invocation = AgentInvocation {
            config,
            prompt: format!("Implement task {}: {}", task.id, task.title),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            cwd,
        };
        let handle = self.agent_runner.spawn(invocation)?;
        self.last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(task.id.clone(), now_unix_ms());
        self.agent_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(task.id.clone(), handle);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Polling / phase transitions
    // -----------------------------------------------------------------

    fn poll_slot(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        let event = {
            let mut handles = self.agent_handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(handle) = handles.get_mut(task_id) else {
                return Ok(());
            };
            handle.poll_event(AGENT_POLL_INTERVAL)
        };

        match event {
            AgentPoll::Timeout => self.check_inactivity(task_id),
            AgentPoll::Event(AgentEvent::OutputChunk(chunk)) => {
                let cwd = {
                    let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    let Some(slot) = slots.get_mut(task_id) else {
                        return Ok(());
                    };
                    slot.agent_state.output_log.push_str(&chunk);
                    slot.worktree_path.clone().unwrap_or_else(|| self.repo_path.clone())
                };
                self.last_activity
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(task_id.clone(), now_unix_ms());
                if let Err(err) = heartbeat::write_heartbeat(&cwd, task_id) {
                    tracing::warn!(task_id = %task_id, error = %err, "failed to refresh heartbeat");
                }
                Ok(())
            }
            AgentPoll::Event(AgentEvent::Exit { code }) => self.finish_coding_phase(task_id, code),
        }
    }

    fn check_inactivity(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        let last = self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(task_id)
            .copied();
        let Some(last) = last else {
            return Ok(());
        };
        let elapsed = Duration::from_millis(u64::try_from(now_unix_ms().saturating_sub(last)).unwrap_or(u64::MAX));
        if elapsed < self.settings.inactivity_timeout() {
            return Ok(());
        }

        if let Some(handle) = self
            .agent_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(task_id)
        {
            handle.kill();
        }
        if let Some(slot) = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get_mut(task_id) {
            slot.agent_state.killed_due_to_timeout = true;
        }
        self.finish_coding_phase(task_id, None)
    }

    /// The agent subprocess reached a terminal state (exit, or inactivity
    /// kill): capture its diff and test results, decide whether the phase
    /// is approved, and hand off to the merge coordinator or failure policy.
    fn finish_coding_phase(&self, task_id: &TaskId, code: Option<i32>) -> Result<(), OrchestratorError> {
        self.agent_handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(task_id);

        let snapshot = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(slot) = slots.get_mut(task_id) else {
                return Ok(());
            };
            let cwd = slot.worktree_path.clone().unwrap_or_else(|| self.repo_path.clone());
            let diff = opensprint_git::diff::capture_uncommitted_diff(&cwd);

            if diff.trim().is_empty() && !slot.agent_state.killed_due_to_timeout {
                slot.phase_result = None;
            } else {
                let test_results = self.settings.test_command.as_deref().map(|cmd| run_test_command(&cwd, cmd));
                slot.phase_result = Some(PhaseResult {
                    diff,
                    summary: None,
                    test_results,
                });
            }
            slot.phase = Phase::Review;
            slot.clone()
        };
        self.last_activity.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(task_id);

        let task = self.task_store.show(task_id)?;
        match evaluate_phase(&snapshot, code, self.settings.inactivity_timeout_secs) {
            PhaseOutcome::Approved => self.merge(&task, &snapshot),
            PhaseOutcome::Failed(reason) => self.fail(&task, &snapshot, &reason),
        }
    }

    fn merge(&self, task: &TaskRecord, slot: &Slot) -> Result<(), OrchestratorError> {
        self.merge_coordinator.perform_merge_and_done(
            &self.project,
            &self.repo_path,
            &self.worktree_base,
            &self.main_branch,
            self.settings.git_working_mode,
            task,
            slot,
            &self.settings,
            self,
        )?;
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&task.id);
        let closed = self.task_store.show(&task.id).map(|t| t.status.is_closed()).unwrap_or(false);
        self.bump_terminal(closed);
        Ok(())
    }

    fn fail(&self, task: &TaskRecord, slot: &Slot, reason: &str) -> Result<(), OrchestratorError> {
        let policy = FailurePolicy::new(self.task_store.as_ref(), self.notifications.as_ref(), &self.event_log, &self.sessions);
        let location = AttemptLocation {
            repo_path: &self.repo_path,
            main_branch: &self.main_branch,
            worktree_base: &self.worktree_base,
            git_working_mode: self.settings.git_working_mode,
        };
        let action = policy.handle_failure(&self.project, task, slot, &self.settings, &location, reason, self)?;

        if matches!(action, NextAction::InfrastructureRetry) {
            if let Some(s) = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get_mut(&task.id) {
                s.infra_retries += 1;
            }
            self.redispatch_existing_slot(task)?;
        } else {
            self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&task.id);
            self.bump_terminal(false);
        }
        Ok(())
    }

    fn bump_active(&self, delta: u32) {
        self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner).active += delta;
    }

    fn bump_terminal(&self, succeeded: bool) {
        let mut status = self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        status.active = status.active.saturating_sub(1);
        if succeeded {
            status.total_done += 1;
        } else {
            status.total_failed += 1;
        }
    }

    // -----------------------------------------------------------------
    // Orphan recovery (spec §4.7 "orphan recovery", invariant 7)
    // -----------------------------------------------------------------

    /// Reconcile tasks whose owning process died: stale heartbeats, tasks
    /// marked `in_progress` with no matching in-memory slot, and worktrees
    /// whose task has since closed or vanished. Idempotent — safe to call
    /// repeatedly with nothing new to recover.
    pub fn recover_orphans(&self) {
        self.recover_stale_heartbeats();
        self.recover_missing_slots();
        self.prune_closed_worktrees();
    }

    fn recover_stale_heartbeats(&self) {
        if self.settings.git_working_mode != GitWorkingMode::Worktree {
            return;
        }
        for stale in heartbeat::find_stale(&self.worktree_base, self.settings.heartbeat_staleness()) {
            if self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains_key(&stale.task_id) {
                continue;
            }
            let Ok(task) = self.task_store.show(&stale.task_id) else {
                continue;
            };
            if !matches!(task.status, crate::model::types::TaskStatus::InProgress) {
                continue;
            }

            if let Err(err) = opensprint_git::commit::commit_wip(&stale.path, stale.task_id.as_str()) {
                tracing::warn!(task_id = %stale.task_id, error = %err, "failed to commit WIP on orphan recovery");
            }
            if let Err(err) =
                opensprint_git::worktree::remove_task_worktree(&self.repo_path, stale.task_id.as_str(), Some(&stale.path), &self.worktree_base)
            {
                tracing::warn!(task_id = %stale.task_id, error = %err, "failed to remove stale worktree on orphan recovery");
            }
            if let Err(err) = self.task_store.update(
                &stale.task_id,
                TaskFieldUpdate {
                    status: Some(crate::model::types::TaskStatus::Open),
                    assignee: Some(None),
                    ..Default::default()
                },
            ) {
                tracing::warn!(task_id = %stale.task_id, error = %err, "failed to reopen task on orphan recovery");
            }
        }
    }

    fn recover_missing_slots(&self) {
        let Ok(orphans) = self.task_store.list_in_progress_with_agent_assignee(&self.project) else {
            return;
        };
        let slotted: HashSet<TaskId> = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for task in orphans {
            if slotted.contains(&task.id) {
                continue;
            }
            if let Err(err) = self.task_store.update(
                &task.id,
                TaskFieldUpdate {
                    status: Some(crate::model::types::TaskStatus::Open),
                    assignee: Some(None),
                    ..Default::default()
                },
            ) {
                tracing::warn!(task_id = %task.id, error = %err, "failed to reopen orphaned in-progress task");
            }
        }
    }

    fn prune_closed_worktrees(&self) {
        if self.settings.git_working_mode != GitWorkingMode::Worktree {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&self.worktree_base) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(task_id) = TaskId::new(name) else {
                continue;
            };
            if self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains_key(&task_id) {
                continue;
            }
            let should_prune = self.task_store.show(&task_id).map(|t| t.status.is_closed()).unwrap_or(true);
            if should_prune {
                if let Err(err) =
                    opensprint_git::worktree::remove_task_worktree(&self.repo_path, task_id.as_str(), Some(&path), &self.worktree_base)
                {
                    tracing::warn!(task_id = %task_id, error = %err, "failed to prune worktree for closed task");
                }
            }
        }
    }
}

impl SchedulerHost for Scheduler {
    fn nudge(&self, project: &ProjectId) {
        if *project != self.project {
            return;
        }
        let _guard = self.wake_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.wake.notify_all();
    }
}

/// Decide whether a finished coding phase is approved for merge, classifying
/// the failure reason text so [`crate::failure_policy::classify_slot_failure`]-equivalent
/// keyword matching downstream lands on the right [`crate::model::types::FailureType`].
fn evaluate_phase(slot: &Slot, code: Option<i32>, inactivity_timeout_secs: u64) -> PhaseOutcome {
    if slot.agent_state.killed_due_to_timeout {
        return PhaseOutcome::Failed(format!("killed for inactivity after {inactivity_timeout_secs}s"));
    }
    let Some(phase_result) = &slot.phase_result else {
        return PhaseOutcome::Failed("agent exited without producing a diff".to_owned());
    };
    let Some(code) = code else {
        return PhaseOutcome::Failed("agent crashed (terminated by signal)".to_owned());
    };
    if code != 0 {
        return PhaseOutcome::Failed(format!("agent exited with code {code}"));
    }
    if let Some(results) = &phase_result.test_results {
        if !results.passed {
            return PhaseOutcome::Failed(format!("review rejected: test command failed\n{}", results.output));
        }
    }
    PhaseOutcome::Approved
}

fn run_test_command(cwd: &Path, command: &str) -> TestResults {
    match std::process::Command::new("sh").arg("-c").arg(command).current_dir(cwd).output() {
        Ok(output) => TestResults {
            passed: output.status.success(),
            output: format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr)),
        },
        Err(err) => TestResults {
            passed: false,
            output: format!("failed to run test command: {err}"),
        },
    }
}
