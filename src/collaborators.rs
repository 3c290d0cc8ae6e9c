//! Host-contract traits for the external collaborators the core consumes
//! (spec §6). Everything in this module is "out of scope" per the spec —
//! the core drives these interfaces, it never implements them. Object-safe,
//! no generics, so callers hold `&dyn Trait` / `Box<dyn Trait>` and the
//! scheduler can be driven by a real implementation or (in tests) a fake
//! from [`crate::testing`].

use std::path::PathBuf;
use std::time::Duration;

use crate::model::types::{Priority, ProjectId, ProviderId, TaskId, TaskStatus};
use crate::OrchestratorError;

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// A minimal view of a task, as returned by [`TaskStore::show`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub labels: Vec<String>,
    pub cumulative_attempts: u32,
    pub epic_id: Option<TaskId>,
    pub last_execution_summary: Option<String>,
    pub assignee: Option<String>,
    pub provider: Option<ProviderId>,
    /// Declared file-conflict/scope metadata, if the agent reported which
    /// files a prior attempt touched (spec §3 Task "optional scope/conflict
    /// metadata", `SPEC_FULL.md` §10.6 "scope-conflict detection at
    /// admission"). `None` means the task's scope is unknown.
    pub touched_files: Option<Vec<PathBuf>>,
}

/// Fields a caller may update on a task; `None` means "leave unchanged".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskFieldUpdate {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee: Option<Option<String>>,
    pub last_execution_summary: Option<Option<String>>,
}

/// The external system of record for tasks. The core never mutates a task
/// except through this trait.
pub trait TaskStore: Send + Sync {
    /// Fetch a task by id.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::TaskNotFound`] if no such task exists.
    fn show(&self, id: &TaskId) -> Result<TaskRecord, OrchestratorError>;

    /// List every task known to the store.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn list_all(&self, project: &ProjectId) -> Result<Vec<TaskRecord>, OrchestratorError>;

    /// Apply a partial update to a task.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::TaskNotFound`] if no such task exists.
    fn update(&self, id: &TaskId, fields: TaskFieldUpdate) -> Result<(), OrchestratorError>;

    /// Append an operator-facing comment to a task (length-bounded by the
    /// caller per §4.5 step 5).
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn comment(&self, id: &TaskId, body: &str) -> Result<(), OrchestratorError>;

    /// Mark a task closed.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::TaskNotFound`] if no such task exists.
    fn close(&self, id: &TaskId, summary: &str) -> Result<(), OrchestratorError>;

    /// Set the cumulative-attempts counter (invariant 4: non-decreasing).
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn set_cumulative_attempts(&self, id: &TaskId, attempts: u32) -> Result<(), OrchestratorError>;

    /// Record conflicted-file scope metadata on a task (used by admission's
    /// scope-conflict check).
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn set_conflict_files(&self, id: &TaskId, files: Vec<PathBuf>) -> Result<(), OrchestratorError>;

    /// Record which merge-pipeline stage a task is currently at (used by
    /// the Merge Coordinator to make in-flight state inspectable).
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn set_merge_stage(&self, id: &TaskId, stage: Option<String>) -> Result<(), OrchestratorError>;

    /// Read the cumulative-attempts counter straight from the backing
    /// issue/ticket, used by orphan recovery to reconcile counters after a
    /// crash.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::TaskNotFound`] if no such task exists.
    fn get_cumulative_attempts_from_issue(&self, id: &TaskId) -> Result<u32, OrchestratorError>;

    /// Every task currently `in_progress` with an agent assignee, used by
    /// orphan recovery to find tasks with no matching in-memory [`crate::model::types::Slot`].
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn list_in_progress_with_agent_assignee(
        &self,
        project: &ProjectId,
    ) -> Result<Vec<TaskRecord>, OrchestratorError>;

    /// Create a follow-up task under `epic_id`, used when an epic's final
    /// review fails (`SPEC_FULL.md` §4.6 "Epic completion").
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn create_follow_up_task(&self, epic_id: &TaskId, title: &str, description: &str) -> Result<TaskId, OrchestratorError>;
}

// ---------------------------------------------------------------------------
// ProjectService
// ---------------------------------------------------------------------------

/// Configuration container metadata (spec §3 "Project" entity).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub repository_path: PathBuf,
}

/// Source of project configuration and settings. Never mutated by the core.
pub trait ProjectService: Send + Sync {
    /// Fetch a project's identity/location.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::ProjectNotFound`] if no such project exists.
    fn get_project(&self, id: &ProjectId) -> Result<ProjectRecord, OrchestratorError>;

    /// Fetch a project's typed settings.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::ProjectNotFound`] if no such project exists.
    fn get_settings(&self, id: &ProjectId) -> Result<crate::config::ProjectSettings, OrchestratorError>;
}

// ---------------------------------------------------------------------------
// AgentRunner
// ---------------------------------------------------------------------------

/// What it takes to spawn a coding agent for one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentInvocation {
    pub config: String,
    pub prompt: String,
    pub system_prompt: String,
    pub cwd: PathBuf,
}

/// A chunk of output, or the terminal exit status, from a running agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    /// A chunk of combined stdout/stderr output.
    OutputChunk(String),
    /// The agent subprocess exited.
    Exit {
        /// Process exit code, if it ran to completion.
        code: Option<i32>,
    },
}

/// What [`AgentHandle::poll_event`] returned within its timeout window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentPoll {
    /// An event arrived before the timeout elapsed.
    Event(AgentEvent),
    /// Nothing arrived; the agent is presumably still running.
    Timeout,
}

/// A handle to a live (or finished) agent subprocess.
pub trait AgentHandle: Send {
    /// Wait up to `timeout` for the next event (output chunk or exit).
    /// Returns [`AgentPoll::Timeout`] if nothing arrived in that window, so
    /// the scheduler's inactivity timer can re-check elapsed idle time
    /// without blocking forever on a single subprocess.
    fn poll_event(&mut self, timeout: Duration) -> AgentPoll;

    /// Kill the subprocess. The next [`AgentHandle::poll_event`] call must
    /// report a terminal [`AgentEvent::Exit`] so the caller's read loop can
    /// unwind; used by the scheduler's inactivity timer.
    fn kill(&mut self);
}

/// Spawns agent subprocesses. The sole way the core invokes an LLM-backed
/// coding agent.
pub trait AgentRunner: Send + Sync {
    /// Spawn an agent for one attempt.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AgentError`] if the subprocess can't be
    /// spawned at all (a crash *after* spawning is reported via
    /// [`AgentEvent::Exit`], not this return value).
    fn spawn(&self, invocation: AgentInvocation) -> Result<Box<dyn AgentHandle>, OrchestratorError>;
}

// ---------------------------------------------------------------------------
// MergerAgent
// ---------------------------------------------------------------------------

/// A request to resolve a git conflict via an LLM-backed merger agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergerAgentRequest {
    pub project: ProjectId,
    pub cwd: PathBuf,
    pub config: String,
    pub phase: crate::model::types::MergeStage,
    pub task: TaskId,
    pub branch: String,
    pub conflicted_files: Vec<PathBuf>,
    pub test_command: Option<String>,
}

/// Invoked to resolve conflicts the Git Toolkit couldn't auto-resolve.
pub trait MergerAgent: Send + Sync {
    /// Run the merger agent once against `request`'s conflicted files.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AgentError`] if the merger agent
    /// subprocess itself fails to run (distinct from it running and
    /// reporting `resolved: false`).
    fn run(&self, request: MergerAgentRequest) -> Result<bool, OrchestratorError>;
}

// ---------------------------------------------------------------------------
// NotificationService
// ---------------------------------------------------------------------------

/// The reason an API-level call is currently blocked (spec §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiBlockedCode {
    RateLimited,
    Unauthorized,
    OutOfCredit,
}

/// Creates operator-facing notifications.
pub trait NotificationService: Send + Sync {
    /// A provider is blocked at the API level for a project.
    ///
    /// # Errors
    /// Returns an error if the notification could not be created.
    fn create_api_blocked(
        &self,
        project: &ProjectId,
        provider: &ProviderId,
        code: ApiBlockedCode,
    ) -> Result<(), OrchestratorError>;

    /// A human-in-the-loop approval is required before proceeding.
    ///
    /// # Errors
    /// Returns an error if the notification could not be created.
    fn create_hil_approval(&self, project: &ProjectId, task: &TaskId, reason: &str) -> Result<(), OrchestratorError>;
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// Fan-out to transport-layer subscribers (HTTP/WebSocket, out of scope).
/// Always best-effort: a failure here must never propagate.
pub trait Broadcast: Send + Sync {
    /// Broadcast `event` for `project`. Implementations must not block or
    /// panic; failures should be swallowed internally.
    fn broadcast(&self, project: &ProjectId, event: &crate::model::types::Event);
}

// ---------------------------------------------------------------------------
// DeploymentTrigger
// ---------------------------------------------------------------------------

/// Triggers a deploy after an epic completes (spec §4.6 "deploy-on-epic").
pub trait DeploymentTrigger: Send + Sync {
    /// Trigger deployment of `target` for `project`.
    ///
    /// # Errors
    /// Returns an error if the deployment could not be triggered.
    fn trigger(&self, project: &ProjectId, target: &str) -> Result<(), OrchestratorError>;
}

// ---------------------------------------------------------------------------
// EpicReviewer
// ---------------------------------------------------------------------------

/// What the epic reviewer is given to judge an epic's completion (spec §4.6
/// "Epic completion").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpicReviewRequest {
    pub project: ProjectId,
    pub epic_id: TaskId,
    pub implementation_task_ids: Vec<TaskId>,
}

/// The external final-review collaborator consulted once every sibling
/// implementation task under an epic has closed.
pub trait EpicReviewer: Send + Sync {
    /// Judge whether `request`'s epic is genuinely complete.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AgentError`] if the reviewer itself
    /// could not be run (distinct from it running and returning `false`).
    fn review(&self, request: EpicReviewRequest) -> Result<bool, OrchestratorError>;
}
