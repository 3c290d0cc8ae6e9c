//! Core entities for the execution orchestrator.
//!
//! Identifiers, task/session/slot/worktree/merge-job value types, and the
//! append-only [`Event`] record. Mirrors the validated-newtype +
//! `serde(try_from = "String", into = "String")` pattern used throughout this
//! codebase's domain types: parsing is the only way to construct one, so an
//! in-memory `TaskId` or `ProjectId` is always well-formed.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskId / ProjectId / ProviderId
// ---------------------------------------------------------------------------

/// A validated task identifier.
///
/// Task identifiers must be safe to embed in a git branch name
/// (`opensprint/<taskId>`): lowercase alphanumeric with hyphens, 1–64
/// characters, no leading/trailing/doubled hyphens.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Maximum length of a task identifier.
    pub const MAX_LEN: usize = 64;

    /// Create a new `TaskId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the id is empty, too long, or contains characters
    /// that are not safe in a git branch name.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        validate_branch_safe(s, ErrorKind::TaskId, Self::MAX_LEN)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The task branch name this id maps to: `opensprint/{id}`.
    #[must_use]
    pub fn branch_name(&self) -> String {
        format!("opensprint/{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_branch_safe(&s, ErrorKind::TaskId, Self::MAX_LEN)?;
        Ok(Self(s))
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// A validated project identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Maximum length of a project identifier.
    pub const MAX_LEN: usize = 64;

    /// Create a new `ProjectId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the id is empty, too long, or contains invalid characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        validate_branch_safe(s, ErrorKind::ProjectId, Self::MAX_LEN)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_branch_safe(&s, ErrorKind::ProjectId, Self::MAX_LEN)?;
        Ok(Self(s))
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

/// An opaque provider identifier (e.g. an LLM API credential family).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a new `ProviderId` from a string, validating non-emptiness.
    ///
    /// # Errors
    /// Returns an error if the id is empty.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        if s.is_empty() {
            return Err(ValidationError {
                kind: ErrorKind::ProviderId,
                value: s.to_owned(),
                reason: "provider id must not be empty".to_owned(),
            });
        }
        Ok(Self(s.to_owned()))
    }

    /// Return the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

fn validate_branch_safe(s: &str, kind: ErrorKind, max_len: usize) -> Result<(), ValidationError> {
    if s.is_empty() {
        return Err(ValidationError {
            kind,
            value: s.to_owned(),
            reason: "identifier must not be empty".to_owned(),
        });
    }
    if s.len() > max_len {
        return Err(ValidationError {
            kind,
            value: s.to_owned(),
            reason: format!("identifier must be at most {max_len} characters, got {}", s.len()),
        });
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err(ValidationError {
            kind,
            value: s.to_owned(),
            reason: "identifier must not start or end with a hyphen".to_owned(),
        });
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError {
            kind,
            value: s.to_owned(),
            reason: "identifier must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)".to_owned(),
        });
    }
    if s.contains("--") {
        return Err(ValidationError {
            kind,
            value: s.to_owned(),
            reason: "identifier must not contain consecutive hyphens".to_owned(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Task priority, 0 (highest) to [`Priority::MAX`] (lowest).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// The lowest-urgency priority value.
    pub const MAX: u8 = 4;

    /// Create a new `Priority`, validating the range `0..=MAX`.
    ///
    /// # Errors
    /// Returns an error if `value` is greater than [`Priority::MAX`].
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if value > Self::MAX {
            return Err(ValidationError {
                kind: ErrorKind::Priority,
                value: value.to_string(),
                reason: format!("priority must be in 0..={}", Self::MAX),
            });
        }
        Ok(Self(value))
    }

    /// Return the raw priority value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns `true` if this is already the lowest-urgency priority.
    #[must_use]
    pub const fn is_max(self) -> bool {
        self.0 == Self::MAX
    }

    /// Return the next-lower-urgency priority, saturating at [`Priority::MAX`].
    #[must_use]
    pub const fn demoted(self) -> Self {
        if self.0 >= Self::MAX {
            self
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(2)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// The lifecycle status of a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet ready for admission (e.g. missing dependencies).
    Open,
    /// Ready for admission by the scheduler.
    Ready,
    /// Currently occupying a [`crate::scheduler::Scheduler`] slot.
    InProgress,
    /// Coding finished; awaiting review.
    InReview,
    /// Blocked; will not be re-admitted until an operator intervenes.
    Blocked {
        /// Human-readable reason the task is blocked.
        reason: String,
    },
    /// Merged (and, eventually, pushed).
    Closed,
}

impl TaskStatus {
    /// Returns `true` if the task can be admitted by the scheduler.
    #[must_use]
    pub const fn is_admittable(&self) -> bool {
        matches!(self, Self::Open | Self::Ready)
    }

    /// Returns `true` if the task is blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Returns `true` if the task is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Ready => write!(f, "ready"),
            Self::InProgress => write!(f, "in_progress"),
            Self::InReview => write!(f, "in_review"),
            Self::Blocked { reason } => write!(f, "blocked ({reason})"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// GitWorkingMode
// ---------------------------------------------------------------------------

/// How a project isolates an agent's working copy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitWorkingMode {
    /// Each task gets its own `git worktree` (default).
    #[default]
    Worktree,
    /// Each task is coded directly against the primary checkout, one branch
    /// at a time, reverting to main between attempts.
    Branches,
}

impl fmt::Display for GitWorkingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worktree => write!(f, "worktree"),
            Self::Branches => write!(f, "branches"),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The phase a [`Slot`] is currently in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The agent is producing a diff.
    Coding,
    /// The diff is under review (tests, approval).
    Review,
    /// The approved diff is being merged to main.
    Merge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coding => write!(f, "coding"),
            Self::Review => write!(f, "review"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureType
// ---------------------------------------------------------------------------

/// Classification of why an attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// The agent ran but produced a rejected or broken result.
    CodingFailure,
    /// A human or automated reviewer rejected the result.
    ReviewRejection,
    /// The agent exited without producing any usable result.
    NoResult,
    /// The agent was killed for inactivity.
    Timeout,
    /// The agent subprocess crashed.
    AgentCrash,
    /// The merge to main could not be completed.
    MergeConflict,
}

impl FailureType {
    /// Infrastructure failures get infra-retries before counting against
    /// the backoff threshold (see `SPEC_FULL.md` §4.5).
    #[must_use]
    pub const fn is_infrastructure(self) -> bool {
        matches!(self, Self::AgentCrash | Self::Timeout | Self::MergeConflict)
    }

    /// The human-readable block reason used when this failure type causes
    /// a task to be blocked (`SPEC_FULL.md` S3).
    #[must_use]
    pub const fn block_reason(self) -> &'static str {
        match self {
            Self::CodingFailure => "Coding Failure",
            Self::ReviewRejection => "Review Rejection",
            Self::NoResult => "No Result",
            Self::Timeout => "Timeout",
            Self::AgentCrash => "Agent Crash",
            Self::MergeConflict => "Merge Failure",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CodingFailure => write!(f, "coding_failure"),
            Self::ReviewRejection => write!(f, "review_rejection"),
            Self::NoResult => write!(f, "no_result"),
            Self::Timeout => write!(f, "timeout"),
            Self::AgentCrash => write!(f, "agent_crash"),
            Self::MergeConflict => write!(f, "merge_conflict"),
        }
    }
}

// ---------------------------------------------------------------------------
// TestResults
// ---------------------------------------------------------------------------

/// The outcome of running a project's configured test command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    /// Whether the test command exited successfully.
    pub passed: bool,
    /// Captured output (may be truncated by the session archive).
    pub output: String,
}

// ---------------------------------------------------------------------------
// PhaseResult / AgentState / Slot
// ---------------------------------------------------------------------------

/// The result produced by the current phase of a [`Slot`], once available.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Git diff produced by the attempt (empty until captured).
    pub diff: String,
    /// Agent-provided summary of the change.
    pub summary: Option<String>,
    /// Test outcome, if a test command was configured and run.
    pub test_results: Option<TestResults>,
}

/// Live state of the agent subprocess bound to a [`Slot`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Accumulated stdout/stderr chunks from the agent subprocess.
    pub output_log: String,
    /// Unix epoch milliseconds when the agent was spawned.
    pub started_at_unix_ms: u128,
    /// Set when the inactivity timer killed the agent.
    pub killed_due_to_timeout: bool,
}

impl AgentState {
    /// A freshly spawned agent: empty log, not killed, timestamped `now`.
    #[must_use]
    pub const fn new(started_at_unix_ms: u128) -> Self {
        Self {
            output_log: String::new(),
            started_at_unix_ms,
            killed_due_to_timeout: false,
        }
    }
}

/// A runtime execution context owned by the [`crate::scheduler::Scheduler`].
///
/// Created on admission, destroyed on terminal outcome. At most one `Slot`
/// exists per task identifier at any time (invariant 2, `SPEC_FULL.md` §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// The task this slot is executing.
    pub task_id: TaskId,
    /// 1-based attempt number within this slot's lifetime.
    pub attempt: u32,
    /// Current phase.
    pub phase: Phase,
    /// Number of infrastructure retries already granted this attempt cycle.
    pub infra_retries: u32,
    /// Worktree path, if the project uses worktree mode.
    pub worktree_path: Option<PathBuf>,
    /// The branch this slot's agent is working on.
    pub branch: String,
    /// Result of the current (or most recently finished) phase.
    pub phase_result: Option<PhaseResult>,
    /// Live agent process state.
    pub agent_state: AgentState,
}

impl Slot {
    /// Create a new coding-phase slot for `task_id` on `branch`.
    #[must_use]
    pub fn new(task_id: TaskId, branch: String, attempt: u32, started_at_unix_ms: u128) -> Self {
        Self {
            task_id,
            attempt,
            phase: Phase::Coding,
            infra_retries: 0,
            worktree_path: None,
            branch,
            phase_result: None,
            agent_state: AgentState::new(started_at_unix_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Outcome status of an archived [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The attempt was approved and merged.
    Approved,
    /// The attempt failed (see `failure_reason`).
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An immutable archived record of one execution attempt.
///
/// Written once at terminal outcome — invariant 5: every failure or approval
/// archives a `Session` before the task's status is mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The task this attempt belongs to.
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Identifier of the agent configuration used (e.g. `"claude-complex"`).
    pub agent_type: String,
    /// Model identifier the agent ran with.
    pub model: String,
    /// Unix epoch milliseconds when the attempt started.
    pub started_at_unix_ms: u128,
    /// Unix epoch milliseconds when the attempt ended.
    pub ended_at_unix_ms: u128,
    /// Terminal status.
    pub status: SessionStatus,
    /// Captured agent output log (subject to truncation, see
    /// [`crate::session_archive`]).
    pub output_log: String,
    /// The git branch this attempt worked on.
    pub branch: String,
    /// The git diff produced by this attempt (subject to truncation).
    pub git_diff: String,
    /// Test outcome, if any.
    pub test_results: Option<TestResults>,
    /// Why the attempt failed, if `status` is [`SessionStatus::Failed`].
    pub failure_reason: Option<String>,
    /// Human-readable summary of the attempt.
    pub summary: Option<String>,
}

// ---------------------------------------------------------------------------
// WorktreeRecord
// ---------------------------------------------------------------------------

/// An isolated git checkout at `<base>/<taskId>`, owned by at most one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    /// The task this worktree is bound to.
    pub task_id: TaskId,
    /// Absolute path to the worktree's working directory.
    pub path: PathBuf,
    /// The branch checked out in this worktree.
    pub branch: String,
}

// ---------------------------------------------------------------------------
// MergeJob
// ---------------------------------------------------------------------------

/// The kind of mutation a [`MergeJob`] performs against `main`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeJobKind {
    /// Rebase the worktree branch onto the current tip of `main`.
    RebaseBeforeMerge,
    /// Merge a worktree branch into `main` (no-commit, then one commit).
    WorktreeMerge,
    /// Push `main` to `origin`, squashing and rebasing as needed.
    Push,
}

impl fmt::Display for MergeJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RebaseBeforeMerge => write!(f, "rebase_before_merge"),
            Self::WorktreeMerge => write!(f, "worktree_merge"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// An element of the [`crate::merge_queue::MergeQueue`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeJob {
    /// What kind of mutation this job performs.
    pub kind: MergeJobKind,
    /// Absolute path to the primary repository checkout.
    pub repo_path: PathBuf,
    /// Absolute path to the task's worktree, if applicable.
    pub worktree_path: Option<PathBuf>,
    /// The task branch being merged.
    pub branch: String,
    /// The task this job is acting on behalf of.
    pub task_id: TaskId,
    /// The task's title, used to compose commit messages.
    pub task_title: String,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// The merge-pipeline stage an error or event pertains to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    /// Rebasing the worktree branch onto `main` before merging.
    RebaseBeforeMerge,
    /// Merging the worktree branch into `main`.
    MergeToMain,
    /// Rebasing local `main` onto `origin/main` before pushing.
    PushRebase,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RebaseBeforeMerge => write!(f, "rebase_before_merge"),
            Self::MergeToMain => write!(f, "merge_to_main"),
            Self::PushRebase => write!(f, "push_rebase"),
        }
    }
}

/// The kind of [`Event`] emitted by the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A task's status changed.
    Transition {
        /// Prior status.
        from: String,
        /// New status.
        to: String,
    },
    /// An agent subprocess was spawned for a task attempt.
    AgentSpawned,
    /// An agent subprocess reached a terminal state.
    AgentCompleted {
        /// `"approved"` or `"failed"`.
        status: String,
    },
    /// An attempt failed; see [`FailureType`].
    TaskFailed {
        /// The classified failure type.
        failure_type: FailureType,
    },
    /// A task was requeued with the same priority and branch.
    TaskRequeued,
    /// A task was demoted to a lower priority and given a fresh branch.
    TaskDemoted {
        /// The task's new priority.
        new_priority: Priority,
    },
    /// A task was blocked and will not be re-admitted automatically.
    TaskBlocked {
        /// Why the task was blocked.
        reason: String,
    },
    /// A task was merged and closed.
    TaskCompleted,
    /// A merge attempt failed.
    MergeFailed {
        /// Which stage of the merge pipeline failed.
        stage: MergeStage,
        /// Conflicted file paths, if any.
        conflicted_files: Vec<String>,
    },
    /// `main` was pushed to `origin` successfully.
    PushSucceeded,
    /// Pushing `main` to `origin` failed.
    PushFailed {
        /// Human-readable failure reason.
        reason: String,
    },
    /// A human-facing notification was created.
    NotificationAdded {
        /// The notification kind, e.g. `"api_blocked"` or `"hil_approval"`.
        kind: String,
    },
}

/// An append-only record in the [`crate::event_log::EventLog`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unix epoch milliseconds, monotonic within a project.
    pub timestamp_unix_ms: u128,
    /// The project this event pertains to.
    pub project_id: ProjectId,
    /// The task this event pertains to, if any (some events are project-level).
    pub task_id: Option<TaskId>,
    /// What happened.
    pub kind: EventKind,
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// The kind of value that failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`TaskId`] validation error.
    TaskId,
    /// A [`ProjectId`] validation error.
    ProjectId,
    /// A [`ProviderId`] validation error.
    ProviderId,
    /// A [`Priority`] validation error.
    Priority,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskId => write!(f, "TaskId"),
            Self::ProjectId => write!(f, "ProjectId"),
            Self::ProviderId => write!(f, "ProviderId"),
            Self::Priority => write!(f, "Priority"),
        }
    }
}

/// A validation error for core orchestrator types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} — {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- TaskId --

    #[test]
    fn task_id_valid() {
        let id = TaskId::new("t1-build-auth").unwrap();
        assert_eq!(id.as_str(), "t1-build-auth");
    }

    #[test]
    fn task_id_branch_name() {
        let id = TaskId::new("t1").unwrap();
        assert_eq!(id.branch_name(), "opensprint/t1");
    }

    #[test]
    fn task_id_rejects_uppercase() {
        assert!(TaskId::new("T1").is_err());
    }

    #[test]
    fn task_id_rejects_underscore() {
        assert!(TaskId::new("t_1").is_err());
    }

    #[test]
    fn task_id_rejects_empty() {
        assert!(TaskId::new("").is_err());
    }

    #[test]
    fn task_id_rejects_too_long() {
        let long = "a".repeat(65);
        assert!(TaskId::new(&long).is_err());
    }

    #[test]
    fn task_id_rejects_leading_hyphen() {
        assert!(TaskId::new("-t1").is_err());
    }

    #[test]
    fn task_id_rejects_consecutive_hyphens() {
        assert!(TaskId::new("t1--build").is_err());
    }

    #[test]
    fn task_id_serde_roundtrip() {
        let id = TaskId::new("t1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"t1\"");
        let decoded: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn task_id_serde_rejects_invalid() {
        assert!(serde_json::from_str::<TaskId>("\"BAD_ID\"").is_err());
    }

    // -- ProjectId / ProviderId --

    #[test]
    fn project_id_valid() {
        assert!(ProjectId::new("acme-web").is_ok());
    }

    #[test]
    fn project_id_rejects_empty() {
        assert!(ProjectId::new("").is_err());
    }

    #[test]
    fn provider_id_valid_any_format() {
        assert!(ProviderId::new("anthropic:claude").is_ok());
    }

    #[test]
    fn provider_id_rejects_empty() {
        assert!(ProviderId::new("").is_err());
    }

    // -- Priority --

    #[test]
    fn priority_valid_range() {
        for v in 0..=4u8 {
            assert!(Priority::new(v).is_ok());
        }
    }

    #[test]
    fn priority_rejects_out_of_range() {
        assert!(Priority::new(5).is_err());
    }

    #[test]
    fn priority_demoted_saturates() {
        let max = Priority::new(4).unwrap();
        assert_eq!(max.demoted().value(), 4);
        assert!(max.is_max());
    }

    #[test]
    fn priority_demoted_increments() {
        let p = Priority::new(2).unwrap();
        assert_eq!(p.demoted().value(), 3);
    }

    #[test]
    fn priority_default_is_two() {
        assert_eq!(Priority::default().value(), 2);
    }

    #[test]
    fn priority_serde_roundtrip() {
        let p = Priority::new(3).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "3");
        let decoded: Priority = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, p);
    }

    // -- TaskStatus --

    #[test]
    fn task_status_admittable() {
        assert!(TaskStatus::Open.is_admittable());
        assert!(TaskStatus::Ready.is_admittable());
        assert!(!TaskStatus::InProgress.is_admittable());
    }

    #[test]
    fn task_status_blocked_display() {
        let s = TaskStatus::Blocked {
            reason: "Coding Failure".to_owned(),
        };
        assert!(s.is_blocked());
        assert_eq!(format!("{s}"), "blocked (Coding Failure)");
    }

    #[test]
    fn task_status_closed() {
        assert!(TaskStatus::Closed.is_closed());
        assert!(!TaskStatus::Open.is_closed());
    }

    #[test]
    fn task_status_serde_tagged() {
        let json = serde_json::to_string(&TaskStatus::Open).unwrap();
        assert!(json.contains("\"status\":\"open\""));
    }

    // -- FailureType --

    #[test]
    fn failure_type_infrastructure_classification() {
        assert!(FailureType::AgentCrash.is_infrastructure());
        assert!(FailureType::Timeout.is_infrastructure());
        assert!(FailureType::MergeConflict.is_infrastructure());
        assert!(!FailureType::CodingFailure.is_infrastructure());
        assert!(!FailureType::ReviewRejection.is_infrastructure());
        assert!(!FailureType::NoResult.is_infrastructure());
    }

    #[test]
    fn failure_type_block_reasons() {
        assert_eq!(FailureType::CodingFailure.block_reason(), "Coding Failure");
        assert_eq!(FailureType::MergeConflict.block_reason(), "Merge Failure");
        assert_eq!(FailureType::ReviewRejection.block_reason(), "Review Rejection");
        assert_eq!(FailureType::NoResult.block_reason(), "No Result");
        assert_eq!(FailureType::Timeout.block_reason(), "Timeout");
        assert_eq!(FailureType::AgentCrash.block_reason(), "Agent Crash");
    }

    // -- Slot --

    #[test]
    fn slot_new_starts_in_coding_phase() {
        let slot = Slot::new(TaskId::new("t1").unwrap(), "opensprint/t1".to_owned(), 1, 1000);
        assert_eq!(slot.phase, Phase::Coding);
        assert_eq!(slot.infra_retries, 0);
        assert!(slot.phase_result.is_none());
        assert!(!slot.agent_state.killed_due_to_timeout);
        assert!(slot.worktree_path.is_none());
    }

    // -- Event serde --

    #[test]
    fn event_serde_roundtrip() {
        let ev = Event {
            timestamp_unix_ms: 42,
            project_id: ProjectId::new("acme").unwrap(),
            task_id: Some(TaskId::new("t1").unwrap()),
            kind: EventKind::TaskRequeued,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ev);
    }

    #[test]
    fn event_kind_merge_failed_serde() {
        let kind = EventKind::MergeFailed {
            stage: MergeStage::MergeToMain,
            conflicted_files: vec!["src/x.ts".to_owned()],
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"kind\":\"merge_failed\""));
        assert!(json.contains("merge_to_main"));
    }

    #[test]
    fn event_kind_project_level_no_task() {
        let ev = Event {
            timestamp_unix_ms: 1,
            project_id: ProjectId::new("acme").unwrap(),
            task_id: None,
            kind: EventKind::PushSucceeded,
        };
        assert!(ev.task_id.is_none());
    }

    // -- ValidationError --

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            kind: ErrorKind::TaskId,
            value: "BAD".to_owned(),
            reason: "must be lowercase".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("TaskId"));
        assert!(msg.contains("BAD"));
    }
}
