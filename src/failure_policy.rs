//! Failure Policy (C5, spec §4.5).
//!
//! Classifies a failed attempt, decides whether to retry / demote / block,
//! and applies the side effects (counters, comments, session archive,
//! events, cleanup) that follow from that decision. The classification and
//! decision functions ([`diagnose_no_result`], [`enrich_reason`],
//! [`decide_next_action`]) are pure and unit-tested directly against
//! `SPEC_FULL.md` §8's scenarios; [`FailurePolicy::apply`] wires them to the
//! collaborator traits and the git toolkit for the side-effecting half.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::collaborators::{ApiBlockedCode, NotificationService, TaskFieldUpdate, TaskRecord, TaskStore};
use crate::config::ProjectSettings;
use crate::event_log::EventLog;
use crate::model::types::{
    Event, EventKind, FailureType, GitWorkingMode, MergeStage, Priority, ProjectId, Session, SessionStatus, Slot,
    TaskId, TaskStatus, TestResults,
};
use crate::scheduler::SchedulerHost;
use crate::session_archive::SessionStore;
use crate::OrchestratorError;

#[cfg(all(test, feature = "proptests"))]
#[path = "failure_policy_proptest.rs"]
mod failure_policy_proptest;

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// Substrings (matched case-insensitively) that, when found in an enriched
/// `no_result` reason, mark the failure as diagnosed — it will never be
/// worth an infrastructure retry, so it goes straight to `block`.
pub const NO_RESULT_DIAGNOSTIC_PATTERNS: &[&str] = &[
    "authentication required",
    "missing cli",
    "missing api key",
    "rate limited",
    "command not found",
    "task file unreadable",
    "5-minute hang",
    "not a chat model",
];

/// `true` if `failure_type` is `no_result` and `reason` matches one of
/// [`NO_RESULT_DIAGNOSTIC_PATTERNS`] (spec §4.5 step 2).
#[must_use]
pub fn diagnose_no_result(failure_type: FailureType, reason: &str) -> bool {
    if failure_type != FailureType::NoResult {
        return false;
    }
    let lower = reason.to_lowercase();
    NO_RESULT_DIAGNOSTIC_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Maximum length (in `char`s) of an enriched no-result reason (spec §4.5
/// step 3).
pub const ENRICHMENT_CAP: usize = 1200;

/// Enrich a `no_result` failure's reason with context pulled from the
/// agent's output log (spec §4.5 step 3): the most recent
/// `[Agent error: ...]` token if present, else the last 8 non-blank lines
/// joined by `" | "`. Other failure types pass `reason` through unchanged.
#[must_use]
pub fn enrich_reason(failure_type: FailureType, reason: &str, output_log: &str) -> String {
    if failure_type != FailureType::NoResult {
        return reason.to_owned();
    }

    let mut enriched = reason.to_owned();
    if let Some(token) = most_recent_agent_error_token(output_log) {
        if !enriched.is_empty() {
            enriched.push(' ');
        }
        enriched.push_str(&token);
    } else {
        let tail = last_non_blank_lines(output_log, 8).join(" | ");
        if !tail.is_empty() {
            if !enriched.is_empty() {
                enriched.push(' ');
            }
            enriched.push_str(&tail);
        }
    }

    truncate_chars(enriched, ENRICHMENT_CAP)
}

/// Find the last `[Agent error: ...]` token in `log`, scanning left to
/// right (so "most recent" means the last occurrence in the buffer).
fn most_recent_agent_error_token(log: &str) -> Option<String> {
    const MARKER: &str = "[Agent error:";
    let mut last = None;
    let mut search_from = 0usize;
    while let Some(rel_start) = log[search_from..].find(MARKER) {
        let start = search_from + rel_start;
        let Some(rel_end) = log[start..].find(']') else {
            break;
        };
        let end = start + rel_end + 1;
        last = Some(log[start..end].to_owned());
        search_from = end;
    }
    last
}

fn last_non_blank_lines(log: &str, n: usize) -> Vec<&str> {
    let mut lines: Vec<&str> = log.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(n);
    lines.drain(..skip);
    lines
}

fn truncate_chars(s: String, cap: usize) -> String {
    if s.chars().count() <= cap {
        return s;
    }
    s.chars().take(cap).collect()
}

// ---------------------------------------------------------------------------
// ApiBlocked classification
// ---------------------------------------------------------------------------

/// `true`-returning classifier for API-level errors that should additionally
/// mark a provider exhausted and notify an operator (spec §4.5 end, §7).
#[must_use]
pub fn classify_api_blocked(reason: &str) -> Option<ApiBlockedCode> {
    let lower = reason.to_lowercase();
    if lower.contains("rate limited") || lower.contains("rate limit") {
        Some(ApiBlockedCode::RateLimited)
    } else if lower.contains("unauthorized") || lower.contains("authentication required") {
        Some(ApiBlockedCode::Unauthorized)
    } else if lower.contains("out of credit") || lower.contains("insufficient credit") {
        Some(ApiBlockedCode::OutOfCredit)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// NextAction
// ---------------------------------------------------------------------------

/// What the scheduler should do next with a task after a failed attempt
/// (spec §4.5 step 4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextAction {
    /// Kill the agent, keep the branch, and re-dispatch immediately without
    /// counting this attempt against the backoff threshold.
    InfrastructureRetry,
    /// Requeue with the same priority and branch.
    Requeue,
    /// Demote to the next-lower-urgency priority and requeue with a fresh
    /// branch.
    Demote {
        /// The task's new priority.
        new_priority: Priority,
    },
    /// Stop retrying; an operator must intervene.
    Block {
        /// Human-readable reason, shown on the task.
        reason: String,
    },
}

/// Everything [`decide_next_action`] needs to pick a [`NextAction`].
#[derive(Clone, Debug)]
pub struct FailureContext<'a> {
    pub failure_type: FailureType,
    pub reason: &'a str,
    pub infra_retries: u32,
    pub cumulative_attempts: u32,
    pub priority: Priority,
    pub backoff_threshold: u32,
    pub max_infra_retries: u32,
}

/// Decide the next action for a failed attempt (spec §4.5 step 4, in
/// priority order):
///
/// 1. a diagnosed `no_result` blocks immediately;
/// 2. an infrastructure failure with retries remaining gets an infra retry;
/// 3. an attempt count that isn't a multiple of the backoff threshold is a
///    plain requeue;
/// 4. at the threshold with priority already at max, block;
/// 5. at the threshold with priority below max, demote and requeue.
#[must_use]
pub fn decide_next_action(ctx: &FailureContext<'_>) -> NextAction {
    if diagnose_no_result(ctx.failure_type, ctx.reason) {
        return NextAction::Block {
            reason: ctx.failure_type.block_reason().to_owned(),
        };
    }

    if ctx.failure_type.is_infrastructure() && ctx.infra_retries < ctx.max_infra_retries {
        return NextAction::InfrastructureRetry;
    }

    if ctx.backoff_threshold == 0 || ctx.cumulative_attempts % ctx.backoff_threshold != 0 {
        return NextAction::Requeue;
    }

    if ctx.priority.is_max() {
        return NextAction::Block {
            reason: ctx.failure_type.block_reason().to_owned(),
        };
    }

    NextAction::Demote {
        new_priority: ctx.priority.demoted(),
    }
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Maximum length of the operator-facing task comment appended per attempt
/// (spec §4.5 step 5, "bounded in length").
pub const TASK_COMMENT_CAP: usize = 2000;

fn now_unix_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

/// Applies [`decide_next_action`]'s side effects: counters, comment, session
/// archive, status mutation, events, API-blocked notification, and cleanup.
pub struct FailurePolicy<'a> {
    pub task_store: &'a dyn TaskStore,
    pub notifications: &'a dyn NotificationService,
    pub event_log: &'a EventLog,
    pub sessions: &'a SessionStore,
}

/// Where the failed attempt was running, needed for git cleanup.
pub struct AttemptLocation<'a> {
    pub repo_path: &'a Path,
    pub main_branch: &'a str,
    pub worktree_base: &'a Path,
    pub git_working_mode: GitWorkingMode,
}

impl<'a> FailurePolicy<'a> {
    #[must_use]
    pub fn new(
        task_store: &'a dyn TaskStore,
        notifications: &'a dyn NotificationService,
        event_log: &'a EventLog,
        sessions: &'a SessionStore,
    ) -> Self {
        Self {
            task_store,
            notifications,
            event_log,
            sessions,
        }
    }

    /// Handle one failed attempt end-to-end: classify, enrich, decide,
    /// record attempt, comment, archive (except review rejections),
    /// mutate status, emit events, notify on API-blocked, clean up the
    /// worktree/branch, and nudge the scheduler.
    ///
    /// # Errors
    /// Propagates the first collaborator error encountered. Git cleanup
    /// failures are logged and swallowed per spec §7, never returned here.
    pub fn handle_failure(
        &self,
        project: &ProjectId,
        task: &TaskRecord,
        slot: &Slot,
        settings: &ProjectSettings,
        location: &AttemptLocation<'_>,
        raw_reason: &str,
        host: &dyn SchedulerHost,
    ) -> Result<NextAction, OrchestratorError> {
        let failure_type = classify_slot_failure(slot, raw_reason);
        let reason = enrich_reason(failure_type, raw_reason, &slot.agent_state.output_log);

        let new_cumulative = task.cumulative_attempts + 1;
        self.task_store.set_cumulative_attempts(&task.id, new_cumulative)?;

        let ctx = FailureContext {
            failure_type,
            reason: &reason,
            infra_retries: slot.infra_retries,
            cumulative_attempts: new_cumulative,
            priority: task.priority,
            backoff_threshold: settings.backoff_threshold,
            max_infra_retries: settings.max_infra_retries,
        };
        let action = decide_next_action(&ctx);

        if failure_type != FailureType::ReviewRejection {
            // Invariant 5/3: archive before the task's status is mutated.
            self.archive_failed_session(task, slot, &reason);
        }

        let comment = truncate_chars(reason.clone(), TASK_COMMENT_CAP);
        self.task_store.comment(&task.id, &comment)?;

        self.event_log.append(&Event {
            timestamp_unix_ms: now_unix_ms(),
            project_id: project.clone(),
            task_id: Some(task.id.clone()),
            kind: EventKind::TaskFailed { failure_type },
        })?;

        self.apply_status_mutation(project, task, &action)?;

        if let Some(code) = classify_api_blocked(&reason) {
            if let Some(provider) = &task.provider {
                self.notifications.create_api_blocked(project, provider, code)?;
                self.event_log.append(&Event {
                    timestamp_unix_ms: now_unix_ms(),
                    project_id: project.clone(),
                    task_id: Some(task.id.clone()),
                    kind: EventKind::NotificationAdded {
                        kind: "api_blocked".to_owned(),
                    },
                })?;
            }
        }

        if !matches!(action, NextAction::InfrastructureRetry) {
            cleanup(location, &task.id, &slot.branch, slot.worktree_path.as_deref(), &action);
        }

        host.nudge(project);
        Ok(action)
    }

    fn archive_failed_session(&self, task: &TaskRecord, slot: &Slot, reason: &str) {
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
            summary: slot.phase_result.as_ref().and_then(|r| r.summary.clone()),
        };
        if let Err(err) = self.sessions.archive(session) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to archive failed session");
        }
    }

    fn apply_status_mutation(&self, project: &ProjectId, task: &TaskRecord, action: &NextAction) -> Result<(), OrchestratorError> {
        match action {
            NextAction::InfrastructureRetry => Ok(()),
            NextAction::Requeue => {
                self.task_store.update(
                    &task.id,
                    TaskFieldUpdate {
                        status: Some(TaskStatus::Open),
                        assignee: Some(None),
                        ..Default::default()
                    },
                )?;
                self.event_log.append(&Event {
                    timestamp_unix_ms: now_unix_ms(),
                    project_id: project.clone(),
                    task_id: Some(task.id.clone()),
                    kind: EventKind::TaskRequeued,
                })
                .map_err(OrchestratorError::from)
            }
            NextAction::Demote { new_priority } => {
                self.task_store.update(
                    &task.id,
                    TaskFieldUpdate {
                        status: Some(TaskStatus::Open),
                        priority: Some(*new_priority),
                        assignee: Some(None),
                        ..Default::default()
                    },
                )?;
                self.event_log.append(&Event {
                    timestamp_unix_ms: now_unix_ms(),
                    project_id: project.clone(),
                    task_id: Some(task.id.clone()),
                    kind: EventKind::TaskDemoted {
                        new_priority: *new_priority,
                    },
                })
                .map_err(OrchestratorError::from)
            }
            NextAction::Block { reason } => {
                self.task_store.update(
                    &task.id,
                    TaskFieldUpdate {
                        status: Some(TaskStatus::Blocked { reason: reason.clone() }),
                        assignee: Some(None),
                        ..Default::default()
                    },
                )?;
                self.event_log.append(&Event {
                    timestamp_unix_ms: now_unix_ms(),
                    project_id: project.clone(),
                    task_id: Some(task.id.clone()),
                    kind: EventKind::TaskBlocked { reason: reason.clone() },
                })
                .map_err(OrchestratorError::from)
            }
        }
    }
}

/// `timeout` if the slot was killed by the inactivity timer, else
/// classify the raw reason text as a best-effort fallback when the caller
/// (scheduler) hasn't already determined a [`FailureType`] from the agent
/// exit status.
fn classify_slot_failure(slot: &Slot, raw_reason: &str) -> FailureType {
    if slot.agent_state.killed_due_to_timeout {
        return FailureType::Timeout;
    }
    let lower = raw_reason.to_lowercase();
    if lower.contains("crash") || lower.contains("signal") {
        FailureType::AgentCrash
    } else if lower.contains("merge conflict") {
        FailureType::MergeConflict
    } else if lower.contains("review") {
        FailureType::ReviewRejection
    } else if slot.phase_result.is_none() {
        FailureType::NoResult
    } else {
        FailureType::CodingFailure
    }
}

/// Cleanup after a terminal (non-infra-retry) failure (spec §4.5 step 6,
/// resolved Open Question in `SPEC_FULL.md` §9): in worktree mode, remove
/// the worktree and delete the branch only on demotion/block; in branches
/// mode, revert and return to main (which always deletes the branch).
///
/// Best-effort: git/filesystem errors here are logged and swallowed, never
/// escalated (spec §7).
fn cleanup(location: &AttemptLocation<'_>, task_id: &TaskId, branch: &str, worktree_path: Option<&Path>, action: &NextAction) {
    match location.git_working_mode {
        GitWorkingMode::Worktree => {
            if let Err(err) =
                opensprint_git::worktree::remove_task_worktree(location.repo_path, task_id.as_str(), worktree_path, location.worktree_base)
            {
                tracing::warn!(task_id = %task_id, error = %err, "failed to remove worktree during failure cleanup");
            }
            if matches!(action, NextAction::Demote { .. } | NextAction::Block { .. }) {
                if let Err(err) = opensprint_git::worktree::delete_task_branch(location.repo_path, branch) {
                    tracing::warn!(task_id = %task_id, error = %err, "failed to delete branch during failure cleanup");
                }
            }
        }
        GitWorkingMode::Branches => {
            if let Err(err) = opensprint_git::rebase::revert_and_return_to_main(location.repo_path, location.main_branch, branch) {
                tracing::warn!(task_id = %task_id, error = %err, "failed to revert to main during failure cleanup");
            }
        }
    }
}
