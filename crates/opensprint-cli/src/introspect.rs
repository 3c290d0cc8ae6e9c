//! Read-only introspection subcommands: `status`, `events tail`, `sessions
//! show <task>`. Each reads directly off the on-disk event log / session
//! archive, independent of whether a scheduler is currently running against
//! them (`SPEC_FULL.md` §10.4).

use std::path::Path;

use anyhow::Context;
use opensprint::event_log::EventLog;
use opensprint::model::types::{EventKind, TaskId};
use opensprint::session_archive::SessionStore;

/// Print a one-line summary of every event recorded so far.
///
/// # Errors
/// Returns an error if the event log file can't be opened or read.
pub fn events_tail(events_path: &Path) -> anyhow::Result<()> {
    let log = EventLog::open(events_path.to_path_buf()).with_context(|| format!("opening event log at {}", events_path.display()))?;
    for event in log.replay_since(0)? {
        let task = event.task_id.as_ref().map_or_else(|| "-".to_owned(), ToString::to_string);
        println!("{} {} {} {:?}", event.timestamp_unix_ms, event.project_id, task, event.kind);
    }
    Ok(())
}

/// Print every archived session for `task_id`, most recent attempt last.
///
/// # Errors
/// Returns an error if the session archive can't be read, or no sessions are
/// recorded for the task.
pub fn sessions_show(sessions_root: &Path, task_id: &str) -> anyhow::Result<()> {
    let task_id = TaskId::new(task_id).with_context(|| format!("'{task_id}' is not a valid task id"))?;
    let store = SessionStore::new(sessions_root.to_path_buf());
    let sessions = store.sessions_for_task(&task_id).with_context(|| format!("reading sessions for task {task_id}"))?;

    if sessions.is_empty() {
        println!("no sessions archived for task {task_id}");
        return Ok(());
    }
    for session in sessions {
        println!(
            "attempt {} [{}] branch={} started_at={} ended_at={}",
            session.attempt, session.status, session.branch, session.started_at_unix_ms, session.ended_at_unix_ms
        );
        if let Some(summary) = &session.summary {
            println!("  summary: {summary}");
        }
        if let Some(reason) = &session.failure_reason {
            println!("  failure_reason: {reason}");
        }
        if let Some(results) = &session.test_results {
            println!("  tests: passed={} output_len={}", results.passed, results.output.len());
        }
    }
    Ok(())
}

/// Print aggregate event-log counters for the project: total events and the
/// count of each `kind` seen, a cheap proxy for scheduler health without
/// needing a live process to query.
///
/// # Errors
/// Returns an error if the event log file can't be opened or read.
pub fn status(events_path: &Path) -> anyhow::Result<()> {
    let log = EventLog::open(events_path.to_path_buf()).with_context(|| format!("opening event log at {}", events_path.display()))?;
    let events = log.replay_since(0)?;
    println!("total events: {}", events.len());

    let mut counts: std::collections::BTreeMap<&'static str, usize> = std::collections::BTreeMap::new();
    for event in &events {
        *counts.entry(event_kind_name(&event.kind)).or_insert(0) += 1;
    }
    for (kind, count) in counts {
        println!("  {kind}: {count}");
    }
    Ok(())
}

fn event_kind_name(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Transition { .. } => "transition",
        EventKind::AgentSpawned => "agent_spawned",
        EventKind::AgentCompleted { .. } => "agent_completed",
        EventKind::TaskFailed { .. } => "task_failed",
        EventKind::TaskRequeued => "task_requeued",
        EventKind::TaskDemoted { .. } => "task_demoted",
        EventKind::TaskBlocked { .. } => "task_blocked",
        EventKind::TaskCompleted => "task_completed",
        EventKind::MergeFailed { .. } => "merge_failed",
        EventKind::PushSucceeded => "push_succeeded",
        EventKind::PushFailed { .. } => "push_failed",
        EventKind::NotificationAdded { .. } => "notification_added",
    }
}
