//! In-memory fakes for the collaborator traits (`SPEC_FULL.md` §10.5).
//!
//! Mirrors the teacher's `tests/common/` convention of in-process fakes
//! backing integration tests: real git (via `opensprint-git`'s own
//! `tempfile::TempDir`-based tests) and real threads, but every external
//! collaborator (task store, project service, agent runner, merger agent,
//! notifications, broadcast) is faked so scheduler/failure-policy/
//! merge-coordinator tests run fully in-process with no network or LLM
//! calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use std::time::Duration;

use crate::collaborators::{
    AgentEvent, AgentHandle, AgentInvocation, AgentPoll, AgentRunner, ApiBlockedCode, Broadcast, DeploymentTrigger,
    EpicReviewRequest, EpicReviewer, MergerAgent, MergerAgentRequest, NotificationService, ProjectRecord,
    ProjectService, TaskFieldUpdate, TaskRecord, TaskStore,
};
use crate::config::ProjectSettings;
use crate::model::types::{Event, ProjectId, TaskId};
use crate::OrchestratorError;

// ---------------------------------------------------------------------------
// FakeTaskStore
// ---------------------------------------------------------------------------

/// An in-memory [`TaskStore`]. Tests seed it with [`FakeTaskStore::insert`]
/// and assert on state via [`FakeTaskStore::show`] or [`FakeTaskStore::comments_for`].
#[derive(Default)]
pub struct FakeTaskStore {
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    comments: Mutex<HashMap<TaskId, Vec<String>>>,
    closed_summaries: Mutex<HashMap<TaskId, String>>,
    merge_stages: Mutex<HashMap<TaskId, Option<String>>>,
    follow_up_counter: AtomicU64,
}

impl FakeTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or overwrite) a task.
    pub fn insert(&self, task: TaskRecord) {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
    }

    /// Every comment appended to `task_id`, in append order.
    #[must_use]
    pub fn comments_for(&self, task_id: &TaskId) -> Vec<String> {
        self.comments.lock().unwrap().get(task_id).cloned().unwrap_or_default()
    }

    /// The summary `close` was called with, if any.
    #[must_use]
    pub fn closed_summary(&self, task_id: &TaskId) -> Option<String> {
        self.closed_summaries.lock().unwrap().get(task_id).cloned()
    }

    /// The merge stage last set via `set_merge_stage`, if any.
    #[must_use]
    pub fn merge_stage(&self, task_id: &TaskId) -> Option<Option<String>> {
        self.merge_stages.lock().unwrap().get(task_id).cloned()
    }
}

impl TaskStore for FakeTaskStore {
    fn show(&self, id: &TaskId) -> Result<TaskRecord, OrchestratorError> {
        self.tasks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.clone() })
    }

    fn list_all(&self, _project: &ProjectId) -> Result<Vec<TaskRecord>, OrchestratorError> {
        let mut tasks: Vec<_> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    fn update(&self, id: &TaskId, fields: TaskFieldUpdate) -> Result<(), OrchestratorError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| OrchestratorError::TaskNotFound { id: id.clone() })?;
        if let Some(status) = fields.status {
            task.status = status;
        }
        if let Some(priority) = fields.priority {
            task.priority = priority;
        }
        if let Some(assignee) = fields.assignee {
            task.assignee = assignee;
        }
        if let Some(summary) = fields.last_execution_summary {
            task.last_execution_summary = summary;
        }
        Ok(())
    }

    fn comment(&self, id: &TaskId, body: &str) -> Result<(), OrchestratorError> {
        if !self.tasks.lock().unwrap().contains_key(id) {
            return Err(OrchestratorError::TaskNotFound { id: id.clone() });
        }
        self.comments.lock().unwrap().entry(id.clone()).or_default().push(body.to_owned());
        Ok(())
    }

    fn close(&self, id: &TaskId, summary: &str) -> Result<(), OrchestratorError> {
        use crate::model::types::TaskStatus;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| OrchestratorError::TaskNotFound { id: id.clone() })?;
        task.status = TaskStatus::Closed;
        task.last_execution_summary = Some(summary.to_owned());
        drop(tasks);
        self.closed_summaries.lock().unwrap().insert(id.clone(), summary.to_owned());
        Ok(())
    }

    fn set_cumulative_attempts(&self, id: &TaskId, attempts: u32) -> Result<(), OrchestratorError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| OrchestratorError::TaskNotFound { id: id.clone() })?;
        task.cumulative_attempts = attempts;
        Ok(())
    }

    fn set_conflict_files(&self, id: &TaskId, files: Vec<std::path::PathBuf>) -> Result<(), OrchestratorError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id).ok_or_else(|| OrchestratorError::TaskNotFound { id: id.clone() })?;
        task.touched_files = Some(files);
        Ok(())
    }

    fn set_merge_stage(&self, id: &TaskId, stage: Option<String>) -> Result<(), OrchestratorError> {
        if !self.tasks.lock().unwrap().contains_key(id) {
            return Err(OrchestratorError::TaskNotFound { id: id.clone() });
        }
        self.merge_stages.lock().unwrap().insert(id.clone(), stage);
        Ok(())
    }

    fn get_cumulative_attempts_from_issue(&self, id: &TaskId) -> Result<u32, OrchestratorError> {
        self.show(id).map(|t| t.cumulative_attempts)
    }

    fn list_in_progress_with_agent_assignee(&self, _project: &ProjectId) -> Result<Vec<TaskRecord>, OrchestratorError> {
        use crate::model::types::TaskStatus;
        let mut tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| matches!(t.status, TaskStatus::InProgress) && t.assignee.is_some())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    fn create_follow_up_task(&self, epic_id: &TaskId, title: &str, _description: &str) -> Result<TaskId, OrchestratorError> {
        use crate::model::types::{Priority, TaskStatus};
        let n = self.follow_up_counter.fetch_add(1, Ordering::Relaxed);
        let id = TaskId::new(&format!("{epic_id}-followup-{n}"))?;
        self.tasks.lock().unwrap().insert(
            id.clone(),
            TaskRecord {
                id: id.clone(),
                title: title.to_owned(),
                status: TaskStatus::Open,
                priority: Priority::default(),
                labels: Vec::new(),
                cumulative_attempts: 0,
                epic_id: Some(epic_id.clone()),
                last_execution_summary: None,
                assignee: None,
                provider: None,
                touched_files: None,
            },
        );
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// FakeProjectService
// ---------------------------------------------------------------------------

/// An in-memory [`ProjectService`].
#[derive(Default)]
pub struct FakeProjectService {
    projects: Mutex<HashMap<ProjectId, (ProjectRecord, ProjectSettings)>>,
}

impl FakeProjectService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ProjectRecord, settings: ProjectSettings) {
        self.projects.lock().unwrap().insert(record.id.clone(), (record, settings));
    }
}

impl ProjectService for FakeProjectService {
    fn get_project(&self, id: &ProjectId) -> Result<ProjectRecord, OrchestratorError> {
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .map(|(record, _)| record.clone())
            .ok_or_else(|| OrchestratorError::ProjectNotFound { id: id.clone() })
    }

    fn get_settings(&self, id: &ProjectId) -> Result<ProjectSettings, OrchestratorError> {
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, settings)| settings.clone())
            .ok_or_else(|| OrchestratorError::ProjectNotFound { id: id.clone() })
    }
}

// ---------------------------------------------------------------------------
// FakeAgentRunner
// ---------------------------------------------------------------------------

/// A scripted, deterministic [`AgentHandle`]: replays a fixed list of
/// [`AgentEvent`]s in order, one per [`AgentHandle::poll_event`] call. Never
/// actually waits out `timeout` — there is no subprocess to block on — it
/// just reports [`AgentPoll::Timeout`] once the script is exhausted.
pub struct FakeAgentHandle {
    events: std::collections::VecDeque<AgentEvent>,
    killed: bool,
}

impl AgentHandle for FakeAgentHandle {
    fn poll_event(&mut self, _timeout: Duration) -> AgentPoll {
        if self.killed {
            return AgentPoll::Event(AgentEvent::Exit { code: None });
        }
        match self.events.pop_front() {
            Some(event) => AgentPoll::Event(event),
            None => AgentPoll::Timeout,
        }
    }

    fn kill(&mut self) {
        self.killed = true;
        self.events.clear();
    }
}

/// An [`AgentRunner`] that hands back a [`FakeAgentHandle`] scripted per
/// task id, falling back to a single default script for tasks that weren't
/// explicitly scripted.
#[derive(Default)]
pub struct FakeAgentRunner {
    scripts: Mutex<HashMap<String, Vec<AgentEvent>>>,
    default_script: Mutex<Vec<AgentEvent>>,
    invocations: Mutex<Vec<AgentInvocation>>,
}

impl FakeAgentRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the events `task_id`'s agent invocation will emit.
    pub fn script_for(&self, task_id: &str, events: Vec<AgentEvent>) {
        self.scripts.lock().unwrap().insert(task_id.to_owned(), events);
    }

    /// Script the events used for any task without an explicit script.
    pub fn script_default(&self, events: Vec<AgentEvent>) {
        *self.default_script.lock().unwrap() = events;
    }

    /// Every invocation `spawn` was called with, in call order.
    #[must_use]
    pub fn invocations(&self) -> Vec<AgentInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl AgentRunner for FakeAgentRunner {
    fn spawn(&self, invocation: AgentInvocation) -> Result<Box<dyn AgentHandle>, OrchestratorError> {
        let task_hint = invocation.cwd.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_owned();
        self.invocations.lock().unwrap().push(invocation);

        let scripts = self.scripts.lock().unwrap();
        let events = scripts
            .get(&task_hint)
            .cloned()
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone());
        Ok(Box::new(FakeAgentHandle {
            events: events.into(),
            killed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// FakeMergerAgent
// ---------------------------------------------------------------------------

/// A [`MergerAgent`] that always returns a fixed `resolved` verdict and
/// records every request it was asked to handle.
pub struct FakeMergerAgent {
    resolved: bool,
    requests: Mutex<Vec<MergerAgentRequest>>,
}

impl FakeMergerAgent {
    #[must_use]
    pub fn new(resolved: bool) -> Self {
        Self {
            resolved,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn requests(&self) -> Vec<MergerAgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl MergerAgent for FakeMergerAgent {
    fn run(&self, request: MergerAgentRequest) -> Result<bool, OrchestratorError> {
        self.requests.lock().unwrap().push(request);
        Ok(self.resolved)
    }
}

// ---------------------------------------------------------------------------
// FakeEpicReviewer
// ---------------------------------------------------------------------------

/// An [`EpicReviewer`] that always returns a fixed verdict and records every
/// request it was asked to judge.
pub struct FakeEpicReviewer {
    passes: bool,
    requests: Mutex<Vec<EpicReviewRequest>>,
}

impl FakeEpicReviewer {
    #[must_use]
    pub fn new(passes: bool) -> Self {
        Self {
            passes,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn requests(&self) -> Vec<EpicReviewRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl EpicReviewer for FakeEpicReviewer {
    fn review(&self, request: EpicReviewRequest) -> Result<bool, OrchestratorError> {
        self.requests.lock().unwrap().push(request);
        Ok(self.passes)
    }
}

// ---------------------------------------------------------------------------
// FakeNotificationService
// ---------------------------------------------------------------------------

/// Records every notification it was asked to create.
#[derive(Default)]
pub struct FakeNotificationService {
    api_blocked: Mutex<Vec<(ProjectId, crate::model::types::ProviderId, ApiBlockedCode)>>,
    hil_approvals: Mutex<Vec<(ProjectId, TaskId, String)>>,
}

impl FakeNotificationService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn api_blocked_calls(&self) -> usize {
        self.api_blocked.lock().unwrap().len()
    }

    #[must_use]
    pub fn hil_approval_calls(&self) -> usize {
        self.hil_approvals.lock().unwrap().len()
    }
}

impl NotificationService for FakeNotificationService {
    fn create_api_blocked(
        &self,
        project: &ProjectId,
        provider: &crate::model::types::ProviderId,
        code: ApiBlockedCode,
    ) -> Result<(), OrchestratorError> {
        self.api_blocked.lock().unwrap().push((project.clone(), provider.clone(), code));
        Ok(())
    }

    fn create_hil_approval(&self, project: &ProjectId, task: &TaskId, reason: &str) -> Result<(), OrchestratorError> {
        self.hil_approvals.lock().unwrap().push((project.clone(), task.clone(), reason.to_owned()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeBroadcast
// ---------------------------------------------------------------------------

/// Records every event broadcast to it; never fails (matching the real
/// `Broadcast` contract of "best-effort, never blocks or panics").
#[derive(Default)]
pub struct FakeBroadcast {
    events: Mutex<Vec<(ProjectId, Event)>>,
}

impl FakeBroadcast {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<(ProjectId, Event)> {
        self.events.lock().unwrap().clone()
    }
}

impl Broadcast for FakeBroadcast {
    fn broadcast(&self, project: &ProjectId, event: &Event) {
        self.events.lock().unwrap().push((project.clone(), event.clone()));
    }
}

// ---------------------------------------------------------------------------
// FakeDeploymentTrigger
// ---------------------------------------------------------------------------

/// Records every deploy trigger call.
#[derive(Default)]
pub struct FakeDeploymentTrigger {
    triggers: Mutex<Vec<(ProjectId, String)>>,
}

impl FakeDeploymentTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn triggers(&self) -> Vec<(ProjectId, String)> {
        self.triggers.lock().unwrap().clone()
    }
}

impl DeploymentTrigger for FakeDeploymentTrigger {
    fn trigger(&self, project: &ProjectId, target: &str) -> Result<(), OrchestratorError> {
        self.triggers.lock().unwrap().push((project.clone(), target.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{Priority, TaskStatus};

    fn sample_task(id: &str) -> TaskRecord {
        TaskRecord {
            id: TaskId::new(id).unwrap(),
            title: "Sample".to_owned(),
            status: TaskStatus::Open,
            priority: Priority::default(),
            labels: Vec::new(),
            cumulative_attempts: 0,
            epic_id: None,
            last_execution_summary: None,
            assignee: None,
            provider: None,
            touched_files: None,
        }
    }

    #[test]
    fn task_store_show_not_found() {
        let store = FakeTaskStore::new();
        let err = store.show(&TaskId::new("missing").unwrap()).unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskNotFound { .. }));
    }

    #[test]
    fn task_store_update_and_show_round_trip() {
        let store = FakeTaskStore::new();
        store.insert(sample_task("t1"));
        store
            .update(
                &TaskId::new("t1").unwrap(),
                TaskFieldUpdate {
                    status: Some(TaskStatus::InProgress),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.show(&TaskId::new("t1").unwrap()).unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn task_store_comment_accumulates() {
        let store = FakeTaskStore::new();
        store.insert(sample_task("t1"));
        let id = TaskId::new("t1").unwrap();
        store.comment(&id, "first").unwrap();
        store.comment(&id, "second").unwrap();
        assert_eq!(store.comments_for(&id), vec!["first".to_owned(), "second".to_owned()]);
    }

    #[test]
    fn task_store_close_records_summary() {
        let store = FakeTaskStore::new();
        store.insert(sample_task("t1"));
        let id = TaskId::new("t1").unwrap();
        store.close(&id, "done").unwrap();
        assert_eq!(store.show(&id).unwrap().status, TaskStatus::Closed);
        assert_eq!(store.closed_summary(&id), Some("done".to_owned()));
    }

    #[test]
    fn agent_runner_replays_scripted_events_for_task() {
        let runner = FakeAgentRunner::new();
        runner.script_for(
            "t1",
            vec![AgentEvent::OutputChunk("hi".to_owned()), AgentEvent::Exit { code: Some(0) }],
        );
        let mut handle = runner
            .spawn(AgentInvocation {
                config: "c".to_owned(),
                prompt: "p".to_owned(),
                system_prompt: "s".to_owned(),
                cwd: std::path::PathBuf::from("/base/t1"),
            })
            .unwrap();
        assert_eq!(handle.poll_event(Duration::from_millis(10)), AgentPoll::Event(AgentEvent::OutputChunk("hi".to_owned())));
        assert_eq!(
            handle.poll_event(Duration::from_millis(10)),
            AgentPoll::Event(AgentEvent::Exit { code: Some(0) })
        );
        assert_eq!(handle.poll_event(Duration::from_millis(10)), AgentPoll::Timeout);
    }

    #[test]
    fn agent_handle_kill_drains_remaining_events() {
        let runner = FakeAgentRunner::new();
        runner.script_for("t1", vec![AgentEvent::OutputChunk("a".to_owned()), AgentEvent::OutputChunk("b".to_owned())]);
        let mut handle = runner
            .spawn(AgentInvocation {
                config: "c".to_owned(),
                prompt: "p".to_owned(),
                system_prompt: "s".to_owned(),
                cwd: std::path::PathBuf::from("/base/t1"),
            })
            .unwrap();
        handle.kill();
        assert_eq!(
            handle.poll_event(Duration::from_millis(10)),
            AgentPoll::Event(AgentEvent::Exit { code: None })
        );
    }

    #[test]
    fn notification_service_records_calls() {
        let notifications = FakeNotificationService::new();
        notifications
            .create_api_blocked(
                &ProjectId::new("p1").unwrap(),
                &crate::model::types::ProviderId::new("anthropic").unwrap(),
                ApiBlockedCode::RateLimited,
            )
            .unwrap();
        assert_eq!(notifications.api_blocked_calls(), 1);
    }

    #[test]
    fn broadcast_records_events() {
        use crate::model::types::EventKind;
        let broadcast = FakeBroadcast::new();
        broadcast.broadcast(
            &ProjectId::new("p1").unwrap(),
            &Event {
                timestamp_unix_ms: 1,
                project_id: ProjectId::new("p1").unwrap(),
                task_id: None,
                kind: EventKind::AgentSpawned,
            },
        );
        assert_eq!(broadcast.events().len(), 1);
    }
}
