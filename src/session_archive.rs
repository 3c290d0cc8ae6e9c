//! Session Archive (C4, spec §4.4).
//!
//! Durable per-attempt record of inputs, outputs, diffs, test results, and
//! failure reasons. Every session is written once, atomically, to
//! `<archive_root>/<taskId>-<attempt>/session.json`. Long `output_log` /
//! `git_diff` fields are truncated to the 95th-percentile size observed
//! among prior sessions for the project (or a default cap, if this is among
//! the first few sessions recorded).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::types::{Session, TaskId};

#[cfg(all(test, feature = "proptests"))]
#[path = "session_archive_proptest.rs"]
mod session_archive_proptest;

/// Default truncation cap used until a project has accumulated enough
/// sessions to compute a meaningful 95th percentile.
pub const DEFAULT_TRUNCATION_CAP: usize = 100 * 1024;

/// Literal marker appended to any field that was truncated.
pub const TRUNCATION_MARKER: &str = "\n\n... [truncated]";

/// Durable, append-only archive of [`Session`] records for one project.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Open (creating if absent) a session archive rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn session_dir(&self, task_id: &TaskId, attempt: u32) -> PathBuf {
        self.root.join(format!("{task_id}-{attempt}"))
    }

    /// Compute the 95th-percentile length of `output_log` and `git_diff`
    /// across every session already archived for `task_id`'s project
    /// (i.e. everything under this store's root), or [`DEFAULT_TRUNCATION_CAP`]
    /// if none exist yet.
    fn truncation_threshold(&self) -> usize {
        let mut lengths = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return DEFAULT_TRUNCATION_CAP;
        };
        for entry in entries.flatten() {
            let path = entry.path().join("session.json");
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<Session>(&contents) else {
                continue;
            };
            lengths.push(session.output_log.len());
            lengths.push(session.git_diff.len());
        }

        if lengths.is_empty() {
            return DEFAULT_TRUNCATION_CAP;
        }
        lengths.sort_unstable();
        percentile_95(&lengths)
    }

    /// Archive `session`, applying the truncation policy to `output_log` and
    /// `git_diff`, and writing it atomically (temp file + rename) to
    /// `<root>/<taskId>-<attempt>/session.json`.
    ///
    /// # Errors
    /// Returns the I/O error if the directory or file can't be created, or
    /// if serialization fails.
    pub fn archive(&self, mut session: Session) -> std::io::Result<()> {
        let threshold = self.truncation_threshold();
        session.output_log = truncate_field(session.output_log, threshold);
        session.git_diff = truncate_field(session.git_diff, threshold);

        let dir = self.session_dir(&session.task_id, session.attempt);
        fs::create_dir_all(&dir)?;

        let target = dir.join("session.json");
        let tmp = dir.join("session.json.tmp");
        let json = serde_json::to_string_pretty(&session)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Every archived session for `task_id`, ordered by attempt ascending.
    ///
    /// # Errors
    /// Returns the I/O error if the store root can't be read.
    pub fn sessions_for_task(&self, task_id: &TaskId) -> std::io::Result<Vec<Session>> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{task_id}-");
        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) {
                continue;
            }
            let path = entry.path().join("session.json");
            if let Ok(contents) = fs::read_to_string(&path) {
                if let Ok(session) = serde_json::from_str::<Session>(&contents) {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by_key(|s| s.attempt);
        Ok(sessions)
    }
}

/// Nearest-rank 95th percentile of an already-sorted slice.
fn percentile_95(sorted: &[usize]) -> usize {
    if sorted.is_empty() {
        return DEFAULT_TRUNCATION_CAP;
    }
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

fn truncate_field(field: String, threshold: usize) -> String {
    if field.len() <= threshold {
        return field;
    }
    let mut boundary = threshold;
    while boundary > 0 && !field.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let mut truncated = field[..boundary].to_owned();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Path a caller's worktree-scratch cleanup should remove after archiving
/// (the per-attempt scratch directory lives outside this store, but session
/// JSON itself is the durable artifact).
#[must_use]
pub fn session_relative_path(task_id: &TaskId, attempt: u32) -> PathBuf {
    PathBuf::from(format!("{task_id}-{attempt}/session.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::SessionStatus;

    fn sample_session(task_id: &str, attempt: u32, output_len: usize, diff_len: usize) -> Session {
        Session {
            task_id: TaskId::new(task_id).unwrap(),
            attempt,
            agent_type: "claude-complex".to_owned(),
            model: "claude-test".to_owned(),
            started_at_unix_ms: 0,
            ended_at_unix_ms: 1,
            status: SessionStatus::Approved,
            output_log: "x".repeat(output_len),
            branch: format!("opensprint/{task_id}"),
            git_diff: "y".repeat(diff_len),
            test_results: None,
            failure_reason: None,
            summary: Some("done".to_owned()),
        }
    }

    #[test]
    fn archives_and_retrieves_by_task_ordered_by_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store.archive(sample_session("t1", 2, 10, 10)).unwrap();
        store.archive(sample_session("t1", 1, 10, 10)).unwrap();

        let sessions = store.sessions_for_task(&TaskId::new("t1").unwrap()).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].attempt, 1);
        assert_eq!(sessions[1].attempt, 2);
    }

    #[test]
    fn short_session_uses_default_cap_and_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store.archive(sample_session("t1", 1, 500, 100)).unwrap();

        let sessions = store.sessions_for_task(&TaskId::new("t1").unwrap()).unwrap();
        assert_eq!(sessions[0].output_log.len(), 500);
        assert!(!sessions[0].output_log.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncates_new_session_to_95th_percentile_of_prior_sessions() {
        // Scenario S8: prior sessions have output sizes {500, 100}; new
        // session outputLog length 3000 → truncated to <= 500 with marker.
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store.archive(sample_session("t1", 1, 500, 10)).unwrap();
        store.archive(sample_session("t2", 1, 100, 10)).unwrap();

        store.archive(sample_session("t3", 1, 3000, 10)).unwrap();

        let sessions = store.sessions_for_task(&TaskId::new("t3").unwrap()).unwrap();
        let output = &sessions[0].output_log;
        assert!(output.len() <= 500 + TRUNCATION_MARKER.len());
        assert!(output.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_marker_appears_iff_field_exceeded_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        store.archive(sample_session("t1", 1, DEFAULT_TRUNCATION_CAP, 0)).unwrap();
        let sessions = store.sessions_for_task(&TaskId::new("t1").unwrap()).unwrap();
        assert!(!sessions[0].output_log.ends_with(TRUNCATION_MARKER));

        let dir2 = tempfile::tempdir().unwrap();
        let store2 = SessionStore::new(dir2.path().to_path_buf());
        store2.archive(sample_session("t1", 1, DEFAULT_TRUNCATION_CAP + 1, 0)).unwrap();
        let sessions2 = store2.sessions_for_task(&TaskId::new("t1").unwrap()).unwrap();
        assert!(sessions2[0].output_log.ends_with(TRUNCATION_MARKER));
    }
}
