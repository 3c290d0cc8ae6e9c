//! Heartbeat Registry (C1, spec §4.1).
//!
//! Each agent writes a small liveness file into its worktree before
//! producing output and rewrites it on a fixed cadence. A heartbeat older
//! than [`ProjectSettings::heartbeat_staleness`] — or simply absent — marks
//! the worktree orphaned. Reads never block on locks; writes are
//! temp-file-then-rename so a reader never observes a half-written file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::model::types::TaskId;

/// The heartbeat file name written inside every task worktree.
pub const HEARTBEAT_FILE_NAME: &str = ".opensprint-heartbeat.json";

/// The contents of a heartbeat file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// The task the worktree this heartbeat lives in belongs to.
    pub task_id: TaskId,
    /// Unix epoch milliseconds this heartbeat was last written.
    pub updated_at_unix_ms: u128,
}

/// A stale (or missing) worktree discovered by [`find_stale`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleWorktree {
    /// The task identifier, parsed from the worktree's directory name.
    pub task_id: TaskId,
    /// Absolute path to the worktree.
    pub path: PathBuf,
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Write (or rewrite) the heartbeat file for `task_id` inside `worktree`,
/// atomically (temp-file + rename) so a reader never sees a truncated file.
///
/// # Errors
/// Returns the I/O error if the temp file can't be created, written, or
/// renamed into place.
pub fn write_heartbeat(worktree: &Path, task_id: &TaskId) -> std::io::Result<()> {
    let record = HeartbeatRecord {
        task_id: task_id.clone(),
        updated_at_unix_ms: now_unix_ms(),
    };
    let json = serde_json::to_string(&record)
        .unwrap_or_else(|_| "{}".to_owned());

    let target = worktree.join(HEARTBEAT_FILE_NAME);
    let tmp = worktree.join(format!("{HEARTBEAT_FILE_NAME}.tmp"));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &target)?;
    Ok(())
}

/// Read the heartbeat file inside `worktree`, if present and well-formed.
#[must_use]
pub fn read_heartbeat(worktree: &Path) -> Option<HeartbeatRecord> {
    let contents = fs::read_to_string(worktree.join(HEARTBEAT_FILE_NAME)).ok()?;
    serde_json::from_str(&contents).ok()
}

/// `true` if `record` was last updated within `staleness` of now.
///
/// Absence of a record (caller passes `None`) is always treated as stale —
/// a missing heartbeat is itself the failure mode §4.1 calls out.
#[must_use]
pub fn is_fresh(record: Option<&HeartbeatRecord>, staleness: Duration) -> bool {
    let Some(record) = record else { return false };
    let age_ms = now_unix_ms().saturating_sub(record.updated_at_unix_ms);
    age_ms < staleness.as_millis()
}

/// `true` if the worktree at `path` currently has a fresh heartbeat.
#[must_use]
pub fn is_worktree_fresh(path: &Path, staleness: Duration) -> bool {
    is_fresh(read_heartbeat(path).as_ref(), staleness)
}

/// Scan every entry directly under `base` (the worktree base directory) and
/// report those whose heartbeat is missing or stale.
///
/// The task id is taken from the directory name (worktrees live at
/// `<base>/<taskId>`); entries whose name isn't a valid [`TaskId`] are
/// skipped rather than erroring, since a foreign directory under the
/// worktree base is not this registry's concern.
#[must_use]
pub fn find_stale(base: &Path, staleness: Duration) -> Vec<StaleWorktree> {
    let Ok(entries) = fs::read_dir(base) else {
        return Vec::new();
    };

    let mut stale = Vec::new();
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
        if !is_worktree_fresh(&path, staleness) {
            stale.push(StaleWorktree { task_id, path });
        }
    }
    stale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    #[test]
    fn missing_heartbeat_is_stale() {
        assert!(!is_fresh(None, Duration::from_secs(120)));
    }

    #[test]
    fn freshly_written_heartbeat_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        write_heartbeat(dir.path(), &tid("t1")).unwrap();
        assert!(is_worktree_fresh(dir.path(), Duration::from_secs(120)));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let record = HeartbeatRecord {
            task_id: tid("t1"),
            updated_at_unix_ms: now_unix_ms().saturating_sub(Duration::from_secs(121).as_millis()),
        };
        assert!(!is_fresh(Some(&record), Duration::from_secs(120)));
    }

    #[test]
    fn write_is_atomic_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_heartbeat(dir.path(), &tid("t1")).unwrap();
        assert!(!dir.path().join(format!("{HEARTBEAT_FILE_NAME}.tmp")).exists());
        assert!(dir.path().join(HEARTBEAT_FILE_NAME).exists());
    }

    #[test]
    fn find_stale_reports_missing_and_old_but_not_fresh() {
        let base = tempfile::tempdir().unwrap();
        let fresh_dir = base.path().join("task-fresh");
        let stale_dir = base.path().join("task-stale");
        let missing_dir = base.path().join("task-missing");
        fs::create_dir_all(&fresh_dir).unwrap();
        fs::create_dir_all(&stale_dir).unwrap();
        fs::create_dir_all(&missing_dir).unwrap();

        write_heartbeat(&fresh_dir, &tid("task-fresh")).unwrap();
        let old_record = HeartbeatRecord {
            task_id: tid("task-stale"),
            updated_at_unix_ms: 0,
        };
        fs::write(
            stale_dir.join(HEARTBEAT_FILE_NAME),
            serde_json::to_string(&old_record).unwrap(),
        )
        .unwrap();

        let stale = find_stale(base.path(), Duration::from_secs(120));
        let names: Vec<_> = stale.iter().map(|s| s.task_id.as_str().to_owned()).collect();
        assert!(names.contains(&"task-stale".to_owned()));
        assert!(names.contains(&"task-missing".to_owned()));
        assert!(!names.contains(&"task-fresh".to_owned()));
    }
}
