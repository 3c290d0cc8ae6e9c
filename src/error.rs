//! Unified error type for the execution orchestrator.
//!
//! Defines [`OrchestratorError`], the error type returned by the scheduler,
//! merge coordinator, failure policy, and collaborator-facing APIs. Error
//! messages are designed to be operator-actionable: each variant includes a
//! clear description of what went wrong and guidance on how to fix it.

use std::fmt;
use std::path::PathBuf;

use crate::model::types::{ProjectId, TaskId};

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Unified error type for orchestrator operations.
///
/// Each variant is designed to be self-contained: an operator or an agent
/// receiving this error should be able to understand what happened and what
/// to do next without additional context.
#[derive(Debug)]
pub enum OrchestratorError {
    /// The requested project does not exist.
    ProjectNotFound {
        /// The project identifier that was not found.
        id: ProjectId,
    },

    /// The requested task does not exist.
    TaskNotFound {
        /// The task identifier that was not found.
        id: TaskId,
    },

    /// A task was admitted while another slot already held it.
    ///
    /// Indicates a violation of the at-most-one-slot-per-task invariant;
    /// should never occur in correct operation.
    SlotOccupied {
        /// The task identifier already occupying a slot.
        id: TaskId,
    },

    /// A task or project identifier failed validation.
    InvalidIdentifier {
        /// The invalid value that was provided.
        value: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A merge operation encountered conflicts.
    MergeConflict {
        /// Summary of each conflicted file.
        conflicts: Vec<ConflictInfo>,
    },

    /// A merge job is already in flight for this project and must complete
    /// or abort before a new one can start.
    MergeInProgress {
        /// Description of the in-progress merge state.
        state: String,
    },

    /// The project's configured test command failed.
    ValidationFailed {
        /// The command that was run.
        command: String,
        /// The process exit code, if the process ran to completion.
        exit_code: Option<i32>,
        /// Captured stderr output (may be truncated).
        stderr: String,
    },

    /// A git operation failed.
    GitError {
        /// The git command that was run (e.g. `"git worktree add"`).
        command: String,
        /// Captured stderr from git.
        stderr: String,
    },

    /// An agent subprocess could not be spawned or communicated with.
    AgentError {
        /// The task whose agent failed.
        task_id: TaskId,
        /// Human-readable description of the failure.
        detail: String,
    },

    /// A project configuration file could not be loaded or parsed.
    ConfigError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// An I/O error occurred during an orchestrator operation.
    Io(std::io::Error),
}

// ---------------------------------------------------------------------------
// ConflictInfo
// ---------------------------------------------------------------------------

/// Summary information about a single conflicted file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictInfo {
    /// Path to the conflicted file, relative to the repository root.
    pub path: PathBuf,
    /// Human-readable description of the conflict (e.g. "both modified",
    /// "deleted vs modified").
    pub description: String,
}

impl ConflictInfo {
    /// Create a new conflict summary.
    pub const fn new(path: PathBuf, description: String) -> Self {
        Self { path, description }
    }
}

impl fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.description)
    }
}

// ---------------------------------------------------------------------------
// Display — actionable error messages
// ---------------------------------------------------------------------------

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectNotFound { id } => {
                write!(
                    f,
                    "project '{id}' not found.\n  To fix: check the project id against the task store's project list."
                )
            }
            Self::TaskNotFound { id } => {
                write!(
                    f,
                    "task '{id}' not found.\n  To fix: check the task id against the task store."
                )
            }
            Self::SlotOccupied { id } => {
                write!(
                    f,
                    "task '{id}' already occupies a slot.\n  This indicates a scheduler invariant violation; file a bug with the event log around this task."
                )
            }
            Self::InvalidIdentifier { value, reason } => {
                write!(
                    f,
                    "invalid identifier '{value}': {reason}\n  Identifiers must be lowercase alphanumeric with hyphens, 1-64 characters."
                )
            }
            Self::MergeConflict { conflicts } => {
                write!(f, "merge conflict in {} file(s):", conflicts.len())?;
                for c in conflicts {
                    write!(f, "\n  - {c}")?;
                }
                write!(
                    f,
                    "\n  To fix: the merge coordinator will block this task; resolve conflicts in a follow-up attempt."
                )
            }
            Self::MergeInProgress { state } => {
                write!(
                    f,
                    "a merge is already in progress: {state}\n  To fix: wait for the current merge job to complete or abort before enqueuing another."
                )
            }
            Self::ValidationFailed {
                command,
                exit_code,
                stderr,
            } => {
                match exit_code {
                    Some(code) => write!(f, "test command failed (exit code {code}): {command}")?,
                    None => write!(f, "test command failed (terminated by signal): {command}")?,
                }
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(
                    f,
                    "\n  To fix: this will be recorded as a coding failure; review the session archive for the failing attempt."
                )
            }
            Self::GitError { command, stderr } => {
                write!(f, "git command failed: {command}")?;
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(
                    f,
                    "\n  To fix: check repository state and retry. Run `git status` for details."
                )
            }
            Self::AgentError { task_id, detail } => {
                write!(
                    f,
                    "agent for task '{task_id}' failed: {detail}\n  To fix: this will be classified as an infrastructure failure and retried, up to the configured infra-retry limit."
                )
            }
            Self::ConfigError { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {}\n  To fix: edit the project configuration file and correct the issue.",
                    path.display(),
                    detail
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<crate::config::ConfigError> for OrchestratorError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::ConfigError {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

impl From<crate::model::types::ValidationError> for OrchestratorError {
    fn from(err: crate::model::types::ValidationError) -> Self {
        Self::InvalidIdentifier {
            value: err.value,
            reason: err.reason,
        }
    }
}

impl From<opensprint_git::GitError> for OrchestratorError {
    fn from(err: opensprint_git::GitError) -> Self {
        Self::GitError {
            command: err.command,
            stderr: err.stderr,
        }
    }
}

impl From<opensprint_git::ToolkitError> for OrchestratorError {
    fn from(err: opensprint_git::ToolkitError) -> Self {
        match err {
            opensprint_git::ToolkitError::RebaseConflict(files) | opensprint_git::ToolkitError::MergeConflict(files) => {
                Self::MergeConflict {
                    conflicts: files
                        .into_iter()
                        .map(|path| ConflictInfo::new(path, "conflicted during rebase/merge".to_owned()))
                        .collect(),
                }
            }
            opensprint_git::ToolkitError::BranchInUse { branch, other_path } => Self::GitError {
                command: "git worktree add".to_owned(),
                stderr: format!("branch '{branch}' already checked out at {}", other_path.display()),
            },
            opensprint_git::ToolkitError::Command(git_err) => Self::GitError {
                command: git_err.command,
                stderr: git_err.stderr,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task_id(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    fn sample_project_id(name: &str) -> ProjectId {
        ProjectId::new(name).unwrap()
    }

    // -- Display tests: every variant produces actionable output --

    #[test]
    fn display_project_not_found() {
        let err = OrchestratorError::ProjectNotFound {
            id: sample_project_id("acme"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("acme"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn display_task_not_found() {
        let err = OrchestratorError::TaskNotFound {
            id: sample_task_id("t1"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("t1"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn display_slot_occupied() {
        let err = OrchestratorError::SlotOccupied {
            id: sample_task_id("t1"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("t1"));
        assert!(msg.contains("invariant violation"));
    }

    #[test]
    fn display_invalid_identifier() {
        let err = OrchestratorError::InvalidIdentifier {
            value: "BAD ID".to_owned(),
            reason: "contains uppercase".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("BAD ID"));
        assert!(msg.contains("contains uppercase"));
        assert!(msg.contains("lowercase alphanumeric"));
    }

    #[test]
    fn display_merge_conflict_single() {
        let err = OrchestratorError::MergeConflict {
            conflicts: vec![ConflictInfo::new(
                PathBuf::from("src/main.rs"),
                "both modified".to_owned(),
            )],
        };
        let msg = format!("{err}");
        assert!(msg.contains("1 file(s)"));
        assert!(msg.contains("src/main.rs"));
        assert!(msg.contains("both modified"));
    }

    #[test]
    fn display_merge_conflict_multiple() {
        let err = OrchestratorError::MergeConflict {
            conflicts: vec![
                ConflictInfo::new(PathBuf::from("a.rs"), "both modified".to_owned()),
                ConflictInfo::new(PathBuf::from("b.rs"), "deleted vs modified".to_owned()),
            ],
        };
        let msg = format!("{err}");
        assert!(msg.contains("2 file(s)"));
        assert!(msg.contains("a.rs"));
        assert!(msg.contains("b.rs"));
    }

    #[test]
    fn display_merge_in_progress() {
        let err = OrchestratorError::MergeInProgress {
            state: "merging t1 into main".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("already in progress"));
        assert!(msg.contains("merging t1"));
    }

    #[test]
    fn display_validation_failed_with_exit_code() {
        let err = OrchestratorError::ValidationFailed {
            command: "npm test".to_owned(),
            exit_code: Some(1),
            stderr: "2 tests failed".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("npm test"));
        assert!(msg.contains('1'));
        assert!(msg.contains("2 tests failed"));
    }

    #[test]
    fn display_validation_failed_signal_terminated() {
        let err = OrchestratorError::ValidationFailed {
            command: "make check".to_owned(),
            exit_code: None,
            stderr: String::new(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("terminated by signal"));
        assert!(!msg.contains("stderr:"));
    }

    #[test]
    fn display_git_error() {
        let err = OrchestratorError::GitError {
            command: "git worktree add".to_owned(),
            stderr: "fatal: already exists".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("git worktree add"));
        assert!(msg.contains("fatal: already exists"));
        assert!(msg.contains("git status"));
    }

    #[test]
    fn display_agent_error() {
        let err = OrchestratorError::AgentError {
            task_id: sample_task_id("t1"),
            detail: "process exited with signal 9".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("t1"));
        assert!(msg.contains("signal 9"));
        assert!(msg.contains("infrastructure failure"));
    }

    #[test]
    fn display_config_error() {
        let err = OrchestratorError::ConfigError {
            path: PathBuf::from(".opensprint/config.toml"),
            detail: "unknown field 'foo'".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains(".opensprint/config.toml"));
        assert!(msg.contains("unknown field 'foo'"));
    }

    #[test]
    fn display_io_error() {
        let err = OrchestratorError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        let msg = format!("{err}");
        assert!(msg.contains("permission denied"));
        assert!(msg.contains("file permissions"));
    }

    // -- std::error::Error trait --

    #[test]
    fn error_source_io() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = OrchestratorError::Io(inner);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_io_is_none() {
        let err = OrchestratorError::TaskNotFound {
            id: sample_task_id("t1"),
        };
        assert!(std::error::Error::source(&err).is_none());
    }

    // -- From impls --

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: OrchestratorError = io_err.into();
        assert!(matches!(err, OrchestratorError::Io(_)));
    }

    #[test]
    fn from_config_error() {
        let cfg_err = crate::config::ConfigError {
            path: Some(PathBuf::from("/repo/.opensprint/config.toml")),
            message: "bad syntax".to_owned(),
        };
        let err: OrchestratorError = cfg_err.into();
        match err {
            OrchestratorError::ConfigError { path, detail } => {
                assert_eq!(path, PathBuf::from("/repo/.opensprint/config.toml"));
                assert_eq!(detail, "bad syntax");
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn from_validation_error() {
        let val_err = crate::model::types::ValidationError {
            kind: crate::model::types::ErrorKind::TaskId,
            value: "BAD".to_owned(),
            reason: "uppercase".to_owned(),
        };
        let err: OrchestratorError = val_err.into();
        match err {
            OrchestratorError::InvalidIdentifier { value, reason } => {
                assert_eq!(value, "BAD");
                assert_eq!(reason, "uppercase");
            }
            other => panic!("expected InvalidIdentifier, got {other:?}"),
        }
    }

    #[test]
    fn from_git_error() {
        let git_err = opensprint_git::GitError {
            command: "git push".to_owned(),
            stderr: "rejected".to_owned(),
        };
        let err: OrchestratorError = git_err.into();
        match err {
            OrchestratorError::GitError { command, stderr } => {
                assert_eq!(command, "git push");
                assert_eq!(stderr, "rejected");
            }
            other => panic!("expected GitError, got {other:?}"),
        }
    }

    // -- ConflictInfo --

    #[test]
    fn conflict_info_display() {
        let c = ConflictInfo::new(PathBuf::from("src/lib.rs"), "both modified".to_owned());
        assert_eq!(format!("{c}"), "src/lib.rs: both modified");
    }

    #[test]
    fn conflict_info_equality() {
        let a = ConflictInfo::new(PathBuf::from("a.rs"), "x".to_owned());
        let b = ConflictInfo::new(PathBuf::from("a.rs"), "x".to_owned());
        assert_eq!(a, b);
    }
}
