//! Per-project settings the core reads from `ProjectService` (spec §6).
//!
//! `ProjectSettings` is the typed, defaulted shape of what
//! `ProjectService::get_settings` returns — agent configs, git working mode,
//! test command, and the scheduling/backoff knobs the rest of the crate
//! treats as constants (concurrency, backoff threshold, inactivity timeout,
//! heartbeat staleness).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::types::GitWorkingMode;

// ---------------------------------------------------------------------------
// ProjectSettings
// ---------------------------------------------------------------------------

/// How an unscoped (no declared file-conflict metadata) task is admitted
/// alongside already-running tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownScopeStrategy {
    /// Admit freely; scope conflicts are discovered at merge time instead.
    #[default]
    Permissive,
    /// Refuse to admit a second task with unknown scope while any other
    /// unknown-scope task is in progress.
    Serialize,
    /// Defer admission and raise a human-in-the-loop approval notification
    /// instead of blocking outright; the task stays `ready` (`SPEC_FULL.md`
    /// §10.6).
    AskHuman,
}

/// Deployment targets triggered after an epic closes (spec §4.6).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSettings {
    /// Named deploy targets to trigger on epic completion.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Typed, defaulted project configuration consumed by the scheduler, merge
/// coordinator, and failure policy.
///
/// Missing fields use sensible defaults; a project with no configuration at
/// all still runs with concurrency 1, worktree mode, and no test command.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    /// Agent configuration identifier used for low-complexity tasks.
    #[serde(default = "default_simple_agent")]
    pub simple_complexity_agent: String,

    /// Agent configuration identifier used for high-complexity tasks.
    #[serde(default = "default_complex_agent")]
    pub complex_complexity_agent: String,

    /// How the git toolkit isolates an agent's working copy.
    #[serde(default)]
    pub git_working_mode: GitWorkingMode,

    /// Shell command run to validate a coding attempt, if any.
    #[serde(default)]
    pub test_command: Option<String>,

    /// Deployment targets triggered after an epic closes.
    #[serde(default)]
    pub deployment: DeploymentSettings,

    /// Admission policy for tasks with no declared scope/conflict metadata.
    #[serde(default)]
    pub unknown_scope_strategy: UnknownScopeStrategy,

    /// Maximum number of tasks this project may run concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Cumulative-failure count between priority demotions (spec glossary:
    /// "backoff threshold"). Default 5, matching `SPEC_FULL.md` §4.5.
    #[serde(default = "default_backoff_threshold")]
    pub backoff_threshold: u32,

    /// Maximum infrastructure retries granted before counting a failure
    /// against the backoff threshold. Default 2, matching §4.5 step 2.
    #[serde(default = "default_max_infra_retries")]
    pub max_infra_retries: u32,

    /// Agent inactivity timeout in seconds before the slot is killed.
    /// Default 300s (5 minutes), matching §4.7.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Heartbeat staleness threshold in seconds. Default 120s (2 minutes),
    /// matching §4.1.
    #[serde(default = "default_heartbeat_staleness_secs")]
    pub heartbeat_staleness_secs: u64,
}

impl ProjectSettings {
    /// Agent inactivity timeout as a [`Duration`].
    #[must_use]
    pub const fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    /// Heartbeat staleness threshold as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_staleness(&self) -> Duration {
        Duration::from_secs(self.heartbeat_staleness_secs)
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            simple_complexity_agent: default_simple_agent(),
            complex_complexity_agent: default_complex_agent(),
            git_working_mode: GitWorkingMode::default(),
            test_command: None,
            deployment: DeploymentSettings::default(),
            unknown_scope_strategy: UnknownScopeStrategy::default(),
            concurrency: default_concurrency(),
            backoff_threshold: default_backoff_threshold(),
            max_infra_retries: default_max_infra_retries(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            heartbeat_staleness_secs: default_heartbeat_staleness_secs(),
        }
    }
}

fn default_simple_agent() -> String {
    "default-simple".to_owned()
}

fn default_complex_agent() -> String {
    "default-complex".to_owned()
}

const fn default_concurrency() -> u32 {
    1
}

const fn default_backoff_threshold() -> u32 {
    5
}

const fn default_max_infra_retries() -> u32 {
    2
}

const fn default_inactivity_timeout_secs() -> u64 {
    300
}

const fn default_heartbeat_staleness_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// An error loading or parsing a project's configuration.
#[derive(Debug)]
pub struct ConfigError {
    /// Path to the offending file, if the error was file-based.
    pub path: Option<std::path::PathBuf>,
    /// Human-readable description of the problem.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a `ProjectSettings` from TOML text (e.g. a project's
/// `.opensprint/config.toml`, when the `ProjectService` is file-backed).
///
/// # Errors
/// Returns [`ConfigError`] if the TOML is malformed or contains unknown
/// fields.
pub fn parse_toml(path: &std::path::Path, text: &str) -> Result<ProjectSettings, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError {
        path: Some(path.to_owned()),
        message: e.to_string(),
    })
}
