//! Demo project/task seed loading.
//!
//! `forge-cli run` is a developer convenience, not the product surface — it
//! has no real System of Record to connect to, so it seeds an in-process
//! [`opensprint::testing::FakeTaskStore`] from a small TOML file instead.

use std::path::Path;

use anyhow::Context;
use opensprint::collaborators::{ProjectRecord, TaskRecord};
use opensprint::config::ProjectSettings;
use opensprint::model::types::{Priority, ProjectId, TaskId, TaskStatus};
use opensprint::testing::{FakeProjectService, FakeTaskStore};
use serde::Deserialize;

#[derive(Deserialize)]
struct SeedFile {
    project: SeedProject,
    #[serde(default)]
    task: Vec<SeedTask>,
}

#[derive(Deserialize)]
struct SeedProject {
    id: String,
    repository_path: String,
    #[serde(default)]
    settings: ProjectSettings,
}

#[derive(Deserialize)]
struct SeedTask {
    id: String,
    title: String,
    #[serde(default)]
    priority: u8,
    #[serde(default)]
    labels: Vec<String>,
}

/// Load a seed file into a pair of in-process demo collaborators, returning
/// the seeded project id alongside them.
///
/// # Errors
/// Returns an error if the file can't be read, isn't valid TOML, or names an
/// invalid project/task identifier.
pub fn load(path: &Path) -> anyhow::Result<(ProjectId, FakeTaskStore, FakeProjectService)> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: SeedFile = toml::from_str(&text).with_context(|| format!("parsing seed file {}", path.display()))?;

    let project_id = ProjectId::new(&seed.project.id).context("invalid project id in seed file")?;

    let projects = FakeProjectService::new();
    projects.insert(
        ProjectRecord {
            id: project_id.clone(),
            repository_path: seed.project.repository_path.into(),
        },
        seed.project.settings,
    );

    let tasks = FakeTaskStore::new();
    for task in seed.task {
        tasks.insert(TaskRecord {
            id: TaskId::new(&task.id).with_context(|| format!("invalid task id '{}' in seed file", task.id))?,
            title: task.title,
            status: TaskStatus::Ready,
            priority: Priority::new(task.priority).with_context(|| format!("invalid priority for task '{}'", task.id))?,
            labels: task.labels,
            cumulative_attempts: 0,
            epic_id: None,
            last_execution_summary: None,
            assignee: None,
            provider: None,
            touched_files: None,
        });
    }

    Ok((project_id, tasks, projects))
}
