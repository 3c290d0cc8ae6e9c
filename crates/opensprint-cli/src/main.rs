//! `forge-cli`: a thin operational binary around `opensprint-core`.
//!
//! Wires an in-process demo `TaskStore`/`ProjectService` (seeded from a TOML
//! file) and drives the scheduler loop end-to-end against a real git
//! repository, plus read-only introspection subcommands that work off the
//! on-disk event log and session archive alone. Not the product surface —
//! a real deployment drives `opensprint-core` from its own System of Record,
//! not from this binary.

mod introspect;
mod seed;
mod shell_agent;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use opensprint::collaborators::ProjectService as _;
use opensprint::event_log::EventLog;
use opensprint::exhaustion::ExhaustionRegistry;
use opensprint::merge_coordinator::MergeCoordinator;
use opensprint::scheduler::Scheduler;
use opensprint::session_archive::SessionStore;
use opensprint::testing::{FakeBroadcast, FakeDeploymentTrigger, FakeEpicReviewer, FakeMergerAgent, FakeNotificationService};

#[derive(Parser)]
#[command(name = "forge-cli", about = "Operational surface for the opensprint execution orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the scheduler loop for a seeded demo project until Ctrl-C.
    Run {
        /// TOML file describing the demo project and its tasks.
        #[arg(long)]
        seed: PathBuf,
        /// Directory to write event log, sessions, and worktrees under.
        #[arg(long)]
        state_dir: PathBuf,
        /// Shell command spawned per task, e.g. `"cat > /dev/null; echo ok"`.
        #[arg(long, default_value = "echo 'no agent command configured' >&2; exit 1")]
        agent_command: String,
    },
    /// Print aggregate event-log counters for a project's state directory.
    Status {
        #[arg(long)]
        state_dir: PathBuf,
    },
    /// Print every event recorded for a project's state directory.
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    /// Print archived sessions for a task.
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
}

#[derive(Subcommand)]
enum EventsCommand {
    Tail {
        #[arg(long)]
        state_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    Show {
        #[arg(long)]
        state_dir: PathBuf,
        task_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let _telemetry = opensprint::telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            seed,
            state_dir,
            agent_command,
        } => run(&seed, &state_dir, agent_command),
        Command::Status { state_dir } => introspect::status(&events_path(&state_dir)),
        Command::Events {
            command: EventsCommand::Tail { state_dir },
        } => introspect::events_tail(&events_path(&state_dir)),
        Command::Sessions {
            command: SessionsCommand::Show { state_dir, task_id },
        } => introspect::sessions_show(&sessions_dir(&state_dir), &task_id),
    }
}

fn events_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("events.jsonl")
}

fn sessions_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("sessions")
}

fn run(seed_path: &std::path::Path, state_dir: &std::path::Path, agent_command: String) -> anyhow::Result<()> {
    std::fs::create_dir_all(state_dir).with_context(|| format!("creating state directory {}", state_dir.display()))?;

    let (project_id, tasks, projects) = seed::load(seed_path)?;
    let project = projects.get_project(&project_id).context("seeded project vanished immediately after insert")?;
    let settings = projects.get_settings(&project_id).context("seeded project settings vanished immediately after insert")?;

    let tasks = Arc::new(tasks);
    let event_log = Arc::new(EventLog::open(events_path(state_dir)).context("opening event log")?);
    let sessions = Arc::new(SessionStore::new(sessions_dir(state_dir)));
    let merge_coordinator = Arc::new(MergeCoordinator::new(
        tasks.clone(),
        sessions.clone(),
        event_log.clone(),
        Arc::new(FakeMergerAgent::new(true)),
        Arc::new(FakeEpicReviewer::new(true)),
        Arc::new(FakeDeploymentTrigger::new()),
    ));

    let scheduler = Scheduler::new(
        project_id,
        project.repository_path,
        state_dir.join("worktrees"),
        "main".to_owned(),
        settings,
        tasks,
        Arc::new(shell_agent::ShellAgentRunner::new(agent_command)),
        Arc::new(FakeNotificationService::new()),
        Arc::new(FakeBroadcast::new()),
        event_log,
        sessions,
        Arc::new(ExhaustionRegistry::new()),
        merge_coordinator,
    );

    // No signal-handling crate in this binary's dependency stack: Ctrl-C
    // just kills the process outright, which is fine for a developer
    // convenience that isn't the product surface. `stop` stays `false` for
    // the process lifetime.
    let stop = AtomicBool::new(false);
    println!("forge-cli: running against {} — press Ctrl-C to stop", state_dir.display());
    scheduler.run(&stop);
    Ok(())
}
