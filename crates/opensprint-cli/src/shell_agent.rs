//! A real [`AgentRunner`] for `forge-cli run`: spawns the operator's
//! configured coding-agent command as a subprocess and streams its stdout as
//! [`AgentEvent::OutputChunk`]s. This is the one place in the demo binary
//! that actually shells out — everything else (task store, project service)
//! stays in-process per `SPEC_FULL.md` §10.4.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use opensprint::collaborators::{AgentEvent, AgentHandle, AgentInvocation, AgentPoll, AgentRunner};
use opensprint::OrchestratorError;

/// Runs `command` (a shell string, e.g. `"claude --print"`) in each task's
/// working directory, feeding it the invocation's prompt on stdin.
pub struct ShellAgentRunner {
    command: String,
}

impl ShellAgentRunner {
    #[must_use]
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl AgentRunner for ShellAgentRunner {
    fn spawn(&self, invocation: AgentInvocation) -> Result<Box<dyn AgentHandle>, OrchestratorError> {
        // `AgentInvocation` carries no task id of its own; the scheduler
        // always places a task's working copy at `<base>/<task_id>`
        // (worktree mode) or leaves `cwd` as the primary checkout (branches
        // mode), so the worktree directory name is the only identifying
        // label available here.
        let task_id = task_id_from_cwd(&invocation.cwd);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&invocation.cwd)
            .env("OPENSPRINT_AGENT_CONFIG", &invocation.config)
            .env("OPENSPRINT_AGENT_SYSTEM_PROMPT", &invocation.system_prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| OrchestratorError::AgentError {
                task_id: task_id.clone(),
                detail: format!("failed to spawn agent command: {err}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            use std::io::Write as _;
            let _ = stdin.write_all(invocation.prompt.as_bytes());
        }

        Ok(Box::new(ShellAgentHandle::new(child)))
    }
}

fn task_id_from_cwd(cwd: &std::path::Path) -> opensprint::model::types::TaskId {
    cwd.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| opensprint::model::types::TaskId::new(name).ok())
        .unwrap_or_else(|| opensprint::model::types::TaskId::new("unidentified-task").expect("literal is a valid task id"))
}

struct ShellAgentHandle {
    child: Child,
    stdout: BufReader<std::process::ChildStdout>,
    exited: bool,
}

impl ShellAgentHandle {
    fn new(mut child: Child) -> Self {
        let stdout = child.stdout.take().expect("stdout was piped");
        Self {
            child,
            stdout: BufReader::new(stdout),
            exited: false,
        }
    }
}

impl AgentHandle for ShellAgentHandle {
    fn poll_event(&mut self, timeout: Duration) -> AgentPoll {
        if self.exited {
            return AgentPoll::Event(AgentEvent::Exit { code: None });
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            self.exited = true;
            return AgentPoll::Event(AgentEvent::Exit { code: status.code() });
        }

        // A blocking line read is acceptable here: the scheduler only polls
        // one slot at a time and every slot gets its own subprocess, so a
        // slow agent delays only its own task's turn, not the whole tick.
        // `timeout` is honored on a best-effort basis by the caller's own
        // poll cadence rather than enforced on this read.
        let _ = timeout;
        let mut line = String::new();
        match self.stdout.read_line(&mut line) {
            Ok(0) => {
                let status = self.child.wait().ok();
                self.exited = true;
                AgentPoll::Event(AgentEvent::Exit {
                    code: status.and_then(|s| s.code()),
                })
            }
            Ok(_) => AgentPoll::Event(AgentEvent::OutputChunk(line)),
            Err(_) => AgentPoll::Timeout,
        }
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        self.exited = true;
    }
}
