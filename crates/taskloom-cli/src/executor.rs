// src/executor.rs

//! Executor that runs a task's `payload.command` through the shell.

use std::collections::VecDeque;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskloom_core::domain::{Outcome, Task, TaskId};
use taskloom_core::ports::Executor;

/// stderr lines kept for the failure detail.
const STDERR_TAIL: usize = 10;

/// Runs `{"command": "..."}` payloads with `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// The shell command stored in a task payload.
pub fn command_of(task: &Task) -> Option<&str> {
    task.payload.get("command").and_then(|v| v.as_str())
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, task: &Task, cancel: CancellationToken) -> Outcome {
        let Some(cmd) = command_of(task) else {
            warn!(task = %task.id, "payload has no command");
            return Outcome::failure("payload has no \"command\" string");
        };

        // Spawn / wait errors become a failed attempt; the scheduler retries.
        match run_command(task, cmd, cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(task = %task.id, error = %err, "task execution error");
                Outcome::failure(format!("{err:#}"))
            }
        }
    }
}

async fn run_command(task: &Task, cmd: &str, cancel: CancellationToken) -> Result<Outcome> {
    info!(task = %task.id, cmd = %cmd, "starting task process");

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.title))?;

    // Always consume both pipes so buffers don't fill.
    if let Some(stdout) = child.stdout.take() {
        let id = task.id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(task = %id, "stdout: {}", line);
            }
        });
    }
    let stderr = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(stderr_tail(task.id, stderr)));

    let status = tokio::select! {
        status = child.wait() => status
            .with_context(|| format!("waiting for process of task '{}'", task.title))?,
        _ = cancel.cancelled() => {
            child
                .kill()
                .await
                .with_context(|| format!("killing process of task '{}'", task.title))?;
            warn!(task = %task.id, "task process killed on cancellation");
            return Ok(Outcome::cancelled());
        }
    };

    let code = status.code().unwrap_or(-1);
    info!(
        task = %task.id,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if status.success() {
        return Ok(Outcome::success());
    }
    let tail = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    let detail = if tail.is_empty() {
        format!("exit code {code}")
    } else {
        format!("exit code {code}: {tail}")
    };
    Ok(Outcome::failure(detail))
}

async fn stderr_tail<R>(id: TaskId, stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(task = %id, "stderr: {}", line);
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use taskloom_core::domain::{NewTask, OutcomeKind};

    fn task(command: serde_json::Value) -> Task {
        let new = NewTask::once("shell", Utc::now()).with_payload(command);
        Task::from_new(TaskId::new(1), new, Utc::now())
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let outcome = ShellExecutor::new()
            .run(&task(json!({"command": "true"})), CancellationToken::new())
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Success);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_code_and_stderr() {
        let outcome = ShellExecutor::new()
            .run(
                &task(json!({"command": "echo disk full >&2; exit 3"})),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert_eq!(outcome.detail.as_deref(), Some("exit code 3: disk full"));
    }

    #[tokio::test]
    async fn missing_command_fails_without_spawning() {
        let outcome = ShellExecutor::new()
            .run(&task(json!({"cmd": "true"})), CancellationToken::new())
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Failure);
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            ShellExecutor::new().run(&task(json!({"command": "sleep 30"})), cancel),
        )
        .await
        .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    }
}
