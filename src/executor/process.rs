//! Spawns external commands and enforces `submit`'s timeout and cancellation
//! (spec §4.4: "A cancelled execution sends a termination signal, waits up
//! to `gracePeriod` ms, then force-kills"). Grounded on the teacher's
//! `application::mcp_process_manager` (graceful-then-forced child shutdown),
//! reworked from `Child::start_kill` to an explicit `SIGTERM`-then-`SIGKILL`
//! sequence via `nix` so `submit`'s `gracePeriod` is honored exactly rather
//! than skipping straight to a forced kill.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{CoreError, CoreResult};

use super::{CancelHandle, CaptureMode};

type WaitFuture = Pin<Box<dyn std::future::Future<Output = std::io::Result<Output>> + Send>>;

/// What one process run produced, independent of retry bookkeeping.
pub(crate) struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Send `SIGTERM` to a known pid, best-effort (the process may have already
/// exited). Used by [`super::BackgroundExecutor::cancel`] for an
/// already-running execution.
pub(crate) fn request_termination(pid: i32) {
    if let Err(err) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, error = %err, "failed to signal process for cancellation");
    }
}

/// Spawn `command` and drive it to completion, racing the configured
/// timeout and the execution's [`CancelHandle`] against normal exit.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn spawn_and_wait(
    command: &str,
    args: &[String],
    cwd: Option<&Path>,
    env: &HashMap<String, String>,
    capture: CaptureMode,
    timeout_ms: Option<u64>,
    grace_period_ms: u64,
    cancel: &CancelHandle,
) -> CoreResult<ProcessOutcome> {
    if cancel.is_cancelled() {
        return Ok(ProcessOutcome { exit_code: None, stdout: String::new(), stderr: String::new(), timed_out: false, cancelled: true });
    }

    let mut cmd = Command::new(command);
    cmd.args(args).envs(env).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdout(if capture.wants_stdout() { Stdio::piped() } else { Stdio::null() });
    cmd.stderr(if capture.wants_stderr() { Stdio::piped() } else { Stdio::null() });

    let child = cmd.spawn().map_err(|err| CoreError::ValidationFailed(format!("failed to spawn {command}: {err}")))?;
    let pid = child.id().map(|id| id as i32);

    let mut wait_fut: WaitFuture = Box::pin(child.wait_with_output());
    let timeout_fut: Pin<Box<dyn std::future::Future<Output = ()> + Send>> = match timeout_ms {
        Some(ms) => Box::pin(sleep(Duration::from_millis(ms))),
        None => Box::pin(std::future::pending()),
    };
    tokio::pin!(timeout_fut);

    let (output, timed_out, cancelled) = tokio::select! {
        result = &mut wait_fut => {
            let output = result.map_err(|err| CoreError::ValidationFailed(format!("failed to wait on {command}: {err}")))?;
            (output, false, false)
        }
        () = &mut timeout_fut => {
            let output = terminate_and_wait(&mut wait_fut, pid, grace_period_ms, command).await?;
            (output, true, false)
        }
        () = cancel.notified() => {
            let output = terminate_and_wait(&mut wait_fut, pid, grace_period_ms, command).await?;
            (output, false, true)
        }
    };

    Ok(ProcessOutcome {
        exit_code: output.status.code(),
        stdout: if capture.wants_stdout() { String::from_utf8_lossy(&output.stdout).into_owned() } else { String::new() },
        stderr: if capture.wants_stderr() { String::from_utf8_lossy(&output.stderr).into_owned() } else { String::new() },
        timed_out,
        cancelled,
    })
}

/// `SIGTERM`, wait up to `grace_period_ms` for a natural exit, then
/// `SIGKILL` (spec §4.4).
async fn terminate_and_wait(wait_fut: &mut WaitFuture, pid: Option<i32>, grace_period_ms: u64, command: &str) -> CoreResult<Output> {
    if let Some(pid) = pid {
        request_termination(pid);
    }

    let grace = sleep(Duration::from_millis(grace_period_ms));
    tokio::pin!(grace);
    tokio::select! {
        result = &mut *wait_fut => {
            return result.map_err(|err| CoreError::ValidationFailed(format!("failed to wait on {command}: {err}")));
        }
        () = &mut grace => {}
    }

    if let Some(pid) = pid {
        if let Err(err) = signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
            warn!(pid, error = %err, "failed to force-kill process after grace period");
        }
    }

    wait_fut.as_mut().await.map_err(|err| CoreError::ValidationFailed(format!("failed to wait on {command}: {err}")))
}
