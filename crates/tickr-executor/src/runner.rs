//! `ProcessExecutor` runs a script body in a child interpreter process.
//!
//! Each run gets its own process with piped stdout/stderr and a null stdin.
//! The child is awaited on a spawned task so an optional watchdog can race
//! against it without blocking the Tokio runtime.

use async_trait::async_trait;
use chrono::Utc;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use crate::{
    error::{ExecError, Result},
    truncate,
    types::{ExecOptions, ScriptOutput, ScriptType},
};

/// How long to wait for a killed child's pipes to drain.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How a spawned child ended.
enum Waited {
    Exited(Output),
    /// Killed by the watchdog. `partial` holds what it wrote before the kill,
    /// if the pipes closed within [`KILL_GRACE`].
    TimedOut { ms: u64, partial: Option<Output> },
}

/// Something that can run a script body and report what happened.
///
/// Implementations must not fail: every problem is reported inside the
/// returned [`ScriptOutput`].
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn run(&self, script_type: ScriptType, code: &str) -> ScriptOutput;
}

/// Executes scripts as local child processes.
pub struct ProcessExecutor {
    options: ExecOptions,
}

impl ProcessExecutor {
    pub fn new(options: ExecOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Spawn `<program> -c <code>` and wait for it, honouring the watchdog.
    ///
    /// # Errors
    ///
    /// - `Launch`: the interpreter could not be spawned.
    /// - `Io`: waiting on the child failed.
    /// - `WaitAborted`: the wait task vanished.
    async fn spawn_and_wait(&self, program: &str, code: &str) -> Result<Waited> {
        let child = AsyncCommand::new(program)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Launch {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        // `wait_with_output` consumes the child, so keep the PID for the
        // watchdog's kill path.
        let pid = child.id();
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        let waited = match self.options.timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(waited) => waited,
                Err(_elapsed) => {
                    if let Some(raw_pid) = pid {
                        kill_child(raw_pid);
                    }
                    // The wait task still owns the pipes; collect what the
                    // child wrote before the kill. A grandchild holding a pipe
                    // open can stall this, hence the bound.
                    let partial = match tokio::time::timeout(KILL_GRACE, rx).await {
                        Ok(Ok(Ok(output))) => Some(output),
                        _ => None,
                    };
                    return Ok(Waited::TimedOut {
                        ms: limit.as_millis() as u64,
                        partial,
                    });
                }
            },
        };

        match waited {
            Ok(Ok(output)) => Ok(Waited::Exited(output)),
            Ok(Err(e)) => Err(ExecError::Io(e)),
            Err(_recv_err) => Err(ExecError::WaitAborted),
        }
    }

    fn capture(&self, raw: &[u8]) -> String {
        let text = if self.options.strip_ansi {
            let clean = strip_ansi_escapes::strip(raw);
            String::from_utf8_lossy(&clean).into_owned()
        } else {
            String::from_utf8_lossy(raw).into_owned()
        };
        truncate::cap_output(text, self.options.max_output_chars)
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(ExecOptions::default())
    }
}

#[async_trait]
impl ScriptExecutor for ProcessExecutor {
    async fn run(&self, script_type: ScriptType, code: &str) -> ScriptOutput {
        let program = self.options.program_for(script_type).to_string();
        debug!(%script_type, %program, bytes = code.len(), "launching script");

        let started_at = Utc::now();
        let result = self.spawn_and_wait(&program, code).await;
        let ended_at = Utc::now();

        match result {
            Ok(Waited::Exited(output)) => {
                let stdout = self.capture(&output.stdout);
                let mut stderr = self.capture(&output.stderr);
                let exit_code = output.status.code();
                if exit_code.is_none() {
                    append_diagnostic(&mut stderr, &describe_abnormal_exit(&output.status));
                }
                ScriptOutput {
                    exit_code,
                    stdout,
                    stderr,
                    started_at,
                    ended_at,
                }
            }
            Ok(Waited::TimedOut { ms, partial }) => {
                warn!(%script_type, %program, timeout_ms = ms, "script killed by watchdog");
                let (stdout, mut stderr) = match partial {
                    Some(output) => (self.capture(&output.stdout), self.capture(&output.stderr)),
                    None => (String::new(), String::new()),
                };
                append_diagnostic(&mut stderr, &ExecError::Timeout { ms }.to_string());
                ScriptOutput {
                    exit_code: None,
                    stdout,
                    stderr,
                    started_at,
                    ended_at,
                }
            }
            Err(e) => {
                warn!(%script_type, %program, error = %e, "script did not complete");
                let mut stderr = String::new();
                append_diagnostic(&mut stderr, &e.to_string());
                ScriptOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr,
                    started_at,
                    ended_at,
                }
            }
        }
    }
}

/// Append a `[tickr] ...` line to captured stderr, on its own line.
fn append_diagnostic(stderr: &mut String, message: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str("[tickr] ");
    stderr.push_str(message);
    stderr.push('\n');
}

#[cfg(unix)]
fn describe_abnormal_exit(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("script terminated by signal {sig}"),
        None => "script exited without a status code".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_abnormal_exit(_status: &std::process::ExitStatus) -> String {
    "script exited without a status code".to_string()
}

fn kill_child(raw_pid: u32) {
    // We no longer own the Child handle, so signal the PID directly.
    #[cfg(unix)]
    // SAFETY: raw_pid is our direct child and has not been reaped yet; the
    // wait task still holds it.
    unsafe {
        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/F", "/PID", &raw_pid.to_string()])
            .output();
    }
}
