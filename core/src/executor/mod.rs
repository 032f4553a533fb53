//! Command executor module
//!
//! Runs sanitised commands through `sh -c` under the current user with a
//! bounded timeout.

pub mod safety;
pub mod sanitizer;

use async_trait::async_trait;
use safety::RiskLevel;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cap on captured stdout/stderr per stream.
pub const MAX_OUTPUT_SIZE: usize = 100_000; // 100KB max output

/// How a subprocess run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Process exited on its own (any exit code)
    Completed,
    /// Killed after the timeout elapsed
    TimedOut,
    /// The process could not be started
    SpawnFailed,
}

/// Raw result handed back by a [`CommandRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub outcome: ExecutionOutcome,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl RunOutput {
    pub fn completed(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Completed,
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed && self.exit_code == Some(0)
    }
}

/// One executed command, as recorded in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionAttempt {
    pub iteration: u32,
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub risk: RiskLevel,
    pub confirmed: bool,
    pub outcome: ExecutionOutcome,
}

impl ExecutionAttempt {
    pub fn from_output(
        iteration: u32,
        command: impl Into<String>,
        risk: RiskLevel,
        confirmed: bool,
        output: RunOutput,
    ) -> Self {
        Self {
            iteration,
            command: command.into(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration: output.duration,
            risk,
            confirmed,
            outcome: output.outcome,
        }
    }

    /// Check if execution was successful
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed && self.exit_code == Some(0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            output.push_str("\n--- stderr ---\n");
            output.push_str(&self.stderr);
        }
        output
    }
}

/// Runs a single command line.
///
/// Implementations never elevate privileges and must stop the process once
/// `timeout` elapses. `None` means no limit.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> RunOutput;
}

/// [`CommandRunner`] backed by `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    working_dir: Option<PathBuf>,
    max_output: usize,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            max_output: MAX_OUTPUT_SIZE,
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> RunOutput {
        let started = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down every descendant.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "failed to spawn command");
                return RunOutput {
                    outcome: ExecutionOutcome::SpawnFailed,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("failed to start '{}': {}", self.shell, e),
                    duration: started.elapsed(),
                };
            }
        };
        let pid = child.id();
        debug!(command, ?pid, ?timeout, "spawned command");

        let stdout = OutputReader::spawn(child.stdout.take(), self.max_output);
        let stderr = OutputReader::spawn(child.stderr.take(), self.max_output);

        let status = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        match status {
            Some(Ok(status)) => RunOutput {
                outcome: ExecutionOutcome::Completed,
                exit_code: status.code(),
                stdout: stdout.finish().await,
                stderr: stderr.finish().await,
                duration: started.elapsed(),
            },
            Some(Err(e)) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                RunOutput {
                    outcome: ExecutionOutcome::SpawnFailed,
                    exit_code: None,
                    stdout: stdout.finish().await,
                    stderr: format!("failed to wait for command: {}", e),
                    duration: started.elapsed(),
                }
            }
            None => {
                let limit = timeout.unwrap_or_default();
                warn!(command, ?pid, ?limit, "command timed out, killing process group");
                kill_process_group(pid);
                let _ = child.kill().await;

                let mut stderr = stderr.finish().await;
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("command timed out after {}s", limit.as_secs_f64()));
                RunOutput {
                    outcome: ExecutionOutcome::TimedOut,
                    exit_code: None,
                    stdout: stdout.finish().await,
                    stderr,
                    duration: started.elapsed(),
                }
            }
        }
    }
}

/// How long to keep draining a pipe after the shell is gone. Detached
/// descendants can hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Reads one pipe as it fills, keeping at most `max` bytes. The rest is
/// drained and dropped so the child never blocks on a full pipe.
struct OutputReader {
    captured: Arc<Mutex<Captured>>,
    task: Option<JoinHandle<()>>,
    max: usize,
}

impl OutputReader {
    fn spawn<R>(source: Option<R>, max: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let task = source.map(|mut reader| {
            let captured = captured.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    let n = match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let mut buf = captured.lock().unwrap_or_else(PoisonError::into_inner);
                    let take = max.saturating_sub(buf.bytes.len()).min(n);
                    buf.bytes.extend_from_slice(&chunk[..take]);
                    if take < n {
                        buf.truncated = true;
                    }
                }
            })
        });
        Self { captured, task, max }
    }

    /// Whatever was read so far, once the pipe closes or the grace period ends.
    async fn finish(mut self) -> String {
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
                abort.abort();
            }
        }
        let buf = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        cap_output(
            String::from_utf8_lossy(&buf.bytes).into_owned(),
            self.max,
            buf.truncated,
        )
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // process_group(0) makes the child its group leader, so pgid == pid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn cap_output(mut text: String, max: usize, truncated: bool) -> String {
    if truncated || text.len() > max {
        let mut cut = max.min(text.len());
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n... [output truncated]");
    }
    text
}
