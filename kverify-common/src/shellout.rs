//! Local command execution.
//!
//! Runs a command line through `sh -c`, streaming stdout and stderr line by
//! line to an [`OutputSink`] while capturing both. A non-zero exit is only
//! an error once the caller asks for it via [`ShellOutResult::error`].

use crate::environment::Environment;
use crate::output::OutputSink;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 600;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Options for a local shell-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellOutOptions {
    /// Extra environment variables for the child process.
    pub environment: Environment,
    /// Working directory; inherits the current one when unset.
    pub cwd: Option<PathBuf>,
    /// Kill the command after this many seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShellOutOptions {
    fn default() -> Self {
        Self {
            environment: Environment::new(),
            cwd: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ShellOutOptions {
    /// Return a copy with `overlay` merged into the environment. Keys from
    /// `overlay` win on collision.
    #[must_use]
    pub fn merged_with(&self, overlay: &Environment) -> Self {
        let mut merged = self.clone();
        for (key, value) in overlay {
            merged.environment.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Errors that prevent a command from producing an exit status.
#[derive(Debug, Error)]
pub enum ShellOutError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command that exited unsuccessfully.
#[derive(Debug, Clone, Error)]
#[error(
    "Expected process to exit with 0, but received '{exit}'\n---- Begin output of {command} ----\nSTDOUT: {stdout}\nSTDERR: {stderr}\n---- End output of {command} ----"
)]
pub struct ShellCommandFailed {
    pub command: String,
    /// Exit code, or `signal` when the process was killed.
    pub exit: String,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutResult {
    pub command: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ShellOutResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into an error.
    pub fn error(&self) -> Result<(), ShellCommandFailed> {
        if self.success() {
            return Ok(());
        }
        Err(ShellCommandFailed {
            command: self.command.clone(),
            exit: self
                .exit_code
                .map_or_else(|| "signal".to_string(), |code| code.to_string()),
            stdout: self.stdout.trim_end().to_string(),
            stderr: self.stderr.trim_end().to_string(),
        })
    }
}

/// A local command ready to run.
#[derive(Debug, Clone)]
pub struct ShellOut {
    command: String,
    options: ShellOutOptions,
}

impl ShellOut {
    pub fn new(command: impl Into<String>, options: ShellOutOptions) -> Self {
        Self {
            command: command.into(),
            options,
        }
    }

    /// Run the command to completion, streaming its output to `live`.
    pub async fn run(&self, live: &OutputSink) -> Result<ShellOutResult, ShellOutError> {
        debug!(
            "Running local command: {}",
            crate::util::mask_sensitive_command(&self.command)
        );
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .envs(&self.options.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.options.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ShellOutError::Spawn {
            command: self.command.clone(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let timeout = Duration::from_secs(self.options.timeout_secs);
        let outcome = tokio::time::timeout(timeout, async {
            let (out, err) = tokio::join!(pump(stdout, live), pump(stderr, live));
            let status = child.wait().await;
            (out, err, status)
        })
        .await;

        let (stdout, stderr, status) = match outcome {
            Ok(finished) => finished,
            Err(_) => {
                warn!(
                    "Command timed out after {}s, killing it",
                    self.options.timeout_secs
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ShellOutError::Timeout {
                    command: self.command.clone(),
                    timeout_secs: self.options.timeout_secs,
                });
            }
        };

        let status = status?;
        let result = ShellOutResult {
            command: self.command.clone(),
            exit_code: status.code(),
            stdout: stdout?,
            stderr: stderr?,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            "Local command finished with {:?} in {}ms",
            result.exit_code, result.duration_ms
        );
        Ok(result)
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    live: &OutputSink,
) -> std::io::Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        // Output is not guaranteed to be UTF-8.
        let chunk = String::from_utf8_lossy(&buf);
        let line = chunk.strip_suffix('\n').unwrap_or(&chunk);
        let line = line.strip_suffix('\r').unwrap_or(line);
        live.write_line(line)?;
        captured.push_str(line);
        captured.push('\n');
    }
    Ok(captured)
}
