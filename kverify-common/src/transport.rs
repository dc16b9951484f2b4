//! Transport abstraction: how scripts reach the instance.
//!
//! A [`Transport`] opens one [`Connection`] per verify call. Connections are
//! scoped: callers close them explicitly on every returned path, and
//! implementations release their resources on `Drop` when the enclosing
//! future is cancelled.

use crate::state::State;
use std::future::Future;
use thiserror::Error;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Instance state is missing required key '{key}'")]
    MissingState { key: &'static str },

    #[error("Invalid instance state value for '{key}': {reason}")]
    InvalidState { key: &'static str, reason: String },

    #[error("Failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    /// The script ran and exited non-zero. Output is kept so the caller
    /// can still show the report.
    #[error("Remote command exited with code {exit_code}: {stderr}")]
    CommandFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The remote command was killed by a signal.
    #[error("Remote command terminated without an exit code")]
    Terminated,

    #[error("Transport session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory for connections to an instance described by its state.
pub trait Transport: Send + Sync {
    type Connection: Connection;

    fn connect(
        &self,
        state: &State,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// An open connection to an instance.
pub trait Connection: Send {
    /// Run a shell script. A non-zero exit is reported as
    /// [`TransportError::CommandFailed`].
    fn execute(
        &mut self,
        script: &str,
    ) -> impl Future<Output = Result<CommandOutput, TransportError>> + Send;

    /// Release the connection.
    fn close(self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput::default();
        assert!(ok.success());
        let failed = CommandOutput {
            exit_code: 2,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_command_failed_message() {
        let err = TransportError::CommandFailed {
            exit_code: 1,
            stdout: String::new(),
            stderr: "ERROR: Default path '/tmp/kitchen' does not exist".into(),
        };
        assert_eq!(
            err.to_string(),
            "Remote command exited with code 1: ERROR: Default path '/tmp/kitchen' does not exist"
        );
    }
}
