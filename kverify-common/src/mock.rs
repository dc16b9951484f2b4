//! Deterministic in-memory transport for dispatcher tests.
//!
//! Records every connect, executed script and close, and replays scripted
//! command results FIFO. An unscripted execute succeeds with empty output.

use crate::state::State;
use crate::transport::{CommandOutput, Connection, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    connect_failure: Option<String>,
    scripted_results: VecDeque<Result<CommandOutput, TransportError>>,
    executed: Vec<String>,
    connected_states: Vec<State>,
    connects: usize,
    closes: usize,
    drops_without_close: usize,
    open: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent connect fail with the given message.
    pub fn fail_connect(&self, message: impl Into<String>) {
        self.state().connect_failure = Some(message.into());
    }

    /// Append a scripted execute result. Results are consumed FIFO.
    pub fn push_result(&self, result: Result<CommandOutput, TransportError>) {
        self.state().scripted_results.push_back(result);
    }

    /// Append a scripted command exit. Non-zero exits surface as
    /// [`TransportError::CommandFailed`].
    pub fn push_exit(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.push_result(Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }));
    }

    /// Snapshot of executed scripts, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Snapshot of the states passed to `connect`.
    #[must_use]
    pub fn connected_states(&self) -> Vec<State> {
        self.state().connected_states.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Connections dropped without an explicit close.
    pub fn dropped_count(&self) -> usize {
        self.state().drops_without_close
    }

    /// Connections neither closed nor dropped.
    pub fn open_connections(&self) -> usize {
        self.state().open
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn connect(&self, state: &State) -> Result<MockConnection, TransportError> {
        let mut inner = self.state();
        inner.connected_states.push(state.clone());
        if let Some(message) = &inner.connect_failure {
            return Err(TransportError::Connect {
                target: "mock".to_string(),
                message: message.clone(),
            });
        }
        inner.connects += 1;
        inner.open += 1;
        Ok(MockConnection {
            inner: Arc::clone(&self.inner),
            closed: false,
        })
    }
}

/// Connection handed out by [`MockTransport`].
#[derive(Debug)]
pub struct MockConnection {
    inner: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockConnection {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connection for MockConnection {
    async fn execute(&mut self, script: &str) -> Result<CommandOutput, TransportError> {
        let mut inner = self.state();
        inner.executed.push(script.to_string());
        match inner.scripted_results.pop_front() {
            None => Ok(CommandOutput::default()),
            Some(Ok(output)) if !output.success() => Err(TransportError::CommandFailed {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            Some(result) => result,
        }
    }

    async fn close(mut self) -> Result<(), TransportError> {
        self.closed = true;
        let mut inner = self.state();
        inner.closes += 1;
        inner.open = inner.open.saturating_sub(1);
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let mut inner = self.state();
        inner.drops_without_close += 1;
        inner.open = inner.open.saturating_sub(1);
    }
}
