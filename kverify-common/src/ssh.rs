//! SSH transport built on `openssh` (OpenSSH multiplexing master).

use crate::config::SshSettings;
use crate::state::{State, StateValue};
use crate::transport::{CommandOutput, Connection, Transport, TransportError};
use openssh::{KnownHosts, Session, SessionBuilder};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Connection parameters for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub hostname: String,
    pub username: String,
    pub port: u16,
    pub ssh_key: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SshTarget {
    /// Merge instance state over configured defaults. `hostname` must come
    /// from the state; `username`, `port` and `ssh_key` fall back to the
    /// settings.
    pub fn resolve(settings: &SshSettings, state: &State) -> Result<Self, TransportError> {
        let hostname = state
            .get_str("hostname")
            .filter(|h| !h.trim().is_empty())
            .ok_or(TransportError::MissingState { key: "hostname" })?
            .to_string();

        let username = state
            .get_str("username")
            .map(str::to_string)
            .unwrap_or_else(|| settings.username.clone());

        let port = match state.get("port") {
            None => settings.port,
            Some(value) => parse_port(value)?,
        };

        let ssh_key = state
            .get_str("ssh_key")
            .map(PathBuf::from)
            .or_else(|| settings.ssh_key.clone())
            .map(|key| expand_tilde(&key));

        Ok(Self {
            hostname,
            username,
            port,
            ssh_key,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        })
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.port)
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn parse_port(value: &StateValue) -> Result<u16, TransportError> {
    let invalid = || TransportError::InvalidState {
        key: "port",
        reason: format!("expected a TCP port, got '{value}'"),
    };
    match value {
        StateValue::Integer(n) => u16::try_from(*n).map_err(|_| invalid()),
        StateValue::String(s) => s.trim().parse::<u16>().map_err(|_| invalid()),
        StateValue::Bool(_) | StateValue::Float(_) => Err(invalid()),
    }
}

/// Transport opening one SSH master connection per verify call.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    settings: SshSettings,
}

impl SshTransport {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

impl Transport for SshTransport {
    type Connection = SshConnection;

    async fn connect(&self, state: &State) -> Result<SshConnection, TransportError> {
        let target = SshTarget::resolve(&self.settings, state)?;
        info!("Connecting to {}", target);

        let mut builder = SessionBuilder::default();
        builder
            .user(target.username.clone())
            .port(target.port)
            .connect_timeout(target.connect_timeout)
            .known_hosts_check(KnownHosts::Add);
        if let Some(key) = &target.ssh_key {
            builder.keyfile(key);
        }

        let session = builder
            .connect(&target.hostname)
            .await
            .map_err(|e| TransportError::Connect {
                target: target.to_string(),
                message: e.to_string(),
            })?;
        debug!("SSH master established for {}", target);

        Ok(SshConnection { session, target })
    }
}

/// An open SSH session. Dropping it tears the master down.
pub struct SshConnection {
    session: Session,
    target: SshTarget,
}

impl fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConnection")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Connection for SshConnection {
    async fn execute(&mut self, script: &str) -> Result<CommandOutput, TransportError> {
        let start = Instant::now();
        let output = self
            .session
            .command("sh")
            .arg("-c")
            .arg(script)
            .output()
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;

        let exit_code = output.status.code().ok_or(TransportError::Terminated)?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        };
        debug!(
            "Remote script on {} exited with {} in {}ms",
            self.target,
            exit_code,
            start.elapsed().as_millis()
        );

        if result.success() {
            Ok(result)
        } else {
            Err(TransportError::CommandFailed {
                exit_code,
                stdout: result.stdout,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }

    async fn close(self) -> Result<(), TransportError> {
        debug!("Closing SSH session to {}", self.target);
        self.session
            .close()
            .await
            .map_err(|e| TransportError::Session(e.to_string()))
    }
}
