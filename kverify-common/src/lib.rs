//! Shared library for kverify.
//!
//! Turns a declarative verifier configuration into ordered, idempotent shell
//! scripts (install Ruby, Bundler and Serverspec, then run RSpec patterns),
//! projects kitchen instance state into `KITCHEN_*` environment variables,
//! and dispatches the scripts either over a [`Transport`] or as a local
//! shell-out.

pub mod config;
pub mod environment;
pub mod error;
pub mod installer;
pub mod logging;
pub mod mock;
pub mod output;
pub mod runner;
pub mod script;
pub mod shellout;
#[cfg(unix)]
pub mod ssh;
pub mod state;
pub mod testing;
pub mod transport;
pub mod util;
pub mod verifier;

pub use config::{ConfigError, SshSettings, VerifierConfig};
pub use environment::{Environment, project_environment, project_into};
pub use error::VerifierError;
pub use installer::InstallerBuilder;
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use mock::MockTransport;
pub use output::{CapturedOutput, OutputSink};
pub use runner::RunnerBuilder;
pub use script::{Condition, Elevation, Script, ShellStep};
pub use shellout::{ShellCommandFailed, ShellOut, ShellOutError, ShellOutOptions, ShellOutResult};
#[cfg(unix)]
pub use ssh::{SshConnection, SshTarget, SshTransport};
pub use state::{InstanceIdentity, State, StateError, StateValue};
pub use transport::{CommandOutput, Connection, Transport, TransportError};
pub use util::mask_sensitive_command;
pub use verifier::Verifier;
