//! Errors surfaced by the verify dispatcher.

use crate::config::ConfigError;
use crate::shellout::ShellOutError;
use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifierError {
    /// Verification ran on the instance and failed.
    #[error("Action #verify failed for {instance}.")]
    ActionFailed {
        instance: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The local Gemfile could not be read while generating the install
    /// script; nothing has touched the target yet.
    #[error("Failed to read gemfile {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connecting to or disconnecting from the instance failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The local command could not be run at all.
    #[error(transparent)]
    ShellOut(#[from] ShellOutError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifierError {
    pub fn action_failed(
        instance: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ActionFailed {
            instance: instance.into(),
            source: source.into(),
        }
    }

    /// Whether the failure came from the verification itself rather than
    /// from configuration or connectivity.
    pub fn is_action_failure(&self) -> bool {
        matches!(self, Self::ActionFailed { .. })
    }
}
