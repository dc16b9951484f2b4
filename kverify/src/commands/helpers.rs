//! Shared helper functions for kverify commands.

use crate::InstanceArgs;
use anyhow::{Context, Result};
use kverify_common::{InstanceIdentity, State, VerifierConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory where kitchen keeps per-instance state files.
pub const KITCHEN_STATE_DIR: &str = ".kitchen";

/// Load, override and validate the configuration.
pub fn load_config(explicit: Option<&Path>) -> Result<VerifierConfig> {
    VerifierConfig::load(explicit).context("Failed to load kverify configuration")
}

/// Build the instance identity. Platform and suite default to the halves of
/// a `<suite>-<platform>` instance name.
pub fn instance_identity(args: &InstanceArgs) -> InstanceIdentity {
    let (derived_suite, derived_platform) = args
        .instance
        .split_once('-')
        .unwrap_or((args.instance.as_str(), args.instance.as_str()));
    InstanceIdentity::new(
        args.instance.clone(),
        args.platform.clone().unwrap_or_else(|| derived_platform.to_string()),
        args.suite.clone().unwrap_or_else(|| derived_suite.to_string()),
    )
}

/// Default state file location for an instance.
pub fn default_state_path(instance: &str) -> PathBuf {
    Path::new(KITCHEN_STATE_DIR).join(format!("{instance}.yml"))
}

/// Load the instance state. An explicit path must exist; the default path
/// is optional and an empty state is used without it.
pub fn load_state(args: &InstanceArgs) -> Result<State> {
    if let Some(path) = &args.state {
        return State::from_path(path)
            .with_context(|| format!("Failed to load state file {}", path.display()));
    }

    let path = default_state_path(&args.instance);
    if path.is_file() {
        State::from_path(&path)
            .with_context(|| format!("Failed to load state file {}", path.display()))
    } else {
        debug!("No state file at {}, using empty state", path.display());
        Ok(State::new())
    }
}
