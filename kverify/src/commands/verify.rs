//! `verify`, `setup-command` and `run-command`.

use super::helpers::{instance_identity, load_config, load_state};
use crate::InstanceArgs;
use anyhow::{Context, Result};
use kverify_common::{SshTransport, Verifier};
use std::path::Path;
use tracing::info;

fn build_verifier(
    config_path: Option<&Path>,
    args: &InstanceArgs,
) -> Result<Verifier<SshTransport>> {
    let config = load_config(config_path)?;
    let transport = SshTransport::new(config.transport.clone());
    Verifier::new(config, instance_identity(args), transport)
        .context("Failed to set up the verifier")
}

pub async fn verify(config_path: Option<&Path>, args: &InstanceArgs) -> Result<()> {
    let verifier = build_verifier(config_path, args)?;
    let state = load_state(args)?;
    verifier.call(&state).await?;
    info!("Verification passed for {}", verifier.instance());
    Ok(())
}

pub async fn setup_command(config_path: Option<&Path>, args: &InstanceArgs) -> Result<()> {
    let verifier = build_verifier(config_path, args)?;
    let state = load_state(args)?;
    if let Some(script) = verifier.setup_command(&state).await? {
        println!("{script}");
    }
    Ok(())
}

pub async fn run_command(config_path: Option<&Path>, args: &InstanceArgs) -> Result<()> {
    let verifier = build_verifier(config_path, args)?;
    let state = load_state(args)?;
    if let Some(script) = verifier.run_command(&state).await? {
        println!("{script}");
    }
    Ok(())
}
