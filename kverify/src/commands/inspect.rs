//! `env` and `config`: read-only views of what a verify run would use.

use super::helpers::{instance_identity, load_config, load_state};
use crate::{ConfigFormat, InstanceArgs};
use anyhow::{Context, Result};
use kverify_common::{Environment, VerifierConfig, project_environment};
use std::path::Path;

pub fn print_env(config_path: Option<&Path>, args: &InstanceArgs, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let state = load_state(args)?;
    let projected = config
        .shellout_opts
        .merged_with(&project_environment(&instance_identity(args), &state))
        .environment;
    println!("{}", render_env(&projected, json)?);
    Ok(())
}

pub fn print_config(config_path: Option<&Path>, format: ConfigFormat) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", render_config(&config, format)?);
    Ok(())
}

fn render_env(env: &Environment, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string_pretty(env).context("Failed to serialize environment");
    }
    Ok(env
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn render_config(config: &VerifierConfig, format: ConfigFormat) -> Result<String> {
    match format {
        ConfigFormat::Toml => {
            toml::to_string_pretty(config).context("Failed to serialize configuration as TOML")
        }
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to serialize configuration as JSON")
        }
    }
}
