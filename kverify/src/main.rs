//! kverify - Serverspec verifier for kitchen instances.
//!
//! Installs Ruby, Bundler and Serverspec on a provisioned instance and runs
//! the configured RSpec patterns against it, or runs a local verification
//! command with the instance exported as `KITCHEN_*` variables.

#![forbid(unsafe_code)]

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use kverify_common::{LogConfig, init_logging};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kverify")]
#[command(author, version, about = "Serverspec verifier for kitchen instances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./.kverify.toml, then the user config dir)
    #[arg(short, long, global = true, env = "KVERIFY_CONFIG")]
    config: Option<PathBuf>,
}

/// Identifies the instance under verification.
#[derive(Args, Debug, Clone)]
pub struct InstanceArgs {
    /// Instance name, usually `<suite>-<platform>`
    #[arg(short, long)]
    pub instance: String,

    /// Platform name (derived from the instance name when omitted)
    #[arg(long)]
    pub platform: Option<String>,

    /// Suite name (derived from the instance name when omitted)
    #[arg(long)]
    pub suite: Option<String>,

    /// Instance state file, YAML or JSON (defaults to `.kitchen/<instance>.yml`)
    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Install Serverspec on the instance and run the configured patterns
    Verify {
        #[command(flatten)]
        instance: InstanceArgs,
    },

    /// Print the install script (runs the local command in local mode)
    SetupCommand {
        #[command(flatten)]
        instance: InstanceArgs,
    },

    /// Print the runner script (runs the local command in local mode)
    RunCommand {
        #[command(flatten)]
        instance: InstanceArgs,
    },

    /// Print the KITCHEN_* environment projected for an instance
    Env {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        #[arg(long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Verify { instance } => commands::verify(config_path, &instance).await,
        Commands::SetupCommand { instance } => {
            commands::setup_command(config_path, &instance).await
        }
        Commands::RunCommand { instance } => commands::run_command(config_path, &instance).await,
        Commands::Env { instance, json } => commands::print_env(config_path, &instance, json),
        Commands::Config { format } => commands::print_config(config_path, format),
    }
}
