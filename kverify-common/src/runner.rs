//! Runner script: one RSpec invocation per configured pattern.

use crate::config::VerifierConfig;
use crate::installer::missing_default_path;
use crate::script::{Condition, Script, ShellStep, quote};
use tracing::{debug, info};

/// Builds the runner script from a validated configuration.
#[derive(Debug, Clone, Copy)]
pub struct RunnerBuilder<'a> {
    config: &'a VerifierConfig,
}

impl<'a> RunnerBuilder<'a> {
    pub fn new(config: &'a VerifierConfig) -> Self {
        Self { config }
    }

    /// Assemble the script.
    ///
    /// A configured `serverspec_command` replaces the whole script. Otherwise
    /// the script changes into `default_path` and runs each pattern in order;
    /// the first failing pattern exits with RSpec's status, so the optional
    /// `default_path` removal only happens after every pattern passed.
    pub fn build(&self) -> Script {
        if let Some(command) = &self.config.serverspec_command {
            debug!("Using configured serverspec_command as runner script");
            return Script::verbatim(command.clone());
        }

        info!("Running Serverspec");
        let target_dir = self.config.target_dir().to_string();

        let mut then = vec![ShellStep::ChangeDir(target_dir.clone())];
        then.extend(
            self.config
                .patterns
                .iter()
                .map(|pattern| ShellStep::RunOrExit(self.rspec_invocation(pattern))),
        );

        let mut script = Script::new(self.config.elevation());
        script.push(ShellStep::If {
            condition: Condition::DirExists(target_dir.clone()),
            then,
            otherwise: vec![missing_default_path(&target_dir)],
        });

        if self.config.remove_default_path {
            info!("Removing default path after verification");
            script.push(ShellStep::RemoveDir(target_dir));
        }
        script
    }

    /// The RSpec command line for a single pattern.
    pub fn rspec_invocation(&self, pattern: &str) -> String {
        let mut parts = vec!["rspec".to_string()];
        if self.config.color {
            parts.push("-c".to_string());
        }
        parts.push(format!("-f {}", quote(&self.config.format)));
        parts.push(format!("--default-path {}", quote(self.config.target_dir())));
        if let Some(flags) = self
            .config
            .extra_flags
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
        {
            parts.push(flags.to_string());
        }
        parts.push(format!("-P {}", quote(pattern)));
        parts.join(" ")
    }
}
