//! Install script: Ruby, Bundler and Serverspec on the instance.
//!
//! The generated script is safe to re-run. Each install sits behind a guard
//! that short-circuits once the tool is present:
//!
//! 1. `default_path` must exist, otherwise the script fails before touching
//!    anything.
//! 2. Ruby is installed with the platform's package manager when missing
//!    (yum on RHEL-family and Amazon Linux, apt-get elsewhere).
//! 3. Bundler is installed when `gem list -i bundler` says it is absent.
//! 4. The Gemfile is rebuilt and dependencies installed, optionally only
//!    when Serverspec is not already installed.

use crate::config::VerifierConfig;
use crate::error::VerifierError;
use crate::script::{Condition, Script, ShellStep, quote};
use std::path::Path;
use tracing::{debug, info};

/// Marker files identifying the yum package family.
pub const YUM_RELEASE_FILES: [&str; 4] = [
    "/etc/centos-release",
    "/etc/redhat-release",
    "/etc/oracle-release",
    "/etc/system-release",
];

/// Release file probed for the Amazon Linux marker.
pub const OS_RELEASE_FILE: &str = "/etc/os-release";
pub const AMAZON_LINUX_MARKER: &str = "Amazon Linux";

/// Gemfile synthesized when no `gemfile` is configured.
pub const DEFAULT_MANIFEST: [&str; 3] = [
    "source 'https://rubygems.org'",
    "gem 'net-ssh','~> 2.9'",
    "gem 'serverspec'",
];

/// Builds the install script from a validated configuration.
#[derive(Debug, Clone, Copy)]
pub struct InstallerBuilder<'a> {
    config: &'a VerifierConfig,
}

impl<'a> InstallerBuilder<'a> {
    pub fn new(config: &'a VerifierConfig) -> Self {
        Self { config }
    }

    /// Assemble the script. Reads the local `gemfile` if one is configured,
    /// so an unreadable file fails here, before any target interaction.
    pub fn build(&self) -> Result<Script, VerifierError> {
        info!("Installing ruby, bundler and serverspec");
        let target_dir = self.config.target_dir().to_string();

        let mut then = vec![self.ruby_step(), self.bundler_step()];
        then.extend(self.serverspec_steps()?);

        let mut script = Script::new(self.config.elevation());
        script.push(ShellStep::If {
            condition: Condition::DirExists(target_dir.clone()),
            then,
            otherwise: vec![missing_default_path(&target_dir)],
        });
        Ok(script)
    }

    /// Install Ruby through the detected package family when absent.
    pub fn ruby_step(&self) -> ShellStep {
        let mut yum_markers: Vec<Condition> = YUM_RELEASE_FILES
            .iter()
            .map(|path| Condition::FileExists((*path).to_string()))
            .collect();
        yum_markers.push(Condition::FileContains {
            path: OS_RELEASE_FILE.to_string(),
            needle: AMAZON_LINUX_MARKER.to_string(),
        });

        ShellStep::when(
            Condition::CommandMissing("ruby".to_string()),
            vec![
                ShellStep::Echo("-----> Installing ruby, will try to determine platform os".into()),
                ShellStep::If {
                    condition: Condition::Any(yum_markers),
                    then: vec![ShellStep::Privileged("yum -y install ruby".into())],
                    otherwise: vec![ShellStep::Privileged("apt-get -y install ruby".into())],
                },
            ],
        )
    }

    /// Install Bundler unless already listed as installed.
    pub fn bundler_step(&self) -> ShellStep {
        let mut install = String::from("gem install");
        if let Some(proxy) = &self.config.http_proxy {
            install.push_str(&format!(" --http-proxy {}", quote(proxy)));
        }
        install.push_str(" --no-document bundler");

        ShellStep::when(
            Condition::GemMissing("bundler".into()),
            vec![ShellStep::Privileged(install)],
        )
    }

    /// Rebuild the Gemfile and install dependencies, optionally guarded by
    /// an "is Serverspec installed" check.
    pub fn serverspec_steps(&self) -> Result<Vec<ShellStep>, VerifierError> {
        let manifest_path = self.config.manifest_path();
        let mut steps = self.manifest_steps()?;
        steps.push(ShellStep::Privileged(format!(
            "{} --gemfile={}",
            self.config.install_command.trim(),
            quote(&manifest_path)
        )));

        if self.config.test_serverspec_installed {
            Ok(vec![ShellStep::when(
                Condition::GemMissing("serverspec".into()),
                steps,
            )])
        } else {
            Ok(steps)
        }
    }

    /// One removal of the target Gemfile, then one append per manifest line.
    pub fn manifest_steps(&self) -> Result<Vec<ShellStep>, VerifierError> {
        let manifest_path = self.config.manifest_path();
        let lines = match &self.config.gemfile {
            Some(path) => read_manifest_lines(path)?,
            None => DEFAULT_MANIFEST.iter().map(|l| (*l).to_string()).collect(),
        };
        debug!("Transcribing {} Gemfile lines to {}", lines.len(), manifest_path);

        let mut steps = Vec::with_capacity(lines.len() + 1);
        steps.push(ShellStep::RemoveFile(manifest_path.clone()));
        steps.extend(lines.into_iter().map(|line| ShellStep::AppendLine {
            path: manifest_path.clone(),
            line,
        }));
        Ok(steps)
    }
}

/// Read a local Gemfile line by line. Lines are split on `\n` only, so a
/// CRLF file keeps its `\r` and is rebuilt byte for byte.
pub fn read_manifest_lines(path: &Path) -> Result<Vec<String>, VerifierError> {
    let content = std::fs::read_to_string(path).map_err(|source| VerifierError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;
    if content.is_empty() {
        return Ok(Vec::new());
    }
    let body = content.strip_suffix('\n').unwrap_or(&content);
    Ok(body.split('\n').map(str::to_string).collect())
}

/// Diagnostic-and-exit branch shared by the install and run scripts.
pub(crate) fn missing_default_path(target_dir: &str) -> ShellStep {
    ShellStep::Fail {
        message: format!("ERROR: Default path '{}' does not exist", target_dir),
        code: 1,
    }
}
